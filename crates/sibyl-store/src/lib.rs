//! Durable history store: messages, sessions, cross-session user memories,
//! media transcripts, and the daemon's room→session bindings.
//!
//! One SQLite connection behind a mutex; every multi-row operation runs in a
//! transaction and fails atomically.

mod db;
mod error;
mod store;
mod types;

pub use error::{Result, StoreError};
pub use store::HistoryStore;
pub use types::{
    FindingRow, MemoryRow, MessageFilter, MessageRow, SessionRow, TranscriptKind, TranscriptRow,
};
