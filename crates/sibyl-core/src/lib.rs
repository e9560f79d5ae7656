//! Shared foundation for the sibyl workspace: configuration snapshot,
//! error taxonomy, and the request/result types every subsystem speaks.

pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod selector;
pub mod types;
pub mod vectors;

pub use config::SibylConfig;
pub use error::{Result, SibylError};
pub use handle::CorpusHandle;
pub use selector::Selector;
