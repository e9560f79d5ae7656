//! Preload pipeline: query classification and expansion, local corpus
//! ingestion behind a root guard, the shortlist policy ladder, bootstrap
//! retrieval, and optional evidence extraction.
//!
//! Everything here runs before the first main-model call of a turn.

mod classify;
mod error;
mod ingest;
mod keywords;
mod pipeline;
mod shortlist;

pub use classify::{classify_query, QueryClass};
pub use error::{ResearchError, Result};
pub use ingest::{document_id_for_path, IngestReport, Ingestor};
pub use keywords::{expand_subqueries, extract_keywords};
pub use pipeline::{PreloadOutcome, PreloadPipeline};
pub use shortlist::{decide_shortlist, score_candidates, ScoredCandidate, ShortlistDecision};
