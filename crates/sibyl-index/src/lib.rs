//! Hybrid retrieval over document chunks.
//!
//! Two cooperating indexes — unit-normalized dense vectors under cosine
//! similarity and a BM25 inverted index over chunk tokens — combined by a
//! fixed convex weighting. Chunk rows persist in SQLite; both indexes are
//! rebuilt into memory on open.

mod bm25;
mod error;
mod index;
mod types;

pub use bm25::tokenize;
pub use error::{IndexError, Result};
pub use index::VectorIndex;
pub use types::{Chunk, RankedChunk, SearchFilters};

/// Weight of the dense (cosine) score in the hybrid combination.
pub const DENSE_WEIGHT: f32 = 0.75;
/// Weight of the lexical (BM25) score in the hybrid combination.
pub const LEXICAL_WEIGHT: f32 = 0.25;
