use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Chunk ordinals for document '{document_id}' are not strictly increasing")]
    NonMonotonicOrdinals { document_id: String },

    #[error("Query vector has dimension {got}, index expects {expected}")]
    DimensionMismatch { got: usize, expected: usize },
}

pub type Result<T> = std::result::Result<T, IndexError>;
