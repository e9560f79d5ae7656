use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Message {id} not found")]
    MessageNotFound { id: i64 },

    #[error("Session '{term}' not found")]
    SessionNotFound { term: String },

    #[error("Session name '{name}' already exists")]
    DuplicateSession { name: String },

    #[error("Memory {id} not found")]
    MemoryNotFound { id: i64 },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
