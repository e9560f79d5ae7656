use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup contract violations (no transport, more than one transport).
    #[error("daemon configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(#[from] sibyl_store::StoreError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
