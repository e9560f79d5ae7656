use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResearchError {
    /// A local-corpus mode produced zero content-bearing documents. The turn
    /// halts; there is no silent fallback to web or memory.
    #[error("expected local corpus, zero local documents ingested")]
    CorpusMissing,

    #[error("store error: {0}")]
    Store(#[from] sibyl_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] sibyl_index::IndexError),

    #[error("adapter error: {0}")]
    Adapter(#[from] sibyl_adapters::AdapterError),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
