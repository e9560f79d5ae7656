//! Pure-interface collaborators: the LLM, embedding, chunking, fetching and
//! file-reading adapters, plus the default implementations shipped with the
//! workspace (OpenAI-compatible chat, plain HTTP fetcher, budget chunker,
//! hashing embedder).

mod chunker;
mod embed;
mod error;
mod file;
mod fetch;
mod llm;
mod openai;
mod retry;
mod search;

pub use chunker::{approx_tokens, BudgetChunker, ChunkPiece, Chunker};
pub use embed::{EmbeddingAdapter, HashEmbedder};
pub use error::AdapterError;
pub use fetch::{source_id_for, FetchRequest, FetchedPage, Fetcher, HttpFetcher, OutputFormat};
pub use file::{FileAdapter, FileKind, PlainFileAdapter};
pub use llm::{
    ChatMessage, GenerationParams, LlmAdapter, LlmError, LlmErrorKind, ToolCallRequest, ToolSchema,
};
pub use openai::OpenAiChatAdapter;
pub use retry::RetryingLlm;
pub use search::{NullSearcher, SearchHit, WebSearcher};
