use async_trait::async_trait;

use crate::error::AdapterError;

/// One web search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Query → ranked results. The concrete engine lives outside the core; the
/// shortlist pipeline and the `web_search` tool only see this trait.
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, AdapterError>;
}

/// Searcher that always returns nothing — used when no engine is configured.
pub struct NullSearcher;

#[async_trait]
impl WebSearcher for NullSearcher {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>, AdapterError> {
        Ok(Vec::new())
    }
}
