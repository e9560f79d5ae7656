use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One contiguous text segment of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    /// Position within the document; strictly increasing per document.
    pub ordinal: u32,
    pub text: String,
    pub token_count: u32,
    pub section_id: Option<String>,
    /// Unit-normalized dense embedding.
    pub vector: Vec<f32>,
    /// Original source handle this chunk came from.
    pub provenance: String,
}

/// Optional scope restrictions for a search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub document_ids: Option<HashSet<String>>,
    pub section_ids: Option<HashSet<String>>,
}

impl SearchFilters {
    pub fn documents<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_ids: Some(ids.into_iter().map(Into::into).collect()),
            section_ids: None,
        }
    }

    pub(crate) fn admits(&self, document_id: &str, section_id: Option<&str>) -> bool {
        if let Some(docs) = &self.document_ids {
            if !docs.contains(document_id) {
                return false;
            }
        }
        if let Some(sections) = &self.section_ids {
            match section_id {
                Some(s) if sections.contains(s) => {}
                _ => return false,
            }
        }
        true
    }
}

/// One search hit with its combined score.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub dense_score: f32,
    pub lexical_score: f32,
}
