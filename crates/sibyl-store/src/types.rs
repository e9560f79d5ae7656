use serde::{Deserialize, Serialize};

use sibyl_core::types::{ResearchProfile, Role};

/// One persisted message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: i64,
    pub session_id: Option<i64>,
    pub role: Role,
    pub content: String,
    pub summary: Option<String>,
    pub model: Option<String>,
    pub token_count: u32,
    pub created_at: String,
}

/// Restriction applied by `list_messages`.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// `Some(None)` selects the null-session global pool;
    /// `Some(Some(id))` selects one session; `None` selects everything.
    pub session: Option<Option<i64>>,
    pub role: Option<Role>,
}

/// One persisted session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub name: String,
    pub default_model: Option<String>,
    pub created_at: String,
    pub last_used_at: String,
    pub compacted_summary: Option<String>,
    /// Highest message id covered by the compacted summary.
    pub compacted_through: Option<i64>,
    pub memory_auto_extract: bool,
    pub max_turns_override: Option<u32>,
    pub profile: ResearchProfile,
}

/// One cross-session user memory.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub id: i64,
    pub text: String,
    pub created_at: String,
    pub vector: Vec<f32>,
}

/// One session-scoped research finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRow {
    pub id: i64,
    pub session_id: i64,
    pub text: String,
    pub source_handle: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    Audio,
    Image,
}

impl TranscriptKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            TranscriptKind::Audio => "transcripts",
            TranscriptKind::Image => "image_transcripts",
        }
    }

    /// Alias prefix senders use to reference a transcript (`#a1`, `#i1`).
    pub fn alias_prefix(&self) -> &'static str {
        match self {
            TranscriptKind::Audio => "a",
            TranscriptKind::Image => "i",
        }
    }
}

/// One stored media transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRow {
    pub id: i64,
    pub session_id: i64,
    pub alias: String,
    pub text: String,
    pub created_at: String,
}
