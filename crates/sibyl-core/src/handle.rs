use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to a cached document: `corpus://cache/<id>[#section=<sid>]`.
///
/// Handles are what the model sees instead of filesystem paths. The fragment
/// form is canonical; the legacy slash form `corpus://cache/<id>/<sid>` is
/// still accepted on parse for retrieval and full-content flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorpusHandle {
    pub document_id: String,
    pub section_id: Option<String>,
}

const SCHEME: &str = "corpus://cache/";

impl CorpusHandle {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            section_id: None,
        }
    }

    pub fn with_section(document_id: impl Into<String>, section_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            section_id: Some(section_id.into()),
        }
    }

    /// Parse either the canonical fragment form or the legacy slash form.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(SCHEME)?;
        if rest.is_empty() {
            return None;
        }

        if let Some((id, section)) = rest.split_once("#section=") {
            if id.is_empty() || section.is_empty() {
                return None;
            }
            return Some(Self::with_section(id, section));
        }

        // Legacy form: corpus://cache/<id>/<section_id>
        if let Some((id, section)) = rest.split_once('/') {
            if id.is_empty() || section.is_empty() {
                return None;
            }
            return Some(Self::with_section(id, section));
        }

        Some(Self::new(rest))
    }

    /// Handle for the whole document, dropping any section fragment.
    pub fn document(&self) -> Self {
        Self::new(self.document_id.clone())
    }
}

impl fmt::Display for CorpusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.section_id {
            Some(section) => write!(f, "{SCHEME}{}#section={}", self.document_id, section),
            None => write!(f, "{SCHEME}{}", self.document_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_document_only() {
        let h = CorpusHandle::parse("corpus://cache/abc123").unwrap();
        assert_eq!(h.document_id, "abc123");
        assert!(h.section_id.is_none());
    }

    #[test]
    fn parse_fragment_section() {
        let h = CorpusHandle::parse("corpus://cache/abc123#section=s2").unwrap();
        assert_eq!(h.document_id, "abc123");
        assert_eq!(h.section_id.as_deref(), Some("s2"));
    }

    #[test]
    fn parse_legacy_slash_section() {
        let h = CorpusHandle::parse("corpus://cache/abc123/s2").unwrap();
        assert_eq!(h.document_id, "abc123");
        assert_eq!(h.section_id.as_deref(), Some("s2"));
    }

    #[test]
    fn display_roundtrip_is_fragment_form() {
        let h = CorpusHandle::with_section("d1", "intro");
        assert_eq!(h.to_string(), "corpus://cache/d1#section=intro");
        assert_eq!(CorpusHandle::parse(&h.to_string()).unwrap(), h);
    }

    #[test]
    fn rejects_foreign_scheme_and_empty_id() {
        assert!(CorpusHandle::parse("file:///etc/passwd").is_none());
        assert!(CorpusHandle::parse("corpus://cache/").is_none());
        assert!(CorpusHandle::parse("corpus://cache/#section=x").is_none());
    }
}
