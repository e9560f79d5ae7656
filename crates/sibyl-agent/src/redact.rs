use std::path::Path;

use sibyl_core::CorpusHandle;
use sibyl_research::document_id_for_path;

/// Replace raw filesystem paths in the query with corpus handles before the
/// text reaches the model.
///
/// Any whitespace-delimited token under one of the configured roots becomes
/// its document handle (the id is derived from the canonical path, so
/// ingested files resolve to the same handle the index uses). Paths that
/// cannot be resolved are blanked rather than leaked.
pub fn redact_local_paths(query: &str, roots: &[String]) -> String {
    if roots.is_empty() {
        return query.to_string();
    }

    query
        .split_whitespace()
        .map(|token| redact_token(token, roots))
        .collect::<Vec<_>>()
        .join(" ")
}

fn redact_token(token: &str, roots: &[String]) -> String {
    if !token.starts_with('/') && !token.starts_with("~/") {
        return token.to_string();
    }

    // Strip common trailing punctuation so "see /docs/a.md." still matches.
    let trimmed = token.trim_end_matches(['.', ',', ';', ':', ')', '!', '?']);
    let suffix = &token[trimmed.len()..];

    match std::fs::canonicalize(trimmed) {
        Ok(canonical) => {
            let under_root = roots.iter().any(|root| {
                std::fs::canonicalize(root)
                    .map(|r| canonical.starts_with(&r))
                    .unwrap_or(false)
            });
            if under_root {
                let handle = CorpusHandle::new(document_id_for_path(&canonical));
                format!("{handle}{suffix}")
            } else {
                format!("[redacted-path]{suffix}")
            }
        }
        Err(_) => {
            if looks_like_path(trimmed) {
                format!("[unavailable-path]{suffix}")
            } else {
                token.to_string()
            }
        }
    }
}

fn looks_like_path(token: &str) -> bool {
    token.len() > 1 && Path::new(token).extension().is_some() || token.matches('/').count() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingestible_path_becomes_its_handle() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.md");
        std::fs::write(&file, "x").unwrap();
        let roots = vec![dir.path().to_string_lossy().to_string()];

        let query = format!("summarize {}", file.display());
        let redacted = redact_local_paths(&query, &roots);

        assert!(!redacted.contains("notes.md"));
        assert!(redacted.contains("corpus://cache/"));
        let canonical = std::fs::canonicalize(&file).unwrap();
        assert!(redacted.contains(&document_id_for_path(&canonical)));
    }

    #[test]
    fn path_outside_roots_is_blanked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("secret.txt");
        std::fs::write(&file, "x").unwrap();
        // Roots deliberately exclude the temp dir.
        let roots = vec!["/nonexistent-root".to_string()];

        let redacted = redact_local_paths(&format!("read {}", file.display()), &roots);
        assert!(redacted.contains("[redacted-path]"));
        assert!(!redacted.contains("secret.txt"));
    }

    #[test]
    fn missing_path_is_marked_unavailable() {
        let roots = vec!["/tmp".to_string()];
        let redacted = redact_local_paths("read /does/not/exist.md please", &roots);
        assert!(redacted.contains("[unavailable-path]"));
    }

    #[test]
    fn ordinary_words_pass_through() {
        let roots = vec!["/tmp".to_string()];
        assert_eq!(
            redact_local_paths("compare a/b testing options", &roots),
            "compare a/b testing options"
        );
    }

    #[test]
    fn no_roots_means_no_redaction() {
        assert_eq!(redact_local_paths("read /etc/hosts", &[]), "read /etc/hosts");
    }
}
