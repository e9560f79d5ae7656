use sibyl_core::types::{ResearchProfile, SourceMode, TurnRequest};

/// Merge explicit request overrides over the persisted session profile.
///
/// Rules:
/// - an explicit `research_mode` on the request wins; absent it, the stored
///   flag applies;
/// - an explicit `research_source_mode` wins; absent it, the stored mode (or
///   `Mixed` when research was just switched on without one);
/// - the invariant `source_mode == None ⇔ research_mode == false` is
///   restored at the end, whatever the inputs were.
///
/// Corpus pointers are NOT merged here: passing new sources on a turn
/// replaces the stored pointer list after ingestion resolves them.
pub fn effective_profile(request: &TurnRequest, stored: &ResearchProfile) -> ResearchProfile {
    let research_mode = request.research_mode.unwrap_or(stored.research_mode);

    let source_mode = if !research_mode {
        SourceMode::None
    } else {
        match request.research_source_mode {
            Some(SourceMode::None) | None => {
                if stored.source_mode != SourceMode::None {
                    stored.source_mode
                } else {
                    SourceMode::Mixed
                }
            }
            Some(mode) => mode,
        }
    };

    ResearchProfile {
        research_mode,
        source_mode,
        corpus_pointers: stored.corpus_pointers.clone(),
        shortlist_override: stored.shortlist_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::CorpusHandle;

    #[test]
    fn request_overrides_win() {
        let stored = ResearchProfile::research(SourceMode::LocalOnly, vec![]);
        let mut request = TurnRequest::query("q");
        request.research_source_mode = Some(SourceMode::WebOnly);

        let eff = effective_profile(&request, &stored);
        assert!(eff.research_mode);
        assert_eq!(eff.source_mode, SourceMode::WebOnly);
    }

    #[test]
    fn stored_profile_applies_absent_overrides() {
        let stored = ResearchProfile::research(SourceMode::Mixed, vec![CorpusHandle::new("d")]);
        let eff = effective_profile(&TurnRequest::query("q"), &stored);
        assert!(eff.research_mode);
        assert_eq!(eff.source_mode, SourceMode::Mixed);
        assert_eq!(eff.corpus_pointers.len(), 1);
    }

    #[test]
    fn enabling_research_without_mode_defaults_to_mixed() {
        let mut request = TurnRequest::query("q");
        request.research_mode = Some(true);
        let eff = effective_profile(&request, &ResearchProfile::default());
        assert_eq!(eff.source_mode, SourceMode::Mixed);
    }

    #[test]
    fn disabling_research_clears_source_mode() {
        let stored = ResearchProfile::research(SourceMode::LocalOnly, vec![]);
        let mut request = TurnRequest::query("q");
        request.research_mode = Some(false);
        let eff = effective_profile(&request, &stored);
        assert!(!eff.research_mode);
        assert_eq!(eff.source_mode, SourceMode::None);
    }
}
