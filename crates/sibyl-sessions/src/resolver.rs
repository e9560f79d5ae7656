use std::sync::Arc;

use tracing::{debug, info, instrument};

use sibyl_core::types::{ResearchProfile, SessionBrief, SessionResolution, TurnRequest};
use sibyl_store::{HistoryStore, SessionRow};

use crate::error::Result;
use crate::profile::effective_profile;
use crate::sticky::StickyLocks;

/// How the turn's session and context were resolved.
#[derive(Debug)]
pub enum ResolveOutcome {
    /// A session is bound; the effective profile merges request overrides.
    Bound {
        session: SessionRow,
        resolution: SessionResolution,
        effective: ResearchProfile,
    },
    /// Context assembled from explicit history ids; no session binding.
    ContextOnly { context: String, count: usize },
    /// Resume term matched more than one session — the turn must halt.
    Ambiguous {
        term: String,
        candidates: Vec<SessionBrief>,
    },
    /// Resume term matched nothing.
    NotFound { term: String },
    Stateless,
}

/// Applies the resolution ladder: sticky name → resume term → shell lock →
/// continue ids → stateless.
pub struct SessionResolver {
    store: Arc<HistoryStore>,
    sticky: StickyLocks,
}

impl SessionResolver {
    pub fn new(store: Arc<HistoryStore>, sticky: StickyLocks) -> Self {
        Self { store, sticky }
    }

    pub fn sticky(&self) -> &StickyLocks {
        &self.sticky
    }

    #[instrument(skip(self, request), fields(query_len = request.query_text.len()))]
    pub fn resolve(&self, request: &TurnRequest) -> Result<ResolveOutcome> {
        // 1. Sticky name: bind or create.
        if let Some(name) = &request.sticky_session_name {
            if let Some(session) = self.store.get_session(name)? {
                debug!(session = session.id, "sticky name bound existing session");
                return Ok(self.bound(request, session, false));
            }
            let profile = ResearchProfile::default();
            let id = self.store.create_session(name, &profile)?;
            let session = self
                .store
                .get_session_by_id(id)?
                .expect("session just created");
            info!(session = id, name = %name, "sticky session created");
            return Ok(self.bound(request, session, true));
        }

        // 2. Resume term: id, exact name, then partial name.
        if let Some(term) = &request.resume_session_term {
            let mut matches = self.store.find_sessions(term)?;
            return Ok(match matches.len() {
                0 => ResolveOutcome::NotFound { term: term.clone() },
                1 => self.bound(request, matches.remove(0), false),
                _ => ResolveOutcome::Ambiguous {
                    term: term.clone(),
                    candidates: matches
                        .into_iter()
                        .map(|s| SessionBrief {
                            id: s.id,
                            name: s.name,
                        })
                        .collect(),
                },
            });
        }

        // 3. Shell-sticky lock, when the shell is still alive.
        if let Some(pid) = request.shell_session_id {
            if let Some(session_id) = self.sticky.lookup(pid) {
                if let Some(session) = self.store.get_session_by_id(session_id)? {
                    debug!(session = session.id, pid, "shell lock bound session");
                    let effective = effective_profile(request, &session.profile);
                    return Ok(ResolveOutcome::Bound {
                        resolution: SessionResolution::ShellSticky { id: session.id },
                        session,
                        effective,
                    });
                }
                // The bound session was deleted; the lock is meaningless.
                self.sticky.end(pid)?;
            }
        }

        // 4. Continue-ids: context without binding.
        if let Some(selector) = &request.continue_ids {
            let expanded = self
                .store
                .expand_partners(&selector.resolve(&self.all_message_ids()?))?;
            let context = self.store.get_context(selector)?;
            return Ok(ResolveOutcome::ContextOnly {
                context,
                count: expanded.len(),
            });
        }

        // 5. Stateless turn.
        Ok(ResolveOutcome::Stateless)
    }

    fn bound(&self, request: &TurnRequest, session: SessionRow, created: bool) -> ResolveOutcome {
        let effective = effective_profile(request, &session.profile);
        let resolution = if created {
            SessionResolution::Created { id: session.id }
        } else {
            SessionResolution::Resumed { id: session.id }
        };
        ResolveOutcome::Bound {
            session,
            resolution,
            effective,
        }
    }

    fn all_message_ids(&self) -> Result<Vec<i64>> {
        use sibyl_store::MessageFilter;
        Ok(self
            .store
            .list_messages(&MessageFilter::default(), i64::MAX as usize)?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }
}
