use std::collections::BTreeSet;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use sibyl_core::types::{ResearchProfile, Role, SourceMode};
use sibyl_core::vectors;
use sibyl_core::CorpusHandle;
use sibyl_core::Selector;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{
    FindingRow, MemoryRow, MessageFilter, MessageRow, SessionRow, TranscriptKind, TranscriptRow,
};

/// Two stored memories at or above this cosine similarity are the same fact;
/// the newer text updates the existing row instead of inserting.
const MEMORY_DEDUP_THRESHOLD: f32 = 0.90;

/// Thread-safe history store over one SQLite connection.
///
/// Writes are serialized by the mutex; multi-row operations run inside a
/// transaction and fail atomically.
pub struct HistoryStore {
    db: Mutex<Connection>,
}

impl HistoryStore {
    /// Wrap an already-open connection, creating tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // -----------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------

    /// Persist one user/assistant exchange into the global (null-session)
    /// pool. Returns the assistant row id.
    pub fn save_interaction(
        &self,
        query: &str,
        answer: &str,
        model: &str,
        query_tokens: u32,
        answer_tokens: u32,
    ) -> Result<i64> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO messages (session_id, role, content, model, token_count, created_at)
             VALUES (NULL, 'user', ?1, NULL, ?2, ?3)",
            params![query, query_tokens, now],
        )?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, model, token_count, created_at)
             VALUES (NULL, 'assistant', ?1, ?2, ?3, ?4)",
            params![answer, model, answer_tokens, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!(id, "interaction saved");
        Ok(id)
    }

    /// Append one message to a session. Bumps the session's `last_used_at`.
    pub fn append_session_message(
        &self,
        session_id: i64,
        role: Role,
        content: &str,
        model: Option<&str>,
        token_count: u32,
    ) -> Result<i64> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO messages (session_id, role, content, model, token_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session_id, role.to_string(), content, model, token_count, now],
        )?;
        let id = tx.last_insert_rowid();
        let changed = tx.execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound {
                term: session_id.to_string(),
            });
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn get_message(&self, id: i64) -> Result<MessageRow> {
        let db = self.db.lock().unwrap();
        db.query_row(
            &format!("{SELECT_MESSAGE} WHERE id = ?1"),
            params![id],
            row_to_message,
        )
        .optional()?
        .ok_or(StoreError::MessageNotFound { id })
    }

    /// List messages newest-last, optionally scoped by session and role.
    pub fn list_messages(&self, filter: &MessageFilter, limit: usize) -> Result<Vec<MessageRow>> {
        let db = self.db.lock().unwrap();
        let mut sql = String::from(SELECT_MESSAGE);
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        match &filter.session {
            Some(Some(id)) => {
                clauses.push(format!("session_id = ?{}", args.len() + 1));
                args.push(Box::new(*id));
            }
            Some(None) => clauses.push("session_id IS NULL".to_string()),
            None => {}
        }
        if let Some(role) = filter.role {
            clauses.push(format!("role = ?{}", args.len() + 1));
            args.push(Box::new(role.to_string()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", args.len() + 1));
        args.push(Box::new(limit as i64));

        let mut stmt = db.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), row_to_message)?;
        let mut out: Vec<MessageRow> = rows.collect::<rusqlite::Result<_>>()?;
        out.reverse();
        Ok(out)
    }

    /// Assemble prompt context from the selected messages, expanding each id
    /// to its user↔assistant partner before rendering.
    pub fn get_context(&self, selector: &Selector) -> Result<String> {
        let ids = self.resolve_message_selector(selector)?;
        let expanded = self.expand_partners(&ids)?;
        let db = self.db.lock().unwrap();
        let mut parts = Vec::with_capacity(expanded.len());
        for id in expanded {
            let row = db
                .query_row(
                    &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                    params![id],
                    row_to_message,
                )
                .optional()?;
            if let Some(m) = row {
                parts.push(format!("{}: {}", m.role, m.content));
            }
        }
        Ok(parts.join("\n\n"))
    }

    /// Expand ids to include conversation partners.
    ///
    /// Expansion is session-scoped: a session-bound message searches within
    /// its session, a null-session message searches the global pool.
    pub fn expand_partners(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let db = self.db.lock().unwrap();
        let mut expanded: BTreeSet<i64> = BTreeSet::new();

        for &id in ids {
            let row = db
                .query_row(
                    "SELECT id, session_id, role FROM messages WHERE id = ?1",
                    params![id],
                    |r| {
                        Ok((
                            r.get::<_, i64>(0)?,
                            r.get::<_, Option<i64>>(1)?,
                            r.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;
            let Some((id, session_id, role)) = row else {
                continue;
            };
            expanded.insert(id);

            let scope = match session_id {
                Some(sid) => format!("session_id = {sid}"),
                None => "session_id IS NULL".to_string(),
            };
            let partner: Option<i64> = match role.as_str() {
                // A user message pairs with the next assistant reply in scope.
                "user" => db
                    .query_row(
                        &format!(
                            "SELECT id FROM messages
                             WHERE {scope} AND role = 'assistant' AND id > ?1
                             ORDER BY id ASC LIMIT 1"
                        ),
                        params![id],
                        |r| r.get(0),
                    )
                    .optional()?,
                // An assistant message pairs with the preceding user query.
                "assistant" => db
                    .query_row(
                        &format!(
                            "SELECT id FROM messages
                             WHERE {scope} AND role = 'user' AND id < ?1
                             ORDER BY id DESC LIMIT 1"
                        ),
                        params![id],
                        |r| r.get(0),
                    )
                    .optional()?,
                _ => None,
            };
            if let Some(pid) = partner {
                expanded.insert(pid);
            }
        }

        Ok(expanded.into_iter().collect())
    }

    /// Attach a post-hoc summary to one message. The only permitted mutation
    /// after insert.
    pub fn attach_summary(&self, message_id: i64, summary: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE messages SET summary = ?1 WHERE id = ?2",
            params![summary, message_id],
        )?;
        if changed == 0 {
            return Err(StoreError::MessageNotFound { id: message_id });
        }
        Ok(())
    }

    /// Delete messages by selector. Returns the number of rows removed.
    pub fn delete_messages(&self, selector: &Selector) -> Result<usize> {
        let ids = self.resolve_message_selector(selector)?;
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let mut count = 0usize;
        for id in ids {
            count += tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        info!(count, "messages deleted");
        Ok(count)
    }

    fn resolve_message_selector(&self, selector: &Selector) -> Result<Vec<i64>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id FROM messages ORDER BY id")?;
        let existing: Vec<i64> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(selector.resolve(&existing))
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    pub fn create_session(&self, name: &str, profile: &ResearchProfile) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let pointers = serde_json::to_string(&profile.corpus_pointers)?;
        let result = db.execute(
            "INSERT INTO sessions
             (name, created_at, last_used_at, research_mode, research_source_mode,
              corpus_pointers, shortlist_override)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6)",
            params![
                name,
                now,
                profile.research_mode,
                source_mode_column(profile),
                pointers,
                profile.shortlist_override,
            ],
        );
        match result {
            Ok(_) => Ok(db.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateSession {
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up by numeric id or exact name.
    pub fn get_session(&self, term: &str) -> Result<Option<SessionRow>> {
        let db = self.db.lock().unwrap();
        if let Ok(id) = term.parse::<i64>() {
            if let Some(row) = db
                .query_row(
                    &format!("{SELECT_SESSION} WHERE id = ?1"),
                    params![id],
                    row_to_session,
                )
                .optional()?
            {
                return Ok(Some(row));
            }
        }
        Ok(db
            .query_row(
                &format!("{SELECT_SESSION} WHERE name = ?1"),
                params![term],
                row_to_session,
            )
            .optional()?)
    }

    pub fn get_session_by_id(&self, id: i64) -> Result<Option<SessionRow>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!("{SELECT_SESSION} WHERE id = ?1"),
                params![id],
                row_to_session,
            )
            .optional()?)
    }

    /// Resume lookup: numeric id, then exact name, then partial name.
    ///
    /// A unique id or exact-name hit returns a single row; otherwise all
    /// partial matches are returned so the caller can report ambiguity.
    pub fn find_sessions(&self, term: &str) -> Result<Vec<SessionRow>> {
        if let Some(row) = self.get_session(term)? {
            return Ok(vec![row]);
        }
        let db = self.db.lock().unwrap();
        let pattern = format!("%{term}%");
        let mut stmt = db.prepare(&format!(
            "{SELECT_SESSION} WHERE name LIKE ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![pattern], row_to_session)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "{SELECT_SESSION} ORDER BY last_used_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_session)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn update_session_research_profile(
        &self,
        session_id: i64,
        profile: &ResearchProfile,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let pointers = serde_json::to_string(&profile.corpus_pointers)?;
        let changed = db.execute(
            "UPDATE sessions
             SET research_mode = ?1, research_source_mode = ?2,
                 corpus_pointers = ?3, shortlist_override = ?4
             WHERE id = ?5",
            params![
                profile.research_mode,
                source_mode_column(profile),
                pointers,
                profile.shortlist_override,
                session_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound {
                term: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Record a compaction: the summary covers all messages up to and
    /// including `through_message_id`.
    pub fn compact_session(
        &self,
        session_id: i64,
        summary: &str,
        through_message_id: i64,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE sessions SET compacted_summary = ?1, compacted_through = ?2 WHERE id = ?3",
            params![summary, through_message_id, session_id],
        )?;
        if changed == 0 {
            return Err(StoreError::SessionNotFound {
                term: session_id.to_string(),
            });
        }
        info!(session_id, through_message_id, "session compacted");
        Ok(())
    }

    /// Messages not yet covered by the compacted summary, oldest first.
    pub fn session_messages_since_compaction(&self, session_id: i64) -> Result<Vec<MessageRow>> {
        let db = self.db.lock().unwrap();
        let through: Option<i64> = db.query_row(
            "SELECT compacted_through FROM sessions WHERE id = ?1",
            params![session_id],
            |r| r.get(0),
        )?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_MESSAGE} WHERE session_id = ?1 AND id > ?2 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![session_id, through.unwrap_or(0)], row_to_message)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Token total of the messages that would be re-sent as context.
    pub fn accumulated_tokens(&self, session_id: i64) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let through: Option<i64> = db.query_row(
            "SELECT compacted_through FROM sessions WHERE id = ?1",
            params![session_id],
            |r| r.get(0),
        )?;
        let total: i64 = db.query_row(
            "SELECT COALESCE(SUM(token_count), 0) FROM messages
             WHERE session_id = ?1 AND id > ?2",
            params![session_id, through.unwrap_or(0)],
            |r| r.get(0),
        )?;
        Ok(total as u64)
    }

    /// Delete sessions by selector with the three-way cascade: session-scoped
    /// findings first, then corpus-link rows, then session and message rows.
    /// The whole cascade is one transaction per call.
    pub fn delete_sessions(&self, selector: &Selector) -> Result<usize> {
        let ids = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare("SELECT id FROM sessions ORDER BY id")?;
            let existing: Vec<i64> = stmt
                .query_map([], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            selector.resolve(&existing)
        };

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let mut count = 0usize;
        for id in ids {
            tx.execute("DELETE FROM findings WHERE session_id = ?1", params![id])?;
            tx.execute(
                "DELETE FROM session_uploaded_documents WHERE session_id = ?1",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM session_override_files WHERE session_id = ?1",
                params![id],
            )?;
            tx.execute(
                "DELETE FROM room_session_bindings WHERE session_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM transcripts WHERE session_id = ?1", params![id])?;
            tx.execute(
                "DELETE FROM image_transcripts WHERE session_id = ?1",
                params![id],
            )?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
            count += tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        info!(count, "sessions deleted");
        Ok(count)
    }

    /// Clear a session's research residue: findings and upload links go,
    /// the stored pointer list is emptied. Shared chunk rows are untouched.
    pub fn clean_research(&self, session_id: i64) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute("DELETE FROM findings WHERE session_id = ?1", params![session_id])?;
        tx.execute(
            "DELETE FROM session_uploaded_documents WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.execute(
            "UPDATE sessions SET corpus_pointers = '[]' WHERE id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------

    /// Save a user memory, deduplicating against existing rows.
    ///
    /// When an existing memory's cosine similarity is ≥ 0.90, that row is
    /// updated (text and vector refreshed) and no new row is inserted.
    /// Returns `(id, updated_existing)`.
    pub fn save_memory(&self, text: &str, vector: &[f32]) -> Result<(i64, bool)> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id, vector FROM user_memories")?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, Vec<u8>>(1)?))
        })?;

        let mut best: Option<(i64, f32)> = None;
        for row in rows {
            let (id, blob) = row?;
            let existing = vectors::from_blob(&blob);
            let sim = vectors::cosine_similarity(vector, &existing);
            if best.map(|(_, s)| sim > s).unwrap_or(true) {
                best = Some((id, sim));
            }
        }
        drop(stmt);

        if let Some((id, sim)) = best {
            if sim >= MEMORY_DEDUP_THRESHOLD {
                db.execute(
                    "UPDATE user_memories SET text = ?1, vector = ?2 WHERE id = ?3",
                    params![text, vectors::to_blob(vector), id],
                )?;
                debug!(id, similarity = sim, "memory deduplicated into existing row");
                return Ok((id, true));
            }
        }

        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO user_memories (text, created_at, vector) VALUES (?1, ?2, ?3)",
            params![text, now, vectors::to_blob(vector)],
        )?;
        Ok((db.last_insert_rowid(), false))
    }

    pub fn list_memories(&self) -> Result<Vec<MemoryRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id, text, created_at, vector FROM user_memories ORDER BY id")?;
        let rows = stmt.query_map([], |r| {
            Ok(MemoryRow {
                id: r.get(0)?,
                text: r.get(1)?,
                created_at: r.get(2)?,
                vector: vectors::from_blob(&r.get::<_, Vec<u8>>(3)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn delete_memory(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let changed = db.execute("DELETE FROM user_memories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::MemoryNotFound { id });
        }
        Ok(())
    }

    /// Top-k memories by cosine similarity to the query vector.
    pub fn recall_memories(&self, query_vector: &[f32], k: usize) -> Result<Vec<(MemoryRow, f32)>> {
        let mut scored: Vec<(MemoryRow, f32)> = self
            .list_memories()?
            .into_iter()
            .map(|m| {
                let score = vectors::cosine_similarity(query_vector, &m.vector);
                (m, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    // -----------------------------------------------------------------
    // Findings
    // -----------------------------------------------------------------

    pub fn add_finding(
        &self,
        session_id: i64,
        text: &str,
        source_handle: Option<&CorpusHandle>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO findings (session_id, text, source_handle, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, text, source_handle.map(|h| h.to_string()), now],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn list_findings(&self, session_id: i64) -> Result<Vec<FindingRow>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_id, text, source_handle, created_at
             FROM findings WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id], |r| {
            Ok(FindingRow {
                id: r.get(0)?,
                session_id: r.get(1)?,
                text: r.get(2)?,
                source_handle: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    // -----------------------------------------------------------------
    // Transcripts
    // -----------------------------------------------------------------

    /// Store a media transcript and return its sender-facing alias (`#a1`,
    /// `#i2`, …). Oldest rows beyond `max_per_session` are evicted.
    pub fn save_transcript(
        &self,
        kind: TranscriptKind,
        session_id: i64,
        text: &str,
        max_per_session: usize,
    ) -> Result<String> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let table = kind.table();
        let next: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE session_id = ?1"),
            params![session_id],
            |r| r.get(0),
        )?;
        let alias = format!("#{}{}", kind.alias_prefix(), next + 1);
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            &format!(
                "INSERT INTO {table} (session_id, alias, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![session_id, alias, text, now],
        )?;
        tx.execute(
            &format!(
                "DELETE FROM {table} WHERE session_id = ?1 AND id NOT IN
                 (SELECT id FROM {table} WHERE session_id = ?1
                  ORDER BY id DESC LIMIT ?2)"
            ),
            params![session_id, max_per_session as i64],
        )?;
        tx.commit()?;
        Ok(alias)
    }

    pub fn get_transcript(
        &self,
        kind: TranscriptKind,
        session_id: i64,
        alias: &str,
    ) -> Result<Option<TranscriptRow>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                &format!(
                    "SELECT id, session_id, alias, text, created_at
                     FROM {} WHERE session_id = ?1 AND alias = ?2",
                    kind.table()
                ),
                params![session_id, alias],
                |r| {
                    Ok(TranscriptRow {
                        id: r.get(0)?,
                        session_id: r.get(1)?,
                        alias: r.get(2)?,
                        text: r.get(3)?,
                        created_at: r.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    // -----------------------------------------------------------------
    // Daemon room bindings and session linkage
    // -----------------------------------------------------------------

    pub fn bind_room(&self, room: &str, session_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO room_session_bindings (room, session_id, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(room) DO UPDATE SET session_id = excluded.session_id",
            params![room, session_id, now],
        )?;
        Ok(())
    }

    pub fn room_session(&self, room: &str) -> Result<Option<i64>> {
        let db = self.db.lock().unwrap();
        Ok(db
            .query_row(
                "SELECT session_id FROM room_session_bindings WHERE room = ?1",
                params![room],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Link an ingested document to a session (upload metadata).
    pub fn add_session_document(&self, session_id: i64, document_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT OR IGNORE INTO session_uploaded_documents
             (session_id, document_id, created_at) VALUES (?1, ?2, ?3)",
            params![session_id, document_id, now],
        )?;
        Ok(())
    }

    pub fn session_documents(&self, session_id: i64) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT document_id FROM session_uploaded_documents
             WHERE session_id = ?1 ORDER BY document_id",
        )?;
        let rows = stmt.query_map(params![session_id], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_override_file(&self, session_id: i64, name: &str, path: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO session_override_files (session_id, name, path)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id, name) DO UPDATE SET path = excluded.path",
            params![session_id, name, path],
        )?;
        Ok(())
    }

    pub fn override_files(&self, session_id: i64) -> Result<Vec<(String, String)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT name, path FROM session_override_files
             WHERE session_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![session_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}

const SELECT_MESSAGE: &str =
    "SELECT id, session_id, role, content, summary, model, token_count, created_at FROM messages";

const SELECT_SESSION: &str = "SELECT id, name, default_model, created_at, last_used_at, \
     compacted_summary, compacted_through, memory_auto_extract, max_turns_override, \
     research_mode, research_source_mode, corpus_pointers, shortlist_override FROM sessions";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    let role: String = row.get(2)?;
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: role.parse().unwrap_or(Role::User),
        content: row.get(3)?,
        summary: row.get(4)?,
        model: row.get(5)?,
        token_count: row.get::<_, i64>(6)? as u32,
        created_at: row.get(7)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    let mode: Option<String> = row.get(10)?;
    let pointers: String = row.get(11)?;
    let corpus_pointers: Vec<CorpusHandle> =
        serde_json::from_str(&pointers).unwrap_or_default();
    Ok(SessionRow {
        id: row.get(0)?,
        name: row.get(1)?,
        default_model: row.get(2)?,
        created_at: row.get(3)?,
        last_used_at: row.get(4)?,
        compacted_summary: row.get(5)?,
        compacted_through: row.get(6)?,
        memory_auto_extract: row.get::<_, i64>(7)? != 0,
        max_turns_override: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
        profile: ResearchProfile {
            research_mode: row.get::<_, i64>(9)? != 0,
            source_mode: mode
                .as_deref()
                .and_then(|m| m.parse().ok())
                .unwrap_or(SourceMode::None),
            corpus_pointers,
            shortlist_override: row.get(12)?,
        },
    })
}

fn source_mode_column(profile: &ResearchProfile) -> Option<String> {
    if profile.research_mode {
        Some(match profile.source_mode {
            SourceMode::WebOnly => "web_only",
            SourceMode::LocalOnly => "local_only",
            SourceMode::Mixed => "mixed",
            SourceMode::None => "none",
        }
        .to_string())
    } else {
        None
    }
}
