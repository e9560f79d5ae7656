use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use rusqlite::{params, Connection};
use tracing::{debug, info};

use sibyl_core::vectors;

use crate::bm25::{tokenize, LexicalIndex};
use crate::error::{IndexError, Result};
use crate::types::{Chunk, RankedChunk, SearchFilters};
use crate::{DENSE_WEIGHT, LEXICAL_WEIGHT};

/// Document id prefix for session-scoped finding chunks.
const FINDINGS_PREFIX: &str = "findings:";

struct Inner {
    conn: Mutex<Connection>,
    chunks: Vec<Chunk>,
    tokens: Vec<Vec<String>>,
    /// (document_id, ordinal) → slot in `chunks`.
    slots: HashMap<(String, u32), usize>,
    lexical: LexicalIndex,
}

/// Hybrid chunk store: SQLite rows plus in-memory dense and lexical indexes.
///
/// The RwLock keeps reads concurrent; mutations take the write lock, which
/// serializes writes to any one document (and, conservatively, to all).
pub struct VectorIndex {
    inner: RwLock<Inner>,
}

impl VectorIndex {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        let mut inner = Inner {
            conn: Mutex::new(conn),
            chunks: Vec::new(),
            tokens: Vec::new(),
            slots: HashMap::new(),
            lexical: LexicalIndex::default(),
        };
        load_all(&mut inner)?;
        info!(chunks = inner.chunks.len(), "vector index loaded");
        Ok(Self {
            inner: RwLock::new(inner),
        })
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

    /// Insert or overwrite chunks, idempotent by `(document_id, ordinal)`.
    ///
    /// Ordinals must be strictly increasing within the call; violating that
    /// is a caller bug surfaced as an error, not a partial write.
    pub fn upsert_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        for pair in chunks.windows(2) {
            if pair[1].ordinal <= pair[0].ordinal {
                return Err(IndexError::NonMonotonicOrdinals {
                    document_id: document_id.to_string(),
                });
            }
        }

        let mut guard = self.inner.write().expect("index lock poisoned");
        let inner = &mut *guard;
        let mut conn = inner.conn.lock().expect("sqlite connection lock poisoned");
        let tx = conn.transaction()?;
        for chunk in chunks {
            let tokens = tokenize(&chunk.text);
            tx.execute(
                "INSERT INTO chunks
                 (document_id, ordinal, text, token_count, section_id, vector, tokens, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(document_id, ordinal) DO UPDATE SET
                   text = excluded.text, token_count = excluded.token_count,
                   section_id = excluded.section_id, vector = excluded.vector,
                   tokens = excluded.tokens, provenance = excluded.provenance",
                params![
                    document_id,
                    chunk.ordinal,
                    chunk.text,
                    chunk.token_count,
                    chunk.section_id,
                    vectors::to_blob(&chunk.vector),
                    tokens.join(" "),
                    chunk.provenance,
                ],
            )?;
        }
        tx.commit()?;

        for chunk in chunks {
            let mut chunk = chunk.clone();
            chunk.document_id = document_id.to_string();
            let key = (document_id.to_string(), chunk.ordinal);
            let toks = tokenize(&chunk.text);
            match inner.slots.get(&key).copied() {
                Some(slot) => {
                    inner.chunks[slot] = chunk;
                    inner.tokens[slot] = toks;
                }
                None => {
                    let slot = inner.chunks.len();
                    inner.chunks.push(chunk);
                    inner.tokens.push(toks);
                    inner.slots.insert(key, slot);
                }
            }
        }
        inner.lexical = LexicalIndex::rebuild(inner.tokens.iter().map(|t| t.as_slice()));
        debug!(document_id, count = chunks.len(), "chunks upserted");
        Ok(())
    }

    /// Top-k hybrid search.
    ///
    /// Dense and lexical scores are min-max normalized to [0, 1] within this
    /// query's candidate set, combined as 0.75·dense + 0.25·lexical, and
    /// tie-broken by `(document_id, ordinal)`.
    pub fn search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<RankedChunk>> {
        let inner = self.inner.read().expect("index lock poisoned");
        if inner.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_tokens = tokenize(query_text);
        let lexical_raw = inner.lexical.score(&query_tokens);

        let mut candidates: Vec<(usize, f32, f32)> = Vec::new();
        for (slot, chunk) in inner.chunks.iter().enumerate() {
            if !filters.admits(&chunk.document_id, chunk.section_id.as_deref()) {
                continue;
            }
            let dense = vectors::cosine_similarity(query_vector, &chunk.vector);
            candidates.push((slot, dense, lexical_raw[slot]));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let dense_norm = min_max(candidates.iter().map(|c| c.1));
        let lex_norm = min_max(candidates.iter().map(|c| c.2));

        let mut ranked: Vec<RankedChunk> = candidates
            .into_iter()
            .map(|(slot, dense, lex)| {
                let dense_score = dense_norm.apply(dense);
                let lexical_score = lex_norm.apply(lex);
                RankedChunk {
                    chunk: inner.chunks[slot].clone(),
                    score: DENSE_WEIGHT * dense_score + LEXICAL_WEIGHT * lexical_score,
                    dense_score,
                    lexical_score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    pub fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut guard = self.inner.write().expect("index lock poisoned");
        let inner = &mut *guard;
        let removed = inner
            .conn
            .lock()
            .expect("sqlite connection lock poisoned")
            .execute(
                "DELETE FROM chunks WHERE document_id = ?1",
                params![document_id],
            )?;
        if removed > 0 {
            load_all(inner)?;
            info!(document_id, removed, "document deleted from index");
        }
        Ok(removed)
    }

    /// Remove the finding chunks one session accumulated. Ordinary document
    /// chunks, which other sessions may reference, are never touched here.
    pub fn delete_findings_by_session(&self, session_id: i64) -> Result<usize> {
        self.delete_document(&format!("{FINDINGS_PREFIX}{session_id}"))
    }

    /// Document id under which a session's findings are indexed.
    pub fn findings_document_id(session_id: i64) -> String {
        format!("{FINDINGS_PREFIX}{session_id}")
    }

    pub fn document_chunk_count(&self, document_id: &str) -> usize {
        let inner = self.inner.read().expect("index lock poisoned");
        inner
            .slots
            .keys()
            .filter(|(doc, _)| doc == document_id)
            .count()
    }

    /// Distinct section ids of one document, in ordinal order.
    pub fn document_sections(&self, document_id: &str) -> Vec<String> {
        let inner = self.inner.read().expect("index lock poisoned");
        let mut ordered: Vec<(u32, String)> = inner
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .filter_map(|c| c.section_id.clone().map(|s| (c.ordinal, s)))
            .collect();
        ordered.sort();
        let mut seen = std::collections::HashSet::new();
        ordered
            .into_iter()
            .filter_map(|(_, s)| seen.insert(s.clone()).then_some(s))
            .collect()
    }

    /// Full text of a document (or one section), chunks joined in order.
    pub fn document_text(&self, document_id: &str, section_id: Option<&str>) -> Option<String> {
        let inner = self.inner.read().expect("index lock poisoned");
        let mut parts: Vec<(u32, &str)> = inner
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .filter(|c| match section_id {
                Some(s) => c.section_id.as_deref() == Some(s),
                None => true,
            })
            .map(|c| (c.ordinal, c.text.as_str()))
            .collect();
        if parts.is_empty() {
            return None;
        }
        parts.sort_by_key(|(ord, _)| *ord);
        Some(
            parts
                .into_iter()
                .map(|(_, t)| t)
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }
}

struct MinMax {
    min: f32,
    max: f32,
}

impl MinMax {
    fn apply(&self, value: f32) -> f32 {
        if self.max - self.min <= f32::EPSILON {
            // Degenerate spread: every candidate ties at the top.
            if self.max > 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (value - self.min) / (self.max - self.min)
        }
    }
}

fn min_max(values: impl Iterator<Item = f32>) -> MinMax {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    MinMax { min, max }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            document_id TEXT NOT NULL,
            ordinal     INTEGER NOT NULL,
            text        TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            section_id  TEXT,
            vector      BLOB NOT NULL,
            tokens      TEXT NOT NULL,
            provenance  TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (document_id, ordinal)
        );",
    )
}

fn load_all(inner: &mut Inner) -> Result<()> {
    inner.chunks.clear();
    inner.tokens.clear();
    inner.slots.clear();

    let mut rows: Vec<(Chunk, Vec<String>)> = Vec::new();
    {
        let conn = inner.conn.lock().expect("sqlite connection lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT document_id, ordinal, text, token_count, section_id, vector, tokens, provenance
             FROM chunks ORDER BY document_id, ordinal",
        )?;
        let mapped = stmt.query_map([], |r| {
            let tokens: String = r.get(6)?;
            Ok((
                Chunk {
                    document_id: r.get(0)?,
                    ordinal: r.get::<_, i64>(1)? as u32,
                    text: r.get(2)?,
                    token_count: r.get::<_, i64>(3)? as u32,
                    section_id: r.get(4)?,
                    vector: vectors::from_blob(&r.get::<_, Vec<u8>>(5)?),
                    provenance: r.get(7)?,
                },
                tokens.split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect(),
            ))
        })?;
        for row in mapped {
            rows.push(row?);
        }
    }

    for (chunk, tokens) in rows {
        let slot = inner.chunks.len();
        inner
            .slots
            .insert((chunk.document_id.clone(), chunk.ordinal), slot);
        inner.chunks.push(chunk);
        inner.tokens.push(tokens);
    }
    inner.lexical = LexicalIndex::rebuild(inner.tokens.iter().map(|t| t.as_slice()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        vectors::normalize(&mut v);
        v
    }

    fn chunk(doc: &str, ordinal: u32, text: &str, vector: &[f32]) -> Chunk {
        Chunk {
            document_id: doc.to_string(),
            ordinal,
            text: text.to_string(),
            token_count: text.split_whitespace().count() as u32,
            section_id: None,
            vector: unit(vector),
            provenance: format!("corpus://cache/{doc}"),
        }
    }

    #[test]
    fn upsert_then_search_returns_the_chunk() {
        let idx = VectorIndex::open_in_memory().unwrap();
        let chunks = vec![
            chunk("d1", 0, "rust borrow checker rules", &[1.0, 0.0, 0.0]),
            chunk("d1", 1, "python garbage collection", &[0.0, 1.0, 0.0]),
            chunk("d1", 2, "go channel patterns", &[0.0, 0.0, 1.0]),
        ];
        idx.upsert_chunks("d1", &chunks).unwrap();

        let hits = idx
            .search(
                "rust borrow checker rules",
                &unit(&[1.0, 0.0, 0.0]),
                &SearchFilters::default(),
                1,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.ordinal, 0);
    }

    #[test]
    fn upsert_is_idempotent_by_document_and_ordinal() {
        let idx = VectorIndex::open_in_memory().unwrap();
        let v1 = vec![chunk("d1", 0, "first version", &[1.0, 0.0])];
        idx.upsert_chunks("d1", &v1).unwrap();
        let v2 = vec![chunk("d1", 0, "second version", &[0.0, 1.0])];
        idx.upsert_chunks("d1", &v2).unwrap();

        assert_eq!(idx.document_chunk_count("d1"), 1);
        let text = idx.document_text("d1", None).unwrap();
        assert_eq!(text, "second version");
    }

    #[test]
    fn non_monotonic_ordinals_are_rejected() {
        let idx = VectorIndex::open_in_memory().unwrap();
        let bad = vec![
            chunk("d1", 1, "later", &[1.0, 0.0]),
            chunk("d1", 0, "earlier", &[0.0, 1.0]),
        ];
        assert!(matches!(
            idx.upsert_chunks("d1", &bad),
            Err(IndexError::NonMonotonicOrdinals { .. })
        ));
        assert_eq!(idx.document_chunk_count("d1"), 0);
    }

    #[test]
    fn filters_restrict_to_document_set() {
        let idx = VectorIndex::open_in_memory().unwrap();
        idx.upsert_chunks("a", &[chunk("a", 0, "shared topic text", &[1.0, 0.0])])
            .unwrap();
        idx.upsert_chunks("b", &[chunk("b", 0, "shared topic text", &[1.0, 0.0])])
            .unwrap();

        let hits = idx
            .search(
                "shared topic",
                &unit(&[1.0, 0.0]),
                &SearchFilters::documents(["b"]),
                10,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.document_id, "b");
    }

    #[test]
    fn ties_break_by_document_then_ordinal() {
        let idx = VectorIndex::open_in_memory().unwrap();
        // Identical text and vectors — scores tie exactly.
        idx.upsert_chunks("b", &[chunk("b", 0, "same words here", &[1.0, 0.0])])
            .unwrap();
        idx.upsert_chunks("a", &[
            chunk("a", 0, "same words here", &[1.0, 0.0]),
            chunk("a", 1, "same words here", &[1.0, 0.0]),
        ])
        .unwrap();

        let hits = idx
            .search("same words here", &unit(&[1.0, 0.0]), &SearchFilters::default(), 3)
            .unwrap();
        let order: Vec<(String, u32)> = hits
            .iter()
            .map(|h| (h.chunk.document_id.clone(), h.chunk.ordinal))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".to_string(), 0),
                ("a".to_string(), 1),
                ("b".to_string(), 0)
            ]
        );
    }

    #[test]
    fn lexical_signal_outranks_weak_dense_match() {
        let idx = VectorIndex::open_in_memory().unwrap();
        idx.upsert_chunks("d", &[
            chunk("d", 0, "anagram puzzle dictionary", &[0.6, 0.4]),
            chunk("d", 1, "unrelated cooking recipe", &[0.6, 0.4]),
        ])
        .unwrap();

        // Dense scores tie; lexical overlap must decide.
        let hits = idx
            .search("anagram dictionary", &unit(&[0.6, 0.4]), &SearchFilters::default(), 2)
            .unwrap();
        assert_eq!(hits[0].chunk.ordinal, 0);
        assert!(hits[0].lexical_score > hits[1].lexical_score);
    }

    #[test]
    fn delete_document_removes_rows_and_rebuilt_index() {
        let idx = VectorIndex::open_in_memory().unwrap();
        idx.upsert_chunks("gone", &[chunk("gone", 0, "text", &[1.0])])
            .unwrap();
        idx.upsert_chunks("kept", &[chunk("kept", 0, "text", &[1.0])])
            .unwrap();

        assert_eq!(idx.delete_document("gone").unwrap(), 1);
        assert_eq!(idx.document_chunk_count("gone"), 0);
        assert_eq!(idx.document_chunk_count("kept"), 1);
    }

    #[test]
    fn findings_cleanup_only_touches_that_session() {
        let idx = VectorIndex::open_in_memory().unwrap();
        let f7 = VectorIndex::findings_document_id(7);
        let f9 = VectorIndex::findings_document_id(9);
        idx.upsert_chunks(&f7, &[chunk(&f7, 0, "session seven fact", &[1.0])])
            .unwrap();
        idx.upsert_chunks(&f9, &[chunk(&f9, 0, "session nine fact", &[1.0])])
            .unwrap();

        idx.delete_findings_by_session(7).unwrap();
        assert_eq!(idx.document_chunk_count(&f7), 0);
        assert_eq!(idx.document_chunk_count(&f9), 1);
    }

    #[test]
    fn sections_listed_in_ordinal_order() {
        let idx = VectorIndex::open_in_memory().unwrap();
        let mut c1 = chunk("d", 0, "intro text", &[1.0]);
        c1.section_id = Some("intro".to_string());
        let mut c2 = chunk("d", 1, "body text", &[1.0]);
        c2.section_id = Some("body".to_string());
        let mut c3 = chunk("d", 2, "more body", &[1.0]);
        c3.section_id = Some("body".to_string());
        idx.upsert_chunks("d", &[c1, c2, c3]).unwrap();

        assert_eq!(idx.document_sections("d"), vec!["intro", "body"]);
        assert_eq!(idx.document_text("d", Some("body")).unwrap(), "body text\n\nmore body");
    }
}
