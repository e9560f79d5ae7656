use rusqlite::{Connection, Result};

/// Initialise all history tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id  INTEGER,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            summary     TEXT,
            model       TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id);

        CREATE TABLE IF NOT EXISTS sessions (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            name                 TEXT NOT NULL UNIQUE,
            default_model        TEXT,
            created_at           TEXT NOT NULL,
            last_used_at         TEXT NOT NULL,
            compacted_summary    TEXT,
            compacted_through    INTEGER,
            memory_auto_extract  INTEGER NOT NULL DEFAULT 1,
            max_turns_override   INTEGER,
            research_mode        INTEGER NOT NULL DEFAULT 0,
            research_source_mode TEXT,
            corpus_pointers      TEXT NOT NULL DEFAULT '[]',
            shortlist_override   INTEGER
        );

        CREATE TABLE IF NOT EXISTS user_memories (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            text       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            vector     BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS findings (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id    INTEGER NOT NULL,
            text          TEXT NOT NULL,
            source_handle TEXT,
            created_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_findings_session
            ON findings(session_id);

        CREATE TABLE IF NOT EXISTS transcripts (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            alias      TEXT NOT NULL,
            text       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, alias)
        );

        CREATE TABLE IF NOT EXISTS image_transcripts (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            alias      TEXT NOT NULL,
            text       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(session_id, alias)
        );

        CREATE TABLE IF NOT EXISTS room_session_bindings (
            room       TEXT PRIMARY KEY,
            session_id INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_override_files (
            session_id INTEGER NOT NULL,
            name       TEXT NOT NULL,
            path       TEXT NOT NULL,
            PRIMARY KEY(session_id, name)
        );

        CREATE TABLE IF NOT EXISTS session_uploaded_documents (
            session_id  INTEGER NOT NULL,
            document_id TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY(session_id, document_id)
        );",
    )
}
