//! Connection lifecycle and schema migrations for the single embedded
//! SQL+FTS database.
//!
//! Connections are short-lived: callers open one per logical operation via
//! [`IndexDb::connection`] and every multi-statement write in this crate
//! runs inside one transaction, matching the "serialised writer" model in
//! the concurrency design.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::IndexError;

/// Additive migrations, applied in a single transaction at startup.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS note_metadata (
        tenant TEXT NOT NULL,
        path TEXT NOT NULL,
        version INTEGER NOT NULL,
        title TEXT NOT NULL,
        created TEXT NOT NULL,
        updated TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        title_slug TEXT NOT NULL,
        path_slug TEXT NOT NULL,
        PRIMARY KEY (tenant, path)
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS note_fts USING fts5(
        title, body,
        tenant UNINDEXED, path UNINDEXED,
        tokenize = 'porter unicode61'
    )",
    "CREATE TABLE IF NOT EXISTS note_tags (
        tenant TEXT NOT NULL,
        path TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (tenant, path, tag)
    )",
    "CREATE TABLE IF NOT EXISTS note_links (
        tenant TEXT NOT NULL,
        source_path TEXT NOT NULL,
        link_text TEXT NOT NULL,
        target_path TEXT,
        is_resolved INTEGER NOT NULL,
        PRIMARY KEY (tenant, source_path, link_text)
    )",
    "CREATE INDEX IF NOT EXISTS note_links_target_idx ON note_links(tenant, target_path)",
    "CREATE TABLE IF NOT EXISTS index_health (
        tenant TEXT PRIMARY KEY,
        note_count INTEGER NOT NULL,
        last_full_rebuild TEXT,
        last_incremental_update TEXT
    )",
    "CREATE TABLE IF NOT EXISTS context_nodes (
        id TEXT PRIMARY KEY,
        root_id TEXT NOT NULL,
        parent_id TEXT,
        tenant TEXT NOT NULL,
        project TEXT NOT NULL,
        created_at TEXT NOT NULL,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        tool_calls_blob TEXT NOT NULL,
        tokens_used INTEGER NOT NULL,
        model_used TEXT,
        label TEXT,
        is_checkpoint INTEGER NOT NULL,
        is_root INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS context_nodes_root_idx ON context_nodes(root_id)",
    "CREATE TABLE IF NOT EXISTS context_trees (
        root_id TEXT PRIMARY KEY,
        tenant TEXT NOT NULL,
        project TEXT NOT NULL,
        current_node_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_activity TEXT NOT NULL,
        node_count INTEGER NOT NULL,
        max_nodes INTEGER NOT NULL,
        label TEXT
    )",
    "CREATE INDEX IF NOT EXISTS context_trees_tenant_idx ON context_trees(tenant, project)",
    "CREATE TABLE IF NOT EXISTS threads (
        tenant TEXT NOT NULL,
        project TEXT NOT NULL,
        thread_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        last_activity TEXT NOT NULL,
        PRIMARY KEY (tenant, project, thread_id)
    )",
    "CREATE TABLE IF NOT EXISTS thread_entries (
        tenant TEXT NOT NULL,
        project TEXT NOT NULL,
        thread_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        PRIMARY KEY (tenant, project, thread_id, seq)
    )",
    "CREATE VIRTUAL TABLE IF NOT EXISTS thread_entries_fts USING fts5(
        content,
        tenant UNINDEXED, project UNINDEXED, thread_id UNINDEXED, seq UNINDEXED
    )",
];

/// Handle to the embedded database. Cheap to clone; internally a mutex
/// around one connection, matching the single-writer model the concurrency
/// design calls for (no pool, no extra parallelism the spec didn't ask for).
#[derive(Clone)]
pub struct IndexDb {
    conn: Arc<Mutex<Connection>>,
}

impl IndexDb {
    /// Open (creating if absent) the database file at `path` and apply all
    /// migrations in one transaction.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (used by tests).
    pub fn open_in_memory() -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self, IndexError> {
        let tx = conn.transaction()?;
        for stmt in MIGRATIONS {
            tx.execute_batch(stmt)?;
        }
        tx.commit()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("index db mutex poisoned")
    }

    /// Raw access to the shared connection, for sibling crates (`context-tree`)
    /// that own tables in this same database but not the migrations that
    /// created them.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.lock()
    }
}
