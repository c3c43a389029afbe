//! Supplemental append-only conversation threads, backing the
//! `thread_push`/`thread_read`/`thread_seek`/`thread_list` tools. Grounded
//! on the original's flat turn log, kept here (rather than in
//! `context-tree`) because it shares the same FTS-capable embedded database
//! and has no tree/checkpoint structure of its own.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::IndexDb;
use crate::error::IndexError;

pub struct ThreadEntry {
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

pub struct ThreadSummary {
    pub thread_id: String,
    pub last_activity: String,
    pub entry_count: i64,
}

/// Append one entry to a thread, creating the thread row on first use.
/// Returns the assigned sequence number.
pub fn push(
    db: &IndexDb,
    tenant: &str,
    project: &str,
    thread_id: &str,
    role: &str,
    content: &str,
) -> Result<i64, IndexError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();

    let existing: Option<String> = tx
        .query_row(
            "SELECT thread_id FROM threads WHERE tenant = ?1 AND project = ?2 AND thread_id = ?3",
            params![tenant, project, thread_id],
            |row| row.get(0),
        )
        .optional()?;

    if existing.is_none() {
        tx.execute(
            "INSERT INTO threads (tenant, project, thread_id, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![tenant, project, thread_id, now],
        )?;
    } else {
        tx.execute(
            "UPDATE threads SET last_activity = ?4
             WHERE tenant = ?1 AND project = ?2 AND thread_id = ?3",
            params![tenant, project, thread_id, now],
        )?;
    }

    let next_seq: i64 = tx
        .query_row(
            "SELECT COALESCE(MAX(seq), -1) + 1 FROM thread_entries
             WHERE tenant = ?1 AND project = ?2 AND thread_id = ?3",
            params![tenant, project, thread_id],
            |row| row.get(0),
        )?;

    tx.execute(
        "INSERT INTO thread_entries (tenant, project, thread_id, seq, created_at, role, content)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![tenant, project, thread_id, next_seq, now, role, content],
    )?;
    tx.execute(
        "INSERT INTO thread_entries_fts (tenant, project, thread_id, seq, content)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![tenant, project, thread_id, next_seq, content],
    )?;

    tx.commit()?;
    Ok(next_seq)
}

/// Every entry in a thread, in sequence order.
pub fn read(db: &IndexDb, tenant: &str, project: &str, thread_id: &str) -> Result<Vec<ThreadEntry>, IndexError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT seq, role, content, created_at FROM thread_entries
         WHERE tenant = ?1 AND project = ?2 AND thread_id = ?3
         ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map(params![tenant, project, thread_id], |row| {
            Ok(ThreadEntry {
                seq: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Full-text search over one thread's entries, most relevant first. Joins
/// back to `thread_entries` for `role`/`created_at` since the FTS table
/// only carries `content` plus the unindexed identity columns.
pub fn seek(
    db: &IndexDb,
    tenant: &str,
    project: &str,
    thread_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<ThreadEntry>, IndexError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT f.seq, e.role, e.content, e.created_at
         FROM thread_entries_fts f
         JOIN thread_entries e
           ON e.tenant = f.tenant AND e.project = f.project
          AND e.thread_id = f.thread_id AND e.seq = f.seq
         WHERE f.tenant = ?1 AND f.project = ?2 AND f.thread_id = ?3
           AND f MATCH ?4
         ORDER BY rank
         LIMIT ?5",
    )?;
    let rows = stmt
        .query_map(params![tenant, project, thread_id, query, limit as i64], |row| {
            Ok(ThreadEntry {
                seq: row.get(0)?,
                role: row.get(1)?,
                content: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All threads for a tenant/project, most recently active first.
pub fn list(db: &IndexDb, tenant: &str, project: &str) -> Result<Vec<ThreadSummary>, IndexError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT t.thread_id, t.last_activity,
                (SELECT COUNT(*) FROM thread_entries e
                 WHERE e.tenant = t.tenant AND e.project = t.project AND e.thread_id = t.thread_id)
         FROM threads t
         WHERE t.tenant = ?1 AND t.project = ?2
         ORDER BY t.last_activity DESC",
    )?;
    let rows = stmt
        .query_map(params![tenant, project], |row| {
            Ok(ThreadSummary {
                thread_id: row.get(0)?,
                last_activity: row.get(1)?,
                entry_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_increasing_sequence_numbers() {
        let db = IndexDb::open_in_memory().unwrap();
        let s0 = push(&db, "acme", "proj", "t1", "user", "hi").unwrap();
        let s1 = push(&db, "acme", "proj", "t1", "assistant", "hello").unwrap();
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
    }

    #[test]
    fn read_returns_entries_in_order() {
        let db = IndexDb::open_in_memory().unwrap();
        push(&db, "acme", "proj", "t1", "user", "first").unwrap();
        push(&db, "acme", "proj", "t1", "assistant", "second").unwrap();

        let entries = read(&db, "acme", "proj", "t1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "first");
        assert_eq!(entries[1].content, "second");
    }

    #[test]
    fn seek_finds_entries_matching_the_query() {
        let db = IndexDb::open_in_memory().unwrap();
        push(&db, "acme", "proj", "t1", "user", "what is the deployment process").unwrap();
        push(&db, "acme", "proj", "t1", "assistant", "deploy via the release pipeline").unwrap();
        push(&db, "acme", "proj", "t1", "user", "thanks, unrelated question now").unwrap();

        let entries = seek(&db, "acme", "proj", "t1", "deploy", 5).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.content.to_lowercase().contains("deploy")));
    }

    #[test]
    fn seek_respects_limit() {
        let db = IndexDb::open_in_memory().unwrap();
        for i in 0..10 {
            push(&db, "acme", "proj", "t1", "user", &format!("entry about rust number {i}")).unwrap();
        }
        let entries = seek(&db, "acme", "proj", "t1", "rust", 3).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn list_orders_by_most_recently_active() {
        let db = IndexDb::open_in_memory().unwrap();
        push(&db, "acme", "proj", "old", "user", "x").unwrap();
        push(&db, "acme", "proj", "new", "user", "y").unwrap();
        push(&db, "acme", "proj", "old", "user", "z").unwrap();

        let threads = list(&db, "acme", "proj").unwrap();
        assert_eq!(threads[0].thread_id, "old");
        assert_eq!(threads[0].entry_count, 2);
    }

    #[test]
    fn threads_are_scoped_by_tenant_and_project() {
        let db = IndexDb::open_in_memory().unwrap();
        push(&db, "acme", "proj-a", "t1", "user", "a").unwrap();
        push(&db, "acme", "proj-b", "t1", "user", "b").unwrap();

        assert_eq!(read(&db, "acme", "proj-a", "t1").unwrap().len(), 1);
        assert_eq!(read(&db, "acme", "proj-b", "t1").unwrap().len(), 1);
    }
}
