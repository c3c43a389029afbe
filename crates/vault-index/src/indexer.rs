//! C4: on every vault mutation, rewrite metadata/FTS/tag/link rows for one
//! note in a single transaction, bump its version, and refresh health
//! counters. Grounded on the original indexer's `index_note`/`delete_note_index`
//! transactional shape, adapted to rusqlite.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use wiki_links::{extract_wikilinks_ordered, normalize_slug};

use crate::db::IndexDb;
use crate::error::IndexError;

/// Input to [`index`]: everything the indexer needs about one note after a
/// successful vault write.
pub struct IndexNoteInput<'a> {
    pub tenant: &'a str,
    pub path: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    /// Raw tags as they appeared in frontmatter (pre-normalisation).
    pub tags: &'a [String],
    pub size_bytes: usize,
    /// `Some(now)` when the vault store reports this was a fresh create;
    /// `None` on overwrite, so the indexer preserves the previous `created`.
    pub created_override: Option<DateTime<Utc>>,
}

pub struct IndexResult {
    pub version: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

fn path_stem(path: &str) -> &str {
    path.strip_suffix(".md").unwrap_or(path)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// Lowercase, trim, dedupe preserving first-occurrence order.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let norm = tag.trim().to_lowercase();
        if norm.is_empty() {
            continue;
        }
        if seen.insert(norm.clone()) {
            out.push(norm);
        }
    }
    out
}

/// The current indexed version of a note, if any row exists for it yet.
/// Used by the HTTP layer to enforce `if_version` before calling [`index`].
pub fn current_version(db: &IndexDb, tenant: &str, path: &str) -> Result<Option<i64>, IndexError> {
    let conn = db.lock();
    let version: Option<i64> = conn
        .query_row(
            "SELECT version FROM note_metadata WHERE tenant = ?1 AND path = ?2",
            params![tenant, path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Index (or reindex) one note in a single transaction. Returns the new
/// version.
pub fn index(db: &IndexDb, input: IndexNoteInput<'_>) -> Result<IndexResult, IndexError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;

    let previous_created: Option<String> = tx
        .query_row(
            "SELECT created FROM note_metadata WHERE tenant = ?1 AND path = ?2",
            params![input.tenant, input.path],
            |row| row.get(0),
        )
        .optional()?;

    let current_version: Option<i64> = tx
        .query_row(
            "SELECT version FROM note_metadata WHERE tenant = ?1 AND path = ?2",
            params![input.tenant, input.path],
            |row| row.get(0),
        )
        .optional()?;
    let new_version = current_version.unwrap_or(0) + 1;

    delete_note_rows(&tx, input.tenant, input.path)?;

    let now = Utc::now();
    let created = input
        .created_override
        .or_else(|| previous_created.as_deref().and_then(parse_ts))
        .unwrap_or(now);
    let updated = now;

    let title_slug = normalize_slug(input.title);
    let path_slug = normalize_slug(path_stem(input.path));

    tx.execute(
        "INSERT INTO note_metadata
            (tenant, path, version, title, created, updated, size_bytes, title_slug, path_slug)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            input.tenant,
            input.path,
            new_version,
            input.title,
            created.to_rfc3339(),
            updated.to_rfc3339(),
            input.size_bytes as i64,
            title_slug,
            path_slug,
        ],
    )?;

    tx.execute(
        "INSERT INTO note_fts (tenant, path, title, body) VALUES (?1, ?2, ?3, ?4)",
        params![input.tenant, input.path, input.title, input.body],
    )?;

    for tag in normalize_tags(input.tags) {
        tx.execute(
            "INSERT INTO note_tags (tenant, path, tag) VALUES (?1, ?2, ?3)",
            params![input.tenant, input.path, tag],
        )?;
    }

    let links = extract_wikilinks_ordered(input.body);
    let src_parent = parent_of(input.path);
    for link in &links {
        let slug = normalize_slug(&link.link_text);
        let target = resolve_wikilink_target(&tx, input.tenant, &slug, src_parent)?;
        let (target_path, is_resolved) = match target {
            Some(p) => (Some(p), true),
            None => (None, false),
        };
        tx.execute(
            "INSERT INTO note_links (tenant, source_path, link_text, target_path, is_resolved)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                input.tenant,
                input.path,
                link.link_text,
                target_path,
                is_resolved as i64,
            ],
        )?;
    }

    refresh_health(&tx, input.tenant, now, false)?;

    tx.commit()?;
    tracing::info!(tenant = input.tenant, path = input.path, version = new_version, "indexed note");

    Ok(IndexResult {
        version: new_version,
        created,
        updated,
    })
}

/// Resolve a wikilink's slug to a target path, same-folder-wins then
/// lexicographic tie-break. Pure function of index state — deterministic.
fn resolve_wikilink_target(
    tx: &Transaction<'_>,
    tenant: &str,
    slug: &str,
    src_parent: &str,
) -> Result<Option<String>, IndexError> {
    let mut stmt = tx.prepare(
        "SELECT path FROM note_metadata WHERE tenant = ?1 AND (title_slug = ?2 OR path_slug = ?2)",
    )?;
    let mut candidates: Vec<String> = stmt
        .query_map(params![tenant, slug], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;

    if candidates.is_empty() {
        return Ok(None);
    }

    candidates.sort_by(|a, b| {
        let a_other_folder = parent_of(a) != src_parent;
        let b_other_folder = parent_of(b) != src_parent;
        a_other_folder.cmp(&b_other_folder).then(a.cmp(b))
    });

    Ok(candidates.into_iter().next())
}

fn delete_note_rows(tx: &Transaction<'_>, tenant: &str, path: &str) -> Result<(), IndexError> {
    tx.execute(
        "DELETE FROM note_metadata WHERE tenant = ?1 AND path = ?2",
        params![tenant, path],
    )?;
    tx.execute(
        "DELETE FROM note_fts WHERE tenant = ?1 AND path = ?2",
        params![tenant, path],
    )?;
    tx.execute(
        "DELETE FROM note_tags WHERE tenant = ?1 AND path = ?2",
        params![tenant, path],
    )?;
    tx.execute(
        "DELETE FROM note_links WHERE tenant = ?1 AND source_path = ?2",
        params![tenant, path],
    )?;
    Ok(())
}

/// Symmetric delete plus a sweep that unresolves any inbound links.
pub fn delete_index(db: &IndexDb, tenant: &str, path: &str) -> Result<(), IndexError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;

    delete_note_rows(&tx, tenant, path)?;

    tx.execute(
        "UPDATE note_links SET target_path = NULL, is_resolved = 0
         WHERE tenant = ?1 AND target_path = ?2",
        params![tenant, path],
    )?;

    refresh_health(&tx, tenant, Utc::now(), false)?;
    tx.commit()?;
    tracing::info!(tenant, path, "deleted note from index");
    Ok(())
}

/// Clear all index rows for `tenant` (used immediately before a full
/// rebuild walks the vault and reindexes every note).
pub fn clear_tenant(db: &IndexDb, tenant: &str) -> Result<(), IndexError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;
    for table in ["note_metadata", "note_fts", "note_tags", "note_links"] {
        tx.execute(&format!("DELETE FROM {table} WHERE tenant = ?1"), params![tenant])?;
    }
    tx.commit()?;
    Ok(())
}

/// Stamp `last_full_rebuild` after the caller has cleared and reindexed
/// every note for `tenant`.
pub fn stamp_full_rebuild(db: &IndexDb, tenant: &str) -> Result<(), IndexError> {
    let mut conn = db.lock();
    let tx = conn.transaction()?;
    refresh_health(&tx, tenant, Utc::now(), true)?;
    tx.commit()?;
    Ok(())
}

fn refresh_health(
    tx: &Transaction<'_>,
    tenant: &str,
    now: DateTime<Utc>,
    full_rebuild: bool,
) -> Result<(), IndexError> {
    let note_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM note_metadata WHERE tenant = ?1",
        params![tenant],
        |row| row.get(0),
    )?;

    let existing_full: Option<String> = tx
        .query_row(
            "SELECT last_full_rebuild FROM index_health WHERE tenant = ?1",
            params![tenant],
            |row| row.get(0),
        )
        .optional()?;

    let last_full_rebuild = if full_rebuild {
        Some(now.to_rfc3339())
    } else {
        existing_full
    };

    tx.execute(
        "INSERT INTO index_health (tenant, note_count, last_full_rebuild, last_incremental_update)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(tenant) DO UPDATE SET
            note_count = excluded.note_count,
            last_full_rebuild = excluded.last_full_rebuild,
            last_incremental_update = excluded.last_incremental_update",
        params![tenant, note_count, last_full_rebuild, now.to_rfc3339()],
    )?;
    Ok(())
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tenant: &'static str, path: &'static str, title: &'static str, body: &'static str) -> IndexNoteInput<'static> {
        IndexNoteInput {
            tenant,
            path,
            title,
            body,
            tags: &[],
            size_bytes: body.len(),
            created_override: Some(Utc::now()),
        }
    }

    #[test]
    fn index_then_delete_leaves_no_rows() {
        let db = IndexDb::open_in_memory().unwrap();
        index(&db, sample("acme", "a.md", "A", "hello")).unwrap();
        delete_index(&db, "acme", "a.md").unwrap();

        let conn = db.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM note_metadata WHERE tenant='acme' AND path='a.md'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn version_increments_on_reindex() {
        let db = IndexDb::open_in_memory().unwrap();
        let r1 = index(&db, sample("acme", "a.md", "A", "hello")).unwrap();
        assert_eq!(r1.version, 1);
        let r2 = index(&db, IndexNoteInput { created_override: None, ..sample("acme", "a.md", "A", "hello v2") }).unwrap();
        assert_eq!(r2.version, 2);
        assert_eq!(r2.created, r1.created);
    }

    #[test]
    fn delete_unresolves_inbound_links() {
        let db = IndexDb::open_in_memory().unwrap();
        index(&db, sample("acme", "guide.md", "Guide", "body")).unwrap();
        index(&db, sample("acme", "intro.md", "Intro", "See [[Guide]]")).unwrap();

        delete_index(&db, "acme", "guide.md").unwrap();

        let conn = db.lock();
        let (target, resolved): (Option<String>, i64) = conn
            .query_row(
                "SELECT target_path, is_resolved FROM note_links WHERE tenant='acme' AND source_path='intro.md'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(target, None);
        assert_eq!(resolved, 0);
    }

    #[test]
    fn wikilink_resolution_prefers_same_folder_then_lexicographic() {
        let db = IndexDb::open_in_memory().unwrap();
        index(&db, sample("acme", "guide.md", "Guide", "root guide")).unwrap();
        index(&db, sample("acme", "stuff/guide.md", "Guide", "stuff guide")).unwrap();
        index(&db, sample("acme", "intro.md", "Intro", "See [[Guide]]")).unwrap();

        let conn = db.lock();
        let target: Option<String> = conn
            .query_row(
                "SELECT target_path FROM note_links WHERE tenant='acme' AND source_path='intro.md'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        // intro.md is in root; both candidates are in a different folder from
        // intro.md's root... actually intro.md's parent is "" (root), so
        // guide.md (parent "") is same-folder and wins.
        assert_eq!(target, Some("guide.md".to_string()));
    }

    #[test]
    fn unresolved_link_when_no_candidate_matches() {
        let db = IndexDb::open_in_memory().unwrap();
        index(&db, sample("acme", "intro.md", "Intro", "See [[Nowhere]]")).unwrap();

        let conn = db.lock();
        let resolved: i64 = conn
            .query_row(
                "SELECT is_resolved FROM note_links WHERE tenant='acme' AND source_path='intro.md'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(resolved, 0);
    }

    #[test]
    fn tags_are_normalised_and_deduplicated() {
        let db = IndexDb::open_in_memory().unwrap();
        let tags = vec!["Rust".to_string(), " rust ".to_string(), "wasm".to_string()];
        index(
            &db,
            IndexNoteInput { tags: &tags, ..sample("acme", "a.md", "A", "body") },
        )
        .unwrap();

        let conn = db.lock();
        let mut stmt = conn
            .prepare("SELECT tag FROM note_tags WHERE tenant='acme' AND path='a.md' ORDER BY tag")
            .unwrap();
        let tags: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(tags, vec!["rust".to_string(), "wasm".to_string()]);
    }

    #[test]
    fn health_note_count_tracks_indexed_notes() {
        let db = IndexDb::open_in_memory().unwrap();
        index(&db, sample("acme", "a.md", "A", "x")).unwrap();
        index(&db, sample("acme", "b.md", "B", "y")).unwrap();

        let conn = db.lock();
        let count: i64 = conn
            .query_row(
                "SELECT note_count FROM index_health WHERE tenant='acme'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
