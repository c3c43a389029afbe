//! C5: full-text search with field-weighted BM25 ranking plus a bounded
//! recency bonus, backlink lookup, and tag enumeration.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rusqlite::params;
use std::sync::OnceLock;

use crate::db::IndexDb;
use crate::error::IndexError;

pub const MAX_SEARCH_LIMIT: usize = 100;
const DEFAULT_SEARCH_LIMIT: usize = 20;

const TITLE_WEIGHT: f64 = 3.0;
const BODY_WEIGHT: f64 = 1.0;
const RECENCY_BONUS_WEEK: f64 = 1.0;
const RECENCY_BONUS_MONTH: f64 = 0.5;

pub struct SearchHit {
    pub path: String,
    pub title: String,
    pub score: f64,
    pub snippet: String,
    pub updated: DateTime<Utc>,
}

pub struct Backlink {
    pub path: String,
    pub title: String,
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9A-Za-z]+\*?").unwrap())
}

/// Turn a free-text query into an FTS5 MATCH expression: each token is
/// double-quoted so punctuation in the raw query can't break the query
/// syntax, while a trailing `*` is preserved outside the quotes so prefix
/// search still works.
fn build_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = token_re()
        .find_iter(query)
        .map(|m| {
            let tok = m.as_str();
            if let Some(stem) = tok.strip_suffix('*') {
                format!("\"{stem}\"*")
            } else {
                format!("\"{tok}\"")
            }
        })
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

fn recency_bonus(updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now.signed_duration_since(updated);
    if age <= Duration::days(7) {
        RECENCY_BONUS_WEEK
    } else if age <= Duration::days(30) {
        RECENCY_BONUS_MONTH
    } else {
        0.0
    }
}

/// Run a field-weighted BM25 search, apply the recency bonus, and return
/// hits sorted by score desc, then updated desc, then path asc.
pub fn search(db: &IndexDb, tenant: &str, query: &str, limit: Option<usize>) -> Result<Vec<SearchHit>, IndexError> {
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).min(MAX_SEARCH_LIMIT);
    let Some(match_expr) = build_match_expr(query) else {
        return Ok(Vec::new());
    };

    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT f.path, f.title,
                bm25(note_fts, ?3, ?4) AS rank,
                snippet(note_fts, 1, '<mark>', '</mark>', '...', 32) AS snip,
                m.updated
         FROM note_fts f
         JOIN note_metadata m ON m.tenant = f.tenant AND m.path = f.path
         WHERE f.tenant = ?1 AND note_fts MATCH ?2",
    )?;

    let now = Utc::now();
    let mut rows = stmt.query(params![tenant, match_expr, TITLE_WEIGHT, BODY_WEIGHT])?;
    let mut hits = Vec::new();
    while let Some(row) = rows.next()? {
        let path: String = row.get(0)?;
        let title: String = row.get(1)?;
        let bm25_rank: f64 = row.get(2)?;
        let snippet: String = row.get(3)?;
        let updated_raw: String = row.get(4)?;
        let updated = DateTime::parse_from_rfc3339(&updated_raw)
            .map_err(|e| IndexError::Internal(format!("corrupt updated timestamp: {e}")))?
            .with_timezone(&Utc);

        // bm25() in sqlite returns *lower is better*; invert so higher is better
        // and add the recency bonus on top.
        let score = -bm25_rank + recency_bonus(updated, now);

        hits.push(SearchHit { path, title, score, snippet, updated });
    }
    drop(rows);
    drop(stmt);

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated.cmp(&a.updated))
            .then_with(|| a.path.cmp(&b.path))
    });
    hits.truncate(limit);
    Ok(hits)
}

/// Every note whose wikilinks resolved to `target`, newest-updated first.
pub fn backlinks(db: &IndexDb, tenant: &str, target: &str) -> Result<Vec<Backlink>, IndexError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT m.path, m.title
         FROM note_links l
         JOIN note_metadata m ON m.tenant = l.tenant AND m.path = l.source_path
         WHERE l.tenant = ?1 AND l.target_path = ?2 AND l.is_resolved = 1
         GROUP BY m.path
         ORDER BY m.updated DESC",
    )?;
    let rows = stmt
        .query_map(params![tenant, target], |row| {
            Ok(Backlink {
                path: row.get(0)?,
                title: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct GraphNode {
    pub path: String,
    pub title: String,
    pub group: String,
}

pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

fn group_of(path: &str) -> String {
    match path.find('/') {
        Some(pos) => path[..pos].to_string(),
        None => "root".to_string(),
    }
}

/// Derived graph view: one node per note, one edge per resolved wikilink.
pub fn graph(db: &IndexDb, tenant: &str) -> Result<(Vec<GraphNode>, Vec<GraphEdge>), IndexError> {
    let conn = db.lock();

    let mut node_stmt = conn.prepare("SELECT path, title FROM note_metadata WHERE tenant = ?1 ORDER BY path ASC")?;
    let nodes = node_stmt
        .query_map(params![tenant], |row| {
            let path: String = row.get(0)?;
            let title: String = row.get(1)?;
            let group = group_of(&path);
            Ok(GraphNode { path, title, group })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut edge_stmt = conn.prepare(
        "SELECT source_path, target_path FROM note_links
         WHERE tenant = ?1 AND is_resolved = 1
         ORDER BY source_path ASC, target_path ASC",
    )?;
    let edges = edge_stmt
        .query_map(params![tenant], |row| {
            Ok(GraphEdge { source: row.get(0)?, target: row.get::<_, String>(1)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((nodes, edges))
}

pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

/// Tags in use across the tenant's vault, with the count of distinct notes
/// carrying each one, sorted by count desc then tag asc.
pub fn tags(db: &IndexDb, tenant: &str) -> Result<Vec<TagCount>, IndexError> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT tag, COUNT(DISTINCT path) AS cnt FROM note_tags
         WHERE tenant = ?1
         GROUP BY tag
         ORDER BY cnt DESC, tag ASC",
    )?;
    let rows = stmt
        .query_map(params![tenant], |row| {
            Ok(TagCount { tag: row.get(0)?, count: row.get(1)? })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{index, IndexNoteInput};

    fn seed(db: &IndexDb, tenant: &str, path: &str, title: &str, body: &str) {
        index(
            db,
            IndexNoteInput {
                tenant,
                path,
                title,
                body,
                tags: &[],
                size_bytes: body.len(),
                created_override: Some(Utc::now()),
            },
        )
        .unwrap();
    }

    #[test]
    fn search_finds_body_match() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "a.md", "Onboarding", "Our roast profile for Ethiopian beans");
        seed(&db, "acme", "b.md", "Unrelated", "Nothing to see here");

        let hits = search(&db, "acme", "Ethiopian", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
        assert!(hits[0].snippet.contains("<mark>"));
    }

    #[test]
    fn search_title_match_outranks_body_only_match() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "title-hit.md", "Roasting Guide", "irrelevant body text");
        seed(&db, "acme", "body-hit.md", "Unrelated", "a quick note about roasting beans");

        let hits = search(&db, "acme", "roasting", None).unwrap();
        assert_eq!(hits[0].path, "title-hit.md");
    }

    #[test]
    fn search_respects_limit_cap() {
        let db = IndexDb::open_in_memory().unwrap();
        for i in 0..5 {
            seed(&db, "acme", &format!("n{i}.md"), "Note", "shared keyword content");
        }
        let hits = search(&db, "acme", "keyword", Some(2)).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn search_is_scoped_to_tenant() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "a.md", "A", "unique-term-here");
        seed(&db, "other", "b.md", "B", "unique-term-here");

        let hits = search(&db, "acme", "unique-term-here", None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "a.md", "A", "body");
        let hits = search(&db, "acme", "   ", None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn backlinks_lists_resolved_inbound_links_only() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "guide.md", "Guide", "body");
        seed(&db, "acme", "intro.md", "Intro", "See [[Guide]]");
        seed(&db, "acme", "other.md", "Other", "See [[Nowhere]]");

        let links = backlinks(&db, "acme", "guide.md").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].path, "intro.md");
        assert_eq!(links[0].title, "Intro");
    }

    #[test]
    fn tags_are_counted_and_sorted_by_count_then_name() {
        let db = IndexDb::open_in_memory().unwrap();
        index(
            &db,
            IndexNoteInput {
                tenant: "acme",
                path: "a.md",
                title: "A",
                body: "x",
                tags: &["zeta".to_string(), "alpha".to_string()],
                size_bytes: 1,
                created_override: Some(Utc::now()),
            },
        )
        .unwrap();
        index(
            &db,
            IndexNoteInput {
                tenant: "acme",
                path: "b.md",
                title: "B",
                body: "y",
                tags: &["alpha".to_string()],
                size_bytes: 1,
                created_override: Some(Utc::now()),
            },
        )
        .unwrap();

        let counts = tags(&db, "acme").unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].tag, "alpha");
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].tag, "zeta");
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn graph_groups_nodes_by_top_level_folder_and_edges_only_resolved_links() {
        let db = IndexDb::open_in_memory().unwrap();
        seed(&db, "acme", "guide.md", "Guide", "plain");
        seed(&db, "acme", "notes/intro.md", "Intro", "See [[Guide]] and [[Missing]]");

        let (nodes, edges) = graph(&db, "acme").unwrap();
        assert_eq!(nodes.len(), 2);
        let intro = nodes.iter().find(|n| n.path == "notes/intro.md").unwrap();
        assert_eq!(intro.group, "notes");
        let guide = nodes.iter().find(|n| n.path == "guide.md").unwrap();
        assert_eq!(guide.group, "root");

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source, "notes/intro.md");
        assert_eq!(edges[0].target, "guide.md");
    }
}
