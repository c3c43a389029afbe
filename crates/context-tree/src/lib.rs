//! C11: a per-tenant/project tree of oracle conversation turns, with a HEAD
//! pointer, checkpoints, and pruning. Storage rides on `vault-index`'s
//! embedded database — `context_nodes`/`context_trees` are migrated there
//! since both crates share one connection and one transactional model.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value as JsonValue;
use vault_index::IndexDb;

#[derive(Debug, thiserror::Error)]
pub enum ContextTreeError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("tree not found: {0}")]
    TreeNotFound(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub root_id: String,
    pub tenant: String,
    pub project: String,
    pub current_node_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub node_count: i64,
    pub max_nodes: i64,
    pub label: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub root_id: String,
    pub parent_id: Option<String>,
    pub tenant: String,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub tool_calls: JsonValue,
    pub tokens_used: i64,
    pub model_used: Option<String>,
    pub label: Option<String>,
    pub is_checkpoint: bool,
    pub is_root: bool,
}

const DEFAULT_MAX_NODES: i64 = 30;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn row_to_tree(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tree> {
    let created_at: String = row.get(4)?;
    let last_activity: String = row.get(5)?;
    Ok(Tree {
        root_id: row.get(0)?,
        tenant: row.get(1)?,
        project: row.get(2)?,
        current_node_id: row.get(3)?,
        created_at: parse_ts(&created_at),
        last_activity: parse_ts(&last_activity),
        node_count: row.get(6)?,
        max_nodes: row.get(7)?,
        label: row.get(8)?,
    })
}

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let created_at: String = row.get(5)?;
    let tool_calls_blob: String = row.get(8)?;
    Ok(Node {
        id: row.get(0)?,
        root_id: row.get(1)?,
        parent_id: row.get(2)?,
        tenant: row.get(3)?,
        project: row.get(4)?,
        created_at: parse_ts(&created_at),
        question: row.get(6)?,
        answer: row.get(7)?,
        tool_calls: serde_json::from_str(&tool_calls_blob).unwrap_or(JsonValue::Null),
        tokens_used: row.get(9)?,
        model_used: row.get(10)?,
        label: row.get(11)?,
        is_checkpoint: row.get::<_, i64>(12)? != 0,
        is_root: row.get::<_, i64>(13)? != 0,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const NODE_COLUMNS: &str = "id, root_id, parent_id, tenant, project, created_at, question, answer, \
     tool_calls_blob, tokens_used, model_used, label, is_checkpoint, is_root";

/// Create a new tree: a root node (`is_root=true`, empty question/answer)
/// plus the tree row, inserted atomically.
pub fn create_tree(
    db: &IndexDb,
    tenant: &str,
    project: &str,
    label: Option<&str>,
    max_nodes: Option<i64>,
) -> Result<Tree, ContextTreeError> {
    let mut conn = db.connection();
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let root_id = new_id();
    let max_nodes = max_nodes.unwrap_or(DEFAULT_MAX_NODES);

    tx.execute(
        &format!(
            "INSERT INTO context_nodes ({NODE_COLUMNS})
             VALUES (?1, ?1, NULL, ?2, ?3, ?4, '', '', '[]', 0, NULL, NULL, 0, 1)"
        ),
        params![root_id, tenant, project, now],
    )?;

    tx.execute(
        "INSERT INTO context_trees
            (root_id, tenant, project, current_node_id, created_at, last_activity, node_count, max_nodes, label)
         VALUES (?1, ?2, ?3, ?1, ?4, ?4, 1, ?5, ?6)",
        params![root_id, tenant, project, now, max_nodes, label],
    )?;

    tx.commit()?;
    tracing::info!(tenant, project, root_id = %root_id, "created context tree");
    get_tree(db, tenant, &root_id)
}

pub fn get_trees(db: &IndexDb, tenant: &str, project: &str) -> Result<Vec<Tree>, ContextTreeError> {
    let conn = db.connection();
    let mut stmt = conn.prepare(
        "SELECT root_id, tenant, project, current_node_id, created_at, last_activity, node_count, max_nodes, label
         FROM context_trees WHERE tenant = ?1 AND project = ?2 ORDER BY last_activity DESC",
    )?;
    let rows = stmt
        .query_map(params![tenant, project], row_to_tree)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_tree(db: &IndexDb, tenant: &str, root_id: &str) -> Result<Tree, ContextTreeError> {
    let conn = db.connection();
    conn.query_row(
        "SELECT root_id, tenant, project, current_node_id, created_at, last_activity, node_count, max_nodes, label
         FROM context_trees WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id],
        row_to_tree,
    )
    .optional()?
    .ok_or_else(|| ContextTreeError::TreeNotFound(root_id.to_string()))
}

pub fn delete_tree(db: &IndexDb, tenant: &str, root_id: &str) -> Result<(), ContextTreeError> {
    let mut conn = db.connection();
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM context_nodes WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id],
    )?;
    let removed = tx.execute(
        "DELETE FROM context_trees WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id],
    )?;
    tx.commit()?;
    if removed == 0 {
        return Err(ContextTreeError::TreeNotFound(root_id.to_string()));
    }
    tracing::info!(tenant, root_id, "deleted context tree");
    Ok(())
}

pub fn get_node(db: &IndexDb, tenant: &str, node_id: &str) -> Result<Node, ContextTreeError> {
    let conn = db.connection();
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM context_nodes WHERE tenant = ?1 AND id = ?2"),
        params![tenant, node_id],
        row_to_node,
    )
    .optional()?
    .ok_or_else(|| ContextTreeError::NodeNotFound(node_id.to_string()))
}

/// Append a new node under `parent_id`, move HEAD to it, and bump the
/// tree's counters — all in one transaction.
#[allow(clippy::too_many_arguments)]
pub fn create_node(
    db: &IndexDb,
    tenant: &str,
    root_id: &str,
    parent_id: &str,
    question: &str,
    answer: &str,
    tool_calls: &JsonValue,
    tokens_used: i64,
    model_used: Option<&str>,
) -> Result<Node, ContextTreeError> {
    let mut conn = db.connection();
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let node_id = new_id();
    let tool_calls_blob = serde_json::to_string(tool_calls).unwrap_or_else(|_| "[]".to_string());
    let project: String = tx.query_row(
        "SELECT project FROM context_trees WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id],
        |row| row.get(0),
    )?;

    tx.execute(
        &format!(
            "INSERT INTO context_nodes ({NODE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, 0, 0)"
        ),
        params![
            node_id,
            root_id,
            parent_id,
            tenant,
            project,
            now,
            question,
            answer,
            tool_calls_blob,
            tokens_used,
            model_used,
        ],
    )?;

    let updated = tx.execute(
        "UPDATE context_trees
         SET current_node_id = ?3, node_count = node_count + 1, last_activity = ?4
         WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id, node_id, now],
    )?;
    if updated == 0 {
        return Err(ContextTreeError::TreeNotFound(root_id.to_string()));
    }

    tx.commit()?;
    tracing::info!(tenant, root_id, node_id = %node_id, "created context node");
    get_node(db, tenant, &node_id)
}

pub fn update_node(
    db: &IndexDb,
    tenant: &str,
    node_id: &str,
    label: Option<&str>,
    is_checkpoint: Option<bool>,
) -> Result<Node, ContextTreeError> {
    let conn = db.connection();
    if let Some(label) = label {
        conn.execute(
            "UPDATE context_nodes SET label = ?3 WHERE tenant = ?1 AND id = ?2",
            params![tenant, node_id, label],
        )?;
    }
    if let Some(is_checkpoint) = is_checkpoint {
        conn.execute(
            "UPDATE context_nodes SET is_checkpoint = ?3 WHERE tenant = ?1 AND id = ?2",
            params![tenant, node_id, is_checkpoint as i64],
        )?;
    }
    drop(conn);
    get_node(db, tenant, node_id)
}

/// Move HEAD to `node_id` without touching parent links.
pub fn checkout(db: &IndexDb, tenant: &str, root_id: &str, node_id: &str) -> Result<Tree, ContextTreeError> {
    let conn = db.connection();
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE context_trees SET current_node_id = ?3, last_activity = ?4
         WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id, node_id, now],
    )?;
    drop(conn);
    if updated == 0 {
        return Err(ContextTreeError::TreeNotFound(root_id.to_string()));
    }
    get_tree(db, tenant, root_id)
}

/// Walk `parent_id` from HEAD to the root, then reverse: `[root, ..., HEAD]`.
pub fn path_to_head(db: &IndexDb, tenant: &str, root_id: &str) -> Result<Vec<String>, ContextTreeError> {
    let tree = get_tree(db, tenant, root_id)?;
    let conn = db.connection();
    let mut path = Vec::new();
    let mut current = Some(tree.current_node_id);
    while let Some(id) = current {
        let parent: Option<String> = conn
            .query_row(
                "SELECT parent_id FROM context_nodes WHERE tenant = ?1 AND id = ?2",
                params![tenant, id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        path.push(id);
        current = parent;
    }
    path.reverse();
    Ok(path)
}

/// Delete every node not on the path to HEAD and not checkpointed. Returns
/// `(removed, remaining)`.
pub fn prune_tree(db: &IndexDb, tenant: &str, root_id: &str) -> Result<(i64, i64), ContextTreeError> {
    let keep = path_to_head(db, tenant, root_id)?;
    let mut conn = db.connection();
    let tx = conn.transaction()?;

    let keep_set: std::collections::HashSet<String> = keep.into_iter().collect();

    let mut stmt = tx.prepare("SELECT id, is_checkpoint FROM context_nodes WHERE tenant = ?1 AND root_id = ?2")?;
    let all: Vec<(String, bool)> = stmt
        .query_map(params![tenant, root_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
        })?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    let mut removed = 0i64;
    for (id, is_checkpoint) in &all {
        if !keep_set.contains(id) && !is_checkpoint {
            tx.execute(
                "DELETE FROM context_nodes WHERE tenant = ?1 AND id = ?2",
                params![tenant, id],
            )?;
            removed += 1;
        }
    }

    let remaining = all.len() as i64 - removed;
    tx.execute(
        "UPDATE context_trees SET node_count = ?3 WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id, remaining],
    )?;
    tx.commit()?;
    tracing::info!(tenant, root_id, removed, remaining, "pruned context tree");
    Ok((removed, remaining))
}

/// The tree with the most recent activity for this tenant/project, if any.
pub fn get_active_tree_id(db: &IndexDb, tenant: &str, project: &str) -> Result<Option<String>, ContextTreeError> {
    let conn = db.connection();
    let id = conn
        .query_row(
            "SELECT root_id FROM context_trees WHERE tenant = ?1 AND project = ?2
             ORDER BY last_activity DESC LIMIT 1",
            params![tenant, project],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Mark `root_id` as the active tree by bumping its `last_activity`,
/// without creating a node or moving HEAD.
pub fn set_active_tree(db: &IndexDb, tenant: &str, root_id: &str) -> Result<(), ContextTreeError> {
    let conn = db.connection();
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE context_trees SET last_activity = ?3 WHERE tenant = ?1 AND root_id = ?2",
        params![tenant, root_id, now],
    )?;
    if updated == 0 {
        return Err(ContextTreeError::TreeNotFound(root_id.to_string()));
    }
    Ok(())
}
