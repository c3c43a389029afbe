use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use context_tree as tree_store;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

fn node_json(n: &tree_store::Node) -> serde_json::Value {
    json!({
        "id": n.id, "root_id": n.root_id, "parent_id": n.parent_id, "project": n.project,
        "created_at": n.created_at.to_rfc3339(), "question": n.question, "answer": n.answer,
        "tool_calls": n.tool_calls, "tokens_used": n.tokens_used, "model_used": n.model_used,
        "label": n.label, "is_checkpoint": n.is_checkpoint, "is_root": n.is_root,
    })
}

fn tree_json(t: &tree_store::Tree) -> serde_json::Value {
    json!({
        "root_id": t.root_id, "project": t.project, "current_node_id": t.current_node_id,
        "created_at": t.created_at.to_rfc3339(), "last_activity": t.last_activity.to_rfc3339(),
        "node_count": t.node_count, "max_nodes": t.max_nodes, "label": t.label,
    })
}

#[derive(Deserialize)]
pub struct ProjectQuery {
    project: String,
}

pub async fn list_trees(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ProjectQuery>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let trees = tree_store::get_trees(&state.index, &tenant, &q.project)?;
    Ok(Json(json!({"trees": trees.iter().map(tree_json).collect::<Vec<_>>()})))
}

#[derive(Deserialize)]
pub struct CreateTreeBody {
    project: String,
    label: Option<String>,
    max_nodes: Option<i64>,
}

pub async fn create_tree(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CreateTreeBody>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let t = tree_store::create_tree(&state.index, &tenant, &req.project, req.label.as_deref(), req.max_nodes)?;
    Ok(Json(tree_json(&t)))
}

pub async fn get_tree(State(state): State<AppState>, headers: HeaderMap, Path(root_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let t = tree_store::get_tree(&state.index, &tenant, &root_id)?;
    Ok(Json(tree_json(&t)))
}

pub async fn delete_tree(State(state): State<AppState>, headers: HeaderMap, Path(root_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    tree_store::delete_tree(&state.index, &tenant, &root_id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn get_node(State(state): State<AppState>, headers: HeaderMap, Path((_root_id, node_id)): Path<(String, String)>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let n = tree_store::get_node(&state.index, &tenant, &node_id)?;
    Ok(Json(node_json(&n)))
}

#[derive(Deserialize)]
pub struct UpdateNodeBody {
    label: Option<String>,
    is_checkpoint: Option<bool>,
}

pub async fn update_node(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_root_id, node_id)): Path<(String, String)>,
    Json(req): Json<UpdateNodeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let n = tree_store::update_node(&state.index, &tenant, &node_id, req.label.as_deref(), req.is_checkpoint)?;
    Ok(Json(node_json(&n)))
}

pub async fn checkout(State(state): State<AppState>, headers: HeaderMap, Path((root_id, node_id)): Path<(String, String)>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let t = tree_store::checkout(&state.index, &tenant, &root_id, &node_id)?;
    Ok(Json(tree_json(&t)))
}

pub async fn prune(State(state): State<AppState>, headers: HeaderMap, Path(root_id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let (removed, remaining) = tree_store::prune_tree(&state.index, &tenant, &root_id)?;
    Ok(Json(json!({"removed": removed, "remaining": remaining})))
}
