use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use context_tree as tree_store;
use futures::stream::{self, Stream};
use oracle::{CancelHandle, Chunk, Message, OracleQuery};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

const HISTORY_TURNS: usize = 5;

#[derive(Deserialize)]
pub struct QueryBody {
    question: String,
    project: Option<String>,
    model: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4000
}

fn project_of(body: &QueryBody) -> String {
    body.project.clone().unwrap_or_else(|| "default".to_string())
}

/// Get (or lazily create) the tenant+project's active conversation tree,
/// and render its path-to-HEAD as seed messages for a new oracle turn.
fn load_tree_and_history(state: &AppState, tenant: &str, project: &str) -> Result<(tree_store::Tree, Vec<Message>), ApiError> {
    let root_id = match tree_store::get_active_tree_id(&state.index, tenant, project)? {
        Some(id) => id,
        None => {
            let tree = tree_store::create_tree(&state.index, tenant, project, None, None)?;
            tree.root_id
        }
    };
    let tree = tree_store::get_tree(&state.index, tenant, &root_id)?;
    let path = tree_store::path_to_head(&state.index, tenant, &root_id)?;

    let mut messages = Vec::new();
    for node_id in path.iter().rev().take(HISTORY_TURNS).rev() {
        let node = tree_store::get_node(&state.index, tenant, node_id)?;
        if node.is_root {
            continue;
        }
        messages.push(Message::user(node.question));
        messages.push(Message::assistant(Some(node.answer), Vec::new()));
    }
    Ok((tree, messages))
}

fn error_status(message: &str) -> ApiError {
    if message.contains("timed out") || message.contains("Maximum conversation turns") {
        ApiError::gateway_timeout(message.to_string())
    } else if message == "cancelled" {
        ApiError::validation("oracle query was cancelled")
    } else {
        ApiError::bad_gateway(message.to_string())
    }
}

pub async fn query(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<QueryBody>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let project = project_of(&req);
    let (tree, prior_messages) = load_tree_and_history(&state, &tenant, &project)?;

    let cancel = CancelHandle::new();
    state.register_query(tenant.clone(), cancel.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let oracle_query = OracleQuery {
        tenant: &tenant,
        question: &req.question,
        project: Some(project.as_str()),
        model: req.model.clone(),
        max_tokens: req.max_tokens,
        prior_messages,
        stream: false,
    };
    state.oracle.query(oracle_query, cancel, tx).await;
    state.take_cancel_handle(&tenant).await;

    let mut content = String::new();
    let mut citations = Vec::new();
    let mut tool_calls_log = Vec::new();
    let mut tokens_used = 0u32;
    let mut model_used = String::new();
    let mut error: Option<String> = None;

    while let Some(chunk) = rx.recv().await {
        match chunk {
            Chunk::Content { text } => content.push_str(&text),
            Chunk::Source(c) => citations.push(serde_json::to_value(&c).unwrap_or_default()),
            Chunk::ToolCall { id, name, arguments } => tool_calls_log.push(json!({"id": id, "name": name, "arguments": arguments})),
            Chunk::Done { tokens_used: t, model_used: m } => {
                tokens_used = t;
                model_used = m;
            }
            Chunk::Error { message } => error = Some(message),
            _ => {}
        }
    }

    if let Some(message) = error {
        return Err(error_status(&message));
    }

    let node = tree_store::create_node(
        &state.index,
        &tenant,
        &tree.root_id,
        &tree.current_node_id,
        &req.question,
        &content,
        &json!(tool_calls_log),
        tokens_used as i64,
        Some(model_used.as_str()),
    )?;

    let refreshed = tree_store::get_tree(&state.index, &tenant, &tree.root_id)?;
    if refreshed.node_count > refreshed.max_nodes {
        tree_store::prune_tree(&state.index, &tenant, &tree.root_id)?;
    }

    Ok(Json(json!({
        "answer": content, "citations": citations, "tokens_used": tokens_used, "model_used": model_used,
        "root_id": tree.root_id, "node_id": node.id,
    })))
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let project = project_of(&req);
    let (tree, prior_messages) = load_tree_and_history(&state, &tenant, &project)?;

    let cancel = CancelHandle::new();
    state.register_query(tenant.clone(), cancel.clone()).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let oracle = state.oracle.clone();
    let index = state.index.clone();
    let state_for_task = state.clone();
    let tenant_for_task = tenant.clone();

    tokio::spawn(async move {
        let oracle_query = OracleQuery {
            tenant: &tenant_for_task,
            question: &req.question,
            project: Some(project.as_str()),
            model: req.model.clone(),
            max_tokens: req.max_tokens,
            prior_messages,
            stream: true,
        };

        let mut content = String::new();
        let mut tool_calls_log = Vec::new();
        let mut tokens_used = 0i64;
        let mut model_used = String::new();

        let (inner_tx, mut inner_rx) = mpsc::unbounded_channel();
        let loop_task = oracle.query(oracle_query, cancel, inner_tx);
        tokio::pin!(loop_task);
        let mut finished = false;
        loop {
            tokio::select! {
                _ = &mut loop_task, if !finished => { finished = true; }
                Some(chunk) = inner_rx.recv() => {
                    if let Chunk::Content { text } = &chunk {
                        content.push_str(text);
                    }
                    if let Chunk::ToolCall { id, name, arguments } = &chunk {
                        tool_calls_log.push(json!({"id": id, "name": name, "arguments": arguments}));
                    }
                    if let Chunk::Done { tokens_used: t, model_used: m } = &chunk {
                        tokens_used = *t as i64;
                        model_used = m.clone();
                    }
                    let _ = tx.send(chunk);
                }
                else => break,
            }
            if finished && inner_rx.is_empty() {
                break;
            }
        }

        state_for_task.take_cancel_handle(&tenant_for_task).await;

        if !model_used.is_empty() {
            if let Ok(node) = tree_store::create_node(
                &index,
                &tenant_for_task,
                &tree.root_id,
                &tree.current_node_id,
                "",
                &content,
                &json!(tool_calls_log),
                tokens_used,
                Some(model_used.as_str()),
            ) {
                let _ = node;
                if let Ok(refreshed) = tree_store::get_tree(&index, &tenant_for_task, &tree.root_id) {
                    if refreshed.node_count > refreshed.max_nodes {
                        let _ = tree_store::prune_tree(&index, &tenant_for_task, &tree.root_id);
                    }
                }
            }
        }
    });

    let event_stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| {
            let event = Event::default().json_data(&chunk).unwrap_or_else(|_| Event::default().data("{}"));
            (Ok(event), rx)
        })
    });

    Ok(Sse::new(event_stream).keep_alive(KeepAlive::default()))
}

pub async fn history(State(state): State<AppState>, headers: HeaderMap, axum::extract::Query(q): axum::extract::Query<std::collections::HashMap<String, String>>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let project = q.get("project").cloned().unwrap_or_else(|| "default".to_string());
    let Some(root_id) = tree_store::get_active_tree_id(&state.index, &tenant, &project)? else {
        return Ok(Json(json!({"turns": []})));
    };
    let path = tree_store::path_to_head(&state.index, &tenant, &root_id)?;
    let mut turns = Vec::new();
    for node_id in &path {
        let node = tree_store::get_node(&state.index, &tenant, node_id)?;
        if node.is_root {
            continue;
        }
        turns.push(json!({"question": node.question, "answer": node.answer, "created_at": node.created_at.to_rfc3339()}));
    }
    Ok(Json(json!({"root_id": root_id, "turns": turns})))
}

pub async fn clear_history(State(state): State<AppState>, headers: HeaderMap, axum::extract::Query(q): axum::extract::Query<std::collections::HashMap<String, String>>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let project = q.get("project").cloned().unwrap_or_else(|| "default".to_string());
    if let Some(root_id) = tree_store::get_active_tree_id(&state.index, &tenant, &project)? {
        tree_store::delete_tree(&state.index, &tenant, &root_id)?;
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn cancel(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let cancelled = state.cancel_query(&tenant).await;
    Ok(Json(json!({"cancelled": cancelled})))
}
