use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use vault_index::query;

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

pub async fn graph(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let (nodes, edges) = query::graph(&state.index, &tenant)?;
    Ok(Json(json!({
        "nodes": nodes.iter().map(|n| json!({"id": n.path, "title": n.title, "group": n.group})).collect::<Vec<_>>(),
        "edges": edges.iter().map(|e| json!({"source": e.source, "target": e.target})).collect::<Vec<_>>(),
    })))
}
