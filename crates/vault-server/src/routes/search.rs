use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use vault_index::query;

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

pub async fn search(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<SearchQuery>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    if q.q.is_empty() || q.q.chars().count() > 256 {
        return Err(ApiError::validation("query must be 1-256 characters"));
    }
    let hits = query::search(&state.index, &tenant, &q.q, q.limit)?;
    Ok(Json(json!({
        "results": hits.iter().map(|h| json!({
            "path": h.path, "title": h.title, "score": h.score, "snippet": h.snippet, "updated": h.updated.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })))
}

pub async fn backlinks(State(state): State<AppState>, headers: HeaderMap, Path(path): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let links = query::backlinks(&state.index, &tenant, &path)?;
    Ok(Json(json!({
        "backlinks": links.iter().map(|b| json!({"path": b.path, "title": b.title})).collect::<Vec<_>>(),
    })))
}

pub async fn tags(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let tags = query::tags(&state.index, &tenant)?;
    Ok(Json(json!({
        "tags": tags.iter().map(|t| json!({"tag": t.tag, "count": t.count})).collect::<Vec<_>>(),
    })))
}
