use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct IssueBody {
    tenant: String,
    ttl_days: Option<i64>,
}

pub async fn issue(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<IssueBody>) -> Result<impl IntoResponse, ApiError> {
    extract_tenant(&state, &headers)?;
    let ttl = req.ttl_days.map(|d| chrono::Duration::days(d));
    let (token, expires_at) = state.auth.issue(&req.tenant, ttl)?;
    Ok(Json(json!({"token": token, "tenant": req.tenant, "expires_at": expires_at.to_rfc3339()})))
}

/// Issues a short-lived token for the fixed demo tenant without requiring
/// prior authentication — the one endpoint exempt from bearer auth.
pub async fn demo(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let (token, expires_at) = state.auth.issue("demo", Some(chrono::Duration::hours(1)))?;
    Ok(Json(json!({"token": token, "tenant": "demo", "expires_at": expires_at.to_rfc3339()})))
}

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    Ok(Json(json!({"tenant": tenant})))
}
