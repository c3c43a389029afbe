mod context_tree;
mod graph;
mod index;
mod notes;
mod oracle;
mod search;
mod tokens;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and verify the bearer token, returning the tenant it maps to.
pub fn extract_tenant(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    state.auth.verify_header(header).map_err(ApiError::from)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/notes", get(notes::list).post(notes::create))
        .route(
            "/api/notes/{*path}",
            get(notes::read).put(notes::update).patch(notes::rename).delete(notes::remove),
        )
        .route("/api/search", get(search::search))
        .route("/api/backlinks/{*path}", get(search::backlinks))
        .route("/api/tags", get(search::tags))
        .route("/api/index/health", get(index::health))
        .route("/api/index/rebuild", post(index::rebuild))
        .route("/api/graph", get(graph::graph))
        .route("/api/oracle", post(oracle::query))
        .route("/api/oracle/stream", post(oracle::stream))
        .route("/api/oracle/history", get(oracle::history).delete(oracle::clear_history))
        .route("/api/oracle/cancel", post(oracle::cancel))
        .route("/api/oracle/trees", get(context_tree::list_trees).post(context_tree::create_tree))
        .route("/api/oracle/trees/{root_id}", get(context_tree::get_tree).delete(context_tree::delete_tree))
        .route("/api/oracle/trees/{root_id}/nodes/{node_id}", get(context_tree::get_node).patch(context_tree::update_node))
        .route("/api/oracle/trees/{root_id}/checkout/{node_id}", post(context_tree::checkout))
        .route("/api/oracle/trees/{root_id}/prune", post(context_tree::prune))
        .route("/api/tokens", post(tokens::issue))
        .route("/api/demo/token", post(tokens::demo))
        .route("/api/me", get(tokens::me))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
