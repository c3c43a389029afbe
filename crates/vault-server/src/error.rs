//! The single place a domain error turns into an HTTP status + envelope
//! body. No crate below this one talks in status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { error: kind, message: message.into(), detail: None } }
    }

    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.body.detail = Some(detail);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
    pub fn version_conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "version_conflict", message)
    }
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "bad_gateway", message)
    }
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<vault_store::VaultStoreError> for ApiError {
    fn from(err: vault_store::VaultStoreError) -> Self {
        use vault_store::VaultStoreError as E;
        match err {
            E::NotFound(p) => ApiError::not_found(format!("note not found: {p}")),
            E::Exists(p) => ApiError::version_conflict(format!("note already exists: {p}")),
            E::PathInvalid(p, reason) => ApiError::validation(format!("invalid path {p}: {reason}")),
            E::PathEscape(p) => ApiError::validation(format!("path escapes tenant root: {p}")),
            E::MetadataInvalid(reason) => ApiError::validation(reason),
            E::BodyTooLarge(p) => ApiError::payload_too_large(format!("note body too large: {p}")),
            E::ParentNotFound { uri, .. } => ApiError::validation(format!("parent folder missing for {uri}")),
            E::Io(e) => ApiError::internal(format!("filesystem error: {e}")),
        }
    }
}

impl From<vault_index::IndexError> for ApiError {
    fn from(err: vault_index::IndexError) -> Self {
        use vault_index::IndexError as E;
        match err {
            E::Db(e) => ApiError::internal(format!("index database error: {e}")),
            E::QueryInvalid(reason) => ApiError::validation(reason),
            E::NotFound(reason) => ApiError::not_found(reason),
            E::Internal(reason) => ApiError::internal(reason),
        }
    }
}

impl From<auth::AuthError> for ApiError {
    fn from(err: auth::AuthError) -> Self {
        ApiError::unauthorized(err.to_string()).with_detail(serde_json::json!({"reason": err.code()}))
    }
}

impl From<context_tree::ContextTreeError> for ApiError {
    fn from(err: context_tree::ContextTreeError) -> Self {
        use context_tree::ContextTreeError as E;
        match err {
            E::Db(e) => ApiError::internal(format!("context tree database error: {e}")),
            E::TreeNotFound(id) => ApiError::not_found(format!("tree not found: {id}")),
            E::NodeNotFound(id) => ApiError::not_found(format!("node not found: {id}")),
        }
    }
}
