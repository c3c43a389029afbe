use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use vault_index::indexer::{delete_index, index as reindex};
use vault_index::{current_version, IndexNoteInput};

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

fn tags_from_metadata(metadata: &obsidian_fs::Frontmatter) -> Vec<String> {
    match metadata.get("tags") {
        Some(serde_json::Value::Array(items)) => {
            items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
        }
        _ => Vec::new(),
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    folder: Option<String>,
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<ListQuery>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let entries = state.store.list(&tenant, q.folder.as_deref()).await?;
    Ok(Json(json!({
        "notes": entries.iter().map(|e| json!({
            "path": e.path, "title": e.title, "last_modified": e.last_modified.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
pub struct CreateBody {
    note_path: String,
    body: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    title: Option<String>,
}

pub async fn create(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<CreateBody>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let metadata: obsidian_fs::Frontmatter = match req.metadata {
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => obsidian_fs::Frontmatter::new(),
    };
    let tags = tags_from_metadata(&metadata);

    let (note, existed) = state
        .store
        .write(&tenant, &req.note_path, &req.body, Some(metadata), req.title.as_deref())
        .await?;
    if existed {
        return Err(ApiError::version_conflict(format!("note already exists: {}", req.note_path)));
    }

    let result = reindex(
        &state.index,
        IndexNoteInput {
            tenant: &tenant,
            path: &req.note_path,
            title: &note.title,
            body: &note.body,
            tags: &tags,
            size_bytes: note.size_bytes,
            created_override: Some(note.created),
        },
    )?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "path": note.path, "title": note.title, "version": result.version,
            "created": result.created.to_rfc3339(), "updated": result.updated.to_rfc3339(),
        })),
    ))
}

pub async fn read(State(state): State<AppState>, headers: HeaderMap, Path(path): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let note = state.store.read(&tenant, &path).await?;
    let version = current_version(&state.index, &tenant, &path)?;
    Ok(Json(json!({
        "path": note.path, "title": note.title, "content": note.body, "metadata": note.metadata,
        "version": version, "updated": note.updated.to_rfc3339(), "size_bytes": note.size_bytes,
    })))
}

#[derive(Deserialize)]
pub struct UpdateBody {
    body: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    title: Option<String>,
    if_version: Option<i64>,
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(req): Json<UpdateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;

    if let Some(expected) = req.if_version {
        if let Some(actual) = current_version(&state.index, &tenant, &path)? {
            if actual != expected {
                return Err(ApiError::version_conflict(format!("expected version {expected}, found {actual}")));
            }
        }
    }

    let metadata: obsidian_fs::Frontmatter = match req.metadata {
        Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
        _ => obsidian_fs::Frontmatter::new(),
    };
    let tags = tags_from_metadata(&metadata);

    let (note, existed) = state.store.write(&tenant, &path, &req.body, Some(metadata), req.title.as_deref()).await?;
    let result = reindex(
        &state.index,
        IndexNoteInput {
            tenant: &tenant,
            path: &path,
            title: &note.title,
            body: &note.body,
            tags: &tags,
            size_bytes: note.size_bytes,
            created_override: if existed { None } else { Some(note.created) },
        },
    )?;

    Ok(Json(json!({
        "path": note.path, "title": note.title, "version": result.version,
        "created": result.created.to_rfc3339(), "updated": result.updated.to_rfc3339(),
    })))
}

#[derive(Deserialize)]
pub struct RenameBody {
    new_path: String,
}

pub async fn rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
    Json(req): Json<RenameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let note = state.store.rename(&tenant, &path, &req.new_path).await?;
    delete_index(&state.index, &tenant, &path)?;
    let tags = tags_from_metadata(&note.metadata);
    let result = reindex(
        &state.index,
        IndexNoteInput {
            tenant: &tenant,
            path: &req.new_path,
            title: &note.title,
            body: &note.body,
            tags: &tags,
            size_bytes: note.size_bytes,
            created_override: Some(note.created),
        },
    )?;
    Ok(Json(json!({"path": req.new_path, "version": result.version})))
}

pub async fn remove(State(state): State<AppState>, headers: HeaderMap, Path(path): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    state.store.delete(&tenant, &path).await?;
    delete_index(&state.index, &tenant, &path)?;
    Ok(StatusCode::NO_CONTENT)
}
