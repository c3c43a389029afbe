use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use vault_index::indexer::{clear_tenant, index as reindex, stamp_full_rebuild};
use vault_index::{health, IndexNoteInput};

use crate::error::ApiError;
use crate::routes::extract_tenant;
use crate::state::AppState;

fn tags_from_metadata(metadata: &obsidian_fs::Frontmatter) -> Vec<String> {
    match metadata.get("tags") {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

pub async fn health(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    let status = health::get(&state.index, &tenant)?;
    Ok(Json(json!({
        "note_count": status.note_count,
        "last_full_rebuild": status.last_full_rebuild,
        "last_incremental_update": status.last_incremental_update,
    })))
}

/// Idempotent full reindex: wipes this tenant's rows and reindexes every
/// `.md` file currently on disk. Restores consistency after a write+index
/// pair was interrupted by a crash between the filesystem write and the
/// database commit.
pub async fn rebuild(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    let tenant = extract_tenant(&state, &headers)?;
    clear_tenant(&state.index, &tenant)?;

    let entries = state.store.list(&tenant, None).await?;
    let mut reindexed = 0usize;
    for entry in &entries {
        let note = match state.store.read(&tenant, &entry.path).await {
            Ok(n) => n,
            Err(_) => continue,
        };
        let tags = tags_from_metadata(&note.metadata);
        reindex(
            &state.index,
            IndexNoteInput {
                tenant: &tenant,
                path: &entry.path,
                title: &note.title,
                body: &note.body,
                tags: &tags,
                size_bytes: note.size_bytes,
                created_override: Some(note.created),
            },
        )?;
        reindexed += 1;
    }
    stamp_full_rebuild(&state.index, &tenant)?;

    Ok(Json(json!({"reindexed": reindexed})))
}
