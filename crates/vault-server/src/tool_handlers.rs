//! Concrete [`ToolHandler`] implementations (C8's manifest, §4.8) and the
//! registry wiring that ties them to [`VaultStore`]/[`IndexDb`]/[`Librarian`].
//! Lives here, not in `tool-dispatch` or `oracle`, because every handler
//! below needs a concrete vault crate and `tool-dispatch` must stay generic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oracle::{Librarian, LlmClient, SummariseInput};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tool_dispatch::{StubHandler, ToolHandler, ToolRegistry, ToolSpec};
use vault_index::{indexer, query, threads, IndexDb, IndexNoteInput};
use vault_store::VaultStore;

const VAULT_TIMEOUT: Duration = Duration::from_secs(10);
const CODE_TIMEOUT: Duration = Duration::from_secs(30);
const WEB_TIMEOUT: Duration = Duration::from_secs(60);
const LIBRARIAN_TIMEOUT: Duration = Duration::from_secs(1200);

fn frontmatter_from_json(value: Option<&JsonValue>) -> obsidian_fs::Frontmatter {
    match value {
        Some(JsonValue::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => obsidian_fs::Frontmatter::new(),
    }
}

fn tags_from_metadata(metadata: &obsidian_fs::Frontmatter) -> Vec<String> {
    match metadata.get("tags") {
        Some(JsonValue::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

struct VaultReadTool {
    store: Arc<VaultStore>,
}

#[async_trait]
impl ToolHandler for VaultReadTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let Some(path) = args["path"].as_str() else {
            return json!({"error": "missing required argument: path"});
        };
        match self.store.read(tenant, path).await {
            Ok(note) => json!({
                "path": note.path,
                "title": note.title,
                "content": note.body,
                "metadata": note.metadata,
                "size_bytes": note.size_bytes,
                "updated": note.updated.to_rfc3339(),
            }),
            Err(vault_store::VaultStoreError::NotFound(_)) => json!({"error": "File not found"}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct VaultWriteTool {
    store: Arc<VaultStore>,
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for VaultWriteTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let Some(path) = args["path"].as_str() else {
            return json!({"error": "missing required argument: path"});
        };
        let content = args["content"].as_str().unwrap_or_default();
        let metadata = frontmatter_from_json(args.get("metadata"));
        let title_override = args["title"].as_str();

        if let Some(expected) = args["if_version"].as_i64() {
            match indexer::current_version(&self.index, tenant, path) {
                Ok(Some(actual)) if actual != expected => {
                    return json!({"error": "version conflict", "version_conflict": true, "current_version": actual});
                }
                Ok(_) => {}
                Err(e) => return json!({"error": e.to_string()}),
            }
        }

        let tags = tags_from_metadata(&metadata);
        let (note, existed) = match self.store.write(tenant, path, content, Some(metadata), title_override).await {
            Ok(result) => result,
            Err(e) => return json!({"error": e.to_string()}),
        };

        let input = IndexNoteInput {
            tenant,
            path,
            title: &note.title,
            body: &note.body,
            tags: &tags,
            size_bytes: note.size_bytes,
            created_override: if existed { None } else { Some(note.created) },
        };
        match indexer::index(&self.index, input) {
            Ok(result) => json!({
                "path": note.path,
                "version": result.version,
                "created": result.created.to_rfc3339(),
                "updated": result.updated.to_rfc3339(),
                "title": note.title,
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct VaultListTool {
    store: Arc<VaultStore>,
}

#[async_trait]
impl ToolHandler for VaultListTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let folder = args["folder"].as_str();
        match self.store.list(tenant, folder).await {
            Ok(entries) => json!({
                "notes": entries.iter().map(|e| json!({
                    "path": e.path,
                    "title": e.title,
                    "last_modified": e.last_modified.to_rfc3339(),
                })).collect::<Vec<_>>(),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct VaultSearchTool {
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for VaultSearchTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let Some(q) = args["query"].as_str() else {
            return json!({"error": "missing required argument: query"});
        };
        let limit = args["limit"].as_u64().map(|n| n as usize);
        match query::search(&self.index, tenant, q, limit) {
            Ok(hits) => json!({
                "results": hits.iter().map(|h| json!({
                    "path": h.path,
                    "title": h.title,
                    "score": h.score,
                    "snippet": h.snippet,
                    "updated": h.updated.to_rfc3339(),
                })).collect::<Vec<_>>(),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

/// Move a note and reindex its backlinks on a best-effort basis. Since
/// wikilink targets resolve dynamically by slug at index time, reindexing
/// each backlinking note after the move is enough to repoint its stored
/// `target_path` without rewriting the link text itself.
struct VaultMoveTool {
    store: Arc<VaultStore>,
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for VaultMoveTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let (Some(old_path), Some(new_path)) = (args["old_path"].as_str(), args["new_path"].as_str()) else {
            return json!({"error": "missing required argument: old_path or new_path"});
        };

        let backlinks_before = query::backlinks(&self.index, tenant, old_path).unwrap_or_default();

        let note = match self.store.rename(tenant, old_path, new_path).await {
            Ok(n) => n,
            Err(e) => return json!({"error": e.to_string()}),
        };

        if let Err(e) = indexer::delete_index(&self.index, tenant, old_path) {
            return json!({"error": e.to_string()});
        }

        let tags = tags_from_metadata(&note.metadata);
        let input = IndexNoteInput {
            tenant,
            path: new_path,
            title: &note.title,
            body: &note.body,
            tags: &tags,
            size_bytes: note.size_bytes,
            created_override: Some(note.created),
        };
        if let Err(e) = indexer::index(&self.index, input) {
            return json!({"error": e.to_string()});
        }

        let mut backlinks_updated = 0usize;
        for link in &backlinks_before {
            if let Ok(source) = self.store.read(tenant, &link.path).await {
                let source_tags = tags_from_metadata(&source.metadata);
                let reindex = IndexNoteInput {
                    tenant,
                    path: &link.path,
                    title: &source.title,
                    body: &source.body,
                    tags: &source_tags,
                    size_bytes: source.size_bytes,
                    created_override: None,
                };
                if indexer::index(&self.index, reindex).is_ok() {
                    backlinks_updated += 1;
                }
            }
        }

        json!({"path": new_path, "backlinks_updated": backlinks_updated})
    }
}

/// Shared by the `vault_create_index` tool and `Librarian::organise`: list a
/// folder, read each note's title and first paragraph, write a sorted
/// wikilink index at `<folder>/index.md`.
async fn build_folder_index(store: &VaultStore, index: &IndexDb, tenant: &str, folder: &str) -> Result<(String, usize), String> {
    let entries = store.list(tenant, Some(folder)).await.map_err(|e| e.to_string())?;
    let mut rows = Vec::new();
    for entry in &entries {
        if let Ok(note) = store.read(tenant, &entry.path).await {
            let snippet: String = note.body.split("\n\n").next().unwrap_or("").chars().take(200).collect();
            rows.push((note.title, snippet));
        }
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let leaf = folder.rsplit('/').next().unwrap_or(folder);
    let heading = {
        let mut chars = leaf.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };
    let mut body = format!("# {heading}\n\n");
    for (title, snippet) in &rows {
        body.push_str(&format!("- [[{title}]] — {snippet}\n"));
    }

    let index_path = format!("{}/index.md", folder.trim_end_matches('/'));
    let (note, existed) = store.write(tenant, &index_path, &body, None, None).await.map_err(|e| e.to_string())?;
    let input = IndexNoteInput {
        tenant,
        path: &index_path,
        title: &note.title,
        body: &note.body,
        tags: &[],
        size_bytes: note.size_bytes,
        created_override: if existed { None } else { Some(note.created) },
    };
    indexer::index(index, input).map_err(|e| e.to_string())?;
    Ok((index_path, rows.len()))
}

struct VaultCreateIndexTool {
    store: Arc<VaultStore>,
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for VaultCreateIndexTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let Some(folder) = args["folder"].as_str() else {
            return json!({"error": "missing required argument: folder"});
        };
        match build_folder_index(&self.store, &self.index, tenant, folder).await {
            Ok((index_path, files_organized)) => json!({"index_path": index_path, "files_organized": files_organized}),
            Err(e) => json!({"error": e}),
        }
    }
}

struct ThreadPushTool {
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for ThreadPushTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let (Some(project), Some(thread_id), Some(role), Some(content)) = (
            args["project"].as_str(),
            args["thread_id"].as_str(),
            args["role"].as_str(),
            args["content"].as_str(),
        ) else {
            return json!({"error": "missing required argument: project, thread_id, role, or content"});
        };
        match threads::push(&self.index, tenant, project, thread_id, role, content) {
            Ok(seq) => json!({"seq": seq}),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct ThreadReadTool {
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for ThreadReadTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let (Some(project), Some(thread_id)) = (args["project"].as_str(), args["thread_id"].as_str()) else {
            return json!({"error": "missing required argument: project or thread_id"});
        };
        let limit = args["limit"].as_u64().unwrap_or(50) as usize;
        match threads::read(&self.index, tenant, project, thread_id) {
            Ok(mut entries) => {
                if entries.len() > limit {
                    entries = entries.split_off(entries.len() - limit);
                }
                json!({
                    "entries": entries.iter().map(|e| json!({
                        "seq": e.seq, "role": e.role, "content": e.content, "created_at": e.created_at,
                    })).collect::<Vec<_>>(),
                })
            }
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct ThreadSeekTool {
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for ThreadSeekTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let (Some(project), Some(thread_id), Some(q)) =
            (args["project"].as_str(), args["thread_id"].as_str(), args["query"].as_str())
        else {
            return json!({"error": "missing required argument: project, thread_id, or query"});
        };
        let limit = args["limit"].as_u64().unwrap_or(5) as usize;
        match threads::seek(&self.index, tenant, project, thread_id, q, limit) {
            Ok(entries) => json!({
                "entries": entries.iter().map(|e| json!({
                    "seq": e.seq, "role": e.role, "content": e.content, "created_at": e.created_at,
                })).collect::<Vec<_>>(),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

struct ThreadListTool {
    index: Arc<IndexDb>,
}

#[async_trait]
impl ToolHandler for ThreadListTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let Some(project) = args["project"].as_str() else {
            return json!({"error": "missing required argument: project"});
        };
        match threads::list(&self.index, tenant, project) {
            Ok(summaries) => json!({
                "threads": summaries.iter().map(|t| json!({
                    "thread_id": t.thread_id, "last_activity": t.last_activity, "entry_count": t.entry_count,
                })).collect::<Vec<_>>(),
            }),
            Err(e) => json!({"error": e.to_string()}),
        }
    }
}

/// Synchronously drives [`Librarian::summarise`]/`organise` to completion
/// and folds the resulting chunk stream into one JSON result.
struct DelegateLibrarianTool {
    librarian: Arc<Librarian>,
    librarian_tools: Arc<ToolRegistry>,
}

#[async_trait]
impl ToolHandler for DelegateLibrarianTool {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        let mode = args["mode"].as_str().unwrap_or("summarise");

        if mode == "organise" {
            let Some(folder) = args["folder"].as_str() else {
                return json!({"error": "missing required argument: folder"});
            };
            let create_index = args["create_index"].as_bool().unwrap_or(true);
            let (tx, mut rx) = mpsc::unbounded_channel();
            self.librarian.organise(tenant, folder, create_index, tx).await;
            let mut result = json!({});
            while let Ok(chunk) = rx.try_recv() {
                if let Ok(v) = serde_json::to_value(&chunk) {
                    if v["type"] == "organise_done" || v["type"] == "error" {
                        result = v;
                    }
                }
            }
            return result;
        }

        let Some(task) = args["task"].as_str() else {
            return json!({"error": "missing required argument: task"});
        };
        let paths: Vec<String> = args["paths"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let thread_refs: Vec<(String, String)> = args["thread_refs"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| Some((v["project"].as_str()?.to_string(), v["thread_id"].as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let mut content = Vec::new();
        for path in &paths {
            let read_result = self.librarian_tools.execute("vault_read", json!({"path": path}), tenant, None).await;
            let text = read_result.get("content").and_then(JsonValue::as_str).unwrap_or_default().to_string();
            content.push((path.clone(), text, "vault".to_string()));
        }
        for (project, thread_id) in &thread_refs {
            let read_result = self
                .librarian_tools
                .execute("thread_read", json!({"project": project, "thread_id": thread_id}), tenant, None)
                .await;
            let text = read_result
                .get("entries")
                .and_then(JsonValue::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| format!("{}: {}", e["role"].as_str().unwrap_or(""), e["content"].as_str().unwrap_or("")))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            content.push((format!("thread:{project}/{thread_id}"), text, "thread".to_string()));
        }

        let max_tokens = args["max_tokens"].as_u64().unwrap_or(1000) as u32;
        let force_refresh = args["force_refresh"].as_bool().unwrap_or(false);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = SummariseInput { task, content: &content, max_tokens, force_refresh };
        self.librarian.summarise(tenant, input, tx).await;

        let mut summary_text = String::new();
        let mut final_chunk = json!({"error": "librarian produced no result"});
        while let Ok(chunk) = rx.try_recv() {
            if let Ok(v) = serde_json::to_value(&chunk) {
                match v["type"].as_str() {
                    Some("summary") => summary_text = v["text"].as_str().unwrap_or_default().to_string(),
                    Some("done") | Some("error") => final_chunk = v,
                    _ => {}
                }
            }
        }
        if final_chunk.get("error").is_some() {
            return final_chunk;
        }
        final_chunk["summary"] = json!(summary_text);
        final_chunk
    }
}

fn vault_spec(name: &str, description: &str, schema: JsonValue, scopes: &[&str], timeout: Duration) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        schema,
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        timeout,
    }
}

/// Build the two registries the server needs: a small one scoped to the
/// vault read/write/list tools for the Librarian's own use, and the full
/// manifest (including `delegate_librarian`) for the Oracle.
pub fn build_registries(
    store: Arc<VaultStore>,
    index: Arc<IndexDb>,
    llm: Arc<dyn LlmClient>,
) -> (Arc<ToolRegistry>, Arc<Librarian>) {
    let mut librarian_registry = ToolRegistry::new();
    librarian_registry.register(
        vault_spec(
            "vault_read",
            "Read a note from the vault by path.",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultReadTool { store: store.clone() }),
    );
    librarian_registry.register(
        vault_spec(
            "vault_write",
            "Write or overwrite a note in the vault.",
            json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}, "metadata": {"type": "object"}}, "required": ["path", "content"]}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultWriteTool { store: store.clone(), index: index.clone() }),
    );
    librarian_registry.register(
        vault_spec(
            "vault_list",
            "List notes under a vault folder.",
            json!({"type": "object", "properties": {"folder": {"type": "string"}}}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultListTool { store: store.clone() }),
    );
    librarian_registry.register(
        vault_spec(
            "thread_read",
            "Return the last N entries of a project thread, chronologically.",
            json!({"type": "object", "properties": {"project": {"type": "string"}, "thread_id": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["project", "thread_id"]}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(ThreadReadTool { index: index.clone() }),
    );
    let librarian_tools = Arc::new(librarian_registry);
    let librarian = Arc::new(Librarian::new(llm, librarian_tools.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(
        vault_spec(
            "vault_read",
            "Read a note from the vault by path.",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultReadTool { store: store.clone() }),
    );
    registry.register(
        vault_spec(
            "vault_write",
            "Write or overwrite a note in the vault.",
            json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}, "metadata": {"type": "object"}, "if_version": {"type": "integer"}}, "required": ["path", "content"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultWriteTool { store: store.clone(), index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "vault_list",
            "List notes under a vault folder.",
            json!({"type": "object", "properties": {"folder": {"type": "string"}}}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultListTool { store: store.clone() }),
    );
    registry.register(
        vault_spec(
            "vault_search",
            "Full-text search the vault; returns ranked hits with snippets.",
            json!({"type": "object", "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["query"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultSearchTool { index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "vault_move",
            "Move/rename a note and reindex its backlinks.",
            json!({"type": "object", "properties": {"old_path": {"type": "string"}, "new_path": {"type": "string"}}, "required": ["old_path", "new_path"]}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultMoveTool { store: store.clone(), index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "vault_create_index",
            "Generate a folder index note listing its contents as wikilinks.",
            json!({"type": "object", "properties": {"folder": {"type": "string"}}, "required": ["folder"]}),
            &["librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(VaultCreateIndexTool { store: store.clone(), index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "thread_push",
            "Append a turn to a project thread, auto-creating it if absent.",
            json!({"type": "object", "properties": {"project": {"type": "string"}, "thread_id": {"type": "string"}, "role": {"type": "string"}, "content": {"type": "string"}}, "required": ["project", "thread_id", "role", "content"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(ThreadPushTool { index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "thread_read",
            "Return the last N entries of a project thread, chronologically.",
            json!({"type": "object", "properties": {"project": {"type": "string"}, "thread_id": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["project", "thread_id"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(ThreadReadTool { index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "thread_seek",
            "Full-text search over one project thread's entries.",
            json!({"type": "object", "properties": {"project": {"type": "string"}, "thread_id": {"type": "string"}, "query": {"type": "string"}, "limit": {"type": "integer"}}, "required": ["project", "thread_id", "query"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(ThreadSeekTool { index: index.clone() }),
    );
    registry.register(
        vault_spec(
            "thread_list",
            "List active threads for a project, most recently active first.",
            json!({"type": "object", "properties": {"project": {"type": "string"}}, "required": ["project"]}),
            &["oracle", "librarian"],
            VAULT_TIMEOUT,
        ),
        Arc::new(ThreadListTool { index: index.clone() }),
    );

    for name in ["search_code", "find_definition", "find_references", "get_repo_map"] {
        registry.register(
            vault_spec(name, "External code-intelligence service (not wired in this deployment).", json!({"type": "object"}), &["oracle"], CODE_TIMEOUT),
            Arc::new(StubHandler),
        );
    }
    for name in ["web_search", "web_fetch"] {
        registry.register(
            vault_spec(name, "External web service (not wired in this deployment).", json!({"type": "object"}), &["oracle"], WEB_TIMEOUT),
            Arc::new(StubHandler),
        );
    }

    registry.register(
        vault_spec(
            "delegate_librarian",
            "Invoke the Librarian subagent synchronously: summarise vault content or organise a folder into an index.",
            json!({
                "type": "object",
                "properties": {
                    "mode": {"type": "string", "enum": ["summarise", "organise"]},
                    "task": {"type": "string"},
                    "paths": {"type": "array", "items": {"type": "string"}},
                    "thread_refs": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"project": {"type": "string"}, "thread_id": {"type": "string"}},
                            "required": ["project", "thread_id"],
                        },
                    },
                    "max_tokens": {"type": "integer"},
                    "force_refresh": {"type": "boolean"},
                    "folder": {"type": "string"},
                    "create_index": {"type": "boolean"},
                },
            }),
            &["oracle"],
            LIBRARIAN_TIMEOUT,
        ),
        Arc::new(DelegateLibrarianTool { librarian: librarian.clone(), librarian_tools: librarian_tools.clone() }),
    );

    (Arc::new(registry), librarian)
}
