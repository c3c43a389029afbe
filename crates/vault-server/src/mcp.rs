//! MCP tool-calling façade over the same [`ToolRegistry`] the Oracle uses,
//! per §4.12's transport requirement. Each tool takes its own arguments plus
//! a bearer `token`, verified per call — the dynamic registry has no
//! per-session HTTP header the way the axum routes do, so identity travels
//! with the call instead of the session.

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    ErrorData as McpError,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::state::AppState;

fn require_tenant(state: &AppState, token: &str) -> Result<String, McpError> {
    state
        .auth
        .verify(token)
        .map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn json_result(value: JsonValue) -> CallToolResult {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    if value.get("error").is_some() {
        CallToolResult::error(vec![Content::text(text)])
    } else {
        CallToolResult::success(vec![Content::text(text)])
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultReadParams {
    /// Bearer token identifying the tenant.
    pub token: String,
    /// Note path relative to the tenant's vault root.
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultWriteParams {
    pub token: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<HashMap<String, JsonValue>>,
    pub title: Option<String>,
    pub if_version: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultListParams {
    pub token: String,
    pub folder: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultSearchParams {
    pub token: String,
    pub query: String,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultMoveParams {
    pub token: String,
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VaultCreateIndexParams {
    pub token: String,
    pub folder: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadPushParams {
    pub token: String,
    pub project: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadReadParams {
    pub token: String,
    pub project: String,
    pub thread_id: String,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadSeekParams {
    pub token: String,
    pub project: String,
    pub thread_id: String,
    pub query: String,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadListParams {
    pub token: String,
    pub project: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadRef {
    pub project: String,
    pub thread_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelegateLibrarianParams {
    pub token: String,
    #[serde(default)]
    pub mode: Option<String>,
    pub task: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub thread_refs: Vec<ThreadRef>,
    pub max_tokens: Option<u64>,
    pub force_refresh: Option<bool>,
    pub folder: Option<String>,
    pub create_index: Option<bool>,
}

#[derive(Clone)]
pub struct McpServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl McpServer {
    pub fn new(state: AppState) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    #[tool(description = "Read a note from the vault by path.")]
    async fn vault_read(&self, params: Parameters<VaultReadParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"path": params.0.path});
        Ok(json_result(self.state.tools.execute("vault_read", args, &tenant, None).await))
    }

    #[tool(description = "Write or overwrite a note in the vault, optionally guarded by if_version.")]
    async fn vault_write(&self, params: Parameters<VaultWriteParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({
            "path": params.0.path,
            "content": params.0.content,
            "metadata": params.0.metadata,
            "title": params.0.title,
            "if_version": params.0.if_version,
        });
        Ok(json_result(self.state.tools.execute("vault_write", args, &tenant, None).await))
    }

    #[tool(description = "List notes under a vault folder.")]
    async fn vault_list(&self, params: Parameters<VaultListParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"folder": params.0.folder});
        Ok(json_result(self.state.tools.execute("vault_list", args, &tenant, None).await))
    }

    #[tool(description = "Full-text search the vault; returns ranked hits with snippets.")]
    async fn vault_search(&self, params: Parameters<VaultSearchParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"query": params.0.query, "limit": params.0.limit});
        Ok(json_result(self.state.tools.execute("vault_search", args, &tenant, None).await))
    }

    #[tool(description = "Move/rename a note and reindex its backlinks.")]
    async fn vault_move(&self, params: Parameters<VaultMoveParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"old_path": params.0.old_path, "new_path": params.0.new_path});
        Ok(json_result(self.state.tools.execute("vault_move", args, &tenant, None).await))
    }

    #[tool(description = "Generate a folder index note listing its contents as wikilinks.")]
    async fn vault_create_index(&self, params: Parameters<VaultCreateIndexParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"folder": params.0.folder});
        Ok(json_result(self.state.tools.execute("vault_create_index", args, &tenant, None).await))
    }

    #[tool(description = "Append a turn to a project thread, auto-creating it if absent.")]
    async fn thread_push(&self, params: Parameters<ThreadPushParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({
            "project": params.0.project, "thread_id": params.0.thread_id,
            "role": params.0.role, "content": params.0.content,
        });
        Ok(json_result(self.state.tools.execute("thread_push", args, &tenant, None).await))
    }

    #[tool(description = "Return the last N entries of a project thread, chronologically.")]
    async fn thread_read(&self, params: Parameters<ThreadReadParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"project": params.0.project, "thread_id": params.0.thread_id, "limit": params.0.limit});
        Ok(json_result(self.state.tools.execute("thread_read", args, &tenant, None).await))
    }

    #[tool(description = "Full-text search over one project thread's entries.")]
    async fn thread_seek(&self, params: Parameters<ThreadSeekParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({
            "project": params.0.project, "thread_id": params.0.thread_id,
            "query": params.0.query, "limit": params.0.limit,
        });
        Ok(json_result(self.state.tools.execute("thread_seek", args, &tenant, None).await))
    }

    #[tool(description = "List active threads for a project, most recently active first.")]
    async fn thread_list(&self, params: Parameters<ThreadListParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let args = json!({"project": params.0.project});
        Ok(json_result(self.state.tools.execute("thread_list", args, &tenant, None).await))
    }

    #[tool(description = "Invoke the Librarian subagent: summarise vault content or organise a folder into an index.")]
    async fn delegate_librarian(&self, params: Parameters<DelegateLibrarianParams>) -> Result<CallToolResult, McpError> {
        let tenant = require_tenant(&self.state, &params.0.token)?;
        let thread_refs: Vec<JsonValue> = params
            .0
            .thread_refs
            .iter()
            .map(|r| json!({"project": r.project, "thread_id": r.thread_id}))
            .collect();
        let args = json!({
            "mode": params.0.mode, "task": params.0.task, "paths": params.0.paths,
            "thread_refs": thread_refs,
            "max_tokens": params.0.max_tokens, "force_refresh": params.0.force_refresh,
            "folder": params.0.folder, "create_index": params.0.create_index,
        });
        Ok(json_result(self.state.tools.execute("delegate_librarian", args, &tenant, None).await))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "vault-server".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Multi-tenant vault server — vault_read/write/list/search/move, \
                 thread_push/read/seek/list, and delegate_librarian. Every call \
                 takes a bearer `token` identifying the tenant."
                    .into(),
            ),
        }
    }
}
