//! C8: the static tool registry the oracle and librarian agents call into.
//! Every handler always returns `Ok(json)` — failures are represented as
//! `{"error": ...}` values, never as Rust errors, so one misbehaving tool
//! can never cancel the rest of a batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue;
}

/// A handler built from a plain async closure, for tools simple enough not
/// to need their own struct.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(String, JsonValue) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = JsonValue> + Send,
{
    async fn call(&self, tenant: &str, args: JsonValue) -> JsonValue {
        (self.0)(tenant.to_string(), args).await
    }
}

/// Always returns `{"error":"not available"}` — for tools backed by an
/// optional external service (code search, web fetch) that this deployment
/// hasn't wired up.
pub struct StubHandler;

#[async_trait]
impl ToolHandler for StubHandler {
    async fn call(&self, _tenant: &str, _args: JsonValue) -> JsonValue {
        json!({"error": "not available"})
    }
}

#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: JsonValue,
    /// Agent scopes allowed to call this tool (e.g. `"oracle"`, `"librarian"`).
    pub scopes: Vec<String>,
    pub timeout: Duration,
}

struct ToolEntry {
    spec: ToolSpec,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Clone, serde::Deserialize, serde::Serialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub arguments: JsonValue,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        self.entries.insert(spec.name.clone(), ToolEntry { spec, handler });
    }

    fn effective_timeout(&self, name: &str, timeout: Option<Duration>) -> Duration {
        if let Some(t) = timeout {
            return t;
        }
        self.entries.get(name).map(|e| e.spec.timeout).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Run one tool call, wrapped in its effective timeout. Never returns
    /// an `Err` — every failure mode is serialised into the returned JSON.
    pub async fn execute(&self, name: &str, args: JsonValue, tenant: &str, timeout: Option<Duration>) -> JsonValue {
        let Some(entry) = self.entries.get(name) else {
            tracing::warn!(tool = name, tenant, "unknown tool requested");
            return json!({"error": format!("Unknown tool: {name}")});
        };

        let effective = timeout.unwrap_or(entry.spec.timeout);
        let handler = Arc::clone(&entry.handler);
        let tenant = tenant.to_string();
        let args = args.clone();

        match tokio::time::timeout(effective, handler.call(&tenant, args)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, tenant = %tenant, timeout_secs = effective.as_secs(), "tool call timed out");
                json!({
                    "error": format!("{name} timed out after {}s; consider narrower scope", effective.as_secs()),
                    "timed_out": true,
                    "timeout": effective.as_secs(),
                    "tool": name,
                })
            }
        }
    }

    /// Run every call concurrently; input order is preserved in the output
    /// regardless of completion order, and one call's failure never cancels
    /// another's.
    pub async fn execute_batch(
        &self,
        calls: Vec<ToolCall>,
        tenant: &str,
        timeout: Option<Duration>,
        include_ids: bool,
    ) -> Vec<JsonValue> {
        let futures = calls.into_iter().map(|call| async move {
            let mut result = self.execute(&call.name, call.arguments, tenant, timeout).await;
            if include_ids {
                if let (Some(id), JsonValue::Object(map)) = (call.id, &mut result) {
                    map.insert("tool_call_id".to_string(), json!(id));
                }
            }
            result
        });
        futures::future::join_all(futures).await
    }

    /// The schema subset tagged for `agent`, in the `{name, description,
    /// parameters}` shape LLM providers expect.
    pub fn get_tool_schemas(&self, agent: &str) -> Vec<JsonValue> {
        let mut schemas: Vec<(&str, JsonValue)> = self
            .entries
            .values()
            .filter(|e| e.spec.scopes.iter().any(|s| s == agent))
            .map(|e| {
                (
                    e.spec.name.as_str(),
                    json!({
                        "name": e.spec.name,
                        "description": e.spec.description,
                        "parameters": e.spec.schema,
                    }),
                )
            })
            .collect();
        schemas.sort_by_key(|(name, _)| *name);
        schemas.into_iter().map(|(_, v)| v).collect()
    }

    pub fn effective_timeout_for(&self, name: &str) -> Duration {
        self.effective_timeout(name, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, scope: &str, timeout_secs: u64) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: format!("{name} description"),
            schema: json!({"type": "object", "properties": {}}),
            scopes: vec![scope.to_string()],
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_json_error_not_a_rust_error() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", json!({}), "acme", None).await;
        assert_eq!(result, json!({"error": "Unknown tool: nope"}));
    }

    #[tokio::test]
    async fn execute_dispatches_to_registered_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(
            spec("echo", "oracle", 30),
            Arc::new(FnHandler(|tenant: String, args: JsonValue| async move { json!({"tenant": tenant, "echo": args}) })),
        );
        let result = registry.execute("echo", json!({"x": 1}), "acme", None).await;
        assert_eq!(result, json!({"tenant": "acme", "echo": {"x": 1}}));
    }

    #[tokio::test]
    async fn execute_times_out_and_reports_structured_error() {
        let mut registry = ToolRegistry::new();
        registry.register(
            spec("slow", "oracle", 30),
            Arc::new(FnHandler(|_tenant: String, _args: JsonValue| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                json!({"ok": true})
            })),
        );
        let result = registry
            .execute("slow", json!({}), "acme", Some(Duration::from_millis(10)))
            .await;
        assert_eq!(result["timed_out"], json!(true));
        assert_eq!(result["tool"], json!("slow"));
    }

    #[tokio::test]
    async fn execute_batch_preserves_input_order_regardless_of_completion_order() {
        let mut registry = ToolRegistry::new();
        registry.register(
            spec("fast", "oracle", 30),
            Arc::new(FnHandler(|_t: String, _a: JsonValue| async move { json!({"who": "fast"}) })),
        );
        registry.register(
            spec("slow", "oracle", 30),
            Arc::new(FnHandler(|_t: String, _a: JsonValue| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                json!({"who": "slow"})
            })),
        );

        let calls = vec![
            ToolCall { id: Some("1".into()), name: "slow".into(), arguments: json!({}) },
            ToolCall { id: Some("2".into()), name: "fast".into(), arguments: json!({}) },
        ];
        let results = registry.execute_batch(calls, "acme", None, false).await;
        assert_eq!(results[0]["who"], json!("slow"));
        assert_eq!(results[1]["who"], json!("fast"));
    }

    #[tokio::test]
    async fn execute_batch_one_failure_does_not_cancel_others() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("stub", "oracle", 30), Arc::new(StubHandler));
        registry.register(
            spec("ok", "oracle", 30),
            Arc::new(FnHandler(|_t: String, _a: JsonValue| async move { json!({"ok": true}) })),
        );

        let calls = vec![
            ToolCall { id: None, name: "stub".into(), arguments: json!({}) },
            ToolCall { id: None, name: "ok".into(), arguments: json!({}) },
        ];
        let results = registry.execute_batch(calls, "acme", None, false).await;
        assert_eq!(results[0], json!({"error": "not available"}));
        assert_eq!(results[1], json!({"ok": true}));
    }

    #[test]
    fn schemas_are_filtered_by_agent_scope() {
        let mut registry = ToolRegistry::new();
        registry.register(spec("oracle-only", "oracle", 30), Arc::new(StubHandler));
        registry.register(spec("librarian-only", "librarian", 30), Arc::new(StubHandler));

        let oracle_schemas = registry.get_tool_schemas("oracle");
        assert_eq!(oracle_schemas.len(), 1);
        assert_eq!(oracle_schemas[0]["name"], json!("oracle-only"));
    }
}
