//! C9: the bounded-turn tool-calling agent loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc::UnboundedSender;
use tool_dispatch::{ToolCall, ToolRegistry};

use crate::citations::{extract_citations, Citation};
use crate::error::OracleError;
use crate::llm::{LlmClient, LlmOptions, Message, ToolCallRequest};
use crate::xml_fallback::extract_xml_tool_calls;

pub const MAX_TURNS: usize = 15;
const TOOL_RESULT_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    Thinking,
    Content { text: String },
    ToolCall { id: String, name: String, arguments: JsonValue },
    ToolResult { id: String, name: String, result: JsonValue },
    Source(Citation),
    Done { tokens_used: u32, model_used: String },
    Error { message: String },
}

/// A live handle a caller can use to request cancellation of one tenant's
/// in-flight query (`POST /api/oracle/cancel`).
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct OracleQuery<'a> {
    pub tenant: &'a str,
    pub question: &'a str,
    pub project: Option<&'a str>,
    pub model: Option<String>,
    pub max_tokens: u32,
    /// Prior turns to seed the conversation with (compressed summary and/or
    /// last K exchanges), oldest first.
    pub prior_messages: Vec<Message>,
    pub stream: bool,
}

pub struct Oracle {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

fn render_system_prompt(tenant: &str, project: Option<&str>) -> String {
    format!(
        "You are the Oracle, a research assistant for tenant \"{tenant}\"{}. \
         Use the available tools to read and search the vault before answering. \
         Cite your sources.",
        project.map(|p| format!(" working in project \"{p}\"")).unwrap_or_default()
    )
}

impl Oracle {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    /// Run the loop, emitting chunks to `tx` as they're produced. Returns
    /// once a `Done` or `Error` chunk has been sent.
    pub async fn query(&self, query: OracleQuery<'_>, cancel: CancelHandle, tx: UnboundedSender<Chunk>) {
        let mut messages = vec![Message::system(render_system_prompt(query.tenant, query.project))];
        messages.extend(query.prior_messages);
        messages.push(Message::user(query.question));

        tracing::info!(tenant = query.tenant, max_turns = MAX_TURNS, "starting oracle query");
        let _ = tx.send(Chunk::Thinking);

        let opts = LlmOptions {
            model: query.model,
            max_tokens: query.max_tokens,
            temperature: None,
            stream: query.stream,
        };
        let tool_schemas = self.tools.get_tool_schemas("oracle");

        let mut accumulated_citations: Vec<Citation> = Vec::new();

        for turn in 0..MAX_TURNS {
            if cancel.is_cancelled() {
                tracing::warn!(tenant = query.tenant, turn, "oracle query cancelled");
                let _ = tx.send(Chunk::Error { message: "cancelled".to_string() });
                return;
            }

            let response = match self.llm.complete(&messages, &tool_schemas, &opts).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(tenant = query.tenant, turn, error = %e, "llm completion failed");
                    let _ = tx.send(Chunk::Error { message: e.to_string() });
                    return;
                }
            };

            let (visible_content, xml_calls) = match &response.content {
                Some(text) => extract_xml_tool_calls(text),
                None => (String::new(), Vec::new()),
            };

            let tool_calls: Vec<ToolCallRequest> = if !response.tool_calls.is_empty() {
                response.tool_calls.clone()
            } else {
                xml_calls
            };

            if !visible_content.trim().is_empty() {
                let _ = tx.send(Chunk::Content { text: visible_content.clone() });
            }

            if tool_calls.is_empty() {
                for citation in accumulated_citations.drain(..) {
                    let _ = tx.send(Chunk::Source(citation));
                }
                let _ = tx.send(Chunk::Done {
                    tokens_used: response.tokens_used,
                    model_used: response.model_used,
                });
                return;
            }

            messages.push(Message::assistant(Some(visible_content), tool_calls.clone()));

            for call in &tool_calls {
                let _ = tx.send(Chunk::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }

            tracing::info!(tenant = query.tenant, turn, tool_count = tool_calls.len(), "dispatching tool batch");
            let batch: Vec<ToolCall> = tool_calls
                .iter()
                .map(|c| ToolCall { id: Some(c.id.clone()), name: c.name.clone(), arguments: c.arguments.clone() })
                .collect();
            let results = self.tools.execute_batch(batch, query.tenant, None, true).await;

            for (call, result) in tool_calls.iter().zip(results.iter()) {
                accumulated_citations.extend(extract_citations(&call.name, result));

                let preview = truncate_for_display(result);
                let _ = tx.send(Chunk::ToolResult { id: call.id.clone(), name: call.name.clone(), result: preview });

                let content = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
                messages.push(Message::tool_result(call.id.clone(), content));
            }

            if cancel.is_cancelled() {
                tracing::warn!(tenant = query.tenant, turn, "oracle query cancelled");
                let _ = tx.send(Chunk::Error { message: "cancelled".to_string() });
                return;
            }
        }

        tracing::warn!(tenant = query.tenant, max_turns = MAX_TURNS, "oracle query exhausted max turns");
        let _ = tx.send(Chunk::Error { message: OracleError::MaxTurnsReached.to_string() });
    }
}

fn truncate_for_display(result: &JsonValue) -> JsonValue {
    let rendered = serde_json::to_string(result).unwrap_or_default();
    if rendered.chars().count() <= TOOL_RESULT_PREVIEW_CHARS {
        return result.clone();
    }
    let truncated: String = rendered.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
    json!({ "truncated": true, "preview": truncated })
}

pub const DEFAULT_TOOL_TIMEOUT: Duration = tool_dispatch::DEFAULT_TIMEOUT;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlmClient};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tool_dispatch::{FnHandler, ToolSpec};

    fn registry_with_echo() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolSpec {
                name: "vault_read".to_string(),
                description: "read a note".to_string(),
                schema: json!({"type": "object"}),
                scopes: vec!["oracle".to_string()],
                timeout: Duration::from_secs(10),
            },
            Arc::new(FnHandler(|_t: String, args: JsonValue| async move {
                json!({"path": args["path"], "content": "note body"})
            })),
        );
        Arc::new(registry)
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<Chunk>) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some(c) = rx.recv().await {
            out.push(c);
        }
        out
    }

    #[tokio::test]
    async fn stops_immediately_on_pure_content_response() {
        let llm = Arc::new(MockLlmClient::new(vec![LlmResponse {
            content: Some("the answer is 42".to_string()),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
            tokens_used: 10,
            model_used: "test-model".to_string(),
        }]));
        let oracle = Oracle::new(llm, registry_with_echo());
        let (tx, rx) = mpsc::unbounded_channel();
        oracle
            .query(
                OracleQuery {
                    tenant: "acme",
                    question: "what is the answer",
                    project: None,
                    model: None,
                    max_tokens: 4000,
                    prior_messages: vec![],
                    stream: false,
                },
                CancelHandle::new(),
                tx,
            )
            .await;
        let chunks = drain(rx).await;
        assert!(matches!(chunks.first(), Some(Chunk::Thinking)));
        assert!(chunks.iter().any(|c| matches!(c, Chunk::Content { text } if text.contains("42"))));
        assert!(matches!(chunks.last(), Some(Chunk::Done { .. })));
    }

    #[tokio::test]
    async fn dispatches_native_tool_call_then_answers() {
        let llm = Arc::new(MockLlmClient::new(vec![
            LlmResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "call_1".to_string(),
                    name: "vault_read".to_string(),
                    arguments: json!({"path": "a.md"}),
                }],
                finish_reason: "tool_calls".to_string(),
                tokens_used: 5,
                model_used: "test-model".to_string(),
            },
            LlmResponse {
                content: Some("based on a.md, here's your answer".to_string()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                tokens_used: 8,
                model_used: "test-model".to_string(),
            },
        ]));
        let oracle = Oracle::new(llm, registry_with_echo());
        let (tx, rx) = mpsc::unbounded_channel();
        oracle
            .query(
                OracleQuery {
                    tenant: "acme",
                    question: "what does a.md say",
                    project: None,
                    model: None,
                    max_tokens: 4000,
                    prior_messages: vec![],
                    stream: false,
                },
                CancelHandle::new(),
                tx,
            )
            .await;
        let chunks = drain(rx).await;
        assert!(chunks.iter().any(|c| matches!(c, Chunk::ToolCall { name, .. } if name == "vault_read")));
        assert!(chunks.iter().any(|c| matches!(c, Chunk::ToolResult { name, .. } if name == "vault_read")));
        assert!(chunks.iter().any(|c| matches!(c, Chunk::Source(citation) if citation.path == "a.md")));
        assert!(matches!(chunks.last(), Some(Chunk::Done { .. })));
    }

    #[tokio::test]
    async fn xml_fallback_tool_calls_are_parsed_when_no_native_calls_present() {
        let xml_text = r#"Let me look.
<function_calls>
<invoke name="vault_read"><parameter name="path">b.md</parameter></invoke>
</function_calls>"#;
        let llm = Arc::new(MockLlmClient::new(vec![
            LlmResponse {
                content: Some(xml_text.to_string()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                tokens_used: 5,
                model_used: "test-model".to_string(),
            },
            LlmResponse {
                content: Some("done".to_string()),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                tokens_used: 5,
                model_used: "test-model".to_string(),
            },
        ]));
        let oracle = Oracle::new(llm, registry_with_echo());
        let (tx, rx) = mpsc::unbounded_channel();
        oracle
            .query(
                OracleQuery {
                    tenant: "acme",
                    question: "q",
                    project: None,
                    model: None,
                    max_tokens: 4000,
                    prior_messages: vec![],
                    stream: false,
                },
                CancelHandle::new(),
                tx,
            )
            .await;
        let chunks = drain(rx).await;
        assert!(chunks.iter().any(|c| matches!(c, Chunk::ToolCall { name, .. } if name == "vault_read")));
    }

    #[tokio::test]
    async fn exhausting_max_turns_without_stop_emits_error() {
        struct AlwaysToolCall;
        #[async_trait]
        impl LlmClient for AlwaysToolCall {
            async fn complete(&self, _m: &[Message], _t: &[JsonValue], _o: &LlmOptions) -> Result<LlmResponse, crate::llm::LlmError> {
                Ok(LlmResponse {
                    content: None,
                    tool_calls: vec![ToolCallRequest { id: "x".to_string(), name: "vault_read".to_string(), arguments: json!({"path": "a.md"}) }],
                    finish_reason: "tool_calls".to_string(),
                    tokens_used: 1,
                    model_used: "test-model".to_string(),
                })
            }
        }
        let oracle = Oracle::new(Arc::new(AlwaysToolCall), registry_with_echo());
        let (tx, rx) = mpsc::unbounded_channel();
        oracle
            .query(
                OracleQuery {
                    tenant: "acme",
                    question: "loop forever",
                    project: None,
                    model: None,
                    max_tokens: 4000,
                    prior_messages: vec![],
                    stream: false,
                },
                CancelHandle::new(),
                tx,
            )
            .await;
        let chunks = drain(rx).await;
        assert!(matches!(chunks.last(), Some(Chunk::Error { message }) if message.contains("Maximum conversation turns")));
    }

    #[tokio::test]
    async fn cancellation_is_honoured_between_turns() {
        struct SlowResponder(Mutex<u32>);
        #[async_trait]
        impl LlmClient for SlowResponder {
            async fn complete(&self, _m: &[Message], _t: &[JsonValue], _o: &LlmOptions) -> Result<LlmResponse, crate::llm::LlmError> {
                *self.0.lock().unwrap() += 1;
                Ok(LlmResponse {
                    content: None,
                    tool_calls: vec![ToolCallRequest { id: "x".to_string(), name: "vault_read".to_string(), arguments: json!({"path": "a.md"}) }],
                    finish_reason: "tool_calls".to_string(),
                    tokens_used: 1,
                    model_used: "test-model".to_string(),
                })
            }
        }
        let oracle = Oracle::new(Arc::new(SlowResponder(Mutex::new(0))), registry_with_echo());
        let cancel = CancelHandle::new();
        cancel.cancel();
        let (tx, rx) = mpsc::unbounded_channel();
        oracle
            .query(
                OracleQuery {
                    tenant: "acme",
                    question: "q",
                    project: None,
                    model: None,
                    max_tokens: 4000,
                    prior_messages: vec![],
                    stream: false,
                },
                cancel,
                tx,
            )
            .await;
        let chunks = drain(rx).await;
        assert!(matches!(chunks.last(), Some(Chunk::Error { message }) if message == "cancelled"));
    }
}
