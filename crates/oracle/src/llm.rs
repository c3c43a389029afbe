//! The out-of-scope LLM-provider boundary. `vault-server` wires a real
//! `reqwest`-backed client behind this trait; tests use [`MockLlmClient`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }
    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self { model: None, max_tokens: 4000, temperature: None, stream: false }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    /// `"stop"`, `"tool_calls"`, or a provider-specific value.
    pub finish_reason: String,
    pub tokens_used: u32,
    pub model_used: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm provider request failed: {0}")]
    Request(String),
    #[error("llm provider returned an unparseable response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[JsonValue],
        opts: &LlmOptions,
    ) -> Result<LlmResponse, LlmError>;
}

/// Deterministic stand-in used by tests and by callers exercising the loop
/// without a live provider configured.
pub struct MockLlmClient {
    responses: std::sync::Mutex<Vec<LlmResponse>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self { responses: std::sync::Mutex::new(responses) }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message], _tools: &[JsonValue], _opts: &LlmOptions) -> Result<LlmResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(LlmError::Request("mock exhausted".to_string()));
        }
        Ok(responses.remove(0))
    }
}
