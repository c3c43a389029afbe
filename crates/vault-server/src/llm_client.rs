//! `reqwest`-backed [`LlmClient`] talking to an OpenAI-compatible
//! chat-completions endpoint. Kept out of the `oracle` crate so that crate
//! never needs an HTTP dependency of its own.

use async_trait::async_trait;
use oracle::{LlmClient, LlmError, LlmOptions, LlmResponse, Message, ToolCallRequest};
use serde_json::{json, Value as JsonValue};

pub struct ReqwestLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl ReqwestLlmClient {
    pub fn new(base_url: String, api_key: Option<String>, default_model: String) -> Self {
        Self { http: reqwest::Client::new(), base_url, api_key, default_model }
    }

    fn render_message(message: &Message) -> JsonValue {
        let mut obj = json!({ "role": message.role });
        if let Some(content) = &message.content {
            obj["content"] = json!(content);
        }
        if let Some(tool_calls) = &message.tool_calls {
            obj["tool_calls"] = json!(tool_calls
                .iter()
                .map(|tc| json!({
                    "id": tc.id,
                    "type": "function",
                    "function": { "name": tc.name, "arguments": tc.arguments.to_string() },
                }))
                .collect::<Vec<_>>());
        }
        if let Some(id) = &message.tool_call_id {
            obj["tool_call_id"] = json!(id);
        }
        obj
    }

    fn render_tools(tools: &[JsonValue]) -> Vec<JsonValue> {
        tools
            .iter()
            .map(|t| json!({ "type": "function", "function": t }))
            .collect()
    }
}

#[async_trait]
impl LlmClient for ReqwestLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[JsonValue],
        opts: &LlmOptions,
    ) -> Result<LlmResponse, LlmError> {
        let model = opts.model.clone().unwrap_or_else(|| self.default_model.clone());
        let mut body = json!({
            "model": model,
            "messages": messages.iter().map(Self::render_message).collect::<Vec<_>>(),
            "max_tokens": opts.max_tokens,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::render_tools(tools));
        }
        if let Some(temperature) = opts.temperature {
            body["temperature"] = json!(temperature);
        }

        let mut request = self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| LlmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("provider returned {status}: {text}")));
        }

        let payload: JsonValue = response.json().await.map_err(|e| LlmError::Malformed(e.to_string()))?;
        let choice = payload["choices"].get(0).ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

        let content = choice["message"]["content"].as_str().map(str::to_string);
        let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop").to_string();

        let tool_calls = choice["message"]["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call["id"].as_str()?.to_string();
                        let name = call["function"]["name"].as_str()?.to_string();
                        let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments: JsonValue = serde_json::from_str(raw_args).unwrap_or(json!({}));
                        Some(ToolCallRequest { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let tokens_used = payload["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;
        let model_used = payload["model"].as_str().unwrap_or(&model).to_string();

        Ok(LlmResponse { content, tool_calls, finish_reason, tokens_used, model_used })
    }
}
