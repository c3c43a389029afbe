//! Source-citation extraction from tool results, keyed by tool name.

use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub path: String,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// `result` is the raw JSON a tool call returned; shape depends on `tool_name`.
pub fn extract_citations(tool_name: &str, result: &JsonValue) -> Vec<Citation> {
    match tool_name {
        "search_code" => result
            .get("results")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .take(5)
            .filter_map(|r| {
                Some(Citation {
                    path: r.get("file_path")?.as_str()?.to_string(),
                    source_type: "code".to_string(),
                    line: r.get("line_start").and_then(JsonValue::as_i64),
                    snippet: truncate(r.get("content")?.as_str()?, 500),
                    score: r.get("score").and_then(JsonValue::as_f64),
                })
            })
            .collect(),

        "vault_search" => result
            .get("results")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .take(5)
            .filter_map(|r| {
                Some(Citation {
                    path: r.get("path")?.as_str()?.to_string(),
                    source_type: "vault".to_string(),
                    line: None,
                    snippet: r.get("snippet").and_then(JsonValue::as_str).unwrap_or("").to_string(),
                    score: r.get("score").and_then(JsonValue::as_f64),
                })
            })
            .collect(),

        "vault_read" => {
            let Some(path) = result.get("path").and_then(JsonValue::as_str) else {
                return Vec::new();
            };
            let content = result.get("content").and_then(JsonValue::as_str).unwrap_or("");
            vec![Citation {
                path: path.to_string(),
                source_type: "vault".to_string(),
                line: None,
                snippet: truncate(content, 500),
                score: None,
            }]
        }

        "thread_read" | "thread_seek" => {
            let thread_id = result.get("thread_id").and_then(JsonValue::as_str).unwrap_or("unknown");
            result
                .get("entries")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
                .take(5)
                .filter_map(|e| {
                    Some(Citation {
                        path: format!("thread:{thread_id}"),
                        source_type: "thread".to_string(),
                        line: None,
                        snippet: e.get("content")?.as_str()?.to_string(),
                        score: None,
                    })
                })
                .collect()
        }

        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_code_yields_up_to_five_citations() {
        let result = json!({"results": (0..8).map(|i| json!({
            "file_path": format!("src/{i}.rs"), "line_start": i, "content": "fn main() {}", "score": 1.0
        })).collect::<Vec<_>>()});
        let citations = extract_citations("search_code", &result);
        assert_eq!(citations.len(), 5);
        assert_eq!(citations[0].source_type, "code");
    }

    #[test]
    fn vault_read_yields_single_citation() {
        let result = json!({"path": "notes/a.md", "content": "hello world"});
        let citations = extract_citations("vault_read", &result);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].path, "notes/a.md");
    }

    #[test]
    fn thread_read_prefixes_path_with_thread_id() {
        let result = json!({"thread_id": "t1", "entries": [{"content": "hi"}]});
        let citations = extract_citations("thread_read", &result);
        assert_eq!(citations[0].path, "thread:t1");
    }

    #[test]
    fn unknown_tool_yields_no_citations() {
        assert!(extract_citations("web_fetch", &json!({})).is_empty());
    }
}
