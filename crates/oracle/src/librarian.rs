//! C10: the summarisation subagent. Reuses [`crate::llm::LlmClient`] at a
//! lower temperature and reads/writes its cache through the same
//! `vault_read`/`vault_write` tools the Oracle calls, rather than touching
//! the vault store directly.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedSender;
use tool_dispatch::ToolRegistry;

use crate::llm::{LlmClient, LlmOptions, Message};

const LIBRARIAN_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LibrarianChunk {
    Thinking,
    Summary { text: String },
    CacheHit,
    Error { message: String },
    Done {
        from_cache: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_count: Option<usize>,
    },
    Index { index_path: String },
    OrganiseDone { files_organized: usize, wikilinks_created: usize },
}

pub struct SummariseInput<'a> {
    pub task: &'a str,
    pub content: &'a [(String, String, String)], // (path, text, source_type)
    pub max_tokens: u32,
    pub force_refresh: bool,
}

pub struct Librarian {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

fn safe_slug(s: &str, max_len: usize) -> String {
    let mut out = String::new();
    let mut last_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').chars().take(max_len).collect()
}

fn cache_key(task: &str, content: &[(String, String, String)]) -> String {
    let mut sorted: Vec<&(String, String, String)> = content.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut payload = task.to_string();
    payload.push('|');
    payload.push_str(&sorted.iter().map(|(p, _, _)| p.as_str()).collect::<Vec<_>>().join(","));
    payload.push('|');
    for (_, text, _) in &sorted {
        payload.push_str(&text.chars().take(1000).collect::<String>());
    }

    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn dominant_source_type(source_types: &[&str]) -> String {
    use std::collections::HashMap;
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in source_types {
        *counts.entry(t).or_insert(0) += 1;
    }
    let max_count = counts.values().copied().max().unwrap_or(0);
    let top: Vec<&&str> = counts.iter().filter(|(_, &c)| c == max_count).map(|(t, _)| t).collect();
    if top.len() == 1 {
        top[0].to_string()
    } else {
        "mixed".to_string()
    }
}

fn cache_path(task: &str, key: &str, primary_type: &str, now: chrono::DateTime<Utc>) -> String {
    let date = now.format("%Y-%m-%d");
    let task_slug = safe_slug(task, 30);
    format!("oracle-cache/summaries/{primary_type}/{date}/{task_slug}-{key}.md")
}

impl Librarian {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    pub async fn summarise(&self, tenant: &str, input: SummariseInput<'_>, tx: UnboundedSender<LibrarianChunk>) {
        let _ = tx.send(LibrarianChunk::Thinking);

        let key = cache_key(input.task, input.content);
        let source_types: Vec<&str> = input.content.iter().map(|(_, _, t)| t.as_str()).collect();
        let primary_type = dominant_source_type(&source_types);
        let path = cache_path(input.task, &key, &primary_type, Utc::now());

        if !input.force_refresh {
            let read_result = self.tools.execute("vault_read", json!({"path": path}), tenant, None).await;
            if read_result.get("content").and_then(JsonValue::as_str).is_some() && read_result.get("error").is_none() {
                tracing::info!(tenant, cache_path = %path, "librarian cache hit");
                let _ = tx.send(LibrarianChunk::CacheHit);
                let _ = tx.send(LibrarianChunk::Done { from_cache: true, cache_path: Some(path), token_count: None });
                return;
            }
        }

        let mut messages = vec![Message::system(
            "You are the Librarian. Produce a concise, faithful summary of the given material for the stated task.",
        )];
        let joined = input
            .content
            .iter()
            .map(|(p, text, _)| format!("## {p}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        messages.push(Message::user(format!("Task: {}\n\n{joined}", input.task)));

        let opts = LlmOptions {
            model: None,
            max_tokens: input.max_tokens,
            temperature: Some(LIBRARIAN_TEMPERATURE),
            stream: false,
        };

        let response = match self.llm.complete(&messages, &[], &opts).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(tenant, error = %e, "librarian summarisation failed");
                let _ = tx.send(LibrarianChunk::Error { message: e.to_string() });
                return;
            }
        };
        let summary = response.content.unwrap_or_default();
        let _ = tx.send(LibrarianChunk::Summary { text: summary.clone() });

        let token_count = summary.len() / 4;
        let sources: Vec<&str> = input.content.iter().map(|(p, _, _)| p.as_str()).collect();
        let frontmatter = json!({
            "created": Utc::now().to_rfc3339(),
            "sources": sources,
            "token_count": token_count,
            "cache_key": key,
            "task": input.task,
            "source_type": primary_type,
        });

        let write_result = self
            .tools
            .execute(
                "vault_write",
                json!({"path": path, "content": summary, "metadata": frontmatter}),
                tenant,
                None,
            )
            .await;

        if write_result.get("error").is_some() {
            tracing::error!(tenant, cache_path = %path, "librarian cache write failed");
            let _ = tx.send(LibrarianChunk::Error { message: write_result["error"].to_string() });
            return;
        }

        tracing::info!(tenant, cache_path = %path, source_type = %primary_type, "librarian summary written");
        let _ = tx.send(LibrarianChunk::Done { from_cache: false, cache_path: Some(path), token_count: Some(token_count) });
    }

    pub async fn organise(&self, tenant: &str, folder: &str, create_index: bool, tx: UnboundedSender<LibrarianChunk>) {
        let _ = tx.send(LibrarianChunk::Thinking);

        let list_result = self.tools.execute("vault_list", json!({"folder": folder}), tenant, None).await;
        let Some(entries) = list_result.get("notes").and_then(JsonValue::as_array) else {
            tracing::error!(tenant, folder, "librarian organise failed to list folder");
            let _ = tx.send(LibrarianChunk::Error { message: "failed to list folder".to_string() });
            return;
        };

        let mut rows = Vec::new();
        for entry in entries {
            let Some(path) = entry.get("path").and_then(JsonValue::as_str) else { continue };
            let read_result = self.tools.execute("vault_read", json!({"path": path}), tenant, None).await;
            let title = read_result.get("title").and_then(JsonValue::as_str).unwrap_or(path).to_string();
            let body = read_result.get("content").and_then(JsonValue::as_str).unwrap_or("");
            let snippet: String = body
                .split("\n\n")
                .next()
                .unwrap_or("")
                .chars()
                .take(200)
                .collect();
            rows.push((title, snippet));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let wikilinks_created = rows.len();
        let leaf = folder.rsplit('/').next().unwrap_or(folder);
        let heading = capitalise(leaf);

        let mut body = format!("# {heading}\n\n");
        for (title, snippet) in &rows {
            body.push_str(&format!("- [[{title}]] — {snippet}\n"));
        }

        if create_index {
            let index_path = format!("{}/index.md", folder.trim_end_matches('/'));
            let write_result = self
                .tools
                .execute("vault_write", json!({"path": index_path, "content": body}), tenant, None)
                .await;
            if write_result.get("error").is_some() {
                tracing::error!(tenant, index_path = %index_path, "librarian index write failed");
                let _ = tx.send(LibrarianChunk::Error { message: write_result["error"].to_string() });
                return;
            }
            let _ = tx.send(LibrarianChunk::Index { index_path });
        }

        tracing::info!(tenant, folder, files_organized = rows.len(), "librarian organise complete");
        let _ = tx.send(LibrarianChunk::OrganiseDone { files_organized: rows.len(), wikilinks_created });
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_across_content_ordering() {
        let a = vec![
            ("b.md".to_string(), "text b".to_string(), "vault".to_string()),
            ("a.md".to_string(), "text a".to_string(), "vault".to_string()),
        ];
        let b = vec![
            ("a.md".to_string(), "text a".to_string(), "vault".to_string()),
            ("b.md".to_string(), "text b".to_string(), "vault".to_string()),
        ];
        assert_eq!(cache_key("summarise", &a), cache_key("summarise", &b));
    }

    #[test]
    fn cache_key_changes_with_task() {
        let content = vec![("a.md".to_string(), "text".to_string(), "vault".to_string())];
        assert_ne!(cache_key("task one", &content), cache_key("task two", &content));
    }

    #[test]
    fn safe_slug_truncates_and_replaces_punctuation() {
        let slug = safe_slug("Summarise: Q3 Roadmap & Risks!!", 30);
        assert!(slug.len() <= 30);
        assert!(!slug.contains(':'));
        assert!(!slug.contains('&'));
    }

    #[test]
    fn dominant_source_type_is_mixed_when_tied() {
        assert_eq!(dominant_source_type(&["vault", "code"]), "mixed");
        assert_eq!(dominant_source_type(&["vault", "vault", "code"]), "vault");
    }

    #[test]
    fn cache_path_uses_primary_type_and_date() {
        let now = Utc::now();
        let path = cache_path("My Task", "abcdef0123456789", "vault", now);
        assert!(path.starts_with("oracle-cache/summaries/vault/"));
        assert!(path.ends_with("-abcdef0123456789.md"));
    }
}
