//! Parses the `<function_calls>` XML fallback models emit when they don't
//! honour native tool-calling, strips those blocks out of the visible
//! content, and converts `<parameter>` values into JSON.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use crate::llm::ToolCallRequest;

fn function_calls_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<function_calls>(.*?)</function_calls>").unwrap())
}

fn invoke_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)<invoke name="([^"]+)">(.*?)</invoke>"#).unwrap())
}

fn parameter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)<parameter name="([^"]+)">(.*?)</parameter>"#).unwrap())
}

/// `"true"`/`"false"` become booleans, pure-integer strings become integers,
/// anything else that parses as JSON becomes that JSON value, else a string.
fn coerce_value(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        _ => {}
    }
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '-') {
        if let Ok(n) = trimmed.parse::<i64>() {
            return JsonValue::Number(n.into());
        }
    }
    if let Ok(parsed) = serde_json::from_str::<JsonValue>(trimmed) {
        return parsed;
    }
    JsonValue::String(trimmed.to_string())
}

/// Extract every `<invoke>` call from `text`, returning the remaining
/// content with the `<function_calls>...</function_calls>` blocks removed.
pub fn extract_xml_tool_calls(text: &str) -> (String, Vec<ToolCallRequest>) {
    let mut calls = Vec::new();
    let mut counter = 0usize;

    for block in function_calls_re().captures_iter(text) {
        let body = &block[1];
        for invoke in invoke_re().captures_iter(body) {
            let name = invoke[1].to_string();
            let params_body = &invoke[2];
            let mut arguments = serde_json::Map::new();
            for param in parameter_re().captures_iter(params_body) {
                arguments.insert(param[1].to_string(), coerce_value(&param[2]));
            }
            calls.push(ToolCallRequest {
                id: format!("xml_call_{counter}"),
                name,
                arguments: JsonValue::Object(arguments),
            });
            counter += 1;
        }
    }

    let stripped = function_calls_re().replace_all(text, "").to_string();
    (stripped, calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_invoke_with_typed_parameters() {
        let text = r#"Let me check that.
<function_calls>
<invoke name="vault_read">
<parameter name="path">notes/a.md</parameter>
<parameter name="include_metadata">true</parameter>
<parameter name="limit">5</parameter>
</invoke>
</function_calls>
Done."#;
        let (stripped, calls) = extract_xml_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "vault_read");
        assert_eq!(calls[0].arguments["path"], JsonValue::String("notes/a.md".to_string()));
        assert_eq!(calls[0].arguments["include_metadata"], JsonValue::Bool(true));
        assert_eq!(calls[0].arguments["limit"], JsonValue::Number(5.into()));
        assert!(!stripped.contains("function_calls"));
        assert!(stripped.contains("Let me check that."));
        assert!(stripped.contains("Done."));
    }

    #[test]
    fn extracts_multiple_invokes_in_one_block() {
        let text = r#"<function_calls>
<invoke name="vault_list"><parameter name="folder">notes</parameter></invoke>
<invoke name="vault_search"><parameter name="q">rust</parameter></invoke>
</function_calls>"#;
        let (_, calls) = extract_xml_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "xml_call_0");
        assert_eq!(calls[1].id, "xml_call_1");
    }

    #[test]
    fn plain_text_without_invokes_is_untouched() {
        let (stripped, calls) = extract_xml_tool_calls("just a normal answer");
        assert!(calls.is_empty());
        assert_eq!(stripped, "just a normal answer");
    }

    #[test]
    fn parameter_value_that_is_json_parses_as_json() {
        let text = r#"<function_calls><invoke name="t"><parameter name="arr">[1,2,3]</parameter></invoke></function_calls>"#;
        let (_, calls) = extract_xml_tool_calls(text);
        assert_eq!(calls[0].arguments["arr"], serde_json::json!([1, 2, 3]));
    }
}
