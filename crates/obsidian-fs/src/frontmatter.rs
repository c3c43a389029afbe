//! YAML frontmatter parsing and serialisation for vault notes.
//!
//! ```markdown
//! ---
//! title: My Note
//! tags: [rust, wasm]
//! ---
//!
//! Note content here...
//! ```

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Parsed frontmatter as a map of string keys to JSON values, ordered by key
/// so that serialisation is deterministic.
pub type Frontmatter = BTreeMap<String, JsonValue>;

/// A parsed note with frontmatter separated from content.
///
/// The `content` field borrows from `raw` to avoid unnecessary allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote<'a> {
    /// The frontmatter key-value pairs, if present
    pub frontmatter: Option<Frontmatter>,
    /// The note content after the frontmatter (borrows from raw)
    pub content: &'a str,
    /// The raw file content (frontmatter + content)
    pub raw: &'a str,
}

/// Split a note into frontmatter YAML string and content, without parsing the YAML.
///
/// Returns (frontmatter_yaml, content) where frontmatter_yaml is None if
/// no valid frontmatter block was found.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    if !raw.starts_with("---") {
        return (None, raw);
    }

    let after_opening = &raw[3..];

    let content_start = if after_opening.starts_with('\n') {
        &after_opening[1..]
    } else if after_opening.starts_with("\r\n") {
        &after_opening[2..]
    } else {
        return (None, raw);
    };

    if let Some(close_pos) = find_closing_delimiter(content_start) {
        let yaml = &content_start[..close_pos];
        let after_close = &content_start[close_pos + 3..];

        let content = if after_close.starts_with('\n') {
            &after_close[1..]
        } else if after_close.starts_with("\r\n") {
            &after_close[2..]
        } else {
            after_close
        };

        (Some(yaml), content)
    } else {
        (None, raw)
    }
}

/// Find the position of the closing --- delimiter (must be at start of line)
fn find_closing_delimiter(s: &str) -> Option<usize> {
    let mut pos = 0;
    for line in s.lines() {
        if line == "---" || line == "---\r" {
            return Some(pos);
        }
        pos += line.len() + 1;
    }
    None
}

/// Parse a note's raw content into frontmatter and content.
pub fn parse_frontmatter(raw: &str) -> ParsedNote<'_> {
    let (yaml_str, content) = split_frontmatter(raw);

    let frontmatter = yaml_str.and_then(|yaml| {
        serde_yaml::from_str::<serde_yaml::Value>(yaml)
            .ok()
            .and_then(yaml_to_json_map)
    });

    ParsedNote {
        frontmatter,
        content,
        raw,
    }
}

/// Serialise frontmatter + body back into a note's raw bytes.
///
/// Emits a `---`-delimited YAML block when `metadata` is non-empty; omits it
/// (returning `body` verbatim) otherwise. `body` is preserved byte-for-byte
/// after the closing delimiter.
pub fn serialize_frontmatter(metadata: &Frontmatter, body: &str) -> String {
    if metadata.is_empty() {
        return body.to_string();
    }

    let mapping: serde_yaml::Mapping = metadata
        .iter()
        .map(|(k, v)| (serde_yaml::Value::String(k.clone()), json_to_yaml(v.clone())))
        .collect();
    let yaml = serde_yaml::to_string(&serde_yaml::Value::Mapping(mapping))
        .unwrap_or_default();

    format!("---\n{yaml}---\n{body}")
}

fn yaml_to_json_map(yaml: serde_yaml::Value) -> Option<Frontmatter> {
    match yaml {
        serde_yaml::Value::Mapping(map) => {
            let mut result = Frontmatter::new();
            for (k, v) in map {
                if let serde_yaml::Value::String(key) = k {
                    result.insert(key, yaml_to_json(v));
                }
            }
            if result.is_empty() {
                None
            } else {
                Some(result)
            }
        }
        _ => None,
    }
}

fn yaml_to_json(yaml: serde_yaml::Value) -> JsonValue {
    match yaml {
        serde_yaml::Value::Null => JsonValue::Null,
        serde_yaml::Value::Bool(b) => JsonValue::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            } else {
                JsonValue::Null
            }
        }
        serde_yaml::Value::String(s) => JsonValue::String(s),
        serde_yaml::Value::Sequence(seq) => {
            JsonValue::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(map) => {
            let obj: serde_json::Map<String, JsonValue> = map
                .into_iter()
                .filter_map(|(k, v)| {
                    if let serde_yaml::Value::String(key) = k {
                        Some((key, yaml_to_json(v)))
                    } else {
                        None
                    }
                })
                .collect();
            JsonValue::Object(obj)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn json_to_yaml(json: JsonValue) -> serde_yaml::Value {
    match json {
        JsonValue::Null => serde_yaml::Value::Null,
        JsonValue::Bool(b) => serde_yaml::Value::Bool(b),
        JsonValue::Number(n) => serde_yaml::Value::Number(
            n.as_i64()
                .map(serde_yaml::Number::from)
                .or_else(|| n.as_f64().map(serde_yaml::Number::from))
                .unwrap_or_else(|| serde_yaml::Number::from(0)),
        ),
        JsonValue::String(s) => serde_yaml::Value::String(s),
        JsonValue::Array(arr) => {
            serde_yaml::Value::Sequence(arr.into_iter().map(json_to_yaml).collect())
        }
        JsonValue::Object(obj) => {
            let mapping: serde_yaml::Mapping = obj
                .into_iter()
                .map(|(k, v)| (serde_yaml::Value::String(k), json_to_yaml(v)))
                .collect();
            serde_yaml::Value::Mapping(mapping)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_note_with_frontmatter() {
        let raw = "---\ntitle: Test\n---\n\nContent here";
        let (yaml, content) = split_frontmatter(raw);
        assert_eq!(yaml, Some("title: Test\n"));
        assert_eq!(content, "\nContent here");
    }

    #[test]
    fn split_note_without_frontmatter() {
        let raw = "Just content, no frontmatter";
        let (yaml, content) = split_frontmatter(raw);
        assert!(yaml.is_none());
        assert_eq!(content, raw);
    }

    #[test]
    fn split_note_with_incomplete_frontmatter() {
        let raw = "---\ntitle: Test\nNo closing delimiter";
        let (yaml, content) = split_frontmatter(raw);
        assert!(yaml.is_none());
        assert_eq!(content, raw);
    }

    #[test]
    fn parse_simple_frontmatter() {
        let raw = "---\ntitle: My Note\ntags:\n  - rust\n  - wasm\n---\n\nNote content";
        let parsed = parse_frontmatter(raw);

        let fm = parsed.frontmatter.unwrap();
        assert_eq!(
            fm.get("title"),
            Some(&JsonValue::String("My Note".to_string()))
        );

        let tags = fm.get("tags").unwrap();
        assert!(tags.is_array());
        assert_eq!(tags.as_array().unwrap().len(), 2);

        assert_eq!(parsed.content, "\nNote content");
    }

    #[test]
    fn parse_frontmatter_with_booleans() {
        let raw = "---\ndraft: true\npublished: false\n---\nContent";
        let parsed = parse_frontmatter(raw);

        let fm = parsed.frontmatter.unwrap();
        assert_eq!(fm.get("draft"), Some(&JsonValue::Bool(true)));
        assert_eq!(fm.get("published"), Some(&JsonValue::Bool(false)));
    }

    #[test]
    fn parse_frontmatter_with_nested_objects() {
        let raw = "---\nauthor:\n  name: Alice\n  email: alice@example.com\n---\nContent";
        let parsed = parse_frontmatter(raw);

        let fm = parsed.frontmatter.unwrap();
        let author = fm.get("author").unwrap();
        assert!(author.is_object());
        assert_eq!(
            author.get("name"),
            Some(&JsonValue::String("Alice".to_string()))
        );
    }

    #[test]
    fn parse_empty_frontmatter() {
        let raw = "---\n---\nContent";
        let parsed = parse_frontmatter(raw);

        assert!(parsed.frontmatter.is_none());
        assert_eq!(parsed.content, "Content");
    }

    #[test]
    fn parse_no_frontmatter() {
        let raw = "Just regular content";
        let parsed = parse_frontmatter(raw);

        assert!(parsed.frontmatter.is_none());
        assert_eq!(parsed.content, "Just regular content");
    }

    #[test]
    fn preserves_raw_content() {
        let raw = "---\ntitle: Test\n---\nContent";
        let parsed = parse_frontmatter(raw);
        assert_eq!(parsed.raw, raw);
    }

    #[test]
    fn serialize_round_trips_through_parse() {
        let mut meta = Frontmatter::new();
        meta.insert("title".to_string(), JsonValue::String("Hi".to_string()));
        meta.insert(
            "tags".to_string(),
            JsonValue::Array(vec![JsonValue::String("a".to_string())]),
        );
        let raw = serialize_frontmatter(&meta, "body text\n");
        let parsed = parse_frontmatter(&raw);
        assert_eq!(parsed.frontmatter.unwrap(), meta);
        assert_eq!(parsed.content, "body text\n");
    }

    #[test]
    fn serialize_with_empty_metadata_omits_delimiters() {
        let meta = Frontmatter::new();
        let raw = serialize_frontmatter(&meta, "just body");
        assert_eq!(raw, "just body");
    }
}
