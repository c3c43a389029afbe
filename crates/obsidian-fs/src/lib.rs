//! Path validation, frontmatter parsing/serialisation, and title derivation
//! for vault notes. Pure functions, no I/O — filesystem operations live in
//! `vault-store`.

mod frontmatter;

pub use frontmatter::{
    parse_frontmatter, serialize_frontmatter, split_frontmatter, Frontmatter, ParsedNote,
};

use serde_json::Value as JsonValue;

/// Maximum relative path length in bytes.
pub const MAX_PATH_LEN: usize = 256;

/// Maximum note body size in bytes (UTF-8 encoded), 1 MiB.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Characters forbidden anywhere in a note path.
const FORBIDDEN_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// A frontmatter key reserved for the index's own optimistic-concurrency
/// counter; user-supplied metadata must never set it.
pub const RESERVED_KEY_VERSION: &str = "version";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path exceeds {MAX_PATH_LEN} characters")]
    TooLong,
    #[error("path must end in .md")]
    NotMarkdown,
    #[error("path contains '..'")]
    ContainsDotDot,
    #[error("path contains a backslash")]
    ContainsBackslash,
    #[error("path has a leading '/'")]
    LeadingSlash,
    #[error("path contains forbidden character '{0}'")]
    ForbiddenChar(char),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata key '{0}' is reserved and must not be set")]
    ReservedKey(String),
    #[error("'tags' must be a sequence of strings")]
    TagsNotStringSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("body is {actual} bytes, exceeding the {MAX_BODY_BYTES} byte limit")]
pub struct BodyTooLarge {
    pub actual: usize,
}

/// Validate a relative note path per the wire/disk format: relative,
/// forward-slash separated, `.md`-suffixed, ≤256 chars, no `..`, no
/// backslash, no leading `/`, none of `<>:"|?*`.
pub fn validate_path(path: &str) -> Result<(), PathError> {
    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong);
    }
    if path.starts_with('/') {
        return Err(PathError::LeadingSlash);
    }
    if path.contains('\\') {
        return Err(PathError::ContainsBackslash);
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(PathError::ContainsDotDot);
    }
    if let Some(c) = path.chars().find(|c| FORBIDDEN_PATH_CHARS.contains(c)) {
        return Err(PathError::ForbiddenChar(c));
    }
    if !path.ends_with(".md") {
        return Err(PathError::NotMarkdown);
    }
    Ok(())
}

/// Validate note metadata: `tags` (if present) must be a sequence of
/// strings, and `version` must never appear (it's owned by the index).
pub fn validate_metadata(metadata: &Frontmatter) -> Result<(), MetadataError> {
    if metadata.contains_key(RESERVED_KEY_VERSION) {
        return Err(MetadataError::ReservedKey(RESERVED_KEY_VERSION.to_string()));
    }
    if let Some(tags) = metadata.get("tags") {
        let ok = match tags {
            JsonValue::Array(items) => items.iter().all(|v| v.is_string()),
            _ => false,
        };
        if !ok {
            return Err(MetadataError::TagsNotStringSequence);
        }
    }
    Ok(())
}

/// Validate note body size (UTF-8 byte length ≤ 1 MiB).
pub fn validate_body(body: &str) -> Result<(), BodyTooLarge> {
    let len = body.len();
    if len > MAX_BODY_BYTES {
        return Err(BodyTooLarge { actual: len });
    }
    Ok(())
}

/// Derive a note's title: frontmatter `title` → first Markdown H1 → filename
/// stem with `-`/`_` replaced by spaces.
pub fn derive_title(path: &str, metadata: Option<&Frontmatter>, body: &str) -> String {
    if let Some(meta) = metadata {
        if let Some(JsonValue::String(title)) = meta.get("title") {
            if !title.trim().is_empty() {
                return title.clone();
            }
        }
    }

    if let Some(h1) = first_h1(body) {
        return h1;
    }

    title_from_filename(path)
}

fn first_h1(body: &str) -> Option<String> {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            let title = rest.trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        } else if trimmed == "#" {
            continue;
        }
    }
    None
}

fn title_from_filename(path: &str) -> String {
    let stem = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .strip_suffix(".md")
        .unwrap_or(path);
    stem.chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect()
}

/// A normalized note reference: a `memory:`/`[[...]]`-stripped, `.md`-stripped
/// path plus its last path segment (the bare note name).
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRef {
    pub path: String,
    pub name: String,
}

/// Normalize a note reference accepted from a tool call or URL, stripping an
/// optional `memory:` scheme, `[[wiki link]]` brackets, and a `.md` suffix.
pub fn normalize_note_reference(note_ref: &str) -> NoteRef {
    let mut normalized = note_ref.trim();

    if normalized.starts_with("[[") && normalized.ends_with("]]") {
        normalized = &normalized[2..normalized.len() - 2];
    }
    if let Some(stripped) = normalized.strip_prefix("memory:") {
        normalized = stripped;
    }
    let path = normalized.strip_suffix(".md").unwrap_or(normalized);
    let name = path.rsplit('/').next().unwrap_or(path).to_string();

    NoteRef {
        path: path.to_string(),
        name,
    }
}

/// Ensure a note reference carries the `.md` extension.
pub fn ensure_markdown_extension(note_path: &str) -> String {
    if note_path.ends_with(".md") {
        note_path.to_string()
    } else {
        format!("{note_path}.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_path_accepts_normal_path() {
        assert!(validate_path("knowledge/Note.md").is_ok());
    }

    #[test]
    fn validate_path_rejects_missing_extension() {
        assert_eq!(validate_path("knowledge/Note"), Err(PathError::NotMarkdown));
    }

    #[test]
    fn validate_path_rejects_dot_dot() {
        assert_eq!(
            validate_path("../secret.md"),
            Err(PathError::ContainsDotDot)
        );
    }

    #[test]
    fn validate_path_rejects_leading_slash() {
        assert_eq!(
            validate_path("/knowledge/Note.md"),
            Err(PathError::LeadingSlash)
        );
    }

    #[test]
    fn validate_path_rejects_backslash() {
        assert_eq!(
            validate_path("knowledge\\Note.md"),
            Err(PathError::ContainsBackslash)
        );
    }

    #[test]
    fn validate_path_rejects_forbidden_chars() {
        assert_eq!(
            validate_path("note<1>.md"),
            Err(PathError::ForbiddenChar('<'))
        );
    }

    #[test]
    fn validate_path_rejects_too_long() {
        let long = format!("{}.md", "a".repeat(MAX_PATH_LEN));
        assert_eq!(validate_path(&long), Err(PathError::TooLong));
    }

    #[test]
    fn validate_metadata_rejects_version_key() {
        let mut meta = Frontmatter::new();
        meta.insert("version".to_string(), JsonValue::from(1));
        assert_eq!(
            validate_metadata(&meta),
            Err(MetadataError::ReservedKey("version".to_string()))
        );
    }

    #[test]
    fn validate_metadata_rejects_non_string_tags() {
        let mut meta = Frontmatter::new();
        meta.insert("tags".to_string(), JsonValue::from(vec![1, 2]));
        assert_eq!(
            validate_metadata(&meta),
            Err(MetadataError::TagsNotStringSequence)
        );
    }

    #[test]
    fn validate_metadata_accepts_string_tags() {
        let mut meta = Frontmatter::new();
        meta.insert(
            "tags".to_string(),
            JsonValue::from(vec!["a".to_string(), "b".to_string()]),
        );
        assert!(validate_metadata(&meta).is_ok());
    }

    #[test]
    fn validate_body_rejects_oversized() {
        let body = "a".repeat(MAX_BODY_BYTES + 1);
        assert!(validate_body(&body).is_err());
    }

    #[test]
    fn derive_title_prefers_frontmatter() {
        let mut meta = Frontmatter::new();
        meta.insert(
            "title".to_string(),
            JsonValue::String("From Frontmatter".to_string()),
        );
        assert_eq!(
            derive_title("a/b.md", Some(&meta), "# Heading\nbody"),
            "From Frontmatter"
        );
    }

    #[test]
    fn derive_title_falls_back_to_h1() {
        assert_eq!(
            derive_title("a/b.md", None, "intro\n# My Heading\nmore"),
            "My Heading"
        );
    }

    #[test]
    fn derive_title_falls_back_to_filename() {
        assert_eq!(derive_title("a/my-note_name.md", None, "no heading here"), "my note name");
    }

    #[test]
    fn derive_title_from_filename_root() {
        assert_eq!(derive_title("b.md", None, ""), "b");
    }

    #[test]
    fn normalize_strips_memory_prefix() {
        let result = normalize_note_reference("memory:knowledge/Note");
        assert_eq!(result.path, "knowledge/Note");
        assert_eq!(result.name, "Note");
    }

    #[test]
    fn normalize_strips_wiki_link_brackets() {
        let result = normalize_note_reference("[[knowledge/Note]]");
        assert_eq!(result.path, "knowledge/Note");
    }

    #[test]
    fn ensure_adds_md_extension() {
        assert_eq!(ensure_markdown_extension("knowledge/Note"), "knowledge/Note.md");
    }

    #[test]
    fn ensure_keeps_existing_md_extension() {
        assert_eq!(ensure_markdown_extension("knowledge/Note.md"), "knowledge/Note.md");
    }
}
