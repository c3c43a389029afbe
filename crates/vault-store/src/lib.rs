//! Per-tenant filesystem persistence for vault notes: read, write, delete,
//! move and list Markdown files under `<base>/<tenant>/…`.
//!
//! `created`/`updated` timestamps are a collaboration with the index
//! (`vault-index`): this crate always stamps `updated = now()` and reports
//! whether the target file already existed; the indexer is the one that
//! preserves `created` across rewrites, because `note_metadata` is where
//! that field actually lives (see DESIGN.md).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use obsidian_fs::{derive_title, validate_body, validate_metadata, validate_path, Frontmatter};
use rand::Rng;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum VaultStoreError {
    #[error("note not found: {0}")]
    NotFound(String),
    #[error("note already exists: {0}")]
    Exists(String),
    #[error("invalid path '{0}': {1}")]
    PathInvalid(String, String),
    #[error("path escapes tenant root: {0}")]
    PathEscape(String),
    #[error("invalid metadata: {0}")]
    MetadataInvalid(String),
    #[error("body too large: {0}")]
    BodyTooLarge(String),
    #[error("parent directory does not exist for '{uri}': {parent}")]
    ParentNotFound { uri: String, parent: PathBuf },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A note as stored on disk, with the vault-store's view of its timestamps.
/// `created` is only authoritative when the write that produced this value
/// reports `existed = false`; otherwise the index's stored `created` wins.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub path: String,
    pub title: String,
    pub metadata: Frontmatter,
    pub body: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoteListEntry {
    pub path: String,
    pub title: String,
    pub last_modified: DateTime<Utc>,
}

pub struct VaultStore {
    base: PathBuf,
}

impl VaultStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    fn tenant_root(&self, tenant: &str) -> PathBuf {
        self.base.join(tenant)
    }

    /// Idempotently create the tenant's vault directory.
    pub async fn initialise(&self, tenant: &str) -> Result<(), VaultStoreError> {
        fs::create_dir_all(self.tenant_root(tenant)).await?;
        Ok(())
    }

    /// Validate a path and resolve it to a filesystem location inside the
    /// tenant root, rejecting anything that would (after resolving through
    /// the nearest existing ancestor) escape it.
    fn resolve_checked(&self, tenant: &str, path: &str) -> Result<PathBuf, VaultStoreError> {
        validate_path(path)
            .map_err(|e| VaultStoreError::PathInvalid(path.to_string(), e.to_string()))?;

        let tenant_root = self.tenant_root(tenant);
        let joined = tenant_root.join(path);

        let canonical_root = tenant_root.canonicalize().unwrap_or(tenant_root.clone());

        let mut probe = joined.clone();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }
        let canonical_probe = probe.canonicalize().unwrap_or(probe);
        if !canonical_probe.starts_with(&canonical_root) {
            return Err(VaultStoreError::PathEscape(path.to_string()));
        }

        Ok(joined)
    }

    /// Validate a folder argument (no `..`, no backslash) without requiring
    /// a `.md` suffix, and resolve it inside the tenant root.
    fn resolve_folder(&self, tenant: &str, folder: &str) -> Result<PathBuf, VaultStoreError> {
        if folder.contains("..") || folder.contains('\\') {
            return Err(VaultStoreError::PathInvalid(
                folder.to_string(),
                "folder must not contain '..' or backslash".to_string(),
            ));
        }
        let tenant_root = self.tenant_root(tenant);
        let joined = if folder.is_empty() {
            tenant_root.clone()
        } else {
            tenant_root.join(folder)
        };
        let canonical_root = tenant_root.canonicalize().unwrap_or(tenant_root.clone());
        let mut probe = joined.clone();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }
        let canonical_probe = probe.canonicalize().unwrap_or(probe);
        if !canonical_probe.starts_with(&canonical_root) {
            return Err(VaultStoreError::PathEscape(folder.to_string()));
        }
        Ok(joined)
    }

    pub async fn read(&self, tenant: &str, path: &str) -> Result<Note, VaultStoreError> {
        let fs_path = self.resolve_checked(tenant, path)?;

        let raw = fs::read_to_string(&fs_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultStoreError::NotFound(path.to_string())
            } else {
                VaultStoreError::from(e)
            }
        })?;

        let parsed = obsidian_fs::parse_frontmatter(&raw);
        let metadata = parsed.frontmatter.clone().unwrap_or_default();
        let title = derive_title(path, parsed.frontmatter.as_ref(), parsed.content);
        let meta_fs = fs::metadata(&fs_path).await?;
        let modified: DateTime<Utc> = meta_fs
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Note {
            path: path.to_string(),
            title,
            metadata,
            body: parsed.content.to_string(),
            created: modified,
            updated: modified,
            size_bytes: raw.len(),
        })
    }

    /// Write (create or overwrite) a note. Returns the written `Note` plus
    /// whether the file already existed before this call.
    pub async fn write(
        &self,
        tenant: &str,
        path: &str,
        body: &str,
        metadata: Option<Frontmatter>,
        title_override: Option<&str>,
    ) -> Result<(Note, bool), VaultStoreError> {
        let fs_path = self.resolve_checked(tenant, path)?;

        let metadata = metadata.unwrap_or_default();
        validate_metadata(&metadata)
            .map_err(|e| VaultStoreError::MetadataInvalid(e.to_string()))?;
        validate_body(body).map_err(|e| VaultStoreError::BodyTooLarge(e.to_string()))?;

        let existed = fs_path.exists();

        if let Some(parent) = fs_path.parent() {
            if !parent.exists() {
                return Err(VaultStoreError::ParentNotFound {
                    uri: path.to_string(),
                    parent: parent.to_path_buf(),
                });
            }
        }

        let title = match title_override {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => derive_title(path, Some(&metadata), body),
        };

        let raw = obsidian_fs::serialize_frontmatter(&metadata, body);
        atomic_write(&fs_path, &raw).await?;

        let now = Utc::now();
        let note = Note {
            path: path.to_string(),
            title,
            metadata,
            body: body.to_string(),
            created: now,
            updated: now,
            size_bytes: raw.len(),
        };

        tracing::info!(tenant, path, existed, "vault write");
        Ok((note, existed))
    }

    pub async fn delete(&self, tenant: &str, path: &str) -> Result<(), VaultStoreError> {
        let fs_path = self.resolve_checked(tenant, path)?;
        fs::remove_file(&fs_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultStoreError::NotFound(path.to_string())
            } else {
                VaultStoreError::from(e)
            }
        })?;
        tracing::info!(tenant, path, "vault delete");
        Ok(())
    }

    pub async fn rename(
        &self,
        tenant: &str,
        old: &str,
        new: &str,
    ) -> Result<Note, VaultStoreError> {
        let old_fs = self.resolve_checked(tenant, old)?;
        let new_fs = self.resolve_checked(tenant, new)?;

        if !old_fs.exists() {
            return Err(VaultStoreError::NotFound(old.to_string()));
        }
        if new_fs.exists() {
            return Err(VaultStoreError::Exists(new.to_string()));
        }
        if let Some(parent) = new_fs.parent() {
            if !parent.exists() {
                return Err(VaultStoreError::ParentNotFound {
                    uri: new.to_string(),
                    parent: parent.to_path_buf(),
                });
            }
        }

        fs::rename(&old_fs, &new_fs).await?;
        tracing::info!(tenant, old, new, "vault move");
        self.read(tenant, new).await
    }

    pub async fn list(
        &self,
        tenant: &str,
        folder: Option<&str>,
    ) -> Result<Vec<NoteListEntry>, VaultStoreError> {
        let search_dir = self.resolve_folder(tenant, folder.unwrap_or(""))?;
        if !search_dir.exists() {
            return Ok(Vec::new());
        }

        let tenant_root = self.tenant_root(tenant);
        let mut entries = Vec::new();
        list_recursive(&tenant_root, &search_dir, &mut entries).await?;
        entries.sort_by(|a: &NoteListEntry, b: &NoteListEntry| {
            a.path.to_lowercase().cmp(&b.path.to_lowercase())
        });
        Ok(entries)
    }
}

async fn list_recursive(
    tenant_root: &Path,
    dir: &Path,
    out: &mut Vec<NoteListEntry>,
) -> Result<(), VaultStoreError> {
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            Box::pin(list_recursive(tenant_root, &path, out)).await?;
        } else if file_type.is_file() && name_str.ends_with(".md") {
            let rel = path
                .strip_prefix(tenant_root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let raw = fs::read_to_string(&path).await.unwrap_or_default();
            let parsed = obsidian_fs::parse_frontmatter(&raw);
            let title = derive_title(&rel, parsed.frontmatter.as_ref(), parsed.content);
            let meta = entry.metadata().await?;
            let modified: DateTime<Utc> = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push(NoteListEntry {
                path: rel,
                title,
                last_modified: modified,
            });
        }
    }
    Ok(())
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Atomic write via temp-file + rename within the same directory.
async fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
    let temp_path = path.with_extension(format!("{}.tmp", random_hex()));

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, VaultStore) {
        let dir = TempDir::new().unwrap();
        let store = VaultStore::new(dir.path().to_path_buf());
        store.initialise("acme").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_body() {
        let (_dir, store) = store().await;
        let (note, existed) = store
            .write("acme", "a/b.md", "Hello", None, None)
            .await
            .unwrap();
        assert!(!existed);
        assert_eq!(note.title, "B");

        let read_back = store.read("acme", "a/b.md").await.unwrap();
        assert_eq!(read_back.body, "Hello");
    }

    #[tokio::test]
    async fn write_reports_existed_on_overwrite() {
        let (_dir, store) = store().await;
        store.write("acme", "n.md", "v1", None, None).await.unwrap();
        let (_note, existed) = store
            .write("acme", "n.md", "v2", None, None)
            .await
            .unwrap();
        assert!(existed);
    }

    #[tokio::test]
    async fn write_rejects_metadata_with_version_key() {
        let (_dir, store) = store().await;
        let mut meta = Frontmatter::new();
        meta.insert("version".to_string(), serde_json::json!(1));
        let result = store.write("acme", "n.md", "body", Some(meta), None).await;
        assert!(matches!(result, Err(VaultStoreError::MetadataInvalid(_))));
    }

    #[tokio::test]
    async fn write_fails_if_parent_missing() {
        let (_dir, store) = store().await;
        let result = store
            .write("acme", "missing/parent.md", "body", None, None)
            .await;
        assert!(matches!(result, Err(VaultStoreError::ParentNotFound { .. })));
    }

    #[tokio::test]
    async fn read_missing_note_fails_not_found() {
        let (_dir, store) = store().await;
        let result = store.read("acme", "nope.md").await;
        assert!(matches!(result, Err(VaultStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (_dir, store) = store().await;
        store.write("acme", "n.md", "body", None, None).await.unwrap();
        store.delete("acme", "n.md").await.unwrap();
        let result = store.read("acme", "n.md").await;
        assert!(matches!(result, Err(VaultStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn rename_moves_note_and_fails_on_existing_target() {
        let (_dir, store) = store().await;
        store.write("acme", "old.md", "body", None, None).await.unwrap();
        store.write("acme", "taken.md", "x", None, None).await.unwrap();

        let result = store.rename("acme", "old.md", "taken.md").await;
        assert!(matches!(result, Err(VaultStoreError::Exists(_))));

        let moved = store.rename("acme", "old.md", "new.md").await.unwrap();
        assert_eq!(moved.body, "body");
    }

    #[tokio::test]
    async fn list_returns_sorted_lowercase_paths() {
        let (dir, store) = store().await;
        fs::create_dir(dir.path().join("acme/Sub")).await.unwrap();
        store.write("acme", "B.md", "x", None, None).await.unwrap();
        store.write("acme", "a.md", "x", None, None).await.unwrap();
        store.write("acme", "Sub/c.md", "x", None, None).await.unwrap();

        let listed = store.list("acme", None).await.unwrap();
        let paths: Vec<_> = listed.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec!["a.md", "B.md", "Sub/c.md"]);
    }

    #[tokio::test]
    async fn rejects_path_escaping_tenant_root() {
        let (_dir, store) = store().await;
        let result = store.read("acme", "../../etc/passwd.md").await;
        assert!(matches!(result, Err(VaultStoreError::PathInvalid(..))));
    }

    #[tokio::test]
    async fn tenant_isolation_keeps_vaults_separate() {
        let (_dir, store) = store().await;
        store.initialise("other").await.unwrap();
        store.write("acme", "n.md", "acme body", None, None).await.unwrap();

        let result = store.read("other", "n.md").await;
        assert!(matches!(result, Err(VaultStoreError::NotFound(_))));
    }
}
