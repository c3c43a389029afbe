//! Server-wide configuration, loaded from environment variables with typed
//! defaults — the same `#[serde(default = "fn")]` shape the auth crate's
//! own config uses, just without a config-file layer (nothing here needs
//! to be hand-edited on disk).

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory containing one subdirectory per tenant vault.
    pub vault_base_dir: PathBuf,
    /// Path to the embedded SQL+FTS index database file.
    pub index_db_path: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_default_model: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            vault_base_dir: PathBuf::from(env_or("VAULT_BASE_DIR", "./data/vaults")),
            index_db_path: PathBuf::from(env_or("INDEX_DB_PATH", "./data/index.sqlite3")),
            bind_addr: env_or("BIND_ADDR", "127.0.0.1"),
            port: env_or("PORT", "4000").parse().unwrap_or(4000),
            llm_base_url: env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: std::env::var("LLM_API_KEY").ok(),
            llm_default_model: env_or("LLM_DEFAULT_MODEL", "gpt-4o-mini"),
        }
    }
}
