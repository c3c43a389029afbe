//! Configuration for bearer-token issuance and verification.

use serde::{Deserialize, Serialize};

/// Source of truth for how this deployment authenticates requests.
///
/// Fields map directly onto environment variables at the call site
/// (`vault-server`'s own config loader owns env parsing); this struct only
/// holds the resolved values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `"production"`/`"prod"` disables every development bypass outright.
    pub environment: String,

    /// HS256 signing secret. Required in production; optional in
    /// development, where [`Config::local_dev_secret`] may stand in for it.
    pub jwt_secret_key: Option<String>,

    /// Enables the dev-mode static token bypass below.
    #[serde(default)]
    pub enable_local_mode: bool,

    /// A literal token string that, compared verbatim, authenticates as
    /// `local-dev` without touching the JWT machinery at all. Never
    /// consulted outside development.
    pub local_dev_token: Option<String>,

    /// A second static token mapping to a fixed demo tenant, for
    /// service-to-service integrations (e.g. a ChatGPT connector) that
    /// can't hold a per-user secret. Also gated to development.
    pub demo_token: Option<String>,
    pub demo_tenant: String,

    /// Default access-token lifetime when the caller doesn't specify one.
    #[serde(default = "default_ttl_days")]
    pub token_ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            jwt_secret_key: None,
            enable_local_mode: true,
            local_dev_token: Some("local-dev-token".to_string()),
            demo_token: None,
            demo_tenant: "demo".to_string(),
            token_ttl_days: default_ttl_days(),
        }
    }
}

impl Config {
    /// The hardcoded fallback secret used only when every development gate
    /// below is open. Never returned in production; see
    /// [`crate::AuthService::require_secret`].
    pub const LOCAL_DEV_SECRET: &'static str = "local-dev-secret-key-123";

    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(env) = std::env::var("ENVIRONMENT") {
            config.environment = env;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            config.jwt_secret_key = Some(secret);
        }
        if let Ok(token) = std::env::var("LOCAL_DEV_TOKEN") {
            config.local_dev_token = Some(token);
        }
        if let Ok(token) = std::env::var("DEMO_TOKEN") {
            config.demo_token = Some(token);
        }
        if let Ok(flag) = std::env::var("ENABLE_LOCAL_MODE") {
            config.enable_local_mode = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        config
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }
}
