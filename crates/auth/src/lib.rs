//! Bearer-token issuance and verification (C7).
//!
//! Tokens are opaque to callers: a deployment may accept a real HS256 JWT, or
//! — development only — one of two static strings that map straight to a
//! fixed tenant. Grounded on the `AuthService` class this crate's Python
//! counterpart implements (`_is_development`, `_require_secret`, and the
//! explicit "hardcoded secret never validates in production" check inside
//! token verification), adapted onto `jsonwebtoken`.

mod config;

pub use config::Config;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,
    #[error("malformed Authorization header")]
    MalformedHeader,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    TokenInvalid,
    #[error("signing secret is not configured")]
    SecretNotConfigured,
}

impl AuthError {
    /// The stable slug surfaced in the unauthorised response body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "missing_header",
            AuthError::MalformedHeader => "malformed_header",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "token_invalid",
            AuthError::SecretNotConfigured => "secret_not_configured",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct AuthService {
    config: Config,
    algorithm: jsonwebtoken::Algorithm,
}

impl AuthService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            algorithm: jsonwebtoken::Algorithm::HS256,
        }
    }

    /// Development is explicitly enabled only when `ENVIRONMENT` says so and
    /// the deployment hasn't been handed a real secret; any other state is
    /// treated as production for the purposes of the dev bypasses below.
    fn is_development(&self) -> bool {
        if self.config.is_production() {
            return false;
        }
        matches!(self.config.environment.to_lowercase().as_str(), "development" | "dev")
    }

    /// The signing secret to use, or `SecretNotConfigured`. Only ever
    /// returns the hardcoded fallback when every development gate is open;
    /// production deployments must set `jwt_secret_key` explicitly.
    fn require_secret(&self) -> Result<String, AuthError> {
        if let Some(secret) = &self.config.jwt_secret_key {
            return Ok(secret.clone());
        }
        if self.is_development() && self.config.enable_local_mode && self.config.local_dev_token.is_some() {
            return Ok(Config::LOCAL_DEV_SECRET.to_string());
        }
        Err(AuthError::SecretNotConfigured)
    }

    /// Issue a signed token for `tenant`, valid for `ttl` (defaulting to the
    /// configured lifetime).
    pub fn issue(&self, tenant: &str, ttl: Option<Duration>) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let lifetime = ttl.unwrap_or_else(|| Duration::days(self.config.token_ttl_days));
        let expires_at = now + lifetime;
        let claims = Claims {
            sub: tenant.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let secret = self.require_secret()?;
        let token = encode(
            &Header::new(self.algorithm),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|_| AuthError::TokenInvalid)?;
        tracing::info!(tenant, expires_at = %expires_at, "issued bearer token");
        Ok((token, expires_at))
    }

    /// Verify a bare token string (no `Bearer ` prefix) and return its tenant.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();

        if self.is_development() && self.config.enable_local_mode {
            if let Some(dev_token) = &self.config.local_dev_token {
                if token == dev_token {
                    return Ok("local-dev".to_string());
                }
            }
            if let Some(demo_token) = &self.config.demo_token {
                if token == demo_token {
                    return Ok(self.config.demo_tenant.clone());
                }
            }
        }

        let secret = self.require_secret()?;

        // Never accept a JWT signed with the hardcoded secret outside
        // development, even if require_secret() would have returned it.
        if !self.is_development() && secret == Config::LOCAL_DEV_SECRET {
            return Err(AuthError::TokenInvalid);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map_err(
            |e| {
                let err = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    _ => AuthError::TokenInvalid,
                };
                tracing::warn!(code = err.code(), "token verification failed");
                err
            },
        )?;

        Ok(data.claims.sub)
    }

    /// Extract and verify the bearer token from a raw `Authorization` header
    /// value (e.g. `"Bearer abc123"`).
    pub fn verify_header(&self, header: Option<&str>) -> Result<String, AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::MalformedHeader)?;
        if token.trim().is_empty() {
            return Err(AuthError::MalformedHeader);
        }
        self.verify(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_service() -> AuthService {
        AuthService::new(Config::default())
    }

    fn prod_service(secret: &str) -> AuthService {
        AuthService::new(Config {
            environment: "production".to_string(),
            jwt_secret_key: Some(secret.to_string()),
            enable_local_mode: false,
            local_dev_token: None,
            demo_token: None,
            demo_tenant: "demo".to_string(),
            token_ttl_days: 90,
        })
    }

    #[test]
    fn issue_then_verify_round_trips_tenant() {
        let service = prod_service("super-secret");
        let (token, _) = service.issue("acme", None).unwrap();
        assert_eq!(service.verify(&token).unwrap(), "acme");
    }

    #[test]
    fn dev_static_token_maps_to_local_dev_tenant() {
        let service = dev_service();
        let tenant = service.verify("local-dev-token").unwrap();
        assert_eq!(tenant, "local-dev");
    }

    #[test]
    fn dev_bypass_is_rejected_in_production() {
        let mut config = Config::default();
        config.environment = "production".to_string();
        config.jwt_secret_key = Some("prod-secret".to_string());
        let service = AuthService::new(config);
        let err = service.verify("local-dev-token").unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[test]
    fn production_without_secret_fails_closed() {
        let mut config = Config::default();
        config.environment = "production".to_string();
        config.jwt_secret_key = None;
        config.enable_local_mode = false;
        let service = AuthService::new(config);
        let err = service.verify("anything").unwrap_err();
        assert!(matches!(err, AuthError::SecretNotConfigured));
    }

    #[test]
    fn hardcoded_secret_never_validates_in_production_even_if_configured() {
        // Pathological case: a production deployment whose JWT_SECRET_KEY
        // was accidentally set to the dev constant. Tokens signed with it
        // must still be rejected.
        let service = prod_service(Config::LOCAL_DEV_SECRET);
        let dev = AuthService::new(Config::default());
        let (token, _) = dev.issue("acme", None).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let service = prod_service("super-secret");
        let (token, _) = service.issue("acme", Some(Duration::seconds(-10))).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn verify_header_requires_bearer_prefix() {
        let service = prod_service("super-secret");
        let (token, _) = service.issue("acme", None).unwrap();
        let header = format!("Bearer {token}");
        assert_eq!(service.verify_header(Some(&header)).unwrap(), "acme");
        assert!(matches!(service.verify_header(Some(&token)), Err(AuthError::MalformedHeader)));
        assert!(matches!(service.verify_header(None), Err(AuthError::MissingHeader)));
    }

    #[test]
    fn demo_token_maps_to_configured_demo_tenant() {
        let mut config = Config::default();
        config.demo_token = Some("demo-secret-token".to_string());
        config.demo_tenant = "demo".to_string();
        let service = AuthService::new(config);
        assert_eq!(service.verify("demo-secret-token").unwrap(), "demo");
    }
}
