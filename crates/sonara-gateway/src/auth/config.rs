//! Authentication configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default sliding session window in minutes.
const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 30;
/// Default `iss` claim.
const DEFAULT_ISSUER: &str = "sonara";

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT secret (hex-encoded). Loaded from or generated into the store if not set.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Lifetime of each issued token. Every authenticated request extends it.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u64,

    /// Issuer written to and required in every token.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Server version reported in login responses.
    #[serde(default = "default_version")]
    pub server_version: String,
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MINUTES
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            session_timeout_minutes: default_session_timeout(),
            issuer: default_issuer(),
            server_version: default_version(),
        }
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Get the session timeout as Duration.
    ///
    /// Saturates instead of overflowing on absurd minute counts.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes.saturating_mul(60))
    }

    /// Load config from environment variables (overrides).
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("SONARA_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }

        if let Some(minutes) = std::env::var("SONARA_SESSION_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.session_timeout_minutes = minutes;
        }

        if let Ok(version) = std::env::var("SONARA_VERSION") {
            self.server_version = version;
        }

        self
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the JWT secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    /// Set the session timeout in minutes.
    #[must_use]
    pub fn session_timeout_minutes(mut self, minutes: u64) -> Self {
        self.config.session_timeout_minutes = minutes;
        self
    }

    /// Set the token issuer.
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = issuer.into();
        self
    }

    /// Set the reported server version.
    #[must_use]
    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.session_timeout_minutes, 30);
        assert_eq!(config.issuer, "sonara");
        assert_eq!(config.server_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_builder() {
        let config = AuthConfig::builder()
            .session_timeout_minutes(5)
            .issuer("test")
            .server_version("1.2.3")
            .build();

        assert_eq!(config.session_timeout(), Duration::from_secs(300));
        assert_eq!(config.issuer, "test");
        assert_eq!(config.server_version, "1.2.3");
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = AuthConfig::builder()
            .session_timeout_minutes(u64::MAX / 2)
            .build();

        assert_eq!(config.session_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AuthConfig = serde_json::from_str(r#"{"session_timeout_minutes": 60}"#).unwrap();
        assert_eq!(config.session_timeout_minutes, 60);
        assert_eq!(config.issuer, "sonara");
    }
}
