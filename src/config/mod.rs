//! Client configuration.
//!
//! Provides unified configuration with:
//! - Defaults suitable for a local backend
//! - Environment loading (`WHOSEE_*` variables)
//! - JSON loading
//! - Validation of the secure (signed) variant

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::auth::token::{DEFAULT_SAFETY_MARGIN, DEFAULT_TOKEN_LIFETIME, ExpiryPolicy};
use crate::requester::{DEFAULT_REQUEST_TIMEOUT, RetryPolicy};

pub const DEFAULT_API_PORT: u16 = 8080;

pub const ENV_API_URL: &str = "WHOSEE_API_URL";
pub const ENV_API_PORT: &str = "WHOSEE_API_PORT";
pub const ENV_API_KEY: &str = "WHOSEE_API_KEY";
pub const ENV_API_SECRET: &str = "WHOSEE_API_SECRET";
pub const ENV_TIMEOUT_MS: &str = "WHOSEE_TIMEOUT_MS";
pub const ENV_SECURE: &str = "WHOSEE_SECURE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid api url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("secure mode requires an api secret")]
    MissingSecret,
    #[error("invalid json configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings consumed by [`crate::WhoseeClient`].
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Sign every request with HMAC and allow three attempts on 401.
    pub secure: bool,
    pub timeout_ms: u64,
    pub token_lifetime_ms: u64,
    pub token_safety_margin_ms: u64,
    /// Prefer the JWT `exp` claim over the fixed lifetime.
    pub use_jwt_expiry: bool,
    pub max_attempts: Option<u32>,
    pub user_agent: Option<String>,
    pub enable_metrics: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: format!("http://localhost:{DEFAULT_API_PORT}"),
            api_key: None,
            api_secret: None,
            secure: false,
            timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            token_lifetime_ms: DEFAULT_TOKEN_LIFETIME.as_millis() as u64,
            token_safety_margin_ms: DEFAULT_SAFETY_MARGIN.as_millis() as u64,
            use_jwt_expiry: false,
            max_attempts: None,
            user_agent: None,
            enable_metrics: true,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("secure", &self.secure)
            .field("timeout_ms", &self.timeout_ms)
            .field("token_lifetime_ms", &self.token_lifetime_ms)
            .field("token_safety_margin_ms", &self.token_safety_margin_ms)
            .field("use_jwt_expiry", &self.use_jwt_expiry)
            .field("max_attempts", &self.max_attempts)
            .field("enable_metrics", &self.enable_metrics)
            .finish()
    }
}

impl ClientConfig {
    /// Load from `WHOSEE_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = ClientConfig::default();

        if let Some(url) = get(ENV_API_URL) {
            config.api_url = url;
        } else if let Some(port) = get(ENV_API_PORT) {
            let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_API_PORT,
                value: port.clone(),
            })?;
            config.api_url = format!("http://localhost:{port}");
        }

        config.api_key = get(ENV_API_KEY);
        config.api_secret = get(ENV_API_SECRET);

        if let Some(timeout) = get(ENV_TIMEOUT_MS) {
            config.timeout_ms = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_TIMEOUT_MS,
                value: timeout.clone(),
            })?;
        }

        if let Some(secure) = get(ENV_SECURE) {
            config.secure = match secure.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_SECURE,
                        value: secure,
                    });
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        if self.secure && !self.has_secret() {
            return Err(ConfigError::MissingSecret);
        }
        // A token must outlive the margin or it is stale the moment it arrives.
        if self.token_lifetime_ms <= self.token_safety_margin_ms {
            return Err(ConfigError::InvalidValue {
                key: "token_lifetime_ms",
                value: format!(
                    "{} (must exceed token_safety_margin_ms {})",
                    self.token_lifetime_ms, self.token_safety_margin_ms
                ),
            });
        }
        Ok(())
    }

    pub fn has_secret(&self) -> bool {
        self.api_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let trimmed = self.api_url.trim();
        Url::parse(trimmed).map_err(|source| ConfigError::InvalidUrl {
            url: trimmed.to_string(),
            source,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        let lifetime = Duration::from_millis(self.token_lifetime_ms);
        if self.use_jwt_expiry {
            ExpiryPolicy::JwtClaim { fallback: lifetime }
        } else {
            ExpiryPolicy::Fixed(lifetime)
        }
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.token_safety_margin_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = if self.secure {
            RetryPolicy::secure()
        } else {
            RetryPolicy::standard()
        };
        match self.max_attempts {
            Some(attempts) => policy.with_max_attempts(attempts),
            None => policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_point_at_local_backend() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.expiry_policy(), ExpiryPolicy::Fixed(Duration::from_secs(30)));
        assert_eq!(config.retry_policy().max_attempts(), 2);
    }

    #[test]
    fn reads_environment_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_API_URL, " https://api.whosee.me "),
            (ENV_API_KEY, "key"),
            (ENV_API_SECRET, "secret"),
            (ENV_TIMEOUT_MS, "2500"),
            (ENV_SECURE, "true"),
        ]))
        .unwrap();
        assert_eq!(config.base_url().unwrap().as_str(), "https://api.whosee.me/");
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert!(config.secure);
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.retry_policy().max_attempts(), 3);
    }

    #[test]
    fn port_fallback_builds_localhost_url() {
        let config = ClientConfig::from_lookup(lookup(&[(ENV_API_PORT, "3900")])).unwrap();
        assert_eq!(config.api_url, "http://localhost:3900");
    }

    #[test]
    fn secure_mode_without_secret_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_SECURE, "1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_TIMEOUT_MS, "soon")])),
            Err(ConfigError::InvalidValue { key: ENV_TIMEOUT_MS, .. })
        ));
        assert!(matches!(
            ClientConfig::from_json_str(r#"{"api_url": "not a url"}"#),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn lifetime_must_exceed_safety_margin() {
        for raw in [
            r#"{"token_lifetime_ms": 3000}"#,
            r#"{"token_lifetime_ms": 5000, "token_safety_margin_ms": 5000}"#,
        ] {
            assert!(matches!(
                ClientConfig::from_json_str(raw),
                Err(ConfigError::InvalidValue { key: "token_lifetime_ms", .. })
            ));
        }
        assert!(ClientConfig::from_json_str(r#"{"token_lifetime_ms": 3000, "token_safety_margin_ms": 1000}"#).is_ok());
    }

    #[test]
    fn loads_json_and_redacts_debug() {
        let config = ClientConfig::from_json_str(
            r#"{"api_url": "https://api.whosee.me", "api_secret": "hunter2", "secure": true, "use_jwt_expiry": true, "max_attempts": 5}"#,
        )
        .unwrap();
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert!(matches!(config.expiry_policy(), ExpiryPolicy::JwtClaim { .. }));
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
