//! File configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a working setup.
//! Serde handles syntax; [`Settings::validate`] collects every semantic problem at once instead
//! of stopping at the first.

use crate::circuit_breaker::{CircuitBreakerConfig, ClientErrorPolicy};
use crate::dispatch::UserRoutes;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {}", .0.join(", "))]
    Validation(Vec<String>),
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub downstream: DownstreamSettings,
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamSettings {
    /// Target name; also the breaker's key.
    pub name: String,
    pub base_url: String,
    pub register_path: String,
    pub list_path: String,
    /// Bound on every physical attempt.
    pub attempt_timeout_ms: u64,
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            name: "user-service".to_string(),
            base_url: "http://127.0.0.1:3001".to_string(),
            register_path: "/users".to_string(),
            list_path: "/users".to_string(),
            attempt_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_attempts: u32,
    pub client_errors: ClientErrorPolicy,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            half_open_max_attempts: 3,
            client_errors: ClientErrorPolicy::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: "breakwater=info,tower_http=info".to_string(), json: false }
    }
}

/// Checked by shape only; hostnames are resolved when the listener binds.
fn is_bind_address(value: &str) -> bool {
    if value.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match value.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(':')
                && !host.chars().any(char::is_whitespace)
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// Load and validate configuration from a TOML file.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let settings = Settings::from_toml(&content)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(settings)
}

impl Settings {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks, reporting every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !is_bind_address(&self.server.bind_address) {
            errors.push(format!(
                "server.bind_address '{}' must be <ip>:<port> or <host>:<port>",
                self.server.bind_address
            ));
        }

        let downstream = &self.downstream;
        if downstream.name.trim().is_empty() {
            errors.push("downstream.name must not be empty".to_string());
        }
        if !(downstream.base_url.starts_with("http://") || downstream.base_url.starts_with("https://")) {
            errors.push(format!("downstream.base_url '{}' must be an http(s) URL", downstream.base_url));
        }
        for (field, value) in
            [("register_path", &downstream.register_path), ("list_path", &downstream.list_path)]
        {
            if !value.starts_with('/') {
                errors.push(format!("downstream.{field} '{value}' must start with '/'"));
            }
        }
        if let Err(e) = self.attempt_timeout() {
            errors.push(format!("downstream.attempt_timeout_ms: {e}"));
        }

        if let Err(e) = self.breaker_config() {
            errors.push(format!("breaker: {e}"));
        }
        if let Err(e) = self.retry_config() {
            errors.push(format!("retry: {e}"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    pub fn breaker_config(&self) -> Result<CircuitBreakerConfig, crate::CircuitBreakerConfigError> {
        let breaker = &self.breaker;
        Ok(CircuitBreakerConfig::new(
            breaker.failure_threshold,
            Duration::from_millis(breaker.reset_timeout_ms),
            breaker.half_open_max_attempts,
        )?
        .with_client_error_policy(breaker.client_errors))
    }

    pub fn retry_config(&self) -> Result<RetryConfig, crate::RetryConfigError> {
        let retry = &self.retry;
        RetryConfig::new(
            retry.max_retries,
            Duration::from_millis(retry.initial_delay_ms),
            Duration::from_millis(retry.max_delay_ms),
            retry.backoff_multiplier,
            retry.jitter_factor,
        )
    }

    pub fn attempt_timeout(&self) -> Result<TimeoutPolicy, crate::timeout::TimeoutError> {
        TimeoutPolicy::new(Duration::from_millis(self.downstream.attempt_timeout_ms))
    }

    pub fn user_routes(&self) -> UserRoutes {
        UserRoutes {
            target: self.downstream.name.clone(),
            register_path: self.downstream.register_path.clone(),
            list_path: self.downstream.list_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.server.bind_address, "0.0.0.0:3000");
        assert_eq!(settings.breaker_config().unwrap(), CircuitBreakerConfig::default());
        assert_eq!(settings.retry_config().unwrap(), RetryConfig::default());
        assert_eq!(settings.attempt_timeout().unwrap().duration(), Duration::from_secs(5));
    }

    #[test]
    fn parses_every_section() {
        let settings = Settings::from_toml(
            r#"
            [server]
            bind_address = "127.0.0.1:8080"

            [downstream]
            name = "accounts"
            base_url = "http://accounts.internal:9000"
            register_path = "/v1/users"
            list_path = "/v1/users?limit=100"
            attempt_timeout_ms = 250

            [breaker]
            failure_threshold = 3
            reset_timeout_ms = 1500
            half_open_max_attempts = 1
            client_errors = "failure"

            [retry]
            max_retries = 1
            initial_delay_ms = 50
            max_delay_ms = 100
            backoff_multiplier = 1.5
            jitter_factor = 0.0

            [logging]
            filter = "debug"
            json = true
            "#,
        )
        .unwrap();

        let breaker = settings.breaker_config().unwrap();
        assert_eq!(breaker.failure_threshold(), 3);
        assert_eq!(breaker.reset_timeout(), Duration::from_millis(1500));
        assert_eq!(breaker.client_error_policy(), ClientErrorPolicy::CountAsFailure);

        let retry = settings.retry_config().unwrap();
        assert_eq!(retry.max_attempts(), 2);
        assert_eq!(retry.backoff_multiplier(), 1.5);

        let routes = settings.user_routes();
        assert_eq!(routes.target, "accounts");
        assert_eq!(routes.list_path, "/v1/users?limit=100");
        assert!(settings.logging.json);
    }

    #[test]
    fn collects_every_validation_error() {
        let err = Settings::from_toml(
            r#"
            [server]
            bind_address = "nowhere"

            [downstream]
            base_url = "ftp://files"
            register_path = "users"
            attempt_timeout_ms = 0

            [breaker]
            failure_threshold = 0

            [retry]
            jitter_factor = 2.0
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 6, "{errors:?}");
                assert!(errors.iter().any(|e| e.contains("bind_address")));
                assert!(errors.iter().any(|e| e.contains("register_path")));
                assert!(errors.iter().any(|e| e.starts_with("breaker:")));
                assert!(errors.iter().any(|e| e.starts_with("retry:")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn bind_address_accepts_hostnames() {
        for address in ["localhost:3000", "gateway.internal:8080", "[::1]:3000", "0.0.0.0:0"] {
            let toml = format!("[server]\nbind_address = \"{address}\"\n");
            assert!(Settings::from_toml(&toml).is_ok(), "{address} should be accepted");
        }
        for address in ["localhost", "localhost:http", ":3000", "local host:3000", "::1:3000"] {
            let toml = format!("[server]\nbind_address = \"{address}\"\n");
            assert!(Settings::from_toml(&toml).is_err(), "{address} should be rejected");
        }
    }

    #[test]
    fn unknown_client_error_policy_is_a_parse_error() {
        let err = Settings::from_toml("[breaker]\nclient_errors = \"sometimes\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_from_disk() {
        let path = std::env::temp_dir().join(format!("breakwater-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[retry]\nmax_retries = 0").unwrap();

        let settings = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(settings.retry.max_retries, 0);
        assert!(matches!(load(&path), Err(ConfigError::Io(_))));
    }
}
