use std::str::FromStr;
use std::time::Duration;

use crate::ws::cleanup::CleanupConfig;

/// Secret shipped for local development. Startup warns when it is in use.
pub const DEFAULT_SIGNATURE_SECRET: &str = "your-secret-key-here";

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Admission signature settings.
    pub signature: SignatureConfig,
    /// Per-connection socket settings.
    pub websocket: WebSocketConfig,
    /// Admission cap across both client classes (default: `10000`).
    pub max_connections: usize,
    /// Stale-connection reclamation settings.
    pub cleanup: CleanupConfig,
    /// Log output format (default: text).
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// Shared HMAC secret.
    pub secret: String,
    /// Freshness window in seconds (default: `300`).
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Inactivity deadline for a single read (default: 60s).
    pub read_timeout: Duration,
    /// Deadline for writing a single frame (default: 10s).
    pub write_timeout: Duration,
    /// Largest inbound message accepted, in bytes (default: 1 MiB).
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue (default: `256`).
    pub outbound_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Errors raised while loading or validating [`ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("SIGNATURE_SECRET must not be empty")]
    EmptySecret,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            cors_origins: vec!["http://localhost:3000".into()],
            request_timeout_secs: 30,
            signature: SignatureConfig {
                secret: DEFAULT_SIGNATURE_SECRET.into(),
                timeout_secs: 300,
            },
            websocket: WebSocketConfig {
                read_timeout: Duration::from_secs(60),
                write_timeout: Duration::from_secs(10),
                max_message_size: 1024 * 1024,
                outbound_capacity: 256,
            },
            max_connections: 10_000,
            cleanup: CleanupConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `HOST`                       | `0.0.0.0`                |
    /// | `PORT`                       | `8080`                   |
    /// | `CORS_ORIGINS`               | `http://localhost:3000`  |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                     |
    /// | `SIGNATURE_SECRET`           | `your-secret-key-here`   |
    /// | `SIGNATURE_TIMEOUT_SECS`     | `300`                    |
    /// | `WS_READ_TIMEOUT_SECS`       | `60`                     |
    /// | `WS_WRITE_TIMEOUT_SECS`      | `10`                     |
    /// | `WS_MAX_MESSAGE_SIZE`        | `1048576`                |
    /// | `WS_OUTBOUND_CAPACITY`       | `256`                    |
    /// | `MAX_CONNECTIONS`            | `10000`                  |
    /// | `CLEANUP_INTERVAL_SECS`      | `30`                     |
    /// | `CLEANUP_STALE_SECS`         | `120`                    |
    /// | `CLEANUP_GRACE_SECS`         | `60`                     |
    /// | `CLEANUP_PROBE_TIMEOUT_SECS` | `3`                      |
    /// | `CLEANUP_QUEUE_CAPACITY`     | `1000`                   |
    /// | `LOG_FORMAT`                 | `text`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let env = Env(&lookup);

        let cors_origins = match lookup("CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.cors_origins,
        };

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: env.parse("PORT", defaults.port)?,
            cors_origins,
            request_timeout_secs: env
                .parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            signature: SignatureConfig {
                secret: lookup("SIGNATURE_SECRET").unwrap_or(defaults.signature.secret),
                timeout_secs: env
                    .parse("SIGNATURE_TIMEOUT_SECS", defaults.signature.timeout_secs)?,
            },
            websocket: WebSocketConfig {
                read_timeout: env.secs("WS_READ_TIMEOUT_SECS", defaults.websocket.read_timeout)?,
                write_timeout: env
                    .secs("WS_WRITE_TIMEOUT_SECS", defaults.websocket.write_timeout)?,
                max_message_size: env
                    .parse("WS_MAX_MESSAGE_SIZE", defaults.websocket.max_message_size)?,
                outbound_capacity: env
                    .parse("WS_OUTBOUND_CAPACITY", defaults.websocket.outbound_capacity)?,
            },
            max_connections: env.parse("MAX_CONNECTIONS", defaults.max_connections)?,
            cleanup: CleanupConfig {
                interval: env.secs("CLEANUP_INTERVAL_SECS", defaults.cleanup.interval)?,
                stale_after: env.secs("CLEANUP_STALE_SECS", defaults.cleanup.stale_after)?,
                grace: env.secs("CLEANUP_GRACE_SECS", defaults.cleanup.grace)?,
                probe_timeout: env
                    .secs("CLEANUP_PROBE_TIMEOUT_SECS", defaults.cleanup.probe_timeout)?,
                queue_capacity: env
                    .parse("CLEANUP_QUEUE_CAPACITY", defaults.cleanup.queue_capacity)?,
            },
            log_format: env.parse("LOG_FORMAT", defaults.log_format)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signature.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        let non_zero = [
            ("SIGNATURE_TIMEOUT_SECS", self.signature.timeout_secs == 0),
            ("WS_READ_TIMEOUT_SECS", self.websocket.read_timeout.is_zero()),
            ("WS_WRITE_TIMEOUT_SECS", self.websocket.write_timeout.is_zero()),
            ("WS_OUTBOUND_CAPACITY", self.websocket.outbound_capacity == 0),
            ("MAX_CONNECTIONS", self.max_connections == 0),
            ("CLEANUP_INTERVAL_SECS", self.cleanup.interval.is_zero()),
            ("CLEANUP_PROBE_TIMEOUT_SECS", self.cleanup.probe_timeout.is_zero()),
            ("CLEANUP_QUEUE_CAPACITY", self.cleanup.queue_capacity == 0),
        ];
        if let Some((key, _)) = non_zero.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::Zero(key));
        }

        Ok(())
    }

    /// Whether the development secret is still configured.
    pub fn uses_default_secret(&self) -> bool {
        self.signature.secret == DEFAULT_SIGNATURE_SECRET
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.signature.timeout_secs, 300);
        assert_eq!(config.websocket.outbound_capacity, 256);
        assert_eq!(config.cleanup.stale_after, Duration::from_secs(120));
        assert_eq!(config.cleanup.queue_capacity, 1000);
        assert!(config.uses_default_secret());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PORT", "9001"),
            ("SIGNATURE_SECRET", "s3cret"),
            ("WS_READ_TIMEOUT_SECS", "5"),
            ("CLEANUP_STALE_SECS", "10"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();

        assert_eq!(config.port, 9001);
        assert!(!config.uses_default_secret());
        assert_eq!(config.websocket.read_timeout, Duration::from_secs(5));
        assert_eq!(config.cleanup.stale_after, Duration::from_secs(10));
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_number_is_reported_with_key() {
        assert_matches!(
            load(&[("MAX_CONNECTIONS", "lots")]),
            Err(ConfigError::Invalid { key: "MAX_CONNECTIONS", .. })
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        assert_matches!(
            load(&[("WS_OUTBOUND_CAPACITY", "0")]),
            Err(ConfigError::Zero("WS_OUTBOUND_CAPACITY"))
        );
        assert_matches!(
            load(&[("SIGNATURE_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Zero("SIGNATURE_TIMEOUT_SECS"))
        );
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_matches!(load(&[("SIGNATURE_SECRET", "")]), Err(ConfigError::EmptySecret));
    }
}
