mod connection;
mod logging;

pub use connection::*;
pub use logging::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable overriding the editor host.
pub const HOST_ENV: &str = "GODOT_HOST";
/// Environment variable overriding the editor port.
pub const PORT_ENV: &str = "GODOT_PORT";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Failure to read or parse a config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigLoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Parse a TOML config file. Missing sections and fields take defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Apply `GODOT_HOST` / `GODOT_PORT` from the process environment.
    ///
    /// Invalid values are ignored; each one is logged and returned as a
    /// warning.
    pub fn apply_env_overrides(&mut self) -> Vec<ConfigError> {
        let host = std::env::var(HOST_ENV).ok();
        let port = std::env::var(PORT_ENV).ok();
        let issues = self.apply_overrides(host.as_deref(), port.as_deref());
        for issue in &issues {
            tracing::warn!(field = %issue.field, "{}", issue.message);
        }
        issues
    }

    /// Apply host/port override values. Split out from
    /// [`apply_env_overrides`](Self::apply_env_overrides) so it can be tested
    /// without touching the process environment.
    pub fn apply_overrides(&mut self, host: Option<&str>, port: Option<&str>) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if let Some(host) = host.and_then(parse_host_override) {
            self.connection.host = Some(host);
        }

        if let Some(raw) = port {
            match parse_port_override(raw) {
                Some(port) => self.connection.port = port,
                None if raw.trim().is_empty() => {}
                None => issues.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: PORT_ENV.into(),
                    message: format!(
                        "invalid port {raw:?} (expected 1-65535), using {}",
                        self.connection.port
                    ),
                }),
            }
        }

        issues
    }
}

/// Trimmed host override; blank values mean "no override".
pub fn parse_host_override(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Port override in the 1–65535 range.
pub fn parse_port_override(value: &str) -> Option<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let conn = &self.connection;

        if conn.port == 0 {
            errors.push(error("connection.port", "port must be greater than 0"));
        }

        if conn.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            errors.push(error("connection.host", "host must not be blank"));
        }

        for (field, value) in [
            ("connection.command_timeout_ms", conn.command_timeout_ms),
            ("connection.handshake_timeout_ms", conn.handshake_timeout_ms),
            ("connection.keepalive_interval_ms", conn.keepalive_interval_ms),
            ("connection.keepalive_timeout_ms", conn.keepalive_timeout_ms),
        ] {
            if value == 0 {
                errors.push(error(field, "must be greater than 0"));
            }
        }

        if conn.reconnect_delays_ms.is_empty() {
            errors.push(error(
                "connection.reconnect_delays_ms",
                "backoff ladder must contain at least one delay",
            ));
        } else if conn.reconnect_delays_ms.windows(2).any(|w| w[1] < w[0]) {
            errors.push(error(
                "connection.reconnect_delays_ms",
                "backoff ladder must be non-decreasing",
            ));
        }

        if conn.keepalive_timeout_ms >= conn.keepalive_interval_ms && conn.keepalive_interval_ms > 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "connection.keepalive_timeout_ms".into(),
                message: "pong deadline is not shorter than the ping interval".into(),
            });
        }

        if let Some(filter) = &self.logging.filter {
            if filter.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "logging.filter".into(),
                    message: "empty filter ignored; RUST_LOG or the default applies".into(),
                });
            }
        }

        errors
    }
}

fn error(field: &str, message: &str) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}
