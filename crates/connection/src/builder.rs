//! Builder pattern for constructing a [`Connection`].

use std::time::Duration;

use gb_protocol::{DEFAULT_HOST, DEFAULT_PORT};

use crate::connection::{Connection, Settings};
use crate::keepalive::KeepaliveConfig;
use crate::reconnect::ReconnectBackoff;
use crate::types::BridgeError;

/// Fluent builder for [`Connection`].
///
/// # Example
///
/// ```rust,no_run
/// # use gb_connection::ConnectionBuilder;
/// let conn = ConnectionBuilder::new()
///     .host("172.22.16.1")
///     .port(6550)
///     .client_version(env!("CARGO_PKG_VERSION"))
///     .command_timeout(std::time::Duration::from_secs(30))
///     .build()
///     .unwrap();
/// ```
pub struct ConnectionBuilder {
    host: String,
    port: u16,
    auto_reconnect: bool,
    client_version: String,
    command_timeout: Duration,
    handshake_timeout: Duration,
    keepalive: KeepaliveConfig,
    reconnect_backoff: ReconnectBackoff,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            auto_reconnect: true,
            client_version: env!("CARGO_PKG_VERSION").into(),
            command_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            keepalive: KeepaliveConfig::default(),
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    // ── Endpoint ─────────────────────────────────────────────────────

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Version sent as `server_version` in the handshake and compared
    /// against the addon's version.
    pub fn client_version(mut self, v: impl Into<String>) -> Self {
        self.client_version = v.into();
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Reconnect after unexpected closes and failed attempts (default on).
    pub fn auto_reconnect(mut self, on: bool) -> Self {
        self.auto_reconnect = on;
        self
    }

    /// Per-command reply deadline (default 30s).
    pub fn command_timeout(mut self, d: Duration) -> Self {
        self.command_timeout = d;
        self
    }

    /// Handshake reply deadline (default 5s).
    pub fn handshake_timeout(mut self, d: Duration) -> Self {
        self.handshake_timeout = d;
        self
    }

    /// Ping interval and pong deadline (default 30s / 10s).
    pub fn keepalive(mut self, cfg: KeepaliveConfig) -> Self {
        self.keepalive = cfg;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Build the [`Connection`]. Does not connect.
    pub fn build(self) -> Result<Connection, BridgeError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(BridgeError::Config("host is required".into()));
        }
        if self.port == 0 {
            return Err(BridgeError::Config("port must be in 1-65535".into()));
        }
        if self.command_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(BridgeError::Config("timeouts must be non-zero".into()));
        }
        if self.keepalive.interval.is_zero() || self.keepalive.deadline.is_zero() {
            return Err(BridgeError::Config(
                "keepalive interval and deadline must be non-zero".into(),
            ));
        }
        self.reconnect_backoff.validate().map_err(BridgeError::Config)?;

        Ok(Connection::from_settings(Settings {
            host: host.to_owned(),
            port: self.port,
            auto_reconnect: self.auto_reconnect,
            client_version: self.client_version,
            command_timeout: self.command_timeout,
            handshake_timeout: self.handshake_timeout,
            keepalive: self.keepalive,
            reconnect_backoff: self.reconnect_backoff,
        }))
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_editor() {
        let conn = ConnectionBuilder::new().build().unwrap();
        assert_eq!(conn.url(), "ws://localhost:6550");
        assert_eq!(conn.client_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn host_is_trimmed() {
        let conn = ConnectionBuilder::new()
            .host("  10.0.0.2 ")
            .port(7000)
            .build()
            .unwrap();
        assert_eq!(conn.url(), "ws://10.0.0.2:7000");
    }

    #[test]
    fn rejects_blank_host() {
        let err = ConnectionBuilder::new().host("  ").build().unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn rejects_port_zero() {
        assert!(ConnectionBuilder::new().port(0).build().is_err());
    }

    #[test]
    fn rejects_decreasing_ladder() {
        let backoff = ReconnectBackoff::new(vec![Duration::from_secs(5), Duration::from_secs(1)]);
        let err = ConnectionBuilder::new()
            .reconnect_backoff(backoff)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::Config("reconnect ladder must be non-decreasing".into())
        );
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(ConnectionBuilder::new()
            .command_timeout(Duration::ZERO)
            .build()
            .is_err());
    }
}
