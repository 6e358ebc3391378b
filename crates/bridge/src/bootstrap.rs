//! Turn configuration into a ready-to-connect [`Connection`].

use anyhow::Context;

use gb_connection::{Connection, KeepaliveConfig, ReconnectBackoff};
use gb_domain::config::ConnectionConfig;
use gb_domain::host::{self, ConnectionStrategy};

/// Resolve the target host (explicit override, WSL gateway, or localhost)
/// and build the connection. Does not connect.
pub fn build_connection(
    config: &ConnectionConfig,
) -> anyhow::Result<(Connection, ConnectionStrategy)> {
    let strategy = host::connection_strategy(config.host.as_deref(), config.port);
    tracing::info!(
        environment = strategy.environment,
        target_host = %strategy.target_host,
        url = %strategy.ws_url,
        "connection strategy resolved"
    );

    let conn = Connection::builder()
        .host(strategy.target_host.as_str())
        .port(config.port)
        .client_version(env!("CARGO_PKG_VERSION"))
        .auto_reconnect(config.auto_reconnect)
        .command_timeout(config.command_timeout())
        .handshake_timeout(config.handshake_timeout())
        .keepalive(KeepaliveConfig {
            interval: config.keepalive_interval(),
            deadline: config.keepalive_timeout(),
        })
        .reconnect_backoff(ReconnectBackoff::new(config.reconnect_delays()))
        .build()
        .context("invalid connection settings")?;

    Ok((conn, strategy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_host_wins() {
        let config = ConnectionConfig {
            host: Some("10.1.2.3".into()),
            port: 7001,
            ..Default::default()
        };
        let (conn, strategy) = build_connection(&config).unwrap();
        assert_eq!(strategy.target_host, "10.1.2.3");
        assert_eq!(conn.url(), "ws://10.1.2.3:7001");
        assert_eq!(conn.client_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn bad_ladder_is_rejected() {
        let config = ConnectionConfig {
            host: Some("localhost".into()),
            reconnect_delays_ms: vec![],
            ..Default::default()
        };
        let err = build_connection(&config).unwrap_err();
        assert!(format!("{err:#}").contains("reconnect ladder must not be empty"));
    }
}
