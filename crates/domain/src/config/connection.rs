use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Editor connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where and how to reach the editor addon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Editor host. `None` means auto-detect (see [`crate::host`]).
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Reconnect automatically after an unexpected disconnect.
    #[serde(default = "d_true")]
    pub auto_reconnect: bool,
    #[serde(default = "d_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "d_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Interval between WebSocket ping probes.
    #[serde(default = "d_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    /// How long to wait for the pong answering a probe.
    #[serde(default = "d_keepalive_timeout_ms")]
    pub keepalive_timeout_ms: u64,
    /// Backoff ladder; attempts past the end reuse the last delay.
    #[serde(default = "d_reconnect_delays_ms")]
    pub reconnect_delays_ms: Vec<u64>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: d_port(),
            auto_reconnect: true,
            command_timeout_ms: d_command_timeout_ms(),
            handshake_timeout_ms: d_handshake_timeout_ms(),
            keepalive_interval_ms: d_keepalive_interval_ms(),
            keepalive_timeout_ms: d_keepalive_timeout_ms(),
            reconnect_delays_ms: d_reconnect_delays_ms(),
        }
    }
}

impl ConnectionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

fn d_port() -> u16 {
    gb_protocol::DEFAULT_PORT
}

fn d_true() -> bool {
    true
}

fn d_command_timeout_ms() -> u64 {
    30_000
}

fn d_handshake_timeout_ms() -> u64 {
    5_000
}

fn d_keepalive_interval_ms() -> u64 {
    30_000
}

fn d_keepalive_timeout_ms() -> u64 {
    10_000
}

fn d_reconnect_delays_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]
}
