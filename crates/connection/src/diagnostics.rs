//! Why the connection is (or is not) up, and what to do about it.

use serde::Serialize;

use gb_protocol::CLOSE_CODE_ALREADY_CONNECTED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    NeverConnected,
    RejectedAnotherClient,
    ConnectionRefused,
    ConnectionLost,
    ClosedNormally,
    Error,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::NeverConnected => "never_connected",
            DisconnectReason::RejectedAnotherClient => "rejected_another_client",
            DisconnectReason::ConnectionRefused => "connection_refused",
            DisconnectReason::ConnectionLost => "connection_lost",
            DisconnectReason::ClosedNormally => "closed_normally",
            DisconnectReason::Error => "error",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the connection's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionDiagnostics {
    pub current_state: ConnectionState,
    pub last_disconnect_reason: DisconnectReason,
    pub rejection_count: u32,
    pub reconnect_attempts: u32,
    pub last_error_message: Option<String>,
    pub url: String,
}

impl ConnectionDiagnostics {
    /// Human-readable Status / Details / Suggestion block.
    pub fn render(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        match self.last_disconnect_reason {
            DisconnectReason::RejectedAnotherClient => {
                lines.push("Status: Connection rejected (another client already connected)".into());
                if self.rejection_count > 1 {
                    lines.push(format!(
                        "Details: {} connection attempts rejected",
                        self.rejection_count
                    ));
                }
                lines.push("Suggestion: Multiple bridge processes may be running.".into());
                lines.push("  Check: ps aux | grep godot-bridge (macOS/Linux)".into());
                lines.push(
                    "  Check: Get-Process -Name godot-bridge (Windows)".into(),
                );
                lines.push(
                    "  Fix: Kill all godot-bridge processes and restart your client".into(),
                );
            }
            DisconnectReason::ConnectionRefused => {
                lines.push(format!("Status: Cannot reach Godot at {}", self.url));
                lines.push("Suggestion: Ensure Godot is running with the bridge addon enabled.".into());
            }
            DisconnectReason::ConnectionLost => {
                lines.push("Status: Connection to Godot was lost".into());
                if self.reconnect_attempts > 0 {
                    lines.push(format!(
                        "Details: {} reconnection attempts made",
                        self.reconnect_attempts
                    ));
                }
                lines.push("Suggestion: Check if Godot is still running.".into());
            }
            DisconnectReason::NeverConnected => {
                lines.push(format!(
                    "Status: Never successfully connected to Godot at {}",
                    self.url
                ));
                lines.push("Suggestion: Ensure Godot is running with the bridge addon enabled.".into());
            }
            DisconnectReason::Error => {
                lines.push("Status: Connection error".into());
                if let Some(msg) = &self.last_error_message {
                    lines.push(format!("Details: {msg}"));
                }
            }
            DisconnectReason::ClosedNormally => {
                lines.push(format!("Status: Disconnected ({})", self.last_disconnect_reason));
            }
        }
        lines.join("\n")
    }
}

/// Mutable cause tracking. Lives inside the connection's state lock.
#[derive(Debug, Clone)]
pub struct DiagnosticsRecorder {
    reason: DisconnectReason,
    rejection_count: u32,
    last_error: Option<String>,
}

impl Default for DiagnosticsRecorder {
    fn default() -> Self {
        Self {
            reason: DisconnectReason::NeverConnected,
            rejection_count: 0,
            last_error: None,
        }
    }
}

impl DiagnosticsRecorder {
    /// The socket closed. `code` is the close frame's code, if any.
    pub fn record_close(&mut self, code: Option<u16>, was_connected: bool) {
        if code == Some(CLOSE_CODE_ALREADY_CONNECTED) {
            self.reason = DisconnectReason::RejectedAnotherClient;
            self.rejection_count = self.rejection_count.saturating_add(1);
        } else if was_connected {
            self.reason = DisconnectReason::ConnectionLost;
        } else if self.reason == DisconnectReason::NeverConnected {
            self.reason = DisconnectReason::ConnectionRefused;
        }
    }

    /// A transport-level failure. `refused` is true when the OS refused the
    /// TCP connection.
    pub fn record_transport_error(&mut self, message: impl Into<String>, refused: bool) {
        self.last_error = Some(message.into());
        self.reason = if refused {
            DisconnectReason::ConnectionRefused
        } else {
            DisconnectReason::Error
        };
    }

    pub fn record_explicit_disconnect(&mut self) {
        self.reason = DisconnectReason::ClosedNormally;
    }

    pub fn reason(&self) -> DisconnectReason {
        self.reason
    }

    pub fn rejection_count(&self) -> u32 {
        self.rejection_count
    }

    pub fn snapshot(
        &self,
        current_state: ConnectionState,
        reconnect_attempts: u32,
        url: &str,
    ) -> ConnectionDiagnostics {
        ConnectionDiagnostics {
            current_state,
            last_disconnect_reason: self.reason,
            rejection_count: self.rejection_count,
            reconnect_attempts,
            last_error_message: self.last_error.clone(),
            url: url.to_owned(),
        }
    }
}
