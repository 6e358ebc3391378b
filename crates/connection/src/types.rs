//! Error type shared by every connection operation.

/// Errors surfaced to callers of [`Connection`](crate::Connection).
///
/// The first four variants are the runtime taxonomy every command caller
/// must handle; the last two indicate programming or configuration faults.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Not connected, or the socket went away while the request was pending.
    #[error("{0}")]
    Connectivity(String),
    /// No reply within the command or handshake deadline.
    #[error("command '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },
    /// The editor reported a failure for this command.
    #[error("[{code}] {message}")]
    Command { code: String, message: String },
    /// The reply carried our id but failed validation.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),
    #[error("config: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable machine-readable category, used in structured replies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Connectivity(_) => "connectivity",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Command { .. } => "command",
            BridgeError::MalformedResponse(_) => "malformed_response",
            BridgeError::DuplicateRequestId(_) => "duplicate_request_id",
            BridgeError::Config(_) => "config",
        }
    }

    /// Remote error code, for [`BridgeError::Command`] only.
    pub fn code(&self) -> Option<&str> {
        match self {
            BridgeError::Command { code, .. } => Some(code),
            _ => None,
        }
    }

    pub(crate) fn connection_closed() -> Self {
        BridgeError::Connectivity("Connection closed".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_display_includes_code() {
        let e = BridgeError::Command {
            code: "E1".into(),
            message: "bad".into(),
        };
        assert_eq!(e.to_string(), "[E1] bad");
        assert_eq!(e.code(), Some("E1"));
        assert_eq!(e.kind(), "command");
    }

    #[test]
    fn timeout_display() {
        let e = BridgeError::Timeout {
            command: "get_scene_tree".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(e.to_string(), "command 'get_scene_tree' timed out after 30000ms");
        assert_eq!(e.code(), None);
    }
}
