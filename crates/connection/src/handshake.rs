//! Version and identity exchange performed on every socket open.

use gb_protocol::HandshakeReply;
use serde::Serialize;
use serde_json::Value;

use crate::types::BridgeError;

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    Pending,
    Success,
    Failed,
    Timeout,
}

impl HandshakeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeStatus::Pending => "pending",
            HandshakeStatus::Success => "success",
            HandshakeStatus::Failed => "failed",
            HandshakeStatus::Timeout => "timeout",
        }
    }
}

/// What the addon told us about itself. Cleared whenever the socket closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandshakeResult {
    pub addon_version: String,
    pub godot_version: String,
    pub project_path: String,
    pub project_name: String,
    pub status: HandshakeStatus,
}

impl HandshakeResult {
    pub fn unknown(status: HandshakeStatus) -> Self {
        Self {
            addon_version: UNKNOWN.into(),
            godot_version: UNKNOWN.into(),
            project_path: String::new(),
            project_name: String::new(),
            status,
        }
    }

    pub fn from_reply(reply: HandshakeReply) -> Self {
        Self {
            addon_version: reply.addon_version.unwrap_or_else(|| UNKNOWN.into()),
            godot_version: reply.godot_version.unwrap_or_else(|| UNKNOWN.into()),
            project_path: reply.project_path.unwrap_or_default(),
            project_name: reply.project_name.unwrap_or_default(),
            status: HandshakeStatus::Success,
        }
    }

    /// Exact comparison against the local version. Only a successful
    /// handshake can match.
    pub fn versions_match(&self, local: &str) -> bool {
        self.status == HandshakeStatus::Success && self.addon_version == local
    }
}

/// Outcome of one handshake round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub result: HandshakeResult,
    /// Set when the handshake did not succeed.
    pub failure: Option<String>,
}

/// Turn the reply (or failure) of the `mcp_handshake` request into a
/// [`HandshakeResult`].
pub fn evaluate(reply: Result<Value, BridgeError>) -> Evaluation {
    match reply {
        Ok(value) => match serde_json::from_value::<HandshakeReply>(value) {
            Ok(reply) => Evaluation {
                result: HandshakeResult::from_reply(reply),
                failure: None,
            },
            Err(e) => Evaluation {
                result: HandshakeResult::unknown(HandshakeStatus::Failed),
                failure: Some(format!("malformed handshake reply: {e}")),
            },
        },
        Err(err @ BridgeError::Timeout { .. }) => Evaluation {
            result: HandshakeResult::unknown(HandshakeStatus::Timeout),
            failure: Some(err.to_string()),
        },
        Err(err) => Evaluation {
            result: HandshakeResult::unknown(HandshakeStatus::Failed),
            failure: Some(err.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_reply_succeeds() {
        let eval = evaluate(Ok(json!({
            "addon_version": "0.4.0",
            "godot_version": "4.3.stable",
            "project_path": "/home/dev/game",
            "project_name": "Game",
        })));
        assert!(eval.failure.is_none());
        assert_eq!(eval.result.status, HandshakeStatus::Success);
        assert_eq!(eval.result.godot_version, "4.3.stable");
        assert_eq!(eval.result.project_name, "Game");
        assert!(eval.result.versions_match("0.4.0"));
        assert!(!eval.result.versions_match("0.4.1"));
    }

    #[test]
    fn missing_fields_get_placeholders() {
        let eval = evaluate(Ok(json!({})));
        assert_eq!(eval.result.status, HandshakeStatus::Success);
        assert_eq!(eval.result.addon_version, "unknown");
        assert_eq!(eval.result.godot_version, "unknown");
        assert_eq!(eval.result.project_path, "");
        assert_eq!(eval.result.project_name, "");
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let eval = evaluate(Err(BridgeError::Timeout {
            command: "mcp_handshake".into(),
            timeout_ms: 5000,
        }));
        assert_eq!(eval.result.status, HandshakeStatus::Timeout);
        assert!(eval.failure.unwrap().contains("timed out"));
    }

    #[test]
    fn command_error_fails() {
        let eval = evaluate(Err(BridgeError::Command {
            code: "E_HANDSHAKE".into(),
            message: "nope".into(),
        }));
        assert_eq!(eval.result.status, HandshakeStatus::Failed);
        assert_eq!(eval.failure.as_deref(), Some("[E_HANDSHAKE] nope"));
        assert!(!eval.result.versions_match("unknown"));
    }

    #[test]
    fn non_object_reply_fails() {
        let eval = evaluate(Ok(json!("hello")));
        assert_eq!(eval.result.status, HandshakeStatus::Failed);
        assert!(eval.failure.unwrap().starts_with("malformed handshake reply"));
    }
}
