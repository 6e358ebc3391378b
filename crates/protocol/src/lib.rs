//! Bridge protocol: the JSON envelope exchanged with the editor addon over
//! WebSocket, plus the handshake payloads and well-known constants.
//!
//! Every frame in either direction is a single JSON object:
//!
//! ```text
//! request  → { "id": "…", "command": "get_scene_tree", "params": { … } }
//! success  ← { "id": "…", "result": … }
//! failure  ← { "id": "…", "error": { "code": "NODE_NOT_FOUND", "message": "…" } }
//! ```
//!
//! Replies are correlated to requests purely by `id`; the editor may answer
//! out of order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host used when neither configuration nor auto-detection supplies one.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the editor addon listens on by default.
pub const DEFAULT_PORT: u16 = 6550;

/// Close code the addon uses when it already serves another client.
pub const CLOSE_CODE_ALREADY_CONNECTED: u16 = 4001;

/// Command name of the version/identity exchange sent on every socket open.
pub const HANDSHAKE_COMMAND: &str = "mcp_handshake";

// ── Outbound ─────────────────────────────────────────────────────────

/// A command sent to the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed back in the reply.
    pub id: String,
    pub command: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl Request {
    /// Build a request with a freshly generated correlation id.
    ///
    /// `Value::Null` params are normalised to an empty object so the addon
    /// always sees `params: {}`.
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => empty_params(),
            other => other,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            command: command.into(),
            params,
        }
    }

    /// The handshake request announcing the local bridge version.
    pub fn handshake(server_version: &str) -> Self {
        let params = HandshakeParams {
            server_version: server_version.to_owned(),
        };
        Self::new(
            HANDSHAKE_COMMAND,
            serde_json::to_value(params).unwrap_or_else(|_| empty_params()),
        )
    }
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

/// Serialize a request into a text frame.
pub fn encode(request: &Request) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Error payload of a failed command, defined by the editor addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

/// A structurally valid reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Success { id: String, result: Value },
    Error { id: String, error: ResponseError },
}

impl Response {
    pub fn id(&self) -> &str {
        match self {
            Response::Success { id, .. } | Response::Error { id, .. } => id,
        }
    }
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Reply(Response),
    /// The frame failed validation. `id` is set when the frame still carried
    /// a usable correlation id, so the matching caller can be rejected.
    Malformed { id: Option<String>, reason: String },
}

/// Parse and validate an inbound frame. Never panics; anything that is not a
/// well-formed reply comes back as [`Decoded::Malformed`].
pub fn decode(raw: &str) -> Decoded {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            return Decoded::Malformed {
                id: None,
                reason: format!("invalid JSON: {e}"),
            }
        }
    };

    let Value::Object(mut obj) = value else {
        return Decoded::Malformed {
            id: None,
            reason: "frame is not a JSON object".into(),
        };
    };

    let id = match obj.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(_) | None => {
            return Decoded::Malformed {
                id: None,
                reason: "missing or non-scalar id".into(),
            }
        }
    };

    match obj.remove("error") {
        Some(Value::Null) | None => {}
        Some(error) => {
            return match serde_json::from_value::<ResponseError>(error) {
                Ok(error) => Decoded::Reply(Response::Error { id, error }),
                Err(e) => Decoded::Malformed {
                    id: Some(id),
                    reason: format!("invalid error object: {e}"),
                },
            };
        }
    }

    match obj.remove("result") {
        Some(result) => Decoded::Reply(Response::Success { id, result }),
        None => Decoded::Malformed {
            id: Some(id),
            reason: "reply has neither result nor error".into(),
        },
    }
}

// ── Handshake payloads ───────────────────────────────────────────────

/// Params of the `mcp_handshake` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub server_version: String,
}

/// Result of the `mcp_handshake` request. Every field is optional: older
/// addons omit some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    #[serde(default)]
    pub addon_version: Option<String>,
    #[serde(default)]
    pub godot_version: Option<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_gets_unique_ids() {
        let a = Request::new("x", json!({"a": 1}));
        let b = Request::new("x", json!({"a": 1}));
        assert_ne!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn null_params_become_empty_object() {
        let req = Request::new("get_scene_tree", Value::Null);
        assert_eq!(req.params, json!({}));
    }

    #[test]
    fn encode_produces_envelope() {
        let req = Request::new("x", json!({"a": 1}));
        let text = encode(&req).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["id"], json!(req.id));
        assert_eq!(v["command"], "x");
        assert_eq!(v["params"], json!({"a": 1}));
    }

    #[test]
    fn handshake_request_carries_version() {
        let req = Request::handshake("1.2.3");
        assert_eq!(req.command, HANDSHAKE_COMMAND);
        assert_eq!(req.params, json!({"server_version": "1.2.3"}));
    }

    #[test]
    fn decode_success() {
        let d = decode(r#"{"id":"r1","result":{"ok":true}}"#);
        assert_eq!(
            d,
            Decoded::Reply(Response::Success {
                id: "r1".into(),
                result: json!({"ok": true}),
            })
        );
    }

    #[test]
    fn decode_null_result_is_success() {
        let d = decode(r#"{"id":"r1","result":null}"#);
        assert!(matches!(d, Decoded::Reply(Response::Success { result: Value::Null, .. })));
    }

    #[test]
    fn decode_error_reply() {
        let d = decode(r#"{"id":"r2","error":{"code":"E1","message":"bad"}}"#);
        match d {
            Decoded::Reply(Response::Error { id, error }) => {
                assert_eq!(id, "r2");
                assert_eq!(error.code, "E1");
                assert_eq!(error.message, "bad");
            }
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[test]
    fn decode_numeric_id_is_stringified() {
        let d = decode(r#"{"id":7,"result":1}"#);
        match d {
            Decoded::Reply(resp) => assert_eq!(resp.id(), "7"),
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn decode_invalid_json_has_no_id() {
        assert!(matches!(
            decode("{not json"),
            Decoded::Malformed { id: None, .. }
        ));
    }

    #[test]
    fn decode_missing_id_has_no_id() {
        assert!(matches!(
            decode(r#"{"result":1}"#),
            Decoded::Malformed { id: None, .. }
        ));
        assert!(matches!(
            decode(r#"[1,2,3]"#),
            Decoded::Malformed { id: None, .. }
        ));
    }

    #[test]
    fn decode_bad_error_object_keeps_id() {
        let d = decode(r#"{"id":"r3","error":{"code":5}}"#);
        assert!(matches!(d, Decoded::Malformed { id: Some(ref id), .. } if id == "r3"));
    }

    #[test]
    fn decode_without_result_or_error_keeps_id() {
        let d = decode(r#"{"id":"r4"}"#);
        assert!(matches!(d, Decoded::Malformed { id: Some(ref id), .. } if id == "r4"));
    }

    #[test]
    fn success_response_serializes_flat() {
        let resp = Response::Success {
            id: "r1".into(),
            result: json!([1]),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": "r1", "result": [1]})
        );
    }

    #[test]
    fn handshake_reply_tolerates_missing_fields() {
        let reply: HandshakeReply =
            serde_json::from_value(json!({"addon_version": "0.2.0"})).unwrap();
        assert_eq!(reply.addon_version.as_deref(), Some("0.2.0"));
        assert!(reply.project_path.is_none());
    }
}
