use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error code: method not found.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: internal error.
pub const CODE_INTERNAL: i64 = -32603;

/// One RPC envelope. Exactly one serialized envelope travels per frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Envelope {
    /// Bind this connection to a logical service path. Sent by the client
    /// as the first envelope after the transport connects.
    Attach { path: String },
    /// The server accepted the attach.
    AttachOk,
    /// The server rejected the attach (no matching service).
    AttachErr { message: String },
    /// Method call expecting a reply.
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    /// Successful reply to a request.
    Reply { id: u64, result: Value },
    /// Error reply to a request.
    ReplyErr { id: u64, error: RemoteError },
    /// Fire-and-forget method call.
    Notify {
        method: String,
        #[serde(default)]
        params: Value,
    },
    /// Liveness probe. The receiver must answer with `Pong`.
    Ping,
    /// Liveness probe answer.
    Pong,
}

impl Envelope {
    /// Serialize to the frame payload representation.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize from a frame payload.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// An application-level error carried in a `ReplyErr` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    /// A generic internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: CODE_INTERNAL,
            message: message.into(),
            data: None,
        }
    }

    /// The target does not expose the requested method.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_roundtrip() {
        let env = Envelope::Request {
            id: 7,
            method: "read".to_string(),
            params: json!({"resource": "a.txt"}),
        };
        let bytes = env.to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn envelope_kind_tags() {
        let bytes = Envelope::Ping.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "ping");

        let bytes = Envelope::AttachOk.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "attach-ok");

        let bytes = Envelope::ReplyErr {
            id: 1,
            error: RemoteError::method_not_found("frobnicate"),
        }
        .to_bytes()
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["kind"], "reply-err");
        assert_eq!(value["error"]["code"], CODE_METHOD_NOT_FOUND);
    }

    #[test]
    fn request_params_default_to_null() {
        let env: Envelope =
            serde_json::from_str(r#"{"kind":"request","id":3,"method":"list"}"#).unwrap();
        assert_eq!(
            env,
            Envelope::Request {
                id: 3,
                method: "list".to_string(),
                params: Value::Null,
            }
        );
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(Envelope::from_bytes(b"{not-json").is_err());
        assert!(Envelope::from_bytes(br#"{"kind":"no-such-kind"}"#).is_err());
    }
}
