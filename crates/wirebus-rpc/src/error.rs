use crate::message::RemoteError;

/// Errors that can occur in connection and proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] wirebus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] wirebus_frame::FrameError),

    /// Envelope serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote side answered a request with an error.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// No service accepted the requested path.
    #[error("attach to '{path}' rejected: {message}")]
    AttachRejected { path: String, message: String },

    /// The peer sent an envelope that is invalid at this point in the
    /// protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The connection dropped before or during the operation.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The facade was explicitly closed; no new operations are accepted.
    #[error("client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, RpcError>;
