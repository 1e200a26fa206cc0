//! Client error types.

use conduit_json_rpc::{CallError, JsonRpcErrorObject};
use conduit_transport::TransportError;
use serde_json::Value;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The underlying transport failed to deliver or receive a frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server replied with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No reply arrived within the per-call deadline.
    #[error("request timed out")]
    Timeout,

    /// The caller cancelled the request before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The connection closed while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// An operation other than `initialize`/`ping` was attempted before the
    /// handshake completed.
    #[error("client is not connected")]
    NotReady,

    /// `connect` was called on a client that already completed the handshake.
    #[error("client is already connected")]
    AlreadyConnected,

    /// The initialize exchange failed, for example on a protocol version
    /// the client does not speak.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server did not declare the capability this operation requires.
    #[error("server does not support {0}")]
    CapabilityNotSupported(&'static str),
}

impl From<CallError> for ClientError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout => ClientError::Timeout,
            CallError::Cancelled => ClientError::Cancelled,
            CallError::ConnectionClosed => ClientError::ConnectionClosed,
            CallError::Rpc(obj) => ClientError::from(obj),
        }
    }
}

impl From<JsonRpcErrorObject> for ClientError {
    fn from(obj: JsonRpcErrorObject) -> Self {
        ClientError::Rpc {
            code: obj.code,
            message: obj.message,
            data: obj.data,
        }
    }
}
