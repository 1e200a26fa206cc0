//! Server error types.

use conduit_json_rpc::CallError;
use conduit_transport::{SessionId, TransportError};

/// Errors surfaced by [`Server`](crate::Server) operations, mostly the
/// server-initiated call paths (sampling, roots) and notification fan-out.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The client answered a server-initiated call with an error object.
    #[error("client error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("call timed out")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    /// The session closed while the call was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// The client never declared the capability this call requires.
    #[error("client did not declare {0}")]
    ClientCapabilityMissing(&'static str),

    /// The server is not bound to a transport yet.
    #[error("server is not serving")]
    NotServing,
}

impl From<CallError> for ServerError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout => ServerError::Timeout,
            CallError::Cancelled => ServerError::Cancelled,
            CallError::ConnectionClosed => ServerError::ConnectionClosed,
            CallError::Rpc(obj) => ServerError::Rpc {
                code: obj.code,
                message: obj.message,
            },
        }
    }
}
