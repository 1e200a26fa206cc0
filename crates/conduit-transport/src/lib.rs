//! # Transport layer
//!
//! Moves opaque frames between peers, independent of protocol semantics.
//! A frame is one complete JSON document; stream transports delimit frames
//! with a newline and resynchronize past malformed lines instead of failing
//! the stream.
//!
//! Point-to-point transports (stdio, child process, in-memory pipe) carry
//! exactly one implicit session. Multi-session transports (the SSE pair in
//! the role crates) mint their own session tokens and report them through
//! the same [`FrameHandler`] contract.

pub mod framing;
pub mod memory;
pub mod stdio;

pub use memory::InMemoryTransport;
pub use stdio::{ChildProcessTransport, StdioTransport};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Identifies one logical connection on a transport.
pub type SessionId = String;

/// The implicit session id used by point-to-point transports.
pub const POINT_TO_POINT_SESSION: &str = "p2p";

/// Receiver side of a transport: invoked once per inbound frame, plus a
/// teardown hook per session so the protocol layer can release state.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, session_id: &SessionId, frame: Bytes);

    /// The session's connection went away; no more frames will arrive for it.
    async fn on_close(&self, session_id: &SessionId) {
        let _ = session_id;
    }
}

/// Transport failures. Construction/start failures are hard errors; this
/// layer never retries on its own.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn child process: {0}")]
    Spawn(String),

    #[error("failed to bind listener: {0}")]
    Bind(String),

    #[error("unknown or expired session: {0}")]
    SessionNotFound(SessionId),

    #[error("transport not started")]
    NotStarted,

    #[error("transport closed")]
    Closed,

    #[error("shutdown deadline elapsed before receive loop drained")]
    ShutdownTimeout,

    #[error("HTTP transport error: {0}")]
    Http(String),
}

/// Abstract bidirectional frame channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the channel. Idempotent; a second call is a no-op.
    /// The handler must be installed before `start`.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send one frame to one session. Atomic per call: concurrent senders
    /// may interleave *between* frames but never within one.
    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError>;

    /// Install the inbound-frame handler.
    fn set_handler(&self, handler: Arc<dyn FrameHandler>);

    /// Stop accepting and release resources. Idempotent; double-close is a
    /// no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Close, then wait until the receive loop has observed cancellation and
    /// exited, bounded by `deadline`. Exceeding the deadline yields
    /// [`TransportError::ShutdownTimeout`], never a hang.
    async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError>;
}

/// Boxed transport, the form the role crates hold.
pub type BoxedTransport = Arc<dyn Transport>;
