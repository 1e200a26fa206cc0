//! # JSON-RPC 2.0 foundation
//!
//! Transport-agnostic JSON-RPC 2.0 envelopes plus the two pieces of machinery
//! both peer roles share: frame classification with immutable method-keyed
//! dispatch tables, and the pending-request table that correlates responses
//! to outstanding calls.
//!
//! Nothing in this crate knows about a particular protocol or transport; it
//! only moves well-formed (or deliberately tolerated malformed) envelopes.

pub mod dispatch;
pub mod error;
pub mod frame;
pub mod notification;
pub mod pending;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use dispatch::{Dispatcher, DispatcherBuilder, NotificationHandler, RequestHandler};
pub use error::{JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use frame::{Frame, classify};
pub use notification::JsonRpcNotification;
pub use pending::{CallError, PendingRequests};
pub use request::JsonRpcRequest;
pub use response::{JsonRpcMessage, JsonRpcResponse};
pub use types::{JsonRpcVersion, RequestId, RequestIdAllocator};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
