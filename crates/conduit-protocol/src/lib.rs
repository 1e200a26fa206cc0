//! # Conduit protocol types
//!
//! The closed method set and typed payloads exchanged between an
//! orchestrating client and a capability-providing server: the initialize
//! handshake with capability negotiation, tools, resources (with
//! subscriptions), prompts, sampling and root-listing callbacks, and the
//! server-initiated notification payloads.
//!
//! Everything here is plain data; session and correlation semantics live in
//! the role crates.

pub mod initialize;
pub mod logging;
pub mod methods;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod roots;
pub mod sampling;
pub mod tools;
pub mod version;

pub use initialize::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, LoggingCapabilities,
    PromptsCapabilities, ResourcesCapabilities, RootsCapabilities, SamplingCapabilities,
    ServerCapabilities, ToolsCapabilities,
};
pub use logging::{LoggingLevel, LoggingMessageParams};
pub use methods::Method;
pub use notifications::{CancelledParams, ProgressParams, ResourceUpdatedParams};
pub use prompts::{GetPromptParams, GetPromptResult, ListPromptsResult, Prompt, PromptArgument, PromptMessage};
pub use resources::{
    ListResourcesResult, ReadResourceParams, ReadResourceResult, Resource, ResourceContents,
    SubscribeParams, UnsubscribeParams,
};
pub use roots::{ListRootsResult, Root};
pub use sampling::{Content, CreateMessageParams, CreateMessageResult, Role, SamplingMessage};
pub use tools::{CallToolParams, CallToolResult, ListToolsResult, Tool, ToolContent, ToolSchema};
pub use version::ProtocolVersion;

use conduit_json_rpc::JsonRpcErrorObject;

/// Common result type for protocol operations
pub type McpResult<T> = Result<T, McpError>;

/// Protocol-level errors, mapped onto JSON-RPC error objects at the
/// dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("capability not negotiated: {0}")]
    CapabilityNotSupported(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("resource read failed: {0}")]
    ResourceRead(String),

    #[error("prompt render failed: {0}")]
    PromptRender(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl McpError {
    pub fn missing_param(param: &str) -> Self {
        Self::MissingParameter(param.to_string())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    /// Map onto a JSON-RPC error object. Parameter problems become
    /// INVALID_PARAMS, lookups and execution failures use the
    /// implementation-defined server range, everything else is internal.
    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        match self {
            McpError::InvalidParameters(msg) => JsonRpcErrorObject::invalid_params(msg),
            McpError::MissingParameter(param) => JsonRpcErrorObject::invalid_params(&format!(
                "Missing required parameter: {}",
                param
            )),

            McpError::ToolNotFound(name) => {
                JsonRpcErrorObject::server_error(-32001, &format!("Tool not found: {}", name), None)
            }
            McpError::ResourceNotFound(uri) => JsonRpcErrorObject::server_error(
                -32002,
                &format!("Resource not found: {}", uri),
                None,
            ),
            McpError::PromptNotFound(name) => JsonRpcErrorObject::server_error(
                -32003,
                &format!("Prompt not found: {}", name),
                None,
            ),

            McpError::ToolExecution(msg) => JsonRpcErrorObject::server_error(
                -32010,
                &format!("Tool execution failed: {}", msg),
                None,
            ),
            McpError::ResourceRead(msg) => JsonRpcErrorObject::server_error(
                -32012,
                &format!("Resource read failed: {}", msg),
                None,
            ),
            McpError::PromptRender(msg) => JsonRpcErrorObject::server_error(
                -32013,
                &format!("Prompt render failed: {}", msg),
                None,
            ),

            McpError::CapabilityNotSupported(cap) => JsonRpcErrorObject::server_error(
                -32021,
                &format!("Capability not negotiated: {}", cap),
                None,
            ),
            McpError::VersionMismatch { expected, actual } => JsonRpcErrorObject::server_error(
                -32022,
                &format!(
                    "Protocol version mismatch: expected {}, got {}",
                    expected, actual
                ),
                None,
            ),
            McpError::Session(msg) => JsonRpcErrorObject::server_error(
                -32031,
                &format!("Session error: {}", msg),
                None,
            ),

            McpError::Serialization(err) => {
                JsonRpcErrorObject::internal_error(Some(format!("Serialization error: {}", err)))
            }
        }
    }
}
