//! # Conduit server
//!
//! The capability-providing side of the protocol. A [`Server`] is built from
//! registered tools, resources and prompts, derives its advertised
//! capabilities from those registrations, and serves any
//! [`Transport`](conduit_transport::Transport) — point-to-point stdio or the
//! session-multiplexing SSE transport in [`sse`]. Inbound frames pass the
//! session state machine before any handler runs; outbound it offers
//! broadcast and subscription-targeted notifications plus correlated calls
//! back into the client (sampling, roots).
//!
//! ```no_run
//! use std::collections::HashMap;
//! use async_trait::async_trait;
//! use conduit_protocol::{CallToolResult, McpError, ToolContent};
//! use conduit_server::{McpTool, Server};
//! use serde_json::Value;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl McpTool for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     async fn call(&self, _args: HashMap<String, Value>) -> Result<CallToolResult, McpError> {
//!         Ok(CallToolResult::success(vec![ToolContent::text("hi")]))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::builder().name("demo").tool(Hello).build();
//! let transport = std::sync::Arc::new(conduit_transport::StdioTransport::new());
//! server.serve(transport).await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod registry;
mod router;
pub mod server;
pub mod session;
pub mod sse;

pub use builder::ServerBuilder;
pub use error::ServerError;
pub use registry::{McpPrompt, McpResource, McpTool};
pub use server::Server;
pub use session::{Session, SessionManager, SessionState};
pub use sse::{SseServerConfig, SseServerTransport};
