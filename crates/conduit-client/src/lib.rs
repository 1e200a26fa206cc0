//! # Conduit client
//!
//! The orchestrating side of the protocol. A [`Client`] drives the
//! initialize handshake over any [`Transport`](conduit_transport::Transport),
//! correlates concurrent calls through a pending-request table, exposes the
//! typed operation surface (tools, resources, prompts), and answers
//! server-initiated callbacks (sampling, roots) through registered handlers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_client::{Client, ClientConfig};
//! use conduit_transport::ChildProcessTransport;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ChildProcessTransport::new("my-server", vec![]));
//! let client = Client::builder(ClientConfig::new("demo", "0.1.0")).build(transport);
//! let info = client.connect().await?;
//! println!("connected to {}", info.server_info.name);
//! let tools = client.list_tools().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod sse;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, Timeouts};
pub use error::ClientError;
pub use handlers::{
    NotificationSink, RootsProvider, SamplingHandler, ServerNotification,
};
pub use sse::SseClientTransport;
