//! Client configuration.

use std::time::Duration;

use conduit_protocol::{ClientCapabilities, Implementation, RootsCapabilities, SamplingCapabilities};

/// Per-operation timeouts. Every suspended call resolves within its bound;
/// there is no unbounded wait anywhere in the client.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Deadline for the initialize exchange.
    pub initialize: Duration,
    /// Default deadline for ordinary calls.
    pub call: Duration,
    /// Deadline for `ping`.
    pub ping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            initialize: Duration::from_secs(30),
            call: Duration::from_secs(60),
            ping: Duration::from_secs(10),
        }
    }
}

/// Configuration for [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name and version reported in the handshake.
    pub client_info: Implementation,
    /// Capabilities declared in the handshake. Handler registration on the
    /// builder fills in the matching entries automatically.
    pub capabilities: ClientCapabilities,
    pub timeouts: Timeouts,
    /// Whether to send `notifications/cancelled` when a call times out or is
    /// cancelled locally. Best effort either way.
    pub notify_cancelled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            capabilities: ClientCapabilities::default(),
            timeouts: Timeouts::default(),
            notify_cancelled: true,
        }
    }
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client_info: Implementation::new(name, version),
            ..Default::default()
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub(crate) fn declare_sampling(&mut self) {
        self.capabilities.sampling = Some(SamplingCapabilities {});
    }

    pub(crate) fn declare_roots(&mut self) {
        self.capabilities.roots = Some(RootsCapabilities {
            list_changed: Some(false),
        });
    }
}
