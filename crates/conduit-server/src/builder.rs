//! Server builder.
//!
//! Registrations are collected here and frozen into the server's lookup
//! tables; capabilities are derived from what was registered, so the
//! handshake never advertises an operation the server cannot perform.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use conduit_protocol::{
    Implementation, LoggingCapabilities, PromptsCapabilities, ResourcesCapabilities,
    ServerCapabilities, ToolsCapabilities,
};

use crate::registry::{McpPrompt, McpResource, McpTool, Registry};
use crate::server::{Server, ServerInner};

const DEFAULT_CLIENT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    tools: HashMap<String, Arc<dyn McpTool>>,
    resources: HashMap<String, Arc<dyn McpResource>>,
    prompts: HashMap<String, Arc<dyn McpPrompt>>,
    client_call_timeout: Duration,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            tools: HashMap::new(),
            resources: HashMap::new(),
            prompts: HashMap::new(),
            client_call_timeout: DEFAULT_CLIENT_CALL_TIMEOUT,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Free-form guidance returned to clients in the initialize result.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Deadline for server-initiated calls into the client.
    pub fn client_call_timeout(mut self, timeout: Duration) -> Self {
        self.client_call_timeout = timeout;
        self
    }

    pub fn tool(self, tool: impl McpTool + 'static) -> Self {
        self.tool_arc(Arc::new(tool))
    }

    pub fn tool_arc(mut self, tool: Arc<dyn McpTool>) -> Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "tool registered twice, keeping the later one");
        }
        self
    }

    pub fn resource(self, resource: impl McpResource + 'static) -> Self {
        self.resource_arc(Arc::new(resource))
    }

    pub fn resource_arc(mut self, resource: Arc<dyn McpResource>) -> Self {
        let uri = resource.uri().to_string();
        if self.resources.insert(uri.clone(), resource).is_some() {
            warn!(uri = %uri, "resource registered twice, keeping the later one");
        }
        self
    }

    pub fn prompt(self, prompt: impl McpPrompt + 'static) -> Self {
        self.prompt_arc(Arc::new(prompt))
    }

    pub fn prompt_arc(mut self, prompt: Arc<dyn McpPrompt>) -> Self {
        let name = prompt.name().to_string();
        if self.prompts.insert(name.clone(), prompt).is_some() {
            warn!(prompt = %name, "prompt registered twice, keeping the later one");
        }
        self
    }

    /// Capabilities follow registrations: a section appears only when the
    /// server can actually serve it.
    fn derive_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            logging: Some(LoggingCapabilities {}),
            tools: (!self.tools.is_empty()).then(|| ToolsCapabilities {
                list_changed: Some(true),
            }),
            resources: (!self.resources.is_empty()).then(|| ResourcesCapabilities {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            prompts: (!self.prompts.is_empty()).then(|| PromptsCapabilities {
                list_changed: Some(true),
            }),
            experimental: None,
        }
    }

    pub fn build(self) -> Server {
        let capabilities = self.derive_capabilities();
        let registry = Registry {
            tools: Arc::new(self.tools),
            resources: Arc::new(self.resources),
            prompts: Arc::new(self.prompts),
        };
        Server {
            inner: Arc::new(ServerInner::new(
                Implementation::new(self.name, self.version),
                self.instructions,
                capabilities,
                registry,
                self.client_call_timeout,
            )),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
