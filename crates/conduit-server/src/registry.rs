//! Application-facing traits and the frozen lookup tables behind
//! `tools/*`, `resources/*` and `prompts/*`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use conduit_protocol::{
    CallToolResult, GetPromptResult, McpError, Prompt, PromptArgument, Resource, ResourceContents,
    Tool, ToolSchema,
};

/// One callable tool. Declared-required arguments are validated against
/// [`ToolSchema`] before `call` runs, so the handler may assume they exist.
#[async_trait]
pub trait McpTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn input_schema(&self) -> ToolSchema {
        ToolSchema::object()
    }

    async fn call(&self, arguments: HashMap<String, Value>) -> Result<CallToolResult, McpError>;

    /// The advertised table entry.
    fn definition(&self) -> Tool {
        let mut tool = Tool::new(self.name(), self.input_schema());
        if let Some(description) = self.description() {
            tool = tool.with_description(description);
        }
        tool
    }
}

/// One readable (and optionally watchable) resource, keyed by URI.
#[async_trait]
pub trait McpResource: Send + Sync {
    fn uri(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn mime_type(&self) -> Option<&str> {
        None
    }

    async fn read(&self) -> Result<Vec<ResourceContents>, McpError>;

    fn definition(&self) -> Resource {
        let mut resource = Resource::new(self.uri(), self.name());
        resource.description = self.description().map(String::from);
        if let Some(mime_type) = self.mime_type() {
            resource = resource.with_mime_type(mime_type);
        }
        resource
    }
}

/// One named prompt template.
#[async_trait]
pub trait McpPrompt: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn arguments(&self) -> Vec<PromptArgument> {
        Vec::new()
    }

    async fn render(
        &self,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError>;

    fn definition(&self) -> Prompt {
        let mut prompt = Prompt::new(self.name());
        if let Some(description) = self.description() {
            prompt = prompt.with_description(description);
        }
        let arguments = self.arguments();
        if !arguments.is_empty() {
            prompt = prompt.with_arguments(arguments);
        }
        prompt
    }
}

/// Frozen at build time; lookups after that are lock-free.
pub(crate) struct Registry {
    pub tools: Arc<HashMap<String, Arc<dyn McpTool>>>,
    pub resources: Arc<HashMap<String, Arc<dyn McpResource>>>,
    pub prompts: Arc<HashMap<String, Arc<dyn McpPrompt>>>,
}

impl Registry {
    pub fn tool(&self, name: &str) -> Result<Arc<dyn McpTool>, McpError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))
    }

    pub fn resource(&self, uri: &str) -> Result<Arc<dyn McpResource>, McpError> {
        self.resources
            .get(uri)
            .cloned()
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))
    }

    pub fn prompt(&self, name: &str) -> Result<Arc<dyn McpPrompt>, McpError> {
        self.prompts
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::PromptNotFound(name.to_string()))
    }

    /// Advertised tool table, sorted for stable listings.
    pub fn tool_definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn resource_definitions(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> =
            self.resources.values().map(|r| r.definition()).collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    pub fn prompt_definitions(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self.prompts.values().map(|p| p.definition()).collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }
}
