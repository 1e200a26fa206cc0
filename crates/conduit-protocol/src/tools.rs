//! Tool discovery and invocation payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared parameter shape for a tool, a restricted JSON-schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl ToolSchema {
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: None,
            required: None,
        }
    }

    pub fn with_properties(mut self, properties: HashMap<String, Value>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_required(mut self, required: Vec<String>) -> Self {
        self.required = Some(required);
        self
    }

    /// The collaborator contract the dispatch layer relies on before a tool
    /// handler runs: every declared-required key must be present.
    pub fn validate(&self, arguments: &HashMap<String, Value>) -> Result<(), String> {
        if let Some(required) = &self.required {
            for key in required {
                if !arguments.contains_key(key) {
                    return Err(format!("missing required argument '{}'", key));
                }
            }
        }
        Ok(())
    }
}

/// One entry in the server's tool table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: ToolSchema,
}

impl Tool {
    pub fn new(name: impl Into<String>, input_schema: ToolSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub arguments: HashMap<String, Value>,
}

/// One piece of tool output content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text { text: String },
    Image { data: String, mime_type: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolContent::Text { text: text.into() }
    }
}

/// Result of `tools/call`. A failed tool run is still a *successful* RPC
/// response with `isError` set; protocol errors are reserved for transport
/// and dispatch problems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn success(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_wire_shape() {
        let tool = Tool::new(
            "echo",
            ToolSchema::object().with_required(vec!["message".to_string()]),
        )
        .with_description("Echo a message back");

        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["name"], "echo");
        assert_eq!(json["inputSchema"]["type"], "object");
        assert_eq!(json["inputSchema"]["required"][0], "message");
    }

    #[test]
    fn test_schema_required_key_check() {
        let schema = ToolSchema::object().with_required(vec!["message".to_string()]);

        let mut args = HashMap::new();
        assert!(schema.validate(&args).is_err());

        args.insert("message".to_string(), json!("hi"));
        assert!(schema.validate(&args).is_ok());
    }

    #[test]
    fn test_call_tool_result_tagged_content() {
        let result = CallToolResult::success(vec![ToolContent::text("ok")]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "ok");
        assert!(json.get("isError").is_none());

        let failed = CallToolResult::error("nope");
        assert_eq!(serde_json::to_value(&failed).unwrap()["isError"], true);
    }
}
