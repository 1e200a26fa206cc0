use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC request: carries both an `id` and a `method`.
///
/// `params`, when present, is a JSON object; the protocol layer decodes it
/// into typed payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Envelope-shape validation beyond what serde enforces: the version tag
    /// is checked by deserialization, so only an empty method remains.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.method.is_empty() {
            return Err("request method must be non-empty");
        }
        Ok(())
    }

    /// Get a named parameter, if params is an object containing it.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }
}
