use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JsonRpcVersion;

/// A JSON-RPC notification: carries a `method` but no `id`, and therefore
/// never receives a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_round_trip() {
        let notification = JsonRpcNotification::new(
            "notifications/resources/updated",
            Some(json!({"uri": "file:///tmp/a"})),
        );

        let encoded = serde_json::to_string(&notification).unwrap();
        assert!(!encoded.contains("\"id\""));

        let decoded: JsonRpcNotification = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.method, "notifications/resources/updated");
        assert_eq!(decoded.params, Some(json!({"uri": "file:///tmp/a"})));
    }
}
