//! Root-listing callback payloads (server asks the client for its roots).

use serde::{Deserialize, Serialize};

/// One root directory or URI the client exposes to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Root {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Result of `roots/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRootsResult {
    pub roots: Vec<Root>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_round_trip() {
        let result = ListRootsResult {
            roots: vec![Root::new("file:///workspace").with_name("workspace")],
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: ListRootsResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, result);
    }
}
