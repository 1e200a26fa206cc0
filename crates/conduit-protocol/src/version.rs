use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Protocol revision negotiated during the handshake.
///
/// Negotiation is an exact string match: a peer speaking any other revision
/// gets a version-mismatch error and the session stays uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "2025-06-18")]
    V2025_06_18,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion::V2025_06_18;

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V2025_06_18 => "2025-06-18",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2025-06-18" => Ok(ProtocolVersion::V2025_06_18),
            other => Err(format!("unsupported protocol version: {}", other)),
        }
    }
}
