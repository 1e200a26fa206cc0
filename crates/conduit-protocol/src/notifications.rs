//! Server- and client-initiated notification payloads.
//!
//! The list-changed notifications carry no parameters; only the payloads
//! with fields live here. Envelope assembly belongs to the role crates.

use serde::{Deserialize, Serialize};

use conduit_json_rpc::RequestId;

/// Parameters of `notifications/progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: RequestId,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// Parameters of `notifications/cancelled`.
///
/// Informational only: the issuing side has already resolved the local call,
/// and the receiving side may ignore it if the request already completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters of `notifications/resources/updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdatedParams {
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_params_wire_shape() {
        let params = CancelledParams {
            request_id: RequestId::Number(4),
            reason: Some("timeout".to_string()),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["requestId"], 4);
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn test_progress_params_round_trip() {
        let params = ProgressParams {
            progress_token: RequestId::from("op-1"),
            progress: 0.5,
            total: Some(1.0),
        };
        let encoded = serde_json::to_string(&params).unwrap();
        let decoded: ProgressParams = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.progress_token, RequestId::from("op-1"));
    }
}
