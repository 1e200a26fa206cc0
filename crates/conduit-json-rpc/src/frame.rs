//! Inbound frame classification.
//!
//! A frame is one complete JSON document. Classification inspects only the
//! presence of `id` and `method`: both present means request, `id` alone
//! means response, `method` alone means notification, neither means the
//! frame is malformed. The classified envelope is then decoded strictly, so
//! a frame that looks like a request but fails envelope validation (bad
//! version tag, wrong field types) is reported as malformed rather than
//! silently coerced.

use serde_json::Value;

use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcMessage;

/// One classified inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(JsonRpcRequest),
    Response(JsonRpcMessage),
    Notification(JsonRpcNotification),
    /// Could not be classified or decoded; carries the reason for logging.
    Malformed(String),
}

/// Classify and decode one frame.
pub fn classify(bytes: &[u8]) -> Frame {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => return Frame::Malformed(format!("invalid JSON: {}", e)),
    };

    if !value.is_object() {
        return Frame::Malformed("frame is not a JSON object".to_string());
    }

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();

    match (has_id, has_method) {
        (true, true) => match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => Frame::Request(request),
            Err(e) => Frame::Malformed(format!("invalid request envelope: {}", e)),
        },
        (true, false) => match serde_json::from_value::<JsonRpcMessage>(value) {
            Ok(message) => Frame::Response(message),
            Err(e) => Frame::Malformed(format!("invalid response envelope: {}", e)),
        },
        (false, true) => match serde_json::from_value::<JsonRpcNotification>(value) {
            Ok(notification) => Frame::Notification(notification),
            Err(e) => Frame::Malformed(format!("invalid notification envelope: {}", e)),
        },
        (false, false) => Frame::Malformed("frame has neither id nor method".to_string()),
    }
}
