//! Application hooks for server-initiated traffic.
//!
//! The server may call back into the client (sampling, root listing) and may
//! push notifications at any time after the handshake. Callbacks the
//! application did not register are answered with METHOD_NOT_FOUND by the
//! receive loop, so an unprepared client never hangs the server's call.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use conduit_protocol::{
    CancelledParams, CreateMessageParams, CreateMessageResult, ListRootsResult,
    LoggingMessageParams, McpError, Method, ProgressParams, ResourceUpdatedParams,
};

/// Answers `sampling/createMessage` requests from the server.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, McpError>;
}

/// Answers `roots/list` requests from the server.
#[async_trait]
pub trait RootsProvider: Send + Sync {
    async fn list_roots(&self) -> Result<ListRootsResult, McpError>;
}

/// One decoded server-push notification.
#[derive(Debug, Clone)]
pub enum ServerNotification {
    ToolsListChanged,
    PromptsListChanged,
    ResourcesListChanged,
    ResourceUpdated(ResourceUpdatedParams),
    Progress(ProgressParams),
    LogMessage(LoggingMessageParams),
    Cancelled(CancelledParams),
}

/// Receives decoded server notifications. Delivery is in arrival order per
/// connection; a slow sink delays later notifications, it never drops them.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_notification(&self, notification: ServerNotification);
}

/// Decode a wire notification into the typed event, or `None` for methods
/// outside the known set (ignored by contract) and undecodable payloads.
pub(crate) fn decode_notification(method: &str, params: Option<Value>) -> Option<ServerNotification> {
    let known: Method = method.parse().ok()?;

    fn parse<T: serde::de::DeserializeOwned>(method: &str, params: Option<Value>) -> Option<T> {
        match serde_json::from_value(params.unwrap_or(Value::Null)) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(method, error = %e, "undecodable notification params, ignoring");
                None
            }
        }
    }

    match known {
        Method::NotificationToolsListChanged => Some(ServerNotification::ToolsListChanged),
        Method::NotificationPromptsListChanged => Some(ServerNotification::PromptsListChanged),
        Method::NotificationResourcesListChanged => Some(ServerNotification::ResourcesListChanged),
        Method::NotificationResourcesUpdated => {
            parse(method, params).map(ServerNotification::ResourceUpdated)
        }
        Method::NotificationProgress => parse(method, params).map(ServerNotification::Progress),
        Method::NotificationMessage => parse(method, params).map(ServerNotification::LogMessage),
        Method::NotificationCancelled => parse(method, params).map(ServerNotification::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_known_notifications() {
        assert!(matches!(
            decode_notification("notifications/tools/list_changed", None),
            Some(ServerNotification::ToolsListChanged)
        ));

        let updated = decode_notification(
            "notifications/resources/updated",
            Some(json!({"uri": "file:///tmp/a"})),
        );
        let Some(ServerNotification::ResourceUpdated(params)) = updated else {
            panic!("expected resource-updated, got {:?}", updated);
        };
        assert_eq!(params.uri, "file:///tmp/a");
    }

    #[test]
    fn test_unknown_and_undecodable_are_none() {
        assert!(decode_notification("notifications/whatever", None).is_none());
        assert!(
            decode_notification("notifications/resources/updated", Some(json!("nope"))).is_none()
        );
    }
}
