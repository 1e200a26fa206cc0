//! Method-keyed dispatch with immutable handler tables.
//!
//! Tables are populated through [`DispatcherBuilder`] and frozen at
//! construction; after that dispatch is read-only and safe to share across
//! every receive loop. A request always produces exactly one reply: a
//! success, the handler's structured error, or METHOD_NOT_FOUND. A
//! notification produces none; unknown notification methods are logged and
//! swallowed, since they are the extensibility seam for newer protocol
//! revisions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::JsonRpcErrorObject;
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcMessage;

/// Handles one request method. Returns either the result payload or a
/// structured error object; the dispatcher owns envelope assembly.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorObject>;
}

/// Handles one notification method. No reply, and no way to fail upstream.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, session_id: &str, params: Option<Value>);
}

/// Builder for the frozen handler tables.
#[derive(Default)]
pub struct DispatcherBuilder {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(mut self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Self {
        self.requests.insert(method.into(), handler);
        self
    }

    pub fn notification(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        self.notifications.insert(method.into(), handler);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            requests: Arc::new(self.requests),
            notifications: Arc::new(self.notifications),
        }
    }
}

/// Read-only dispatch tables, cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    requests: Arc<HashMap<String, Arc<dyn RequestHandler>>>,
    notifications: Arc<HashMap<String, Arc<dyn NotificationHandler>>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Dispatch one request; always yields exactly one reply envelope.
    pub async fn dispatch_request(&self, session_id: &str, request: JsonRpcRequest) -> JsonRpcMessage {
        if let Err(reason) = request.validate() {
            return JsonRpcMessage::error(
                Some(request.id),
                JsonRpcErrorObject::invalid_request(reason),
            );
        }

        match self.requests.get(&request.method) {
            Some(handler) => match handler.handle(session_id, request.params).await {
                Ok(result) => JsonRpcMessage::success(request.id, result),
                Err(error) => JsonRpcMessage::error(Some(request.id), error),
            },
            None => JsonRpcMessage::error(
                Some(request.id),
                JsonRpcErrorObject::method_not_found(&request.method),
            ),
        }
    }

    /// Dispatch one notification; unknown methods are logged and dropped.
    pub async fn dispatch_notification(&self, session_id: &str, notification: JsonRpcNotification) {
        match self.notifications.get(&notification.method) {
            Some(handler) => handler.handle(session_id, notification.params).await,
            None => {
                warn!(method = %notification.method, "unknown notification method, ignoring");
            }
        }
        debug!(method = %notification.method, "notification dispatched");
    }

    pub fn has_request_method(&self, method: &str) -> bool {
        self.requests.contains_key(method)
    }

    pub fn request_methods(&self) -> Vec<&str> {
        self.requests.keys().map(String::as_str).collect()
    }
}
