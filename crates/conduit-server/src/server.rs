//! The capability-providing server.
//!
//! A [`Server`] binds one transport (which may multiplex many sessions),
//! routes inbound frames through the session state machine, and offers the
//! outbound surface: broadcast notifications, subscription-targeted resource
//! updates, and server-initiated calls back into the client (sampling,
//! roots) correlated through each session's own pending table.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use conduit_json_rpc::pending::await_reply;
use conduit_json_rpc::{CallError, JsonRpcNotification, JsonRpcRequest, RequestId};
use conduit_protocol::{
    CreateMessageParams, CreateMessageResult, Implementation, ListRootsResult, LoggingLevel,
    LoggingMessageParams, Method, ProgressParams, ResourceUpdatedParams, ServerCapabilities,
};
use conduit_transport::{BoxedTransport, SessionId, Transport};

use crate::error::ServerError;
use crate::registry::Registry;
use crate::router::Router;
use crate::session::SessionManager;

pub(crate) struct ServerInner {
    pub info: Implementation,
    pub instructions: Option<String>,
    pub capabilities: ServerCapabilities,
    pub registry: Registry,
    pub sessions: SessionManager,
    transport: RwLock<Option<BoxedTransport>>,
    /// Deadline for server-initiated calls into the client.
    pub call_timeout: Duration,
}

impl ServerInner {
    pub(crate) fn new(
        info: Implementation,
        instructions: Option<String>,
        capabilities: ServerCapabilities,
        registry: Registry,
        call_timeout: Duration,
    ) -> Self {
        Self {
            info,
            instructions,
            capabilities,
            registry,
            sessions: SessionManager::new(),
            transport: RwLock::new(None),
            call_timeout,
        }
    }

    pub(crate) async fn send_frame(
        &self,
        session_id: &SessionId,
        frame: &[u8],
    ) -> Result<(), ServerError> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(ServerError::NotServing)?;
        transport.send(session_id, frame).await?;
        Ok(())
    }

    pub(crate) async fn send_notification(
        &self,
        session_id: &SessionId,
        method: Method,
        params: Option<Value>,
    ) -> Result<(), ServerError> {
        let notification = JsonRpcNotification::new(method.as_str(), params);
        let frame = serde_json::to_vec(&notification)?;
        self.send_frame(session_id, &frame).await
    }
}

/// Server handle; cheap to clone, every clone shares the same state.
#[derive(Clone)]
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder() -> crate::builder::ServerBuilder {
        crate::builder::ServerBuilder::new()
    }

    /// Bind to a transport and start accepting frames. The transport may be
    /// point-to-point (stdio, in-memory) or session-multiplexing (SSE).
    pub async fn serve(&self, transport: BoxedTransport) -> Result<(), ServerError> {
        transport.set_handler(Arc::new(Router::new(self.inner.clone())));
        *self.inner.transport.write() = Some(transport.clone());
        transport.start().await?;
        Ok(())
    }

    /// Tear everything down: fail outstanding server-to-client calls on
    /// every session, then drain the transport, bounded by `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        self.inner.sessions.close_all();
        let transport = self.inner.transport.write().take();
        if let Some(transport) = transport {
            transport.shutdown(deadline).await?;
        }
        Ok(())
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.inner.capabilities
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Broadcast one notification to every Ready session. Best effort: a
    /// failed send is logged and the remaining sessions still get theirs.
    async fn broadcast(&self, method: Method, params: Option<Value>) {
        let notification = JsonRpcNotification::new(method.as_str(), params);
        let frame = match serde_json::to_vec(&notification) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unencodable notification, dropping");
                return;
            }
        };
        for session_id in self.inner.sessions.ready_sessions() {
            if let Err(e) = self.inner.send_frame(&session_id, &frame).await {
                debug!(session_id = %session_id, error = %e, "notification send failed");
            }
        }
    }

    pub async fn notify_tools_list_changed(&self) {
        self.broadcast(Method::NotificationToolsListChanged, None)
            .await;
    }

    pub async fn notify_resources_list_changed(&self) {
        self.broadcast(Method::NotificationResourcesListChanged, None)
            .await;
    }

    pub async fn notify_prompts_list_changed(&self) {
        self.broadcast(Method::NotificationPromptsListChanged, None)
            .await;
    }

    /// Tell only the sessions subscribed to `uri` that it changed.
    pub async fn notify_resource_updated(&self, uri: &str) {
        let subscribers = self.inner.sessions.subscribers_of(uri);
        if subscribers.is_empty() {
            return;
        }
        let params = ResourceUpdatedParams {
            uri: uri.to_string(),
        };
        let params = match serde_json::to_value(&params) {
            Ok(value) => Some(value),
            Err(_) => return,
        };
        for session_id in subscribers {
            if let Err(e) = self
                .inner
                .send_notification(
                    &session_id,
                    Method::NotificationResourcesUpdated,
                    params.clone(),
                )
                .await
            {
                debug!(session_id = %session_id, uri, error = %e, "update notification failed");
            }
        }
    }

    /// Broadcast a structured log record to every Ready session.
    pub async fn log_message(&self, level: LoggingLevel, logger: Option<String>, data: Value) {
        let params = LoggingMessageParams {
            level,
            logger,
            data,
        };
        match serde_json::to_value(&params) {
            Ok(value) => self.broadcast(Method::NotificationMessage, Some(value)).await,
            Err(e) => warn!(error = %e, "unencodable log message"),
        }
    }

    /// Report progress on a long-running request to the session that issued
    /// it.
    pub async fn notify_progress(
        &self,
        session_id: &SessionId,
        progress_token: RequestId,
        progress: f64,
        total: Option<f64>,
    ) -> Result<(), ServerError> {
        let params = ProgressParams {
            progress_token,
            progress,
            total,
        };
        self.inner
            .send_notification(
                session_id,
                Method::NotificationProgress,
                Some(serde_json::to_value(&params)?),
            )
            .await
    }

    /// Ask the client to run a sampling request. Requires the client to have
    /// declared the `sampling` capability in its handshake.
    pub async fn create_message(
        &self,
        session_id: &SessionId,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, ServerError> {
        let declared = self
            .inner
            .sessions
            .client_capabilities(session_id)
            .is_some_and(|caps| caps.sampling.is_some());
        if !declared {
            return Err(ServerError::ClientCapabilityMissing("sampling"));
        }
        let value = self
            .call_client(
                session_id,
                Method::SamplingCreateMessage,
                Some(serde_json::to_value(&params)?),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Ask the client for its workspace roots. Requires the `roots`
    /// capability.
    pub async fn list_roots(&self, session_id: &SessionId) -> Result<ListRootsResult, ServerError> {
        let declared = self
            .inner
            .sessions
            .client_capabilities(session_id)
            .is_some_and(|caps| caps.roots.is_some());
        if !declared {
            return Err(ServerError::ClientCapabilityMissing("roots"));
        }
        let value = self.call_client(session_id, Method::RootsList, None).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// One server-initiated call: register on the session's pending table,
    /// send, await the reply within the configured deadline.
    async fn call_client(
        &self,
        session_id: &SessionId,
        method: Method,
        params: Option<Value>,
    ) -> Result<Value, ServerError> {
        let pending = self
            .inner
            .sessions
            .pending_for(session_id)
            .ok_or_else(|| ServerError::UnknownSession(session_id.clone()))?;

        let (id, rx) = pending.register();
        let request = JsonRpcRequest::new(id.clone(), method.as_str(), params);
        let frame = serde_json::to_vec(&request)?;

        if let Err(e) = self.inner.send_frame(session_id, &frame).await {
            pending.forget(&id);
            return Err(e);
        }
        debug!(session_id = %session_id, %id, %method, "server-initiated call sent");

        match await_reply(rx, self.inner.call_timeout, &CancellationToken::new()).await {
            Ok(value) => Ok(value),
            Err(err @ (CallError::Timeout | CallError::Cancelled)) => {
                pending.forget(&id);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
