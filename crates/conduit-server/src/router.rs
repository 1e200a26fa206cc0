//! Inbound frame routing and the session state machine gate.
//!
//! Every frame is classified, gated against the session's lifecycle state,
//! then dispatched on its own task so one slow handler never holds up the
//! receive loop. A request always produces exactly one reply; a frame that
//! arrives before the handshake completes (other than `initialize`, `ping`
//! and `notifications/initialized`) is rejected with INVALID_REQUEST and its
//! handler never runs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use conduit_json_rpc::{
    Dispatcher, Frame, JsonRpcErrorObject, JsonRpcMessage, NotificationHandler, RequestHandler,
    classify,
};
use conduit_protocol::{
    CallToolParams, CallToolResult, CancelledParams, GetPromptParams, InitializeParams,
    InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult, McpError, Method,
    ReadResourceParams, ReadResourceResult, SubscribeParams, UnsubscribeParams,
};
use conduit_transport::{FrameHandler, SessionId};

use crate::server::ServerInner;
use crate::session::SessionState;

/// The transport-facing entry point: one per served transport.
pub(crate) struct Router {
    inner: Arc<ServerInner>,
    dispatcher: Dispatcher,
}

impl Router {
    pub(crate) fn new(inner: Arc<ServerInner>) -> Self {
        let dispatcher = Dispatcher::builder()
            .request(Method::Initialize.as_str(), handler(&inner, InitializeOp))
            .request(Method::Ping.as_str(), handler(&inner, PingOp))
            .request(Method::ToolsList.as_str(), handler(&inner, ToolsListOp))
            .request(Method::ToolsCall.as_str(), handler(&inner, ToolsCallOp))
            .request(
                Method::ResourcesList.as_str(),
                handler(&inner, ResourcesListOp),
            )
            .request(
                Method::ResourcesRead.as_str(),
                handler(&inner, ResourcesReadOp),
            )
            .request(
                Method::ResourcesSubscribe.as_str(),
                handler(&inner, SubscribeOp),
            )
            .request(
                Method::ResourcesUnsubscribe.as_str(),
                handler(&inner, UnsubscribeOp),
            )
            .request(Method::PromptsList.as_str(), handler(&inner, PromptsListOp))
            .request(Method::PromptsGet.as_str(), handler(&inner, PromptsGetOp))
            .notification(
                Method::NotificationInitialized.as_str(),
                Arc::new(InitializedNote {
                    inner: inner.clone(),
                }),
            )
            .notification(
                Method::NotificationCancelled.as_str(),
                Arc::new(CancelledNote),
            )
            .build();
        Self { inner, dispatcher }
    }

    /// Whether this frame's method may travel in the session's current
    /// state. Unknown methods are gated too: the state machine outranks
    /// METHOD_NOT_FOUND.
    fn admitted(&self, session_id: &SessionId, method: &str) -> bool {
        let ready = self.inner.sessions.state(session_id) == Some(SessionState::Ready);
        ready
            || method
                .parse::<Method>()
                .is_ok_and(|m| m.allowed_before_ready())
    }
}

#[async_trait]
impl FrameHandler for Router {
    async fn on_frame(&self, session_id: &SessionId, frame: Bytes) {
        self.inner.sessions.ensure(session_id);

        match classify(&frame) {
            Frame::Request(request) => {
                if !self.admitted(session_id, &request.method) {
                    debug!(
                        session_id = %session_id,
                        method = %request.method,
                        "request before handshake completion rejected"
                    );
                    let reply = JsonRpcMessage::error(
                        Some(request.id),
                        JsonRpcErrorObject::invalid_request("session not initialized"),
                    );
                    send_reply(&self.inner, session_id, reply).await;
                    return;
                }
                let inner = self.inner.clone();
                let dispatcher = self.dispatcher.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    let reply = dispatcher.dispatch_request(&session_id, request).await;
                    send_reply(&inner, &session_id, reply).await;
                });
            }
            Frame::Notification(notification) => {
                if !self.admitted(session_id, &notification.method) {
                    debug!(
                        session_id = %session_id,
                        method = %notification.method,
                        "notification before handshake completion dropped"
                    );
                    return;
                }
                let dispatcher = self.dispatcher.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    dispatcher
                        .dispatch_notification(&session_id, notification)
                        .await;
                });
            }
            Frame::Response(message) => {
                // Answer to a server-initiated call on this session.
                match self.inner.sessions.pending_for(session_id) {
                    Some(pending) => {
                        pending.resolve(message);
                    }
                    None => {
                        warn!(session_id = %session_id, "response frame for unknown session");
                    }
                }
            }
            Frame::Malformed(reason) => {
                warn!(session_id = %session_id, %reason, "dropping malformed frame");
            }
        }
    }

    async fn on_close(&self, session_id: &SessionId) {
        self.inner.sessions.close(session_id);
    }
}

async fn send_reply(inner: &ServerInner, session_id: &SessionId, reply: JsonRpcMessage) {
    match serde_json::to_vec(&reply) {
        Ok(frame) => {
            if let Err(e) = inner.send_frame(session_id, &frame).await {
                warn!(session_id = %session_id, error = %e, "failed to send reply");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode reply"),
    }
}

/// One built-in operation, expressed over typed payloads; the adapter below
/// owns decoding and error-object mapping.
#[async_trait]
trait Operation: Send + Sync + 'static {
    async fn run(
        &self,
        inner: &ServerInner,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError>;
}

struct OperationAdapter<O> {
    inner: Arc<ServerInner>,
    op: O,
}

fn handler<O: Operation>(inner: &Arc<ServerInner>, op: O) -> Arc<dyn RequestHandler> {
    Arc::new(OperationAdapter {
        inner: inner.clone(),
        op,
    })
}

#[async_trait]
impl<O: Operation> RequestHandler for OperationAdapter<O> {
    async fn handle(
        &self,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorObject> {
        self.op
            .run(&self.inner, session_id, params)
            .await
            .map_err(|e| e.to_error_object())
    }
}

fn decode<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, McpError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| McpError::invalid_params(e.to_string()))
}

fn encode<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    Ok(serde_json::to_value(value)?)
}

struct InitializeOp;

#[async_trait]
impl Operation for InitializeOp {
    async fn run(
        &self,
        inner: &ServerInner,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: InitializeParams = decode(params)?;
        // Exact version match; a client from another revision is told which
        // one this server speaks.
        let version = params.protocol_version()?;

        inner.sessions.begin_initializing(
            &session_id.to_string(),
            version,
            params.capabilities,
            params.client_info,
        )?;

        let mut result = InitializeResult::new(inner.capabilities.clone(), inner.info.clone());
        result.instructions = inner.instructions.clone();
        encode(result)
    }
}

struct PingOp;

#[async_trait]
impl Operation for PingOp {
    async fn run(
        &self,
        _inner: &ServerInner,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

struct ToolsListOp;

#[async_trait]
impl Operation for ToolsListOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        encode(ListToolsResult {
            tools: inner.registry.tool_definitions(),
        })
    }
}

struct ToolsCallOp;

#[async_trait]
impl Operation for ToolsCallOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: CallToolParams = decode(params)?;
        let tool = inner.registry.tool(&params.name)?;

        // Declared-required arguments are checked before the handler runs.
        if let Err(reason) = tool.input_schema().validate(&params.arguments) {
            return Err(McpError::invalid_params(reason));
        }

        match tool.call(params.arguments).await {
            Ok(result) => encode(result),
            // A failing tool is a successful RPC with isError set; only
            // protocol-level problems become error envelopes.
            Err(McpError::ToolExecution(message)) => encode(CallToolResult::error(message)),
            Err(other) => Err(other),
        }
    }
}

struct ResourcesListOp;

#[async_trait]
impl Operation for ResourcesListOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        encode(ListResourcesResult {
            resources: inner.registry.resource_definitions(),
        })
    }
}

struct ResourcesReadOp;

#[async_trait]
impl Operation for ResourcesReadOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: ReadResourceParams = decode(params)?;
        let resource = inner.registry.resource(&params.uri)?;
        let contents = resource.read().await?;
        encode(ReadResourceResult { contents })
    }
}

struct SubscribeOp;

#[async_trait]
impl Operation for SubscribeOp {
    async fn run(
        &self,
        inner: &ServerInner,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        if !inner.capabilities.supports_subscribe() {
            return Err(McpError::CapabilityNotSupported(
                "resources.subscribe".to_string(),
            ));
        }
        let params: SubscribeParams = decode(params)?;
        // Subscribing to a resource the server does not have is an error,
        // not a silent no-op.
        inner.registry.resource(&params.uri)?;
        inner.sessions.subscribe(&session_id.to_string(), &params.uri);
        Ok(Value::Object(serde_json::Map::new()))
    }
}

struct UnsubscribeOp;

#[async_trait]
impl Operation for UnsubscribeOp {
    async fn run(
        &self,
        inner: &ServerInner,
        session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        if !inner.capabilities.supports_subscribe() {
            return Err(McpError::CapabilityNotSupported(
                "resources.subscribe".to_string(),
            ));
        }
        let params: UnsubscribeParams = decode(params)?;
        inner
            .sessions
            .unsubscribe(&session_id.to_string(), &params.uri);
        Ok(Value::Object(serde_json::Map::new()))
    }
}

struct PromptsListOp;

#[async_trait]
impl Operation for PromptsListOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, McpError> {
        encode(ListPromptsResult {
            prompts: inner.registry.prompt_definitions(),
        })
    }
}

struct PromptsGetOp;

#[async_trait]
impl Operation for PromptsGetOp {
    async fn run(
        &self,
        inner: &ServerInner,
        _session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let params: GetPromptParams = decode(params)?;
        let prompt = inner.registry.prompt(&params.name)?;
        let result = prompt.render(params.arguments).await?;
        encode(result)
    }
}

struct InitializedNote {
    inner: Arc<ServerInner>,
}

#[async_trait]
impl NotificationHandler for InitializedNote {
    async fn handle(&self, session_id: &str, _params: Option<Value>) {
        if !self.inner.sessions.mark_ready(&session_id.to_string()) {
            // Out of order (no preceding initialize) or repeated; dropped.
            warn!(session_id, "initialized notification out of order, ignoring");
        }
    }
}

struct CancelledNote;

#[async_trait]
impl NotificationHandler for CancelledNote {
    async fn handle(&self, session_id: &str, params: Option<Value>) {
        // Informational: the client already settled its side of the call.
        match decode::<CancelledParams>(params) {
            Ok(cancelled) => debug!(
                session_id,
                request_id = %cancelled.request_id,
                reason = cancelled.reason.as_deref().unwrap_or("unspecified"),
                "client abandoned a request"
            ),
            Err(_) => debug!(session_id, "undecodable cancellation notice"),
        }
    }
}
