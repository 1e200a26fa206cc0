//! The orchestrating client: correlation, handshake, typed call surface.
//!
//! One [`Client`] owns one transport connection. Outgoing requests are
//! registered in the pending table before they hit the wire, then suspended
//! until a response, the per-call deadline, caller cancellation, or
//! connection teardown resolves them. Inbound traffic is classified on the
//! receive path: responses settle pending calls, requests (server callbacks
//! such as sampling) run through a dispatch table, notifications are decoded
//! and handed to the application sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conduit_json_rpc::pending::await_reply;
use conduit_json_rpc::{
    CallError, Dispatcher, Frame, JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest,
    PendingRequests, RequestHandler, RequestId, classify,
};
use conduit_protocol::{
    CallToolParams, CallToolResult, CancelledParams, CreateMessageParams, GetPromptParams,
    GetPromptResult, InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListRootsResult, ListToolsResult, McpError, Method, ReadResourceParams, ReadResourceResult,
    SubscribeParams, UnsubscribeParams,
};
use conduit_transport::{
    BoxedTransport, FrameHandler, POINT_TO_POINT_SESSION, SessionId, Transport,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::handlers::{
    NotificationSink, RootsProvider, SamplingHandler, decode_notification,
};

/// Connection lifecycle, client side. Mirrors the server's session states:
/// only `initialize` and `ping` may travel before Ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    Closed,
}

struct ClientInner {
    transport: BoxedTransport,
    config: ClientConfig,
    pending: PendingRequests,
    state: Mutex<ConnectionState>,
    server: RwLock<Option<InitializeResult>>,
    /// Dispatch table for server-initiated requests (ping, sampling, roots).
    callbacks: Dispatcher,
    sink: Option<Arc<dyn NotificationSink>>,
    /// The session this client speaks on. Client transports carry exactly
    /// one session, so this is fixed at construction.
    session: SessionId,
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.lock() = next;
    }

    async fn send_notification(
        &self,
        method: Method,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        let notification = JsonRpcNotification::new(method.as_str(), params);
        let frame = serde_json::to_vec(&notification)?;
        self.transport.send(&self.session, &frame).await?;
        Ok(())
    }

    /// Tell the server a call was abandoned locally. Best effort: the call
    /// is already settled here, so a send failure only costs the server a
    /// chance to stop early.
    async fn notify_abandoned(&self, id: &RequestId, reason: &str) {
        if !self.config.notify_cancelled {
            return;
        }
        let params = CancelledParams {
            request_id: id.clone(),
            reason: Some(reason.to_string()),
        };
        let params = match serde_json::to_value(&params) {
            Ok(value) => Some(value),
            Err(_) => None,
        };
        if let Err(e) = self
            .send_notification(Method::NotificationCancelled, params)
            .await
        {
            debug!(%id, error = %e, "could not send cancellation notice");
        }
    }
}

/// Receive path, installed as the transport's frame handler. Holds the inner
/// state weakly so dropping the client tears the loop down.
struct ReceiveLoop {
    inner: std::sync::Weak<ClientInner>,
}

#[async_trait]
impl FrameHandler for ReceiveLoop {
    async fn on_frame(&self, session_id: &SessionId, frame: Bytes) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        match classify(&frame) {
            Frame::Response(message) => {
                inner.pending.resolve(message);
            }
            Frame::Request(request) => {
                // Server callback. Answer from a spawned task so a slow
                // handler cannot stall response delivery.
                let session_id = session_id.clone();
                tokio::spawn(async move {
                    let reply = inner
                        .callbacks
                        .dispatch_request(&session_id, request)
                        .await;
                    match serde_json::to_vec(&reply) {
                        Ok(bytes) => {
                            if let Err(e) = inner.transport.send(&session_id, &bytes).await {
                                warn!(error = %e, "failed to send callback reply");
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to encode callback reply"),
                    }
                });
            }
            Frame::Notification(notification) => {
                match decode_notification(&notification.method, notification.params) {
                    Some(event) => {
                        if let Some(sink) = &inner.sink {
                            sink.on_notification(event).await;
                        }
                    }
                    None => {
                        debug!(method = %notification.method, "ignoring unknown notification");
                    }
                }
            }
            Frame::Malformed(reason) => {
                warn!(%reason, "dropping malformed inbound frame");
            }
        }
    }

    async fn on_close(&self, _session_id: &SessionId) {
        if let Some(inner) = self.inner.upgrade() {
            info!("connection closed by peer");
            inner.pending.close();
            inner.set_state(ConnectionState::Closed);
        }
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    sampling: Option<Arc<dyn SamplingHandler>>,
    roots: Option<Arc<dyn RootsProvider>>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            sampling: None,
            roots: None,
            sink: None,
        }
    }

    /// Register a sampling handler; declares the `sampling` capability.
    pub fn sampling(mut self, handler: Arc<dyn SamplingHandler>) -> Self {
        self.config.declare_sampling();
        self.sampling = Some(handler);
        self
    }

    /// Register a roots provider; declares the `roots` capability.
    pub fn roots(mut self, provider: Arc<dyn RootsProvider>) -> Self {
        self.config.declare_roots();
        self.roots = Some(provider);
        self
    }

    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Bind to a transport. The transport must not have been started yet;
    /// [`Client::connect`] starts it.
    pub fn build(self, transport: BoxedTransport) -> Client {
        let mut callbacks = Dispatcher::builder().request(Method::Ping.as_str(), Arc::new(PingBack));
        if let Some(handler) = self.sampling {
            callbacks = callbacks.request(
                Method::SamplingCreateMessage.as_str(),
                Arc::new(SamplingAdapter(handler)),
            );
        }
        if let Some(provider) = self.roots {
            callbacks =
                callbacks.request(Method::RootsList.as_str(), Arc::new(RootsAdapter(provider)));
        }

        let inner = Arc::new(ClientInner {
            transport,
            config: self.config,
            pending: PendingRequests::new(),
            state: Mutex::new(ConnectionState::Idle),
            server: RwLock::new(None),
            callbacks: callbacks.build(),
            sink: self.sink,
            session: POINT_TO_POINT_SESSION.to_string(),
        });

        inner.transport.set_handler(Arc::new(ReceiveLoop {
            inner: Arc::downgrade(&inner),
        }));

        Client { inner }
    }
}

/// Client handle; cheap to clone, every clone shares the connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Start the transport and run the initialize exchange.
    ///
    /// On success the session is Ready and the full call surface is open.
    /// A handshake failure closes the connection; the client cannot be
    /// reused afterwards.
    pub async fn connect(&self) -> Result<InitializeResult, ClientError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ConnectionState::Idle => *state = ConnectionState::Connecting,
                ConnectionState::Closed => return Err(ClientError::ConnectionClosed),
                _ => return Err(ClientError::AlreadyConnected),
            }
        }

        if let Err(e) = self.inner.transport.start().await {
            self.abort_handshake().await;
            return Err(e.into());
        }

        let params = InitializeParams::new(
            self.inner.config.capabilities.clone(),
            self.inner.config.client_info.clone(),
        );
        let timeout = self.inner.config.timeouts.initialize;

        let result = match self
            .request_raw(Method::Initialize, Some(serde_json::to_value(&params)?), timeout)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                self.abort_handshake().await;
                return Err(e);
            }
        };

        let result: InitializeResult = match serde_json::from_value(result) {
            Ok(result) => result,
            Err(e) => {
                self.abort_handshake().await;
                return Err(ClientError::Handshake(format!(
                    "undecodable initialize result: {}",
                    e
                )));
            }
        };

        if let Err(McpError::VersionMismatch { expected, actual }) = result.protocol_version() {
            self.abort_handshake().await;
            return Err(ClientError::Handshake(format!(
                "server speaks protocol {}, this client requires {}",
                actual, expected
            )));
        }

        if let Err(e) = self
            .inner
            .send_notification(Method::NotificationInitialized, None)
            .await
        {
            self.abort_handshake().await;
            return Err(e);
        }

        *self.inner.server.write() = Some(result.clone());
        self.inner.set_state(ConnectionState::Ready);
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "session ready"
        );
        Ok(result)
    }

    async fn abort_handshake(&self) {
        self.inner.set_state(ConnectionState::Closed);
        self.inner.pending.close();
        if let Err(e) = self.inner.transport.close().await {
            debug!(error = %e, "transport close after failed handshake");
        }
    }

    /// The server's initialize result, once connected.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.inner.server.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state() == ConnectionState::Ready
    }

    /// Number of calls currently awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.inner.pending.outstanding()
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match self.inner.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(ClientError::ConnectionClosed),
            _ => Err(ClientError::NotReady),
        }
    }

    /// Issue one request and await its reply, bounded by `timeout`.
    ///
    /// Registration precedes the send, so the reply cannot race past the
    /// pending table. On timeout or cancellation the entry is removed first
    /// and the server is then notified, so a straggler reply is a logged
    /// no-op rather than a misdelivery.
    async fn request_raw(
        &self,
        method: Method,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ClientError> {
        self.request_cancellable(method, params, timeout, &CancellationToken::new())
            .await
    }

    async fn request_cancellable(
        &self,
        method: Method,
        params: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientError> {
        let (id, rx) = self.inner.pending.register();
        let request = JsonRpcRequest::new(id.clone(), method.as_str(), params);
        let frame = serde_json::to_vec(&request)?;

        if let Err(e) = self.inner.transport.send(&self.inner.session, &frame).await {
            self.inner.pending.forget(&id);
            return Err(e.into());
        }
        debug!(%id, %method, "request sent");

        match await_reply(rx, timeout, cancel).await {
            Ok(value) => Ok(value),
            Err(err @ (CallError::Timeout | CallError::Cancelled)) => {
                let reason = match err {
                    CallError::Timeout => "timeout",
                    _ => "cancelled",
                };
                // A reply may have won the race; only notify for a call that
                // was still outstanding.
                if self.inner.pending.forget(&id) {
                    self.inner.notify_abandoned(&id, reason).await;
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn call_typed<R: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        params: Option<Value>,
    ) -> Result<R, ClientError> {
        self.ensure_ready()?;
        let value = self
            .request_raw(method, params, self.inner.config.timeouts.call)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Raw escape hatch: call an arbitrary Ready-gated method with a caller
    /// supplied deadline and cancellation token.
    pub async fn call(
        &self,
        method: Method,
        params: Option<Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, ClientError> {
        if !method.allowed_before_ready() {
            self.ensure_ready()?;
        }
        self.request_cancellable(method, params, timeout, cancel)
            .await
    }

    /// Liveness probe; allowed at any point after the transport starts.
    pub async fn ping(&self) -> Result<(), ClientError> {
        if self.inner.state() == ConnectionState::Closed {
            return Err(ClientError::ConnectionClosed);
        }
        self.request_raw(Method::Ping, None, self.inner.config.timeouts.ping)
            .await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<ListToolsResult, ClientError> {
        self.call_typed(Method::ToolsList, None).await
    }

    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: HashMap<String, Value>,
    ) -> Result<CallToolResult, ClientError> {
        let params = CallToolParams {
            name: name.into(),
            arguments,
        };
        self.call_typed(Method::ToolsCall, Some(serde_json::to_value(&params)?))
            .await
    }

    pub async fn list_resources(&self) -> Result<ListResourcesResult, ClientError> {
        self.call_typed(Method::ResourcesList, None).await
    }

    pub async fn read_resource(
        &self,
        uri: impl Into<String>,
    ) -> Result<ReadResourceResult, ClientError> {
        let params = ReadResourceParams { uri: uri.into() };
        self.call_typed(Method::ResourcesRead, Some(serde_json::to_value(&params)?))
            .await
    }

    /// Subscribe to change notifications for one resource. Fails fast when
    /// the server never declared subscription support.
    pub async fn subscribe_resource(&self, uri: impl Into<String>) -> Result<(), ClientError> {
        self.ensure_subscribe_supported()?;
        let params = SubscribeParams { uri: uri.into() };
        let _: Value = self
            .call_typed(Method::ResourcesSubscribe, Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(&self, uri: impl Into<String>) -> Result<(), ClientError> {
        self.ensure_subscribe_supported()?;
        let params = UnsubscribeParams { uri: uri.into() };
        let _: Value = self
            .call_typed(Method::ResourcesUnsubscribe, Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    fn ensure_subscribe_supported(&self) -> Result<(), ClientError> {
        let supported = self
            .inner
            .server
            .read()
            .as_ref()
            .is_some_and(|info| info.capabilities.supports_subscribe());
        if supported {
            Ok(())
        } else {
            Err(ClientError::CapabilityNotSupported("resources.subscribe"))
        }
    }

    pub async fn list_prompts(&self) -> Result<ListPromptsResult, ClientError> {
        self.call_typed(Method::PromptsList, None).await
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, ClientError> {
        let params = GetPromptParams {
            name: name.into(),
            arguments,
        };
        self.call_typed(Method::PromptsGet, Some(serde_json::to_value(&params)?))
            .await
    }

    /// Close the connection. Every outstanding call fails with
    /// [`ClientError::ConnectionClosed`]. Idempotent.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.inner.set_state(ConnectionState::Closed);
        self.inner.pending.close();
        self.inner.transport.close().await?;
        Ok(())
    }

    /// Close, then wait for the transport's receive loop to drain, bounded
    /// by `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ClientError> {
        self.inner.set_state(ConnectionState::Closed);
        self.inner.pending.close();
        self.inner.transport.shutdown(deadline).await?;
        Ok(())
    }
}

/// `ping` from the server: reply with an empty object.
struct PingBack;

#[async_trait]
impl RequestHandler for PingBack {
    async fn handle(
        &self,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorObject> {
        Ok(Value::Object(serde_json::Map::new()))
    }
}

struct SamplingAdapter(Arc<dyn SamplingHandler>);

#[async_trait]
impl RequestHandler for SamplingAdapter {
    async fn handle(
        &self,
        _session_id: &str,
        params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorObject> {
        let params: CreateMessageParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| JsonRpcErrorObject::invalid_params(&e.to_string()))?;
        let result = self
            .0
            .create_message(params)
            .await
            .map_err(|e| e.to_error_object())?;
        serde_json::to_value(result)
            .map_err(|e| JsonRpcErrorObject::internal_error(Some(e.to_string())))
    }
}

struct RootsAdapter(Arc<dyn RootsProvider>);

#[async_trait]
impl RequestHandler for RootsAdapter {
    async fn handle(
        &self,
        _session_id: &str,
        _params: Option<Value>,
    ) -> Result<Value, JsonRpcErrorObject> {
        let result: ListRootsResult = self.0.list_roots().await.map_err(|e| e.to_error_object())?;
        serde_json::to_value(result)
            .map_err(|e| JsonRpcErrorObject::internal_error(Some(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_json_rpc::JsonRpcMessage;
    use conduit_protocol::{Implementation, ServerCapabilities, ToolsCapabilities};
    use conduit_transport::InMemoryTransport;
    use serde_json::json;

    /// Minimal scripted peer on the far side of an in-memory pipe: answers
    /// initialize and tools/list, records the initialized notification.
    struct ScriptedServer {
        transport: Arc<InMemoryTransport>,
        saw_initialized: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl FrameHandler for ScriptedServer {
        async fn on_frame(&self, session_id: &SessionId, frame: Bytes) {
            let reply = match classify(&frame) {
                Frame::Request(request) => match request.method.as_str() {
                    "initialize" => {
                        let mut result = InitializeResult::new(
                            ServerCapabilities {
                                tools: Some(ToolsCapabilities::default()),
                                ..Default::default()
                            },
                            Implementation::new("scripted", "0.0.0"),
                        );
                        result.instructions = Some("test fixture".to_string());
                        JsonRpcMessage::success(request.id, serde_json::to_value(result).unwrap())
                    }
                    "tools/list" => JsonRpcMessage::success(request.id, json!({"tools": []})),
                    other => panic!("unexpected request {other}"),
                },
                Frame::Notification(notification) => {
                    assert_eq!(notification.method, "notifications/initialized");
                    self.saw_initialized
                        .store(true, std::sync::atomic::Ordering::SeqCst);
                    return;
                }
                other => panic!("unexpected frame {other:?}"),
            };
            let bytes = serde_json::to_vec(&reply).unwrap();
            self.transport.send(session_id, &bytes).await.unwrap();
        }
    }

    async fn connected_pair() -> (Client, Arc<ScriptedServer>) {
        let (near, far) = InMemoryTransport::pair();
        let server = Arc::new(ScriptedServer {
            transport: far.clone(),
            saw_initialized: std::sync::atomic::AtomicBool::new(false),
        });
        far.set_handler(server.clone());
        far.start().await.unwrap();

        let client = Client::builder(ClientConfig::new("test-client", "0.0.0")).build(near);
        client.connect().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_connect_runs_full_handshake() {
        let (client, server) = connected_pair().await;

        assert!(client.is_ready());
        let info = client.server_info().unwrap();
        assert_eq!(info.server_info.name, "scripted");

        // The initialized notification is fire-and-forget; give the pipe a
        // moment to deliver it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.saw_initialized.load(std::sync::atomic::Ordering::SeqCst));

        let tools = client.list_tools().await.unwrap();
        assert!(tools.tools.is_empty());
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_calls_are_gated_until_connected() {
        let (near, _far) = InMemoryTransport::pair();
        let client = Client::builder(ClientConfig::new("test-client", "0.0.0")).build(near);

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, ClientError::NotReady));
    }

    #[tokio::test]
    async fn test_subscribe_requires_declared_capability() {
        let (client, _server) = connected_pair().await;
        // Scripted server declares tools only.
        let err = client.subscribe_resource("file:///x").await.unwrap_err();
        assert!(matches!(err, ClientError::CapabilityNotSupported(_)));
    }

    #[tokio::test]
    async fn test_failed_initialized_send_closes_instead_of_wedging() {
        use conduit_transport::TransportError;

        // Delegates to the pipe but drops the wire for the initialized
        // notification, as if the connection died mid-handshake.
        struct NotifyLoss {
            inner: Arc<InMemoryTransport>,
        }

        #[async_trait]
        impl Transport for NotifyLoss {
            async fn start(&self) -> Result<(), TransportError> {
                self.inner.start().await
            }

            async fn send(
                &self,
                session_id: &SessionId,
                frame: &[u8],
            ) -> Result<(), TransportError> {
                if let Frame::Notification(n) = classify(frame) {
                    if n.method == "notifications/initialized" {
                        return Err(TransportError::Closed);
                    }
                }
                self.inner.send(session_id, frame).await
            }

            fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
                self.inner.set_handler(handler);
            }

            async fn close(&self) -> Result<(), TransportError> {
                self.inner.close().await
            }

            async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError> {
                self.inner.shutdown(deadline).await
            }
        }

        let (near, far) = InMemoryTransport::pair();
        let server = Arc::new(ScriptedServer {
            transport: far.clone(),
            saw_initialized: std::sync::atomic::AtomicBool::new(false),
        });
        far.set_handler(server.clone());
        far.start().await.unwrap();

        let client = Client::builder(ClientConfig::new("test-client", "0.0.0"))
            .build(Arc::new(NotifyLoss { inner: near }));

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));

        // The failed handshake must close the session, not strand it
        // mid-connect where every call reports NotReady forever.
        assert!(!client.is_ready());
        assert!(matches!(
            client.connect().await,
            Err(ClientError::ConnectionClosed)
        ));
        assert!(matches!(
            client.list_tools().await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_fails_outstanding_calls() {
        let (near, far) = InMemoryTransport::pair();

        // Peer that swallows everything, so calls stay outstanding.
        struct BlackHole;
        #[async_trait]
        impl FrameHandler for BlackHole {
            async fn on_frame(&self, _session_id: &SessionId, _frame: Bytes) {}
        }
        far.set_handler(Arc::new(BlackHole));
        far.start().await.unwrap();

        let client = Client::builder(ClientConfig::new("test-client", "0.0.0")).build(near.clone());
        near.start().await.unwrap();

        let pinger = client.clone();
        let call = tokio::spawn(async move { pinger.ping().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.outstanding(), 1);

        client.close().await.unwrap();
        let outcome = call.await.unwrap();
        assert!(matches!(outcome, Err(ClientError::ConnectionClosed)));
        assert_eq!(client.outstanding(), 0);
    }
}
