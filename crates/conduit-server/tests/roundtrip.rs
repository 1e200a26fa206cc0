//! End-to-end exercises over an in-memory pipe: full handshake, call
//! correlation under concurrency, lifecycle gating, subscriptions, and
//! server-initiated sampling.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};

use conduit_client::{
    Client, ClientConfig, ClientError, NotificationSink, SamplingHandler, ServerNotification,
    Timeouts,
};
use conduit_protocol::{
    CallToolResult, Content, CreateMessageParams, CreateMessageResult, GetPromptResult, McpError,
    PromptMessage, ResourceContents, Role, SamplingMessage, ToolContent, ToolSchema,
};
use conduit_server::{McpPrompt, McpResource, McpTool, Server};
use conduit_transport::{FrameHandler, InMemoryTransport, SessionId, Transport};

#[derive(Default)]
struct EchoTool {
    calls: AtomicUsize,
}

#[async_trait]
impl McpTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> Option<&str> {
        Some("Echo the message argument back")
    }

    fn input_schema(&self) -> ToolSchema {
        ToolSchema::object().with_required(vec!["message".to_string()])
    }

    async fn call(&self, arguments: HashMap<String, Value>) -> Result<CallToolResult, McpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let message = arguments
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(CallToolResult::success(vec![ToolContent::text(message)]))
    }
}

struct SlowTool;

#[async_trait]
impl McpTool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    async fn call(&self, _arguments: HashMap<String, Value>) -> Result<CallToolResult, McpError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(CallToolResult::success(vec![ToolContent::text("late")]))
    }
}

struct FlakyTool;

#[async_trait]
impl McpTool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn call(&self, _arguments: HashMap<String, Value>) -> Result<CallToolResult, McpError> {
        Err(McpError::ToolExecution("disk on fire".to_string()))
    }
}

struct ReadmeResource;

#[async_trait]
impl McpResource for ReadmeResource {
    fn uri(&self) -> &str {
        "file:///readme"
    }

    fn name(&self) -> &str {
        "readme"
    }

    fn mime_type(&self) -> Option<&str> {
        Some("text/plain")
    }

    async fn read(&self) -> Result<Vec<ResourceContents>, McpError> {
        Ok(vec![ResourceContents::text(self.uri(), "hello")])
    }
}

struct GreetPrompt;

#[async_trait]
impl McpPrompt for GreetPrompt {
    fn name(&self) -> &str {
        "greet"
    }

    async fn render(
        &self,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, McpError> {
        let who = arguments.get("who").cloned().unwrap_or_default();
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::user_text(format!("greet {who}"))],
        })
    }
}

struct FixedSampler;

#[async_trait]
impl SamplingHandler for FixedSampler {
    async fn create_message(
        &self,
        params: CreateMessageParams,
    ) -> Result<CreateMessageResult, McpError> {
        assert!(!params.messages.is_empty());
        Ok(CreateMessageResult {
            role: Role::Assistant,
            content: Content::text("as you wish"),
            model: "fixture-1".to_string(),
            stop_reason: Some("endTurn".to_string()),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ServerNotification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn on_notification(&self, notification: ServerNotification) {
        self.events.lock().push(notification);
    }
}

struct Fixture {
    server: Server,
    client: Client,
    echo: Arc<EchoTool>,
    sink: Arc<RecordingSink>,
}

async fn fixture(timeouts: Timeouts) -> Fixture {
    let echo = Arc::new(EchoTool::default());
    let server = Server::builder()
        .name("fixture-server")
        .version("0.0.0")
        .tool_arc(echo.clone())
        .tool(SlowTool)
        .tool(FlakyTool)
        .resource(ReadmeResource)
        .prompt(GreetPrompt)
        .build();

    let (client_end, server_end) = InMemoryTransport::pair();
    server.serve(server_end).await.unwrap();

    let sink = Arc::new(RecordingSink::default());
    let client = Client::builder(ClientConfig::new("fixture-client", "0.0.0").with_timeouts(timeouts))
        .sampling(Arc::new(FixedSampler))
        .notifications(sink.clone())
        .build(client_end);
    client.connect().await.unwrap();

    Fixture {
        server,
        client,
        echo,
        sink,
    }
}

fn p2p() -> SessionId {
    conduit_transport::POINT_TO_POINT_SESSION.to_string()
}

#[tokio::test]
async fn handshake_advertises_derived_capabilities() {
    let fx = fixture(Timeouts::default()).await;

    let info = fx.client.server_info().unwrap();
    assert_eq!(info.server_info.name, "fixture-server");
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.supports_subscribe());
    assert!(info.capabilities.prompts.is_some());
    assert_eq!(fx.server.session_count(), 1);
}

#[tokio::test]
async fn concurrent_calls_resolve_to_their_own_results() {
    let fx = fixture(Timeouts::default()).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        let client = fx.client.clone();
        handles.push(tokio::spawn(async move {
            let mut args = HashMap::new();
            args.insert("message".to_string(), json!(format!("msg-{i}")));
            (i, client.call_tool("echo", args).await.unwrap())
        }));
    }

    for handle in handles {
        let (i, result) = handle.await.unwrap();
        let ToolContent::Text { text } = &result.content[0] else {
            panic!("expected text content");
        };
        assert_eq!(text, &format!("msg-{i}"));
    }
    assert_eq!(fx.echo.calls.load(Ordering::SeqCst), 16);
    assert_eq!(fx.client.outstanding(), 0);
}

#[tokio::test]
async fn listings_match_registrations() {
    let fx = fixture(Timeouts::default()).await;

    let tools = fx.client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "flaky", "slow"]);

    let resources = fx.client.list_resources().await.unwrap();
    assert_eq!(resources.resources[0].uri, "file:///readme");

    let prompts = fx.client.list_prompts().await.unwrap();
    assert_eq!(prompts.prompts[0].name, "greet");
}

#[tokio::test]
async fn tool_call_paths() {
    let fx = fixture(Timeouts::default()).await;

    // Missing required argument fails before the handler runs.
    let before = fx.echo.calls.load(Ordering::SeqCst);
    let err = fx.client.call_tool("echo", HashMap::new()).await.unwrap_err();
    let ClientError::Rpc { code, .. } = err else {
        panic!("expected rpc error, got {err:?}");
    };
    assert_eq!(code, -32602);
    assert_eq!(fx.echo.calls.load(Ordering::SeqCst), before);

    // Unknown tool is a typed server-range error.
    let err = fx.client.call_tool("nope", HashMap::new()).await.unwrap_err();
    let ClientError::Rpc { code, .. } = err else {
        panic!("expected rpc error, got {err:?}");
    };
    assert_eq!(code, -32001);

    // A failing tool is a successful RPC with isError set.
    let result = fx.client.call_tool("flaky", HashMap::new()).await.unwrap();
    assert_eq!(result.is_error, Some(true));
    let ToolContent::Text { text } = &result.content[0] else {
        panic!("expected text content");
    };
    assert!(text.contains("disk on fire"));
}

#[tokio::test]
async fn slow_tool_times_out_and_clears_pending() {
    let fx = fixture(Timeouts {
        call: Duration::from_millis(100),
        ..Timeouts::default()
    })
    .await;

    let err = fx.client.call_tool("slow", HashMap::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(fx.client.outstanding(), 0);

    // The connection is still usable afterwards.
    fx.client.ping().await.unwrap();
}

#[tokio::test]
async fn requests_before_handshake_are_rejected_unhandled() {
    let echo = Arc::new(EchoTool::default());
    let server = Server::builder().name("gate").tool_arc(echo.clone()).build();
    let (client_end, server_end) = InMemoryTransport::pair();
    server.serve(server_end).await.unwrap();

    // Raw peer that records every reply instead of running a handshake.
    #[derive(Default)]
    struct RawSink {
        replies: Mutex<Vec<Value>>,
    }
    #[async_trait]
    impl FrameHandler for RawSink {
        async fn on_frame(&self, _session_id: &SessionId, frame: Bytes) {
            self.replies.lock().push(serde_json::from_slice(&frame).unwrap());
        }
    }
    let sink = Arc::new(RawSink::default());
    client_end.set_handler(sink.clone());
    client_end.start().await.unwrap();

    let request =
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "echo"}});
    client_end
        .send(&p2p(), &serde_json::to_vec(&request).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let replies = sink.replies.lock();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["error"]["code"], -32600);
    assert!(
        replies[0]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not initialized")
    );
    // The gate fired before dispatch; the tool never ran.
    assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    drop(replies);

    // ping is exempt from the gate.
    let ping = json!({"jsonrpc": "2.0", "id": 2, "method": "ping"});
    client_end
        .send(&p2p(), &serde_json::to_vec(&ping).unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.replies.lock()[1]["id"], 2);
    assert!(sink.replies.lock()[1].get("error").is_none());
}

#[tokio::test]
async fn resource_read_and_subscription_targeting() {
    let fx = fixture(Timeouts::default()).await;

    let contents = fx.client.read_resource("file:///readme").await.unwrap();
    assert_eq!(contents.contents[0].text.as_deref(), Some("hello"));

    // Updates before subscribing do not reach the client.
    fx.server.notify_resource_updated("file:///readme").await;
    // Updates for other URIs never will.
    fx.client.subscribe_resource("file:///readme").await.unwrap();
    fx.server.notify_resource_updated("file:///other").await;
    fx.server.notify_resource_updated("file:///readme").await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let events = fx.sink.events.lock();
        let updated: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ServerNotification::ResourceUpdated(params) => Some(params.uri.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(updated, vec!["file:///readme"]);
    }

    fx.client
        .unsubscribe_resource("file:///readme")
        .await
        .unwrap();
    fx.server.notify_resource_updated("file:///readme").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let count = fx
        .sink
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, ServerNotification::ResourceUpdated(_)))
        .count();
    assert_eq!(count, 1);

    // Subscribing to an unknown resource is an error, not a silent no-op.
    let err = fx.client.subscribe_resource("file:///nope").await.unwrap_err();
    let ClientError::Rpc { code, .. } = err else {
        panic!("expected rpc error, got {err:?}");
    };
    assert_eq!(code, -32002);
}

#[tokio::test]
async fn broadcast_notifications_reach_ready_sessions() {
    let fx = fixture(Timeouts::default()).await;

    fx.server.notify_tools_list_changed().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = fx.sink.events.lock();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, ServerNotification::ToolsListChanged))
    );
}

#[tokio::test]
async fn prompt_rendering_round_trip() {
    let fx = fixture(Timeouts::default()).await;

    let mut args = HashMap::new();
    args.insert("who".to_string(), "world".to_string());
    let rendered = fx.client.get_prompt("greet", args).await.unwrap();
    assert_eq!(rendered.messages.len(), 1);
}

#[tokio::test]
async fn server_initiated_sampling_round_trip() {
    let fx = fixture(Timeouts::default()).await;

    let params = CreateMessageParams {
        messages: vec![SamplingMessage::user_text("say hi")],
        max_tokens: 16,
        system_prompt: None,
        temperature: None,
        stop_sequences: None,
    };
    let result = fx.server.create_message(&p2p(), params).await.unwrap();
    assert_eq!(result.model, "fixture-1");

    // roots were never declared by this client.
    let err = fx.server.list_roots(&p2p()).await.unwrap_err();
    assert!(matches!(
        err,
        conduit_server::ServerError::ClientCapabilityMissing("roots")
    ));
}

#[tokio::test]
async fn client_close_tears_down_server_session() {
    let fx = fixture(Timeouts::default()).await;
    assert_eq!(fx.server.session_count(), 1);

    fx.client.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.server.session_count(), 0);

    let err = fx.client.list_tools().await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
}
