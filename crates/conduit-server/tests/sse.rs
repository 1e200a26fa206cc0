//! End-to-end exercises over real HTTP: the endpoint handshake, targeted
//! fan-out across two event streams, token eviction, and start retries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use conduit_client::{
    Client, ClientConfig, NotificationSink, ServerNotification, SseClientTransport,
};
use conduit_protocol::{McpError, ResourceContents};
use conduit_server::{McpResource, Server, SseServerConfig, SseServerTransport};
use conduit_transport::{
    FrameHandler, POINT_TO_POINT_SESSION, SessionId, Transport, TransportError,
};

struct StaticResource {
    uri: &'static str,
}

#[async_trait]
impl McpResource for StaticResource {
    fn uri(&self) -> &str {
        self.uri
    }

    fn name(&self) -> &str {
        self.uri
    }

    async fn read(&self) -> Result<Vec<ResourceContents>, McpError> {
        Ok(vec![ResourceContents::text(self.uri, "static")])
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

impl RecordingSink {
    fn updated_uris(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ServerNotification::ResourceUpdated(params) => Some(params.uri.clone()),
                _ => None,
            })
            .collect()
    }
}

struct NullHandler;

#[async_trait]
impl FrameHandler for NullHandler {
    async fn on_frame(&self, _session_id: &SessionId, _frame: Bytes) {}
}

fn loopback_config() -> SseServerConfig {
    SseServerConfig {
        bind_address: ([127, 0, 0, 1], 0).into(),
        ..SseServerConfig::default()
    }
}

fn sse_url(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{addr}/sse")).expect("loopback url")
}

/// Serve a resource-bearing server over HTTP and return its transport and
/// bound address.
async fn serve_http() -> (Server, Arc<SseServerTransport>, SocketAddr) {
    let server = Server::builder()
        .name("sse-fixture")
        .version("0.0.0")
        .resource(StaticResource { uri: "file:///a" })
        .resource(StaticResource { uri: "file:///b" })
        .build();

    let transport = SseServerTransport::new(loopback_config());
    server.serve(transport.clone()).await.unwrap();
    let addr = transport.local_addr().expect("bound address");
    (server, transport, addr)
}

async fn connect_client(addr: SocketAddr) -> (Client, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let client = Client::builder(ClientConfig::new("sse-client", "0.0.0"))
        .notifications(sink.clone())
        .build(SseClientTransport::new(sse_url(addr)));
    client.connect().await.unwrap();
    (client, sink)
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(deadline, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached before deadline");
}

#[tokio::test]
async fn handshake_and_calls_work_over_http() {
    let (_server, transport, addr) = serve_http().await;
    let (client, _sink) = connect_client(addr).await;

    assert!(client.is_ready());
    assert_eq!(transport.session_count(), 1);

    let resources = client.list_resources().await.unwrap();
    let uris: Vec<_> = resources
        .resources
        .iter()
        .map(|r| r.uri.as_str())
        .collect();
    assert_eq!(uris, vec!["file:///a", "file:///b"]);

    let contents = client.read_resource("file:///a").await.unwrap();
    assert_eq!(contents.contents.len(), 1);
}

#[tokio::test]
async fn resource_updates_target_only_subscribed_streams() {
    let (server, transport, addr) = serve_http().await;
    let (client_a, sink_a) = connect_client(addr).await;
    let (client_b, sink_b) = connect_client(addr).await;
    assert_eq!(transport.session_count(), 2);

    client_a.subscribe_resource("file:///a").await.unwrap();
    client_b.subscribe_resource("file:///b").await.unwrap();

    server.notify_resource_updated("file:///a").await;
    server.notify_resource_updated("file:///b").await;

    wait_until(Duration::from_secs(5), || {
        !sink_a.updated_uris().is_empty() && !sink_b.updated_uris().is_empty()
    })
    .await;

    assert_eq!(sink_a.updated_uris(), vec!["file:///a"]);
    assert_eq!(sink_b.updated_uris(), vec!["file:///b"]);

    // Broadcasts still reach every ready stream.
    server.notify_tools_list_changed().await;
    wait_until(Duration::from_secs(5), || {
        let hit = |sink: &RecordingSink| {
            sink.events
                .lock()
                .iter()
                .any(|e| matches!(e, ServerNotification::ToolsListChanged))
        };
        hit(&sink_a) && hit(&sink_b)
    })
    .await;
}

#[tokio::test]
async fn evicted_token_maps_to_session_not_found() {
    let (_server, transport, addr) = serve_http().await;

    // Bare transport: no client state machine in the way of the POST.
    let sse = SseClientTransport::new(sse_url(addr));
    sse.set_handler(Arc::new(NullHandler));
    sse.start().await.unwrap();

    let message_url = sse.message_url().expect("endpoint announced");
    let token = message_url
        .query_pairs()
        .find(|(key, _)| key == "sessionId")
        .map(|(_, value)| value.to_string())
        .expect("sessionId in endpoint");

    transport.disconnect(&token);
    wait_until(Duration::from_secs(5), || transport.session_count() == 0).await;

    let err = sse
        .send(&POINT_TO_POINT_SESSION.to_string(), b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::SessionNotFound(_)));
}

#[tokio::test]
async fn failed_start_is_retryable_on_both_ends() {
    // Server side: no handler installed yet.
    let transport = SseServerTransport::new(loopback_config());
    assert!(matches!(
        transport.start().await,
        Err(TransportError::NotStarted)
    ));
    transport.set_handler(Arc::new(NullHandler));
    transport.start().await.unwrap();
    let addr = transport.local_addr().expect("bound after retry");

    // Client side: same failure, same recovery.
    let sse = SseClientTransport::new(sse_url(addr));
    assert!(matches!(
        sse.start().await,
        Err(TransportError::NotStarted)
    ));
    sse.set_handler(Arc::new(NullHandler));
    sse.start().await.unwrap();
    assert!(sse.message_url().is_some());

    sse.shutdown(Duration::from_secs(5)).await.unwrap();
    transport.shutdown(Duration::from_secs(5)).await.unwrap();
}
