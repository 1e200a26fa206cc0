//! SSE server transport.
//!
//! Each client session is one long-lived `GET` on the SSE path plus
//! per-frame `POST`s on the message path. On connect the server mints a
//! session token and announces the POST target through an `endpoint` event;
//! every outbound frame then travels as a `message` event on that stream,
//! with comment lines as keep-alives. A `POST` carrying an unknown or
//! expired token gets 404, which the client surfaces as session-not-found.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method as HttpMethod, Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame as HttpFrame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use conduit_transport::{FrameHandler, SessionId, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct SseServerConfig {
    pub bind_address: SocketAddr,
    /// Path of the event-stream `GET`.
    pub sse_path: String,
    /// Path clients `POST` frames to.
    pub message_path: String,
    pub keep_alive: Duration,
}

impl Default for SseServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 8080).into(),
            sse_path: "/sse".to_string(),
            message_path: "/messages".to_string(),
            keep_alive: Duration::from_secs(15),
        }
    }
}

/// Shared with every connection task.
struct SseContext {
    config: SseServerConfig,
    handler: Arc<dyn FrameHandler>,
    channels: RwLock<HashMap<SessionId, mpsc::UnboundedSender<Bytes>>>,
    cancel: CancellationToken,
}

pub struct SseServerTransport {
    config: SseServerConfig,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    context: RwLock<Option<Arc<SseContext>>>,
    cancel: CancellationToken,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    local_addr: RwLock<Option<SocketAddr>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl SseServerTransport {
    pub fn new(config: SseServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: RwLock::new(None),
            context: RwLock::new(None),
            cancel: CancellationToken::new(),
            acceptor: Mutex::new(None),
            local_addr: RwLock::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The bound address; differs from the configured one when port 0 was
    /// requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    pub fn session_count(&self) -> usize {
        self.context
            .read()
            .as_ref()
            .map(|ctx| ctx.channels.read().len())
            .unwrap_or(0)
    }

    /// Evict one session: its event stream ends and its token stops
    /// resolving, so further `POST`s with it get 404.
    pub fn disconnect(&self, session_id: &SessionId) -> bool {
        match self.context.read().as_ref() {
            Some(context) => context.channels.write().remove(session_id).is_some(),
            None => false,
        }
    }

    async fn bind_and_accept(&self) -> Result<(), TransportError> {
        let handler = self
            .handler
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        *self.local_addr.write() = Some(local_addr);
        info!(%local_addr, sse_path = %self.config.sse_path, "SSE transport listening");

        let context = Arc::new(SseContext {
            config: self.config.clone(),
            handler,
            channels: RwLock::new(HashMap::new()),
            cancel: self.cancel.clone(),
        });
        *self.context.write() = Some(context.clone());

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(%peer, "connection accepted");

                let context = context.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle_http(req, context.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        // Client disconnects surface here; they are routine.
                        debug!(error = %e, "connection ended");
                    }
                });
            }
            debug!("accept loop exiting");
        });
        *self.acceptor.lock() = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Transport for SseServerTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Only a successful start is idempotent; release the flag on
        // failure so a retry can bind again.
        let result = self.bind_and_accept().await;
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError> {
        let context = self
            .context
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;
        let tx = context
            .channels
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TransportError::SessionNotFound(session_id.clone()))?;
        tx.send(Bytes::copy_from_slice(frame))
            .map_err(|_| TransportError::SessionNotFound(session_id.clone()))
    }

    fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(context) = self.context.write().take() {
            // Dropping the senders ends every event stream.
            context.channels.write().clear();
        }
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError> {
        self.close().await?;
        let task = self.acceptor.lock().take();
        if let Some(task) = task {
            tokio::time::timeout(deadline, task)
                .await
                .map_err(|_| TransportError::ShutdownTimeout)?
                .ok();
        }
        Ok(())
    }
}

/// Removes the session on event-stream teardown, however it ends.
struct SessionGuard {
    session_id: SessionId,
    context: Arc<SseContext>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.context.channels.write().remove(&self.session_id);
        let handler = self.context.handler.clone();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            handler.on_close(&session_id).await;
        });
    }
}

type SseBody = BoxBody<Bytes, Infallible>;

async fn handle_http(
    req: Request<Incoming>,
    context: Arc<SseContext>,
) -> Result<Response<SseBody>, Infallible> {
    let path = req.uri().path().to_string();
    let response = match (req.method(), path.as_str()) {
        (&HttpMethod::GET, p) if p == context.config.sse_path => open_event_stream(&context),
        (&HttpMethod::POST, p) if p == context.config.message_path => {
            receive_frame(req, &context).await
        }
        _ => status(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

/// `GET` on the SSE path: mint a session, announce the endpoint, stream
/// outbound frames until teardown.
fn open_event_stream(context: &Arc<SseContext>) -> Response<SseBody> {
    let session_id = Uuid::now_v7().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    context
        .channels
        .write()
        .insert(session_id.clone(), tx);
    info!(session_id = %session_id, "event stream opened");

    let endpoint = format!(
        "event: endpoint\ndata: {}?sessionId={}\n\n",
        context.config.message_path, session_id
    );
    let keep_alive = context.config.keep_alive;
    let cancel = context.cancel.clone();
    let guard = SessionGuard {
        session_id,
        context: context.clone(),
    };

    let events = async_stream::stream! {
        // Dropped when the stream is, whether by disconnect or shutdown.
        let _guard = guard;
        yield Ok::<_, Infallible>(HttpFrame::data(Bytes::from(endpoint)));

        let mut ticker = tokio::time::interval(keep_alive);
        ticker.tick().await; // immediate first tick
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    yield Ok(HttpFrame::data(Bytes::from_static(b": keep-alive\n\n")));
                }
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        let mut event = Vec::with_capacity(frame.len() + 24);
                        event.extend_from_slice(b"event: message\ndata: ");
                        event.extend_from_slice(&frame);
                        event.extend_from_slice(b"\n\n");
                        yield Ok(HttpFrame::data(Bytes::from(event)));
                    }
                    None => break,
                },
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(BoxBody::new(StreamBody::new(events)))
        .unwrap_or_else(|_| status_response(StatusCode::INTERNAL_SERVER_ERROR))
}

/// `POST` on the message path: one inbound frame for one session.
async fn receive_frame(req: Request<Incoming>, context: &Arc<SseContext>) -> Response<SseBody> {
    let Some(session_id) = query_param(req.uri().query(), "sessionId") else {
        return status(StatusCode::BAD_REQUEST);
    };
    if !context.channels.read().contains_key(&session_id) {
        debug!(session_id = %session_id, "POST for unknown session");
        return status(StatusCode::NOT_FOUND);
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "failed to read POST body");
            return status(StatusCode::BAD_REQUEST);
        }
    };

    context.handler.on_frame(&session_id, body).await;
    status(StatusCode::ACCEPTED)
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn status(code: StatusCode) -> Response<SseBody> {
    status_response(code)
}

fn status_response(code: StatusCode) -> Response<SseBody> {
    let mut response = Response::new(BoxBody::new(Full::new(Bytes::new())));
    *response.status_mut() = code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_extraction() {
        assert_eq!(
            query_param(Some("sessionId=abc&x=1"), "sessionId").as_deref(),
            Some("abc")
        );
        assert_eq!(
            query_param(Some("x=1&sessionId=abc"), "sessionId").as_deref(),
            Some("abc")
        );
        assert!(query_param(Some("x=1"), "sessionId").is_none());
        assert!(query_param(None, "sessionId").is_none());
    }

    #[test]
    fn test_endpoint_event_shape() {
        let event = format!("event: endpoint\ndata: {}?sessionId={}\n\n", "/messages", "tok");
        assert!(event.starts_with("event: endpoint\n"));
        assert!(event.contains("data: /messages?sessionId=tok"));
        assert!(event.ends_with("\n\n"));
    }
}
