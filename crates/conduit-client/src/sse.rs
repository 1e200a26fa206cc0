//! SSE client transport.
//!
//! The connection is a long-lived `GET` carrying `text/event-stream`. The
//! first event is named `endpoint` and carries the URL (usually relative) to
//! POST outbound frames to, already tagged with the server-minted session
//! token. Subsequent `message` events each carry one inbound frame. The
//! session is point-to-point from this side: the token lives inside the POST
//! URL, not in the [`Transport`] session id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::StatusCode;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use conduit_transport::{
    FrameHandler, POINT_TO_POINT_SESSION, SessionId, Transport, TransportError,
};

/// How long `start` waits for the server's `endpoint` event.
const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SseClientTransport {
    http: reqwest::Client,
    sse_url: Url,
    endpoint_timeout: Duration,
    session_id: SessionId,
    /// POST target, resolved from the `endpoint` event during `start`.
    post_url: RwLock<Option<Url>>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl SseClientTransport {
    pub fn new(sse_url: Url) -> Arc<Self> {
        Arc::new(Self {
            http: reqwest::Client::new(),
            sse_url,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            session_id: POINT_TO_POINT_SESSION.to_string(),
            post_url: RwLock::new(None),
            handler: RwLock::new(None),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The resolved POST target, once connected. Mostly useful in tests.
    pub fn message_url(&self) -> Option<Url> {
        self.post_url.read().clone()
    }

    async fn connect_stream(&self) -> Result<(), TransportError> {
        let handler = self
            .handler
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        let response = self
            .http
            .get(self.sse_url.clone())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("SSE connect failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "SSE stream rejected: {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let base = self.sse_url.clone();
        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut endpoint_tx = Some(endpoint_tx);

            'stream: loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => break 'stream,
                    chunk = stream.next() => chunk,
                };
                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        warn!(error = %e, "SSE stream error");
                        break 'stream;
                    }
                    None => break 'stream,
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Events are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let event_text: String = buffer.drain(..pos + 2).collect();
                    let Some((name, data)) = parse_sse_event(&event_text) else {
                        continue;
                    };
                    match name.as_deref() {
                        Some("endpoint") => match base.join(data.trim()) {
                            Ok(url) => {
                                debug!(%url, "message endpoint announced");
                                if let Some(tx) = endpoint_tx.take() {
                                    tx.send(url).ok();
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, data = %data, "unusable endpoint event");
                                break 'stream;
                            }
                        },
                        // Bare data lines are tolerated as messages.
                        Some("message") | None => {
                            handler
                                .on_frame(&session_id, Bytes::from(data.into_bytes()))
                                .await;
                        }
                        Some("ping") | Some("heartbeat") => {}
                        Some(other) => {
                            debug!(event = other, "ignoring unknown SSE event");
                        }
                    }
                }
            }

            info!("SSE stream ended");
            handler.on_close(&session_id).await;
        });
        *self.reader.lock() = Some(task);

        let url = match tokio::time::timeout(self.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                self.abort_reader();
                return Err(TransportError::Http(
                    "stream ended before endpoint event".to_string(),
                ));
            }
            Err(_) => {
                self.abort_reader();
                return Err(TransportError::Http(
                    "no endpoint event before deadline".to_string(),
                ));
            }
        };
        *self.post_url.write() = Some(url);
        Ok(())
    }

    /// Tears down a reader whose start attempt did not complete, so a retry
    /// opens a fresh stream instead of stacking a dead one.
    fn abort_reader(&self) {
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Only a successful start is idempotent; a failed connect releases
        // the flag so the caller can retry.
        let result = self.connect_stream().await;
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError> {
        if session_id != &self.session_id {
            return Err(TransportError::SessionNotFound(session_id.clone()));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let url = self
            .post_url
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(frame.to_vec())
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("POST failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(TransportError::SessionNotFound(
                "session token expired".to_string(),
            )),
            status => Err(TransportError::Http(format!("POST rejected: {}", status))),
        }
    }

    fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        self.post_url.write().take();
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError> {
        self.close().await?;
        let task = self.reader.lock().take();
        if let Some(task) = task {
            tokio::time::timeout(deadline, task)
                .await
                .map_err(|_| TransportError::ShutdownTimeout)?
                .ok();
        }
        Ok(())
    }
}

/// Split one SSE event block into its name and joined data lines.
fn parse_sse_event(event_text: &str) -> Option<(Option<String>, String)> {
    let mut name = None;
    let mut data = String::new();

    for line in event_text.lines() {
        if let Some(stripped) = line.strip_prefix("event: ") {
            name = Some(stripped.to_string());
        } else if let Some(stripped) = line.strip_prefix("data: ") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(stripped);
        }
    }

    if data.is_empty() { None } else { Some((name, data)) }
}
