//! In-memory duplex pipe, primarily for tests.
//!
//! [`InMemoryTransport::pair`] yields two connected endpoints; frames sent on
//! one are delivered to the other's handler. Closing either end is observed
//! by the peer as a stream close, which mirrors how a real pipe tears down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{FrameHandler, POINT_TO_POINT_SESSION, SessionId, Transport, TransportError};

pub struct InMemoryTransport {
    session_id: SessionId,
    /// Sender into the peer's receive loop; dropped on close so the peer
    /// observes teardown.
    peer_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    /// Our own receive end, consumed by `start`.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryTransport {
    /// Create two connected endpoints sharing one implicit session id.
    pub fn pair() -> (Arc<InMemoryTransport>, Arc<InMemoryTransport>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let make = |peer_tx, rx| {
            Arc::new(InMemoryTransport {
                session_id: POINT_TO_POINT_SESSION.to_string(),
                peer_tx: Mutex::new(Some(peer_tx)),
                rx: Mutex::new(Some(rx)),
                handler: RwLock::new(None),
                cancel: CancellationToken::new(),
                reader: Mutex::new(None),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            })
        };

        (make(tx_b, rx_a), make(tx_a, rx_b))
    }

    fn spawn_receive_loop(&self) -> Result<(), TransportError> {
        let handler = self
            .handler
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;
        let mut rx = self.rx.lock().take().ok_or(TransportError::Closed)?;

        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => handler.on_frame(&session_id, frame).await,
                        None => break,
                    },
                }
            }
            debug!(session_id = %session_id, "in-memory receive loop exiting");
            handler.on_close(&session_id).await;
        });
        *self.reader.lock() = Some(task);
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Only a successful start is idempotent; a failed one stays
        // retryable, so the flag is released on every error path.
        let result = self.spawn_receive_loop();
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError> {
        if session_id != &self.session_id {
            return Err(TransportError::SessionNotFound(session_id.clone()));
        }
        let tx = self.peer_tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(Bytes::copy_from_slice(frame))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping our sender closes the peer's stream.
        self.peer_tx.lock().take();
        self.cancel.cancel();
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

#[cfg(test)]
mod tests {
    use super::*;

    struct Collector {
        frames: Mutex<Vec<Bytes>>,
        closed: AtomicBool,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl FrameHandler for Collector {
        async fn on_frame(&self, _session_id: &SessionId, frame: Bytes) {
            self.frames.lock().push(frame);
        }

        async fn on_close(&self, _session_id: &SessionId) {
            self.closed.store(true, Ordering::Release);
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_both_directions() {
        let (a, b) = InMemoryTransport::pair();
        let seen_a = Collector::new();
        let seen_b = Collector::new();
        a.set_handler(seen_a.clone());
        b.set_handler(seen_b.clone());
        a.start().await.unwrap();
        b.start().await.unwrap();

        let session = POINT_TO_POINT_SESSION.to_string();
        a.send(&session, b"{\"from\":\"a\"}").await.unwrap();
        b.send(&session, b"{\"from\":\"b\"}").await.unwrap();

        tokio::task::yield_now().await;
        assert_eq!(&seen_b.frames.lock()[0][..], b"{\"from\":\"a\"}");
        assert_eq!(&seen_a.frames.lock()[0][..], b"{\"from\":\"b\"}");
    }

    #[tokio::test]
    async fn test_close_is_observed_by_peer() {
        let (a, b) = InMemoryTransport::pair();
        let seen_a = Collector::new();
        let seen_b = Collector::new();
        a.set_handler(seen_a.clone());
        b.set_handler(seen_b.clone());
        a.start().await.unwrap();
        b.start().await.unwrap();

        a.close().await.unwrap();
        a.close().await.unwrap(); // double-close is a no-op
        // Guarantees a's receive loop has exited and its receiver is gone.
        a.shutdown(Duration::from_secs(1)).await.unwrap();

        let session = POINT_TO_POINT_SESSION.to_string();
        assert!(matches!(
            b.send(&session, b"{}").await,
            Err(TransportError::Closed)
        ));

        // Peer's receive loop sees the dropped sender and reports close.
        tokio::time::timeout(Duration::from_secs(1), async {
            while !seen_b.closed.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_to_unknown_session_fails() {
        let (a, _b) = InMemoryTransport::pair();
        a.set_handler(Collector::new());
        a.start().await.unwrap();

        let err = a.send(&"nope".to_string(), b"{}").await.unwrap_err();
        assert!(matches!(err, TransportError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_loop() {
        let (a, _b) = InMemoryTransport::pair();
        a.set_handler(Collector::new());
        a.start().await.unwrap();
        a.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_is_retryable() {
        let (a, b) = InMemoryTransport::pair();
        let seen_a = Collector::new();
        b.set_handler(Collector::new());
        b.start().await.unwrap();

        // No handler installed yet: start must fail and leave the
        // transport startable, not wedge it behind the idempotency check.
        assert!(matches!(
            a.start().await,
            Err(TransportError::NotStarted)
        ));

        a.set_handler(seen_a.clone());
        a.start().await.unwrap();

        let session = POINT_TO_POINT_SESSION.to_string();
        b.send(&session, b"{\"retry\":true}").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while seen_a.frames.lock().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(&seen_a.frames.lock()[0][..], b"{\"retry\":true}");
    }
}
