//! Newline-delimited frame codec for stream transports.
//!
//! One JSON document per line. A line that is not valid JSON is dropped with
//! a warning and the loop resynchronizes at the next newline; only I/O
//! failure or cancellation ends the stream.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{FrameHandler, SessionId};

/// Drive a buffered reader to EOF (or cancellation), delivering one frame per
/// well-formed line. Invokes `on_close` exactly once on the way out.
pub async fn read_frames<R>(
    reader: R,
    session_id: SessionId,
    handler: Arc<dyn FrameHandler>,
    cancel: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "frame reader cancelled");
                break;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                // Cheap well-formedness probe; envelope decoding happens in
                // the dispatch layer.
                if serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_err() {
                    warn!(session_id = %session_id, "dropping malformed frame line");
                    continue;
                }
                handler
                    .on_frame(&session_id, Bytes::copy_from_slice(trimmed.as_bytes()))
                    .await;
            }
            Ok(None) => {
                debug!(session_id = %session_id, "frame stream reached EOF");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "frame stream read failed");
                break;
            }
        }
    }

    handler.on_close(&session_id).await;
}

/// Write one frame plus the line delimiter and flush. The caller serializes
/// concurrent writers (a mutex around the writer) to keep single-call
/// integrity.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Collector {
        frames: Mutex<Vec<Bytes>>,
        closed: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl FrameHandler for Collector {
        async fn on_frame(&self, _session_id: &SessionId, frame: Bytes) {
            self.frames.lock().push(frame);
        }

        async fn on_close(&self, _session_id: &SessionId) {
            *self.closed.lock() = true;
        }
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped_not_fatal() {
        let input = b"{\"a\":1}\nthis is not json\n\n{\"b\":2}\n" as &[u8];
        let collector = Arc::new(Collector {
            frames: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        });

        read_frames(
            input,
            "s".to_string(),
            collector.clone(),
            CancellationToken::new(),
        )
        .await;

        let frames = collector.frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"{\"a\":1}");
        assert_eq!(&frames[1][..], b"{\"b\":2}");
        assert!(*collector.closed.lock());
    }

    #[tokio::test]
    async fn test_write_frame_appends_newline() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{\"x\":true}").await.unwrap();
        assert_eq!(out, b"{\"x\":true}\n");
    }
}
