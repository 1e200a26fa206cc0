//! Stdio point-to-point transports.
//!
//! [`StdioTransport`] serves over the process's own stdin/stdout (the
//! server-role end of a pipe). [`ChildProcessTransport`] spawns a peer
//! process and talks over its pipes (the client-role end). Both carry one
//! implicit session and frame with newline-delimited JSON.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::framing::{read_frames, write_frame};
use crate::{FrameHandler, POINT_TO_POINT_SESSION, SessionId, Transport, TransportError};

/// Serve over this process's stdin/stdout.
pub struct StdioTransport {
    session_id: SessionId,
    stdout: Mutex<tokio::io::Stdout>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            session_id: POINT_TO_POINT_SESSION.to_string(),
            stdout: Mutex::new(tokio::io::stdout()),
            handler: RwLock::new(None),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Only a successful start is idempotent; release the flag on
        // failure so a retry can still spawn the receive loop.
        let handler = match self.handler.read().clone() {
            Some(handler) => handler,
            None => {
                self.started.store(false, Ordering::Release);
                return Err(TransportError::NotStarted);
            }
        };

        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            read_frames(tokio::io::stdin(), session_id, handler, cancel).await;
        });
        *self.reader.lock().await = Some(task);
        debug!("stdio transport started");
        Ok(())
    }

    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError> {
        if session_id != &self.session_id {
            return Err(TransportError::SessionNotFound(session_id.clone()));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut stdout = self.stdout.lock().await;
        write_frame(&mut *stdout, frame).await?;
        Ok(())
    }

    fn set_handler(&self, handler: Arc<dyn FrameHandler>) {
        *self.handler.write() = Some(handler);
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError> {
        self.close().await?;
        let task = self.reader.lock().await.take();
        if let Some(task) = task {
            tokio::time::timeout(deadline, task)
                .await
                .map_err(|_| TransportError::ShutdownTimeout)?
                .ok();
        }
        Ok(())
    }
}

/// Spawn a peer process and talk over its stdin/stdout.
pub struct ChildProcessTransport {
    session_id: SessionId,
    command: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    handler: RwLock<Option<Arc<dyn FrameHandler>>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ChildProcessTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            session_id: POINT_TO_POINT_SESSION.to_string(),
            command: command.into(),
            args,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            handler: RwLock::new(None),
            cancel: CancellationToken::new(),
            reader: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    async fn spawn_child(&self) -> Result<(), TransportError> {
        let handler = self
            .handler
            .read()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Spawn("child stdout not piped".to_string()))?;

        // Child diagnostics go to our log, not the frame stream.
        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(child = %command, "stderr: {}", line);
                }
            });
        }

        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            read_frames(stdout, session_id, handler, cancel).await;
        });

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        *self.reader.lock().await = Some(task);
        debug!(command = %self.command, "child process transport started");
        Ok(())
    }
}

#[async_trait]
impl Transport for ChildProcessTransport {
    async fn start(&self) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Only a successful start is idempotent; a failed spawn releases
        // the flag so the caller can retry.
        let result = self.spawn_child().await;
        if result.is_err() {
            self.started.store(false, Ordering::Release);
        }
        result
    }

    async fn send(&self, session_id: &SessionId, frame: &[u8]) -> Result<(), TransportError> {
        if session_id != &self.session_id {
            return Err(TransportError::SessionNotFound(session_id.clone()));
        }
        let mut stdin = self.stdin.lock().await;
        match stdin.as_mut() {
            Some(stdin) => {
                write_frame(stdin, frame).await?;
                Ok(())
            }
            None => Err(if self.closed.load(Ordering::Acquire) {
                TransportError::Closed
            } else {
                TransportError::NotStarted
            }),
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
        // Closing stdin lets a well-behaved child exit on its own.
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill child process");
            }
        }
        Ok(())
    }

    async fn shutdown(&self, deadline: Duration) -> Result<(), TransportError> {
        self.close().await?;
        let task = self.reader.lock().await.take();
        if let Some(task) = task {
            tokio::time::timeout(deadline, task)
                .await
                .map_err(|_| TransportError::ShutdownTimeout)?
                .ok();
        }
        Ok(())
    }
}
