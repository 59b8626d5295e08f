//! Subprocess transport (`ipc://`).
//!
//! Launches the relay as a child process in JSON-RPC streaming mode and
//! talks to it over its standard input and output. Standard error is
//! drained into `debug` logs under the `tether::relay` target.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{FrameHandler, RequestFrame, Transport, TransportError, TransportResult};

use crate::line::LineTransport;

/// Relay binary looked up on `PATH` when the connection string names none.
pub const RELAY_BINARY: &str = "signal-cli";

/// Arguments the relay is always started with.
pub const RELAY_ARGS: &[&str] = &[
    "jsonRpc",
    "--ignore-attachments",
    "--ignore-stories",
    "--send-read-receipts",
];

/// How long a terminated relay may take to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(3);

/// Relay child process driven over its standard streams.
pub struct IpcTransport {
    lines: LineTransport<ChildStdout, ChildStdin>,
    child: Mutex<Child>,
}

impl IpcTransport {
    /// Starts the relay.
    ///
    /// `binary` overrides the `PATH` lookup of [`RELAY_BINARY`]. Failing to
    /// locate or start the binary is reported immediately.
    pub fn spawn(binary: Option<&Path>) -> TransportResult<Self> {
        let path = match binary {
            Some(path) => path.to_path_buf(),
            None => locate_relay()?,
        };

        let mut child = Command::new(&path)
            .args(RELAY_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::SpawnFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let missing = |stream: &str| TransportError::SpawnFailed {
            path: path.display().to_string(),
            reason: format!("{stream} was not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        info!(path = %path.display(), pid = ?child.id(), "Relay process started");
        Ok(Self {
            lines: LineTransport::new("ipc", stdout, stdin),
            child: Mutex::new(child),
        })
    }

    /// Overrides the read poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.lines = self.lines.with_poll_interval(poll_interval);
        self
    }
}

fn locate_relay() -> TransportResult<PathBuf> {
    which::which(RELAY_BINARY).map_err(|_| TransportError::RelayNotFound {
        binary: RELAY_BINARY.to_string(),
    })
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "tether::relay", "{line}");
    }
}

#[async_trait]
impl Transport for IpcTransport {
    fn scheme(&self) -> &'static str {
        "ipc"
    }

    async fn write(&self, frame: &RequestFrame) -> TransportResult<()> {
        self.lines.write(frame).await
    }

    async fn listen(
        &self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> TransportResult<()> {
        self.lines.listen(handler, cancel).await
    }

    /// Closes the relay's stdin, then kills it if it has not exited within
    /// the grace period.
    async fn terminate(&self) -> TransportResult<()> {
        if let Err(e) = self.lines.terminate().await {
            debug!(error = %e, "Relay stdin already closed");
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "Relay process exited");
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("Relay process did not exit in time, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}
