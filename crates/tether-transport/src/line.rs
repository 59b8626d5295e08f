//! Newline-framed transport over any async reader/writer pair.
//!
//! Both relay transports are a [`LineTransport`] underneath: the IPC
//! transport over the child's stdout/stdin, the TCP transport over the two
//! socket halves. Tests drive it over an in-memory [`tokio::io::duplex`]
//! pipe.
//!
//! # Listen loop
//!
//! ```text
//! loop
//!   ├─ cancelled?                     → return Ok
//!   ├─ next_line within poll interval
//!   │    ├─ elapsed                   → loop
//!   │    ├─ EOF                       → return Ok
//!   │    ├─ invalid UTF-8             → warn, loop
//!   │    └─ line → WireCodec::decode
//!   │         ├─ Response             → handler.handle_response
//!   │         ├─ Notification         → handler.handle_notification
//!   │         └─ error                → warn, loop
//!   └─ read error                     → return Err
//! ```

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tether_core::{
    CodecError, Frame, FrameHandler, RequestFrame, Transport, TransportError, TransportResult,
    WireCodec,
};

/// How long one read waits before re-checking for cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest slice of an undecodable line echoed into the log.
const LOG_LINE_LIMIT: usize = 200;

/// Line transport over an in-memory or otherwise combined stream.
pub type StreamTransport<S> = LineTransport<ReadHalf<S>, WriteHalf<S>>;

/// JSON-RPC line channel over a reader and a writer.
pub struct LineTransport<R, W> {
    scheme: &'static str,
    reader: Mutex<Lines<BufReader<R>>>,
    writer: Mutex<Option<W>>,
    poll_interval: Duration,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a transport reading frames from `reader` and writing to `writer`.
    pub fn new(scheme: &'static str, reader: R, writer: W) -> Self {
        Self {
            scheme,
            reader: Mutex::new(BufReader::new(reader).lines()),
            writer: Mutex::new(Some(writer)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the read poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The read poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn dispatch_line(&self, line: &str, handler: &Arc<dyn FrameHandler>) {
        trace!(scheme = self.scheme, line = %line, "Received line");
        match WireCodec::decode(line) {
            Ok(Frame::Response(frame)) => handler.handle_response(frame),
            Ok(Frame::Notification(frame)) => handler.handle_notification(frame),
            Err(CodecError::Empty) => {}
            Err(e) => {
                let shown: String = line.chars().take(LOG_LINE_LIMIT).collect();
                warn!(scheme = self.scheme, error = %e, line = %shown, "Skipping undecodable line");
            }
        }
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Splits a bidirectional stream into a line transport.
    pub fn from_stream(scheme: &'static str, stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(scheme, reader, writer)
    }
}

#[async_trait]
impl<R, W> Transport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn write(&self, frame: &RequestFrame) -> TransportResult<()> {
        let bytes =
            WireCodec::encode(frame).map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::closed("transport terminated"))?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn listen(
        &self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> TransportResult<()> {
        let mut lines = self.reader.lock().await;
        debug!(scheme = self.scheme, "Listening for relay frames");

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(scheme = self.scheme, "Listen loop cancelled");
                    return Ok(());
                }
                read = timeout(self.poll_interval, lines.next_line()) => read,
            };

            match read {
                Err(_elapsed) => continue,
                Ok(Ok(Some(line))) => self.dispatch_line(&line, &handler),
                Ok(Ok(None)) => {
                    info!(scheme = self.scheme, "Relay closed the stream");
                    return Ok(());
                }
                Ok(Err(e)) if e.kind() == ErrorKind::InvalidData => {
                    warn!(scheme = self.scheme, error = %e, "Skipping line that is not UTF-8");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn terminate(&self) -> TransportResult<()> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            debug!(scheme = self.scheme, "Closing outbound stream");
            writer.shutdown().await?;
        }
        Ok(())
    }
}
