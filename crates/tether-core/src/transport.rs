//! Transport seam between the session and a relay connection.
//!
//! A [`Transport`] owns one duplex byte channel. It writes encoded request
//! frames, and its [`listen`](Transport::listen) loop decodes inbound lines
//! and hands each frame to a [`FrameHandler`]:
//!
//! ```text
//! relay ──line──▶ Transport::listen ──▶ WireCodec::decode
//!                                         ├─ Response     ──▶ FrameHandler::handle_response
//!                                         └─ Notification ──▶ FrameHandler::handle_notification
//! ```
//!
//! Handlers are synchronous so the reader never waits on user code; anything
//! slow is spawned by the handler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::{NotificationFrame, RequestFrame, ResponseFrame};
use crate::error::TransportResult;

/// Receiver of decoded inbound frames.
pub trait FrameHandler: Send + Sync {
    /// Called for every frame carrying `result` or `error`.
    fn handle_response(&self, frame: ResponseFrame);

    /// Called for every other frame.
    fn handle_notification(&self, frame: NotificationFrame);
}

/// A duplex line channel to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connection-string scheme this transport serves (`"ipc"`, `"tcp"`).
    fn scheme(&self) -> &'static str;

    /// Encodes `frame`, writes it and flushes.
    ///
    /// Concurrent writes are serialized in call order.
    async fn write(&self, frame: &RequestFrame) -> TransportResult<()>;

    /// Reads and dispatches frames until `cancel` fires or the relay closes
    /// the stream.
    ///
    /// Cancellation and end-of-stream both return `Ok(())`. Undecodable
    /// lines are logged and skipped.
    async fn listen(
        &self,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> TransportResult<()>;

    /// Closes the channel and releases the relay.
    async fn terminate(&self) -> TransportResult<()>;
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;
