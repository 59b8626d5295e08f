//! Routing of inbound notifications to listener groups.
//!
//! ```text
//! receive ─▶ Envelope ─▶ timestamp > start? ─▶ DataMessage with text?
//!                                                    │
//!                         ┌──────────────────────────┘  (spawned task)
//!                         ▼
//!          group 1 ─▶ group 2 ─▶ ... ─▶ root
//!          (registration order, context filter applies, first handler wins;
//!           the root group always runs when nothing else handled it)
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Level, debug, span, trace, warn};

use tether_core::{BotClient, Context, DataMessage, Envelope, NotificationFrame};

use crate::group::ListenerGroup;

/// The only notification method the router interprets.
pub const RECEIVE_METHOD: &str = "receive";

/// Routes `receive` notifications through the registered listener groups.
pub struct EventRouter {
    client: BotClient,
    root: Arc<ListenerGroup>,
    groups: RwLock<Vec<Arc<ListenerGroup>>>,
    start_time: i64,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl EventRouter {
    /// Creates a router.
    ///
    /// Envelopes stamped at or before `start_time` (epoch milliseconds) are
    /// dropped. Dispatch tasks run on `tracker` and are abandoned when
    /// `cancel` fires.
    pub fn new(
        client: BotClient,
        root: Arc<ListenerGroup>,
        start_time: i64,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            root,
            groups: RwLock::new(Vec::new()),
            start_time,
            tracker,
            cancel,
        }
    }

    /// Appends a listener group; it is consulted after the ones added before.
    pub fn add_group(&self, group: Arc<ListenerGroup>) {
        debug!(group = group.name(), "Added listener group");
        self.groups.write().push(group);
    }

    /// Registered groups in consultation order, without the root group.
    pub fn groups(&self) -> Vec<Arc<ListenerGroup>> {
        self.groups.read().clone()
    }

    pub fn root(&self) -> &Arc<ListenerGroup> {
        &self.root
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Handles one notification, spawning the dispatch of its message.
    ///
    /// Returns the dispatch task, or `None` when the notification carries
    /// nothing to dispatch.
    pub fn handle_notification(
        self: &Arc<Self>,
        frame: NotificationFrame,
    ) -> Option<JoinHandle<bool>> {
        let (ctx, message) = self.accept(frame)?;

        let router = Arc::clone(self);
        let cancel = self.cancel.clone();
        let span = span!(Level::DEBUG, "dispatch", context = %ctx, timestamp = message.timestamp);
        Some(self.tracker.spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    handled = router.route(&ctx, &message) => handled,
                }
            }
            .instrument(span),
        ))
    }

    /// Decodes a notification into the message to dispatch, applying the
    /// method, start-time and payload filters.
    pub fn accept(&self, frame: NotificationFrame) -> Option<(Context, Arc<DataMessage>)> {
        let NotificationFrame { method, mut params } = frame;
        if method != RECEIVE_METHOD {
            warn!(method = %method, "Ignoring unsupported notification");
            return None;
        }

        let raw = params.get_mut("envelope").map(Value::take)?;
        let envelope: Envelope = match serde_json::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable envelope");
                return None;
            }
        };

        if envelope.timestamp <= self.start_time {
            trace!(
                timestamp = envelope.timestamp,
                start_time = self.start_time,
                "Dropping envelope from before start"
            );
            return None;
        }

        if envelope.typing_message.is_some() {
            trace!("Ignoring typing indicator");
        }
        let message = DataMessage::from_envelope(envelope)?;
        message.text()?;

        let ctx = message.context();
        Some((ctx, Arc::new(message)))
    }

    /// Offers a message to every matching group, then to the root group.
    pub async fn route(&self, ctx: &Context, message: &Arc<DataMessage>) -> bool {
        let groups = self.groups();
        for group in &groups {
            if group.matches_context(ctx) && group.dispatch(&self.client, ctx, message).await {
                debug!(group = group.name(), "Message handled");
                return true;
            }
        }
        self.root.dispatch(&self.client, ctx, message).await
    }
}
