//! The bot session: one relay connection, its RPC correlator, router and
//! listener groups.
//!
//! # Lifecycle
//!
//! ```text
//!  connect / from_config
//!          │
//!          ▼
//!        Idle ──run()──▶ Running ──stream ends / stop() / signal──▶ Stopped
//!          │                                                           ▲
//!          └────────────────────────── stop() ─────────────────────────┘
//! ```
//!
//! `run` arms every group's crons, spawns the started callbacks and then
//! listens. Stopping cancels crons, pending RPC calls and in-flight
//! dispatches, waits for the tracked tasks to finish and closes the
//! transport. Dropping a `run` future before it returns counts as a stop.
//! A stopped session cannot be run again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use tether_core::{
    AccountId, BotClient, BoxedTransport, DEFAULT_RPC_TIMEOUT, FrameHandler, NotificationFrame,
    ResponseFrame, RpcCorrelator,
};
use tether_framework::{EventRouter, ListenerGroup};

use crate::config::{ConfigError, TetherConfig, validate_config, validate_session_config};
use crate::error::{SessionError, SessionResult};

/// Name of the fallback group every session has.
pub const ROOT_GROUP: &str = "root";

struct SessionInner {
    account: AccountId,
    start_time: i64,
    transport: BoxedTransport,
    rpc: Arc<RpcCorrelator>,
    client: BotClient,
    router: Arc<EventRouter>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    running: AtomicBool,
    stopped: AtomicBool,
    torn_down: OnceCell<()>,
}

impl FrameHandler for SessionInner {
    fn handle_response(&self, frame: ResponseFrame) {
        self.rpc.handle_response(frame);
    }

    fn handle_notification(&self, frame: NotificationFrame) {
        self.router.handle_notification(frame);
    }
}

/// A running (or runnable) bot.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct BotSession {
    inner: Arc<SessionInner>,
}

impl BotSession {
    /// Wraps an open transport with the default RPC timeout.
    pub fn new(account: impl Into<AccountId>, transport: BoxedTransport) -> Self {
        Self::with_timeout(account, transport, DEFAULT_RPC_TIMEOUT)
    }

    /// Wraps an open transport.
    pub fn with_timeout(
        account: impl Into<AccountId>,
        transport: BoxedTransport,
        rpc_timeout: Duration,
    ) -> Self {
        let account = account.into();
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        let rpc = Arc::new(
            RpcCorrelator::new(account.clone(), Arc::clone(&transport), tracker.clone())
                .with_timeout(rpc_timeout),
        );
        let client = BotClient::new(Arc::clone(&rpc));
        let start_time = Utc::now().timestamp_millis();
        let router = Arc::new(EventRouter::new(
            client.clone(),
            Arc::new(ListenerGroup::new(ROOT_GROUP)),
            start_time,
            tracker.clone(),
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(SessionInner {
                account,
                start_time,
                transport,
                rpc,
                client,
                router,
                tracker,
                cancel,
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                torn_down: OnceCell::new(),
            }),
        }
    }

    /// Opens the relay named by `connection` and builds a session on it.
    pub async fn connect(account: impl Into<AccountId>, connection: &str) -> SessionResult<Self> {
        let account = account.into();
        let transport = tether_transport::connect(connection).await?;
        info!(account = %account, connection, "Connected to relay");
        Ok(Self::new(account, transport))
    }

    /// Validates `config`, opens its relay and builds a session on it.
    pub async fn from_config(config: &TetherConfig) -> SessionResult<Self> {
        validate_config(config)?;
        let target = validate_session_config(&config.session)?;
        let account = config
            .session
            .account
            .clone()
            .ok_or_else(|| ConfigError::missing_field("session.account"))?;

        let transport =
            tether_transport::connect_target(&target, config.session.poll_interval()).await?;
        info!(account = %account, connection = %target, "Connected to relay");
        Ok(Self::with_timeout(
            account,
            transport,
            config.session.rpc_timeout(),
        ))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn account(&self) -> &AccountId {
        &self.inner.account
    }

    /// Creation time in epoch milliseconds. Envelopes stamped at or before it
    /// are never dispatched.
    pub fn start_time(&self) -> i64 {
        self.inner.start_time
    }

    /// Handle for outbound operations.
    pub fn client(&self) -> BotClient {
        self.inner.client.clone()
    }

    /// The fallback group, consulted after every added group.
    pub fn root(&self) -> &Arc<ListenerGroup> {
        self.inner.router.root()
    }

    /// Adds a listener group after the ones already added.
    pub fn add_group(&self, group: impl Into<Arc<ListenerGroup>>) -> Arc<ListenerGroup> {
        let group = group.into();
        self.inner.router.add_group(Arc::clone(&group));
        group
    }

    /// Added groups in consultation order, without the root group.
    pub fn groups(&self) -> Vec<Arc<ListenerGroup>> {
        self.inner.router.groups()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn all_groups(&self) -> Vec<Arc<ListenerGroup>> {
        let mut groups = self.groups();
        groups.push(Arc::clone(self.root()));
        groups
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Runs until the stream ends or the session is stopped, then stops.
    ///
    /// Dropping the returned future also stops the session; the teardown then
    /// finishes in the background.
    pub async fn run(&self) -> SessionResult<()> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyRunning);
        }
        let guard = RunGuard::new(self.clone());
        if self.is_stopped() {
            self.teardown().await;
            guard.disarm();
            return Err(SessionError::Stopped);
        }

        info!(
            account = %self.inner.account,
            scheme = self.inner.transport.scheme(),
            groups = self.groups().len(),
            "Session running"
        );
        self.start_groups();

        let handler: Arc<dyn FrameHandler> = self.inner.clone();
        let result = self
            .inner
            .transport
            .listen(handler, self.inner.cancel.clone())
            .await;
        match &result {
            Ok(()) if !self.is_stopped() => info!("Relay stream ended"),
            Ok(()) => {}
            Err(e) => error!(error = %e, "Relay stream failed"),
        }

        self.request_stop();
        self.teardown().await;
        guard.disarm();
        result.map_err(SessionError::from)
    }

    /// Runs until the stream ends, the session is stopped, or Ctrl+C /
    /// SIGTERM arrives.
    pub async fn run_until_signal(&self) -> SessionResult<()> {
        let watcher = {
            let session = self.clone();
            tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(()) => {
                        session.request_stop();
                    }
                    Err(e) => warn!(error = %e, "Running without signal handling"),
                }
            })
        };

        let result = self.run().await;
        watcher.abort();
        result
    }

    /// Signals the session to stop without waiting for it.
    ///
    /// Returns `false` if it was already stopping.
    pub fn request_stop(&self) -> bool {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(account = %self.inner.account, "Stopping session");

        for group in self.all_groups() {
            group.stop_crons();
        }
        self.inner.rpc.cancel_all();
        self.inner.cancel.cancel();
        true
    }

    /// Stops the session and waits until it has shut down.
    ///
    /// Calling it again, or after the session stopped on its own, only waits.
    pub async fn stop(&self) {
        self.request_stop();
        self.teardown().await;
    }

    fn start_groups(&self) {
        let client = self.client();
        for group in self.all_groups() {
            group.start_crons(client.clone(), self.inner.tracker.clone());

            if group.has_started_callback() {
                let client = client.clone();
                let cancel = self.inner.cancel.clone();
                self.inner.tracker.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {}
                        _ = group.run_started(client) => {}
                    }
                });
            }
        }
    }

    /// Waits for the tracked tasks, then closes the transport. Concurrent
    /// callers share one teardown; a dropped caller leaves it to the next.
    async fn teardown(&self) {
        let inner = &self.inner;
        inner
            .torn_down
            .get_or_init(|| async move {
                inner.tracker.close();
                inner.tracker.wait().await;
                debug!("All session tasks finished");

                if let Err(e) = inner.transport.terminate().await {
                    warn!(error = %e, "Failed to close relay transport");
                }
                info!(account = %inner.account, "Session stopped");
            })
            .await;
    }
}

/// Stops the session if a `run` future is dropped before it returns.
struct RunGuard {
    session: Option<BotSession>,
}

impl RunGuard {
    fn new(session: BotSession) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.request_stop();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Run abandoned, tearing down in the background");
                handle.spawn(async move { session.teardown().await });
            }
            // The next `stop` performs the teardown.
            Err(_) => warn!("Run abandoned outside a runtime"),
        }
    }
}

impl std::fmt::Debug for BotSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotSession")
            .field("account", &self.inner.account)
            .field("start_time", &self.inner.start_time)
            .field("scheme", &self.inner.transport.scheme())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
pub async fn wait_for_shutdown() -> SessionResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).map_err(SessionError::Signal)?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(SessionError::Signal)?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(SessionError::Signal)?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
