//! Cron scheduling for listener groups.
//!
//! # Lifecycle of one cron item
//!
//! ```text
//!            start()
//!   Idle ───────────────▶ Armed ── deadline ──▶ Firing
//!                           ▲                     │
//!                           │   next occurrence   │ Ok, or Err and the
//!                           └──── after the ──────┤ error handler says
//!                              completion moment  │ "reschedule"
//!                                                 ▼
//!                                              Removed (Err + handler says stop)
//! ```
//!
//! The next fire time is computed from the moment the callback finished, so
//! a slow callback skips occurrences instead of firing back to back.
//!
//! Armed timers are tracked per group; entries whose deadline has passed are
//! pruned whenever a new timer is armed, and [`TaskScheduler::stop`] aborts
//! everything still armed.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use tether_core::BotClient;

use crate::hook::{CallbackRef, CronId, ErrorHandler, TaskCallback, run_guarded};

/// Errors raised when registering a cron item.
#[derive(Debug, Clone, Error)]
pub enum ScheduleError {
    /// The expression is not a valid cron expression.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

/// Result type for schedule operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

// =============================================================================
// Clock
// =============================================================================

/// Source of wall-clock time for computing fire times.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The system's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

// =============================================================================
// CronSchedule
// =============================================================================

/// A parsed cron expression.
///
/// Accepts the classic 5-field form (minute resolution, a `0` seconds field
/// is prepended) as well as 6 and 7 field forms with seconds and years.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> ScheduleResult<Self> {
        let trimmed = expression.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {trimmed}")
        } else {
            trimmed.to_string()
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            ScheduleError::InvalidExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The expression as registered.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A registered (schedule, callback) pair.
#[derive(Clone)]
pub struct CronItem {
    pub id: CronId,
    pub schedule: Arc<CronSchedule>,
    pub callback: TaskCallback,
}

impl CronItem {
    fn callback_ref(&self) -> CallbackRef {
        CallbackRef::Cron {
            id: self.id,
            schedule: self.schedule.expression().to_string(),
        }
    }
}

impl fmt::Debug for CronItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronItem")
            .field("id", &self.id)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// TaskScheduler
// =============================================================================

struct ArmedTimer {
    item: CronId,
    deadline: Instant,
    handle: AbortHandle,
}

/// Everything a firing timer needs, shared by all timers of one start.
struct Run {
    group: Arc<str>,
    clock: Arc<dyn Clock>,
    armed: Arc<Mutex<Vec<ArmedTimer>>>,
    client: BotClient,
    tracker: TaskTracker,
    on_error: ErrorHandler,
    cancel: CancellationToken,
    retired: Mutex<HashSet<CronId>>,
}

/// Per-group cron engine.
pub struct TaskScheduler {
    group: Arc<str>,
    clock: Arc<dyn Clock>,
    armed: Arc<Mutex<Vec<ArmedTimer>>>,
    current: Mutex<Option<Arc<Run>>>,
}

impl TaskScheduler {
    /// Creates a scheduler on the system clock.
    pub fn new(group: &str) -> Self {
        Self::with_clock(group, Arc::new(SystemClock))
    }

    pub fn with_clock(group: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            group: Arc::from(group),
            clock,
            armed: Arc::new(Mutex::new(Vec::new())),
            current: Mutex::new(None),
        }
    }

    /// Arms every item for its first occurrence after now.
    ///
    /// Callbacks run on `tracker` with `client`; failures go to `on_error`.
    /// Starting a running scheduler restarts it.
    pub fn start(
        &self,
        items: &[CronItem],
        client: BotClient,
        tracker: TaskTracker,
        on_error: ErrorHandler,
    ) {
        if self.is_running() {
            warn!(group = %self.group, "Crons already running, restarting");
            self.stop();
        }

        let run = Arc::new(Run {
            group: Arc::clone(&self.group),
            clock: Arc::clone(&self.clock),
            armed: Arc::clone(&self.armed),
            client,
            tracker,
            on_error,
            cancel: CancellationToken::new(),
            retired: Mutex::new(HashSet::new()),
        });
        *self.current.lock() = Some(Arc::clone(&run));

        debug!(group = %self.group, count = items.len(), "Starting crons");
        let now = self.clock.now();
        for item in items {
            arm(&run, item.clone(), now);
        }
    }

    /// Cancels every armed timer and in-flight callback.
    ///
    /// Returns the number of timers that were still armed. Calling it on a
    /// stopped scheduler does nothing.
    pub fn stop(&self) -> usize {
        let Some(run) = self.current.lock().take() else {
            return 0;
        };
        run.cancel.cancel();

        let timers = std::mem::take(&mut *self.armed.lock());
        for timer in &timers {
            timer.handle.abort();
        }
        debug!(group = %self.group, count = timers.len(), "Stopped crons");
        timers.len()
    }

    /// Stops firing one item for the rest of the current run.
    ///
    /// Returns `true` if a timer for it was armed.
    pub fn cancel(&self, item: CronId) -> bool {
        let Some(run) = self.current.lock().clone() else {
            return false;
        };
        run.retired.lock().insert(item);

        let mut found = false;
        self.armed.lock().retain(|timer| {
            if timer.item == item {
                timer.handle.abort();
                found = true;
            }
            timer.item != item
        });
        found
    }

    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Number of timers currently tracked, including not yet pruned ones.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    /// Whether a timer for `item` is tracked.
    pub fn is_armed(&self, item: CronId) -> bool {
        self.armed.lock().iter().any(|t| t.item == item)
    }
}

fn arm(run: &Arc<Run>, item: CronItem, after: DateTime<Local>) {
    let Some(next) = item.schedule.next_after(&after) else {
        warn!(
            group = %run.group,
            cron = item.schedule.expression(),
            "Cron has no upcoming occurrence"
        );
        return;
    };
    let delay = (next - run.clock.now()).to_std().unwrap_or(Duration::ZERO);
    debug!(
        group = %run.group,
        cron = item.schedule.expression(),
        at = %next.format("%Y-%m-%d %H:%M:%S"),
        "Cron will fire in {}",
        humantime::format_duration(Duration::from_secs(delay.as_secs()))
    );

    let now = Instant::now();
    let deadline = now + delay;
    let id = item.id;
    let task_run = Arc::clone(run);

    let mut armed = run.armed.lock();
    armed.retain(|timer| timer.deadline > now);
    let handle = run.tracker.spawn(async move {
        let cancel = task_run.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = sleep_until(deadline) => fire(task_run, item).await,
        }
    });
    armed.push(ArmedTimer {
        item: id,
        deadline,
        handle: handle.abort_handle(),
    });
}

async fn fire(run: Arc<Run>, item: CronItem) {
    debug!(group = %run.group, cron = item.schedule.expression(), "Cron firing");

    let outcome = tokio::select! {
        biased;
        _ = run.cancel.cancelled() => return,
        outcome = run_guarded((item.callback)(run.client.clone())) => outcome,
    };

    if let Err(e) = outcome
        && !(run.on_error)(&e, &item.callback_ref())
    {
        info!(
            group = %run.group,
            cron = item.schedule.expression(),
            "Cron failed and will not be rescheduled"
        );
        return;
    }

    if run.cancel.is_cancelled() || run.retired.lock().contains(&item.id) {
        return;
    }
    let completed = run.clock.now();
    arm(&run, item, completed);
}
