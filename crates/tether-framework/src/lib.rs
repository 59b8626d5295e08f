//! # Tether Framework
//!
//! Hook routing and cron scheduling on top of `tether-core`.
//!
//! - [`ListenerGroup`]: a context-scoped bundle of prefix, mention, keyword
//!   and catch-all hooks plus cron items
//! - [`EventRouter`]: turns `receive` notifications into messages and walks
//!   the groups in registration order, ending with the root group
//! - [`TaskScheduler`]: arms, fires and reschedules cron items
//!
//! The runtime crate owns the session that wires these to a transport.

pub mod group;
pub mod hook;
pub mod keyword;
pub mod router;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use group::{ListenerGroup, default_error_handler};
pub use hook::{
    CallbackRef, CronId, ErrorHandler, HookId, MessageHook, TaskCallback, message_hook,
    run_guarded, task_callback,
};
pub use keyword::{KeywordKey, KeywordOptions, PatternCache};
pub use router::{EventRouter, RECEIVE_METHOD};
pub use scheduler::{
    Clock, CronItem, CronSchedule, ScheduleError, ScheduleResult, SystemClock, TaskScheduler,
};
