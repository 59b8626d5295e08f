//! Hook and callback types.
//!
//! User code plugs into a [`ListenerGroup`](crate::group::ListenerGroup)
//! through three callback shapes:
//!
//! | Type | Signature | Used by |
//! |------|-----------|---------|
//! | [`MessageHook`] | `(BotClient, Context, Arc<DataMessage>) -> Result<bool>` | catch-all, prefix, keyword and mention hooks |
//! | [`TaskCallback`] | `(BotClient) -> Result<()>` | cron items and the started callback |
//! | [`ErrorHandler`] | `(&Error, &CallbackRef) -> bool` | failure policy of a group |
//!
//! A message hook returns `Ok(true)` when it handled the message, which stops
//! dispatch. Failures and panics are both turned into an
//! [`anyhow::Error`] by [`run_guarded`] and reported together with the
//! [`CallbackRef`] naming the hook.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use tether_core::{AccountId, BotClient, Context, DataMessage};

use crate::keyword::KeywordKey;

/// A hook invoked with an inbound message.
pub type MessageHook =
    Arc<dyn Fn(BotClient, Context, Arc<DataMessage>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// A callback invoked by the scheduler or at session start.
pub type TaskCallback = Arc<dyn Fn(BotClient) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Decides what happens after a callback failed.
///
/// For cron callbacks the return value selects whether the item is
/// rescheduled; for every other callback it is ignored.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error, &CallbackRef) -> bool + Send + Sync>;

/// Boxes an async function into a [`MessageHook`].
pub fn message_hook<F, Fut>(f: F) -> MessageHook
where
    F: Fn(BotClient, Context, Arc<DataMessage>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(move |client, ctx, message| f(client, ctx, message).boxed())
}

/// Boxes an async function into a [`TaskCallback`].
pub fn task_callback<F, Fut>(f: F) -> TaskCallback
where
    F: Fn(BotClient) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |client| f(client).boxed())
}

/// Awaits a callback future, converting a panic into an error.
pub async fn run_guarded<T>(future: BoxFuture<'static, anyhow::Result<T>>) -> anyhow::Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!(
            "callback panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// =============================================================================
// Identities
// =============================================================================

/// Handle of a registered catch-all hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

/// Handle of a registered cron item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CronId(pub(crate) u64);

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hook#{}", self.0)
    }
}

impl fmt::Display for CronId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cron#{}", self.0)
    }
}

/// Names the callback a failure came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackRef {
    Message(HookId),
    Prefix(String),
    Keyword(KeywordKey),
    Mention(AccountId),
    Cron { id: CronId, schedule: String },
    Started,
}

impl CallbackRef {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Prefix(_) => "prefix",
            Self::Keyword(_) => "keyword",
            Self::Mention(_) => "mention",
            Self::Cron { .. } => "cron",
            Self::Started => "started",
        }
    }

    /// Whether this names a cron item.
    pub fn is_cron(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(id) => write!(f, "message {id}"),
            Self::Prefix(prefix) => write!(f, "prefix {prefix:?}"),
            Self::Keyword(key) => write!(f, "keyword {key}"),
            Self::Mention(account) => write!(f, "mention {account}"),
            Self::Cron { id, schedule } => write!(f, "{id} ({schedule})"),
            Self::Started => f.write_str("started"),
        }
    }
}
