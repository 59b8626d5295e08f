//! Listener groups.
//!
//! A [`ListenerGroup`] bundles a context filter, four hook tables, a list of
//! cron items and a callback error policy. Within a group a message is
//! offered to the tiers in a fixed order and the first hook returning
//! `Ok(true)` wins:
//!
//! | Tier | Table | Applies when |
//! |------|-------|--------------|
//! | 1 | prefix → hook | text present and starts with the prefix |
//! | 2 | account → hook | the message mentions the account |
//! | 3 | keyword → hook | text present and the keyword pattern matches |
//! | 4 | catch-all list | always, in registration order |
//!
//! Prefix, mention and keyword tables are maps: registering the same key
//! again replaces the hook but keeps its position.
//!
//! # Example
//!
//! ```rust,ignore
//! let group = ListenerGroup::with_contexts("ops", ["+15550001111"]);
//! group.on_prefix("!ping", message_hook(|client, ctx, _msg| async move {
//!     client.reply(&ctx, "pong").await?;
//!     Ok(true)
//! }));
//! group.on_cron("*/5 * * * *", task_callback(|_client| async { Ok(()) }))?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

use tether_core::{AccountId, BotClient, Context, DataMessage};

use crate::hook::{
    CallbackRef, CronId, ErrorHandler, HookId, MessageHook, TaskCallback, run_guarded,
};
use crate::keyword::{KeywordKey, KeywordOptions, PatternCache};
use crate::scheduler::{Clock, CronItem, CronSchedule, ScheduleResult, TaskScheduler};

#[derive(Clone, Default)]
struct HookTables {
    prefixes: IndexMap<String, MessageHook>,
    mentions: IndexMap<AccountId, MessageHook>,
    keywords: IndexMap<KeywordKey, MessageHook>,
    catch_all: Vec<(HookId, MessageHook)>,
}

/// A named bundle of context-scoped hooks and cron items.
///
/// Registration takes `&self` so groups can be changed while the session
/// runs; a dispatch in progress keeps seeing the tables it started with.
pub struct ListenerGroup {
    name: String,
    contexts: HashSet<String>,
    hooks: RwLock<Arc<HookTables>>,
    patterns: PatternCache,
    crons: Mutex<Vec<CronItem>>,
    next_id: AtomicU64,
    on_error: Arc<RwLock<ErrorHandler>>,
    on_started: RwLock<Option<TaskCallback>>,
    scheduler: TaskScheduler,
}

impl ListenerGroup {
    /// Creates a group that applies to every context.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_contexts(name, std::iter::empty::<String>())
    }

    /// Creates a group limited to the given context subjects (group ids or
    /// account ids). An empty set matches everything.
    pub fn with_contexts<I, S>(name: impl Into<String>, contexts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let scheduler = TaskScheduler::new(&name);
        Self::build(name, contexts, scheduler)
    }

    /// Like [`with_contexts`](Self::with_contexts) with a custom clock for
    /// cron fire times.
    pub fn with_clock<I, S>(name: impl Into<String>, contexts: I, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let scheduler = TaskScheduler::with_clock(&name, clock);
        Self::build(name, contexts, scheduler)
    }

    fn build<I, S>(name: String, contexts: I, scheduler: TaskScheduler) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            on_error: Arc::new(RwLock::new(default_error_handler(&name))),
            name,
            contexts: contexts.into_iter().map(Into::into).collect(),
            hooks: RwLock::new(Arc::new(HookTables::default())),
            patterns: PatternCache::new(),
            crons: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            on_started: RwLock::new(None),
            scheduler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context subjects this group is limited to.
    pub fn contexts(&self) -> &HashSet<String> {
        &self.contexts
    }

    /// Whether this group applies to `ctx`.
    pub fn matches_context(&self, ctx: &Context) -> bool {
        self.contexts.is_empty() || self.contexts.contains(ctx.subject())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn update(&self, f: impl FnOnce(&mut HookTables)) {
        let mut hooks = self.hooks.write();
        f(Arc::make_mut(&mut hooks));
    }

    fn snapshot(&self) -> Arc<HookTables> {
        Arc::clone(&self.hooks.read())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a catch-all hook.
    pub fn on_message(&self, hook: MessageHook) -> HookId {
        let id = HookId(self.next_id());
        self.update(|t| t.catch_all.push((id, hook)));
        id
    }

    /// Registers a hook for messages whose text starts with `prefix`.
    pub fn on_prefix(&self, prefix: impl Into<String>, hook: MessageHook) {
        let prefix = prefix.into();
        self.update(|t| {
            t.prefixes.insert(prefix, hook);
        });
    }

    /// Registers a hook for messages containing `keyword`.
    pub fn on_keyword(
        &self,
        keyword: impl Into<String>,
        options: KeywordOptions,
        hook: MessageHook,
    ) -> KeywordKey {
        let key = KeywordKey::new(keyword, options);
        let stored = key.clone();
        self.update(|t| {
            t.keywords.insert(stored, hook);
        });
        key
    }

    /// Registers a hook for messages that mention `account`.
    pub fn on_mention(&self, account: impl Into<AccountId>, hook: MessageHook) {
        let account = account.into();
        self.update(|t| {
            t.mentions.insert(account, hook);
        });
    }

    /// Registers a cron item.
    ///
    /// Items added while the session runs are armed on the next start.
    pub fn on_cron(&self, expression: &str, callback: TaskCallback) -> ScheduleResult<CronId> {
        let schedule = CronSchedule::parse(expression)?;
        let id = CronId(self.next_id());
        self.crons.lock().push(CronItem {
            id,
            schedule: Arc::new(schedule),
            callback,
        });
        debug!(group = %self.name, cron = expression, %id, "Registered cron");
        Ok(id)
    }

    /// Sets the callback run when the session starts.
    pub fn on_started(&self, callback: TaskCallback) {
        *self.on_started.write() = Some(callback);
    }

    /// Replaces the callback error handler.
    ///
    /// Takes effect immediately, for armed cron items too. The handler's
    /// return value decides whether a failed cron item is rescheduled and is
    /// ignored for every other callback.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.on_error.write() = handler;
    }

    // =========================================================================
    // Removal
    // =========================================================================

    pub fn remove_message_hook(&self, id: HookId) -> bool {
        let mut removed = false;
        self.update(|t| {
            let before = t.catch_all.len();
            t.catch_all.retain(|(hook_id, _)| *hook_id != id);
            removed = t.catch_all.len() != before;
        });
        removed
    }

    pub fn remove_prefix(&self, prefix: &str) -> bool {
        let mut removed = false;
        self.update(|t| removed = t.prefixes.shift_remove(prefix).is_some());
        removed
    }

    /// Removes the first keyword hook registered for `keyword`, whatever its
    /// options.
    pub fn remove_keyword(&self, keyword: &str) -> bool {
        let key = self
            .snapshot()
            .keywords
            .keys()
            .find(|key| key.keyword == keyword)
            .cloned();
        key.is_some_and(|key| self.remove_keyword_exact(&key))
    }

    /// Removes the keyword hook registered under exactly `key`.
    pub fn remove_keyword_exact(&self, key: &KeywordKey) -> bool {
        let mut removed = false;
        self.update(|t| removed = t.keywords.shift_remove(key).is_some());
        if removed {
            self.patterns.evict(key);
        }
        removed
    }

    pub fn remove_mention(&self, account: &AccountId) -> bool {
        let mut removed = false;
        self.update(|t| removed = t.mentions.shift_remove(account).is_some());
        removed
    }

    /// Removes a cron item and stops its armed timer.
    pub fn remove_cron(&self, id: CronId) -> bool {
        let mut crons = self.crons.lock();
        let before = crons.len();
        crons.retain(|item| item.id != id);
        let removed = crons.len() != before;
        drop(crons);

        if removed {
            self.scheduler.cancel(id);
        }
        removed
    }

    /// Number of registered hooks across all four tables.
    pub fn hook_count(&self) -> usize {
        let t = self.snapshot();
        t.prefixes.len() + t.mentions.len() + t.keywords.len() + t.catch_all.len()
    }

    pub fn cron_count(&self) -> usize {
        self.crons.lock().len()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Offers `message` to the hooks of this group in tier order.
    ///
    /// Returns `true` once a hook reports the message handled. A failing hook
    /// is reported to the error handler and counts as not handled.
    pub async fn dispatch(
        &self,
        client: &BotClient,
        ctx: &Context,
        message: &Arc<DataMessage>,
    ) -> bool {
        let tables = self.snapshot();
        let text = message.text();

        if let Some(text) = text {
            for (prefix, hook) in &tables.prefixes {
                if text.starts_with(prefix.as_str())
                    && self
                        .invoke(hook, client, ctx, message, || CallbackRef::Prefix(prefix.clone()))
                        .await
                {
                    return self.handled_by("prefix");
                }
            }
        }

        for (account, hook) in &tables.mentions {
            if message.mentions_account(account)
                && self
                    .invoke(hook, client, ctx, message, || CallbackRef::Mention(account.clone()))
                    .await
            {
                return self.handled_by("mention");
            }
        }

        if let Some(text) = text {
            for (key, hook) in &tables.keywords {
                if self.patterns.is_match(key, text)
                    && self
                        .invoke(hook, client, ctx, message, || CallbackRef::Keyword(key.clone()))
                        .await
                {
                    return self.handled_by("keyword");
                }
            }
        }

        for (id, hook) in &tables.catch_all {
            if self
                .invoke(hook, client, ctx, message, || CallbackRef::Message(*id))
                .await
            {
                return self.handled_by("message");
            }
        }

        false
    }

    fn handled_by(&self, tier: &str) -> bool {
        trace!(group = %self.name, tier, "Message handled");
        true
    }

    async fn invoke(
        &self,
        hook: &MessageHook,
        client: &BotClient,
        ctx: &Context,
        message: &Arc<DataMessage>,
        callback: impl FnOnce() -> CallbackRef,
    ) -> bool {
        match run_guarded(hook(client.clone(), ctx.clone(), Arc::clone(message))).await {
            Ok(handled) => handled,
            Err(e) => {
                self.report(&e, &callback());
                false
            }
        }
    }

    /// Routes a callback failure to the error handler.
    pub fn report(&self, error: &anyhow::Error, callback: &CallbackRef) -> bool {
        let handler = self.on_error.read().clone();
        handler(error, callback)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Arms every cron item of this group.
    pub fn start_crons(&self, client: BotClient, tracker: TaskTracker) {
        let items = self.crons.lock().clone();
        if items.is_empty() {
            return;
        }
        let current = Arc::clone(&self.on_error);
        let handler: ErrorHandler = Arc::new(move |error, callback| {
            let handler = current.read().clone();
            handler(error, callback)
        });
        self.scheduler.start(&items, client, tracker, handler);
    }

    /// Cancels every armed cron timer of this group. Idempotent.
    pub fn stop_crons(&self) -> usize {
        self.scheduler.stop()
    }

    /// Runs the started callback, if one is set, reporting its failure.
    pub async fn run_started(&self, client: BotClient) {
        let Some(callback) = self.on_started.read().clone() else {
            return;
        };
        if let Err(e) = run_guarded(callback(client)).await {
            self.report(&e, &CallbackRef::Started);
        }
    }

    /// Whether a started callback is set.
    pub fn has_started_callback(&self) -> bool {
        self.on_started.read().is_some()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }
}

impl fmt::Debug for ListenerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGroup")
            .field("name", &self.name)
            .field("contexts", &self.contexts)
            .field("hooks", &self.hook_count())
            .field("crons", &self.cron_count())
            .finish()
    }
}

/// Logs the failure and keeps cron items scheduled.
pub fn default_error_handler(group: &str) -> ErrorHandler {
    let group = group.to_string();
    Arc::new(move |e, callback| {
        error!(
            group = %group,
            kind = callback.kind(),
            callback = %callback,
            error = %format_args!("{e:#}"),
            "Callback failed"
        );
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{message_hook, task_callback};
    use crate::testing::{BOT_ACCOUNT, TokioClock, mention_message, test_client, text_message};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tether_core::GroupId;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(log: &Log, label: &'static str, handled: bool) -> MessageHook {
        let log = Arc::clone(log);
        message_hook(move |_, _, _| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label);
                Ok(handled)
            }
        })
    }

    fn individual() -> Context {
        Context::Individual {
            account: AccountId::new("+15550001111"),
            name: None,
        }
    }

    #[test]
    fn test_context_filter() {
        let open = ListenerGroup::new("open");
        let scoped = ListenerGroup::with_contexts("scoped", ["group-a"]);

        let group_ctx = Context::Group(GroupId::new("group-a"));
        assert!(open.matches_context(&individual()));
        assert!(scoped.matches_context(&group_ctx));
        assert!(!scoped.matches_context(&individual()));
    }

    #[tokio::test]
    async fn test_tier_priority() {
        let group = ListenerGroup::new("tiers");
        let log: Log = Arc::default();

        group.on_message(recorder(&log, "catch-all", true));
        group.on_keyword("ping", KeywordOptions::default(), recorder(&log, "keyword", true));
        group.on_mention(BOT_ACCOUNT, recorder(&log, "mention", true));
        group.on_prefix("!ping", recorder(&log, "prefix", true));

        let client = test_client();
        let ctx = individual();

        assert!(group.dispatch(&client, &ctx, &mention_message("!ping", BOT_ACCOUNT)).await);
        assert!(group.dispatch(&client, &ctx, &mention_message("ping", BOT_ACCOUNT)).await);
        assert!(group.dispatch(&client, &ctx, &text_message("ping me")).await);
        assert!(group.dispatch(&client, &ctx, &text_message("hello")).await);

        assert_eq!(*log.lock(), vec!["prefix", "mention", "keyword", "catch-all"]);
    }

    #[tokio::test]
    async fn test_unhandled_falls_through_tiers() {
        let group = ListenerGroup::new("fallthrough");
        let log: Log = Arc::default();

        group.on_prefix("!", recorder(&log, "prefix", false));
        group.on_keyword("go", KeywordOptions::default(), recorder(&log, "keyword", false));
        group.on_message(recorder(&log, "first", false));
        group.on_message(recorder(&log, "second", false));

        let handled = group
            .dispatch(&test_client(), &individual(), &text_message("!go"))
            .await;

        assert!(!handled);
        assert_eq!(*log.lock(), vec!["prefix", "keyword", "first", "second"]);
    }

    #[tokio::test]
    async fn test_failing_hook_is_reported_and_not_handled() {
        let group = ListenerGroup::new("failing");
        let log: Log = Arc::default();
        let reported = Arc::new(Mutex::new(Vec::new()));
        {
            let reported = Arc::clone(&reported);
            group.set_error_handler(Arc::new(move |e, cb| {
                reported.lock().push((cb.clone(), e.to_string()));
                true
            }));
        }

        group.on_prefix(
            "!",
            message_hook(|_, _, _| async { Err(anyhow::anyhow!("bad command")) }),
        );
        let panicking = group.on_message(message_hook(|_, _, _| async {
            if true {
                panic!("boom");
            }
            Ok(true)
        }));
        group.on_message(recorder(&log, "after", true));

        let handled = group
            .dispatch(&test_client(), &individual(), &text_message("!x"))
            .await;

        assert!(handled);
        assert_eq!(*log.lock(), vec!["after"]);
        let reported = reported.lock();
        assert_eq!(reported.len(), 2);
        assert_eq!(reported[0], (CallbackRef::Prefix("!".into()), "bad command".into()));
        assert_eq!(reported[1].0, CallbackRef::Message(panicking));
        assert!(reported[1].1.contains("boom"));
    }

    #[tokio::test]
    async fn test_prefix_and_keyword_need_text() {
        let group = ListenerGroup::new("textless");
        let log: Log = Arc::default();
        group.on_prefix("", recorder(&log, "prefix", true));
        group.on_keyword("x", KeywordOptions::default().whole_word(false), recorder(&log, "keyword", true));

        let mut message = (*text_message("x")).clone();
        message.text = None;

        let handled = group
            .dispatch(&test_client(), &individual(), &Arc::new(message))
            .await;
        assert!(!handled);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_registration_replaces_in_place() {
        let group = ListenerGroup::new("replace");
        let log: Log = Arc::default();

        group.on_prefix("!a", recorder(&log, "a-old", false));
        group.on_prefix("!", recorder(&log, "bang", false));
        group.on_prefix("!a", recorder(&log, "a-new", false));

        group
            .dispatch(&test_client(), &individual(), &text_message("!a"))
            .await;
        assert_eq!(*log.lock(), vec!["a-new", "bang"]);
        assert_eq!(group.hook_count(), 2);
    }

    #[tokio::test]
    async fn test_removal() {
        let group = ListenerGroup::new("removal");
        let log: Log = Arc::default();

        let id = group.on_message(recorder(&log, "catch-all", true));
        group.on_prefix("!", recorder(&log, "prefix", true));
        group.on_mention(BOT_ACCOUNT, recorder(&log, "mention", true));
        let strict = group.on_keyword(
            "cat",
            KeywordOptions::default().case_sensitive(true),
            recorder(&log, "strict", true),
        );
        group.on_keyword("cat", KeywordOptions::default(), recorder(&log, "loose", true));

        // First registration of "cat" goes, the other stays.
        assert!(group.remove_keyword("cat"));
        assert!(!group.remove_keyword_exact(&strict));
        assert!(group.remove_prefix("!"));
        assert!(!group.remove_prefix("!"));
        assert!(group.remove_mention(&AccountId::new(BOT_ACCOUNT)));
        assert!(group.remove_message_hook(id));
        assert!(!group.remove_message_hook(id));
        assert_eq!(group.hook_count(), 1);

        group
            .dispatch(&test_client(), &individual(), &text_message("!CAT"))
            .await;
        assert_eq!(*log.lock(), vec!["loose"]);
    }

    #[test]
    fn test_on_cron_validates_expression() {
        let group = ListenerGroup::new("crons");
        let callback = task_callback(|_| async { Ok(()) });

        let id = group.on_cron("*/5 * * * *", callback.clone()).unwrap();
        assert!(group.on_cron("not a schedule", callback).is_err());
        assert_eq!(group.cron_count(), 1);

        assert!(group.remove_cron(id));
        assert!(!group.remove_cron(id));
        assert_eq!(group.cron_count(), 0);
    }

    #[tokio::test]
    async fn test_started_callback_failure_is_reported() {
        let group = ListenerGroup::new("started");
        let reported = Arc::new(Mutex::new(Vec::new()));
        {
            let reported = Arc::clone(&reported);
            group.set_error_handler(Arc::new(move |_, cb| {
                reported.lock().push(cb.clone());
                true
            }));
        }

        group.run_started(test_client()).await;
        assert!(reported.lock().is_empty());

        group.on_started(task_callback(|_| async { Err(anyhow::anyhow!("no")) }));
        assert!(group.has_started_callback());
        group.run_started(test_client()).await;
        assert_eq!(*reported.lock(), vec![CallbackRef::Started]);
    }

    #[test]
    fn test_default_error_handler_keeps_crons() {
        let handler = default_error_handler("root");
        let keep = handler(
            &anyhow::anyhow!("fail"),
            &CallbackRef::Cron {
                id: CronId(1),
                schedule: "* * * * *".into(),
            },
        );
        assert!(keep);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_handler_swap_reaches_armed_crons() {
        let group =
            ListenerGroup::with_clock("swap", std::iter::empty::<String>(), TokioClock::at(0, 0, 30));
        let fires = Arc::new(AtomicUsize::new(0));
        {
            let fires = Arc::clone(&fires);
            group
                .on_cron(
                    "0 * * * * *",
                    task_callback(move |_| {
                        fires.fetch_add(1, Ordering::SeqCst);
                        async { Err(anyhow::anyhow!("cron failed")) }
                    }),
                )
                .unwrap();
        }

        group.start_crons(test_client(), TaskTracker::new());
        group.set_error_handler(Arc::new(|_, _| false));

        tokio::time::sleep(Duration::from_secs(190)).await;
        group.stop_crons();
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }
}
