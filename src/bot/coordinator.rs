//! Shared bot state behind a single lock.
//!
//! The coordinator owns the rate limiter, the member directory, the
//! conversation windows and the reminder schedule. Event handlers, commands
//! and the background loops all go through its methods; each public method
//! is one critical section. Nothing awaits while the lock is held: callers
//! get copies and do their network I/O afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bot::history::ConversationWindows;
use crate::bot::members::MemberDirectory;
use crate::bot::messenger::Messenger;
use crate::bot::rate_limit::RateLimiter;
use crate::bot::reminders::{Reminder, ReminderBook};
use crate::bot::settings::{PersistError, Settings, SettingsStore};
use crate::bot::unix_now;
use crate::config::{Config, RateLimitConfig};
use crate::openrouter::Message;

/// How often the sweep looks for reminders whose timer never fired.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// How long shutdown waits for each background loop to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub rate_limit: RateLimitConfig,
    pub max_messages_in_context: usize,
    pub auto_save_interval: Duration,
    pub sweep_interval: Duration,
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            rate_limit: config.rate_limit,
            max_messages_in_context: config.open_router.max_messages_in_context,
            auto_save_interval: Duration::from_secs(config.auto_save_interval),
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

struct State {
    rate_limiter: RateLimiter,
    members: MemberDirectory,
    windows: ConversationWindows,
    reminders: ReminderBook,
    /// Delayed-delivery task per scheduled reminder.
    timers: HashMap<u64, AbortHandle>,
}

pub struct Coordinator {
    state: RwLock<State>,
    store: SettingsStore,
    messenger: Arc<dyn Messenger>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Held across snapshot-and-write so the file always ends up with the newest state.
    save_lock: Mutex<()>,
    auto_save_interval: Duration,
    sweep_interval: Duration,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: SettingsStore, messenger: Arc<dyn Messenger>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(State {
                rate_limiter: RateLimiter::new(config.rate_limit),
                members: MemberDirectory::new(),
                windows: ConversationWindows::new(config.max_messages_in_context),
                reminders: ReminderBook::new(),
                timers: HashMap::new(),
            }),
            store,
            messenger,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            save_lock: Mutex::new(()),
            auto_save_interval: config.auto_save_interval,
            sweep_interval: config.sweep_interval,
        })
    }

    // A panic in one handler must not wedge every other handler, so a
    // poisoned lock is taken over as-is.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Rate limiting
    // =========================================================================

    /// Admission check for an incoming message. Exclusive for the whole
    /// check-and-claim so two messages can't both take the last free slot.
    pub fn admit(&self, user_id: &str, now: i64) -> bool {
        self.write().rate_limiter.admit(user_id, now)
    }

    // =========================================================================
    // Conversation windows
    // =========================================================================

    pub fn record_message(&self, channel_id: &str, entry: Message) {
        self.write().windows.append(channel_id, entry);
    }

    /// Copy of the channel's recent messages, oldest first.
    pub fn conversation(&self, channel_id: &str) -> Vec<Message> {
        self.read().windows.snapshot(channel_id)
    }

    // =========================================================================
    // Member directory
    // =========================================================================

    /// Member joined: add their names.
    pub fn upsert_member<S: AsRef<str>>(&self, user_id: &str, names: &[S]) {
        self.write().members.upsert(names, user_id);
    }

    /// Cache a whole guild's member list in one critical section.
    pub fn cache_members<I>(&self, members: I) -> usize
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut state = self.write();
        let mut count = 0;
        for (user_id, names) in members {
            state.members.upsert(&names, &user_id);
            count += 1;
        }
        count
    }

    /// Member renamed: old aliases stop resolving as the new ones start.
    pub fn replace_member<S: AsRef<str>>(&self, user_id: &str, names: &[S]) {
        self.write().members.replace(user_id, names);
    }

    /// Member left: drop the given names and every other alias we knew.
    pub fn remove_member<S: AsRef<str>>(&self, user_id: &str, names: &[S]) {
        let mut state = self.write();
        state.members.remove(names);
        state.members.remove_user(user_id);
    }

    #[cfg(test)]
    pub fn lookup_member(&self, name: &str) -> Option<String> {
        self.read().members.lookup(name).map(str::to_string)
    }

    /// Turn `@name` into `<@id>` for every member we know.
    pub fn resolve_mentions(&self, text: &str) -> String {
        self.read().members.resolve_mentions(text)
    }

    // =========================================================================
    // Reminders
    // =========================================================================

    /// Create a reminder due `duration_secs` after `now`.
    ///
    /// A reminder that is already due is delivered before this returns;
    /// otherwise it is armed with a delayed task. Returns `None` once
    /// shutdown has started.
    pub async fn create_reminder(
        self: &Arc<Self>,
        channel_id: &str,
        user_id: &str,
        message: &str,
        duration_secs: i64,
        now: i64,
    ) -> Option<Reminder> {
        let (reminder, fire_now) = {
            let mut state = self.write();
            if self.shutdown.is_cancelled() {
                warn!("Refusing reminder for {} in channel {}: shutting down", user_id, channel_id);
                return None;
            }
            let reminder = Reminder {
                id: state.reminders.next_id(),
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
                message: message.to_string(),
                time: now.saturating_add(duration_secs),
            };
            let fire_now = reminder.is_due(now);
            if !fire_now {
                state.reminders.insert(reminder.clone());
                self.arm_timer(&mut state, &reminder, now);
            }
            (reminder, fire_now)
        };

        if fire_now {
            info!("⏰ Reminder #{} is already due, delivering now", reminder.id);
            self.persist_claimed(now);
            self.deliver(&reminder).await;
        } else {
            info!("⏰ Scheduled reminder #{} for {} in {}s", reminder.id, reminder.user_id, duration_secs);
        }
        Some(reminder)
    }

    /// Cancel a pending reminder without delivering it.
    pub fn cancel_reminder(&self, id: u64) -> bool {
        let mut state = self.write();
        if let Some(timer) = state.timers.remove(&id) {
            timer.abort();
        }
        let cancelled = state.reminders.take(id).is_some();
        if cancelled {
            info!("Cancelled reminder #{}", id);
        }
        cancelled
    }

    pub fn pending_reminders(&self) -> Vec<Reminder> {
        self.read().reminders.snapshot()
    }

    /// Number of armed delivery timers.
    pub fn armed_timers(&self) -> usize {
        self.read().timers.len()
    }

    /// Sweep step: claim and deliver every reminder due at `now`.
    pub async fn fire_due(&self, now: i64) -> usize {
        let due = {
            let mut state = self.write();
            let due = state.reminders.take_due(now);
            for reminder in &due {
                if let Some(timer) = state.timers.remove(&reminder.id) {
                    timer.abort();
                }
            }
            due
        };

        if due.is_empty() {
            return 0;
        }

        info!("Firing {} due reminder(s)", due.len());
        self.persist_claimed(now);
        for reminder in &due {
            self.deliver(reminder).await;
        }
        due.len()
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State, reminder: &Reminder, now: i64) {
        if self.shutdown.is_cancelled() {
            // Stays pending and gets re-armed on the next boot
            return;
        }

        let delay = Duration::from_secs(reminder.time.saturating_sub(now).max(0) as u64);
        let id = reminder.id;
        let coordinator = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.fire(id).await;
            }
        });

        if let Some(previous) = state.timers.insert(id, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Timer callback. Claims the reminder before sending, so whichever of
    /// timer and sweep gets here first is the only one that delivers.
    async fn fire(&self, id: u64) {
        let claimed = {
            let mut state = self.write();
            state.timers.remove(&id);
            state.reminders.take(id)
        };

        if let Some(reminder) = claimed {
            self.persist_claimed(unix_now());
            self.deliver(&reminder).await;
        }
    }

    /// Write the pending set after a claim and before delivery, so a crash
    /// mid-send can't bring the reminder back on the next boot.
    fn persist_claimed(&self, now: i64) {
        if let Err(e) = self.save(now) {
            error!("Failed to persist claimed reminders: {e}");
        }
    }

    /// Post a reminder. Failures are logged and the reminder stays consumed.
    async fn deliver(&self, reminder: &Reminder) {
        match self.messenger.send_message(&reminder.channel_id, &reminder.delivery_text()).await {
            Ok(_) => info!("Sent reminder #{} to channel {}", reminder.id, reminder.channel_id),
            Err(e) => error!("Failed to send reminder #{} to channel {}: {}", reminder.id, reminder.channel_id, e),
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Consistent copy of the durable state.
    pub fn snapshot(&self, now: i64) -> Settings {
        let state = self.read();
        Settings::new(now, state.reminders.snapshot(), state.reminders.counter())
    }

    /// Snapshot under the read lock, write the file outside it.
    pub fn save(&self, now: i64) -> Result<(), PersistError> {
        let _writer = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let settings = self.snapshot(now);
        self.store.save(&settings)
    }

    /// Load the last snapshot and re-arm its reminders.
    ///
    /// Reminders that came due while the bot was down are delivered right
    /// away. An unreadable file is logged and the bot starts empty.
    pub async fn restore(self: &Arc<Self>, now: i64) -> usize {
        let settings = match self.store.load(now) {
            Ok(Some(settings)) => settings,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Could not load existing data: {e}");
                return 0;
            }
        };

        let (overdue, armed) = {
            let mut state = self.write();
            for (_, timer) in state.timers.drain() {
                timer.abort();
            }
            state.reminders.restore(settings.reminder_counter, settings.reminders);
            let overdue = state.reminders.take_due(now);
            let upcoming = state.reminders.snapshot();
            for reminder in &upcoming {
                self.arm_timer(&mut state, reminder, now);
            }
            (overdue, upcoming.len())
        };

        info!("Restored {} reminder(s), {} overdue", armed + overdue.len(), overdue.len());
        if !overdue.is_empty() {
            self.persist_claimed(now);
        }
        for reminder in &overdue {
            self.deliver(reminder).await;
        }
        armed + overdue.len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the auto-save and reminder sweep loops.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let auto_save = tokio::spawn(auto_save_loop(
            Arc::clone(self),
            self.auto_save_interval,
            self.shutdown.clone(),
        ));
        let sweep = tokio::spawn(sweep_loop(
            Arc::clone(self),
            self.sweep_interval,
            self.shutdown.clone(),
        ));

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(auto_save);
        tasks.push(sweep);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the loops, disarm reminder timers without firing them, then save.
    pub async fn shutdown(&self, now: i64) -> Result<(), PersistError> {
        info!("Initiating shutdown...");
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Background task did not stop in time, aborting");
                abort.abort();
            }
        }

        let disarmed = {
            let mut state = self.write();
            let count = state.timers.len();
            for (_, timer) in state.timers.drain() {
                timer.abort();
            }
            count
        };
        info!("All reminder timers stopped ({disarmed} disarmed)");

        let result = self.save(now);
        match &result {
            Ok(()) => info!("Shutdown complete"),
            Err(e) => error!("Failed to save data during shutdown: {e}"),
        }
        result
    }
}

async fn auto_save_loop(coordinator: Arc<Coordinator>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down auto-save routine");
                return;
            }
            _ = interval.tick() => {
                match coordinator.save(unix_now()) {
                    Ok(()) => debug!("Auto-saved state"),
                    Err(e) => error!("Auto-save failed: {e}"),
                }
            }
        }
    }
}

async fn sweep_loop(coordinator: Arc<Coordinator>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutting down reminder sweep");
                return;
            }
            _ = interval.tick() => {
                coordinator.fire_due(unix_now()).await;
            }
        }
    }
}
