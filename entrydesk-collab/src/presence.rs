//! # Presence: who else is looking at this entry
//!
//! Tracks the remote users viewing a collaboratively edited document and the
//! field each of them is focused on. Presence rides on the document's shout
//! channel (see [`crate::protocol`]):
//!
//! ```text
//!   local editor                             remote editors
//!   ────────────                             ──────────────
//!   PresenceHub::new ── ["open", me] ──────►  reply ping / focus
//!   focus(F, L)      ── ["focus", me, path] ► (throttled per F/L)
//!   heartbeat tick   ── ping / focus ──────►  keeps us alive
//!   leave()          ── ["close", me] ─────►  drop us immediately
//!
//!   handle_event ◄── shouts from others ──── update collaborators
//!   sweep tick   ── evict entries older than `stale_after`
//! ```
//!
//! Delivery is not assumed to be reliable. A collaborator whose `close` got
//! lost disappears once its last message is `stale_after` old.
//!
//! [`PresenceState`] holds the clock-parameterised bookkeeping;
//! [`PresenceHub`] owns the background tasks and the live views.

use futures_util::{Stream, StreamExt};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::protocol::{DocEvent, FieldPath, Shout, UserId};
use crate::throttle::{KeyedThrottle, Offer};

// ───────────────────────────────────────────────────────────────────
// Configuration
// ───────────────────────────────────────────────────────────────────

/// Presence timing configuration.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// A collaborator is dropped once its last message is this old.
    pub stale_after: Duration,
    /// Upper bound between two eviction sweeps.
    pub sweep_interval: Duration,
    /// How often we re-announce ourselves to the other editors.
    pub heartbeat_interval: Duration,
    /// Trailing window for `focus()` shouts, per field/locale.
    pub focus_throttle: Duration,
    /// Shout `open` when the hub is created.
    pub announce_on_start: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            focus_throttle: Duration::from_secs(1),
            announce_on_start: true,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Outbound channel
// ───────────────────────────────────────────────────────────────────

/// Outbound shout channel. The host transmits the tuple to every other
/// client of the document.
///
/// Called without any hub lock held.
pub trait ShoutSink: Send + Sync + 'static {
    fn shout(&self, shout: Shout);
}

impl ShoutSink for mpsc::UnboundedSender<Shout> {
    fn shout(&self, shout: Shout) {
        if self.send(shout).is_err() {
            log::debug!("Shout dropped: receiver closed");
        }
    }
}

/// Adapts a closure into a [`ShoutSink`].
pub struct ShoutFn<F>(pub F);

impl<F> ShoutSink for ShoutFn<F>
where
    F: Fn(Shout) + Send + Sync + 'static,
{
    fn shout(&self, shout: Shout) {
        (self.0)(shout)
    }
}

// ───────────────────────────────────────────────────────────────────
// Bookkeeping
// ───────────────────────────────────────────────────────────────────

/// A remote user present on the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collaborator {
    pub user: UserId,
    /// Last announced `fields.<field>.<locale>` path, if any.
    pub focused_path: Option<String>,
}

impl Collaborator {
    pub fn is_focused_on(&self, path: &str) -> bool {
        self.focused_path.as_deref() == Some(path)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    collaborator: Collaborator,
    last_seen: Instant,
}

/// What applying a shout did to the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// The visible collaborator list (membership or focus) changed.
    pub changed: bool,
    /// A new collaborator entry was created.
    pub joined: bool,
    /// The sender asked everyone to announce themselves.
    pub reply: bool,
}

/// Collaborator tracking with an explicit clock.
pub struct PresenceState {
    local_user: UserId,
    entries: IndexMap<UserId, Entry>,
    stale_after: Duration,
}

impl PresenceState {
    pub fn new(local_user: UserId, stale_after: Duration) -> Self {
        Self {
            local_user,
            entries: IndexMap::new(),
            stale_after,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Apply an inbound shout received at `now`.
    pub fn apply(&mut self, shout: &Shout, now: Instant) -> Applied {
        // Our own shouts come back through the document channel.
        if shout.sender() == &self.local_user {
            return Applied::default();
        }

        match shout {
            Shout::Open { from } => {
                let mut applied = self.touch(from, None, now);
                applied.reply = true;
                applied
            }
            Shout::Ping { from } => self.touch(from, None, now),
            Shout::Focus { from, path } => self.touch(from, Some(path.clone()), now),
            Shout::Close { from } => {
                let removed = self.entries.shift_remove(from).is_some();
                if removed {
                    log::debug!("Collaborator {from} left");
                }
                Applied {
                    changed: removed,
                    ..Applied::default()
                }
            }
        }
    }

    /// Create or refresh an entry. The sender's clock always resets to `now`.
    fn touch(&mut self, user: &UserId, focused_path: Option<String>, now: Instant) -> Applied {
        match self.entries.get_mut(user) {
            Some(entry) => {
                entry.last_seen = now;
                let changed = entry.collaborator.focused_path != focused_path;
                entry.collaborator.focused_path = focused_path;
                Applied {
                    changed,
                    ..Applied::default()
                }
            }
            None => {
                log::debug!("Collaborator {user} joined");
                self.entries.insert(
                    user.clone(),
                    Entry {
                        collaborator: Collaborator {
                            user: user.clone(),
                            focused_path,
                        },
                        last_seen: now,
                    },
                );
                Applied {
                    changed: true,
                    joined: true,
                    reply: false,
                }
            }
        }
    }

    /// Remove every collaborator whose last message is `stale_after` old or older.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<UserId> {
        let stale_after = self.stale_after;
        let stale: Vec<UserId> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) >= stale_after)
            .map(|e| e.collaborator.user.clone())
            .collect();

        for user in &stale {
            self.entries.shift_remove(user);
            log::debug!("Collaborator {user} timed out");
        }
        stale
    }

    /// Instant at which the oldest collaborator becomes stale.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|e| e.last_seen)
            .min()
            .map(|oldest| oldest + self.stale_after)
    }

    pub fn last_seen(&self, user: &UserId) -> Option<Instant> {
        self.entries.get(user).map(|e| e.last_seen)
    }

    /// All collaborators, in the order they first appeared.
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.entries.values().map(|e| e.collaborator.clone()).collect()
    }

    /// Collaborators whose focused path is exactly `path`.
    pub fn focused_on(&self, path: &str) -> Vec<Collaborator> {
        self.entries
            .values()
            .filter(|e| e.collaborator.is_focused_on(path))
            .map(|e| e.collaborator.clone())
            .collect()
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// ───────────────────────────────────────────────────────────────────
// Hub
// ───────────────────────────────────────────────────────────────────

struct Inner {
    state: PresenceState,
    throttle: KeyedThrottle<FieldPath>,
    local_focus: Option<FieldPath>,
    /// `close` was shouted; nothing else goes out.
    departed: bool,
    disposed: bool,
}

impl Inner {
    /// `focus` when we have a focused field, `ping` otherwise.
    fn announcement(&self) -> Shout {
        let me = self.state.local_user().clone();
        match &self.local_focus {
            Some(path) => Shout::focus(me, path),
            None => Shout::ping(me),
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    view: watch::Sender<Vec<Collaborator>>,
    sink: Arc<dyn ShoutSink>,
    /// Wakes the sweeper when a new expiry may be earlier than its deadline.
    reschedule: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: PresenceConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.view.send_replace(inner.state.collaborators());
    }

    fn handle_event(&self, event: &DocEvent) {
        match event.as_shout() {
            None => {}
            Some(Ok(shout)) => self.handle_shout(&shout),
            Some(Err(e)) => log::debug!("Ignoring shout: {e}"),
        }
    }

    fn handle_shout(&self, shout: &Shout) {
        let reply = {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            let applied = inner.state.apply(shout, Instant::now());
            if applied.changed {
                self.publish(&inner);
            }
            if applied.joined {
                self.reschedule.notify_one();
            }
            (applied.reply && !inner.departed).then(|| inner.announcement())
        };

        if let Some(reply) = reply {
            self.sink.shout(reply);
        }
    }

    /// Evict stale collaborators and return when the next sweep is due.
    fn sweep(&self, now: Instant) -> Option<Instant> {
        let mut inner = self.lock();
        if inner.disposed {
            return None;
        }
        if !inner.state.evict_stale(now).is_empty() {
            self.publish(&inner);
        }
        let periodic = now + self.config.sweep_interval;
        Some(match inner.state.next_expiry() {
            Some(expiry) if expiry < periodic => expiry,
            _ => periodic,
        })
    }

    fn heartbeat(&self) -> Option<Shout> {
        let inner = self.lock();
        (!inner.disposed && !inner.departed).then(|| inner.announcement())
    }

    /// Shouts for every focus window that closed by `now`.
    ///
    /// If the last flushed path is not the current local focus (and that
    /// focus has no window of its own still open), the current focus is
    /// re-announced so remote editors end up on the right field.
    fn flush_focus(&self, now: Instant) -> Vec<Shout> {
        let mut inner = self.lock();
        if inner.disposed || inner.departed {
            return Vec::new();
        }
        let due = inner.throttle.take_due(now);
        let me = inner.state.local_user().clone();
        let mut shouts: Vec<Shout> = due
            .iter()
            .map(|path| Shout::focus(me.clone(), path))
            .collect();

        if let (Some(last), Some(current)) = (due.last(), &inner.local_focus) {
            if last != current && !inner.throttle.is_pending(current) {
                shouts.push(Shout::focus(me, current));
            }
        }
        shouts
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

/// Per-document presence tracker.
///
/// Must be created inside a tokio runtime: the eviction sweep and the
/// heartbeat run as tasks owned by the hub. They stop when the hub is
/// disposed or dropped.
pub struct PresenceHub {
    shared: Arc<Shared>,
}

impl PresenceHub {
    pub fn new(local_user: impl Into<UserId>, sink: impl ShoutSink, config: PresenceConfig) -> Self {
        let local_user = local_user.into();
        let (view, _) = watch::channel(Vec::new());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: PresenceState::new(local_user.clone(), config.stale_after),
                throttle: KeyedThrottle::new(config.focus_throttle),
                local_focus: None,
                departed: false,
                disposed: false,
            }),
            view,
            sink: Arc::new(sink),
            reschedule: Notify::new(),
            tasks: Mutex::new(Vec::new()),
            config,
        });

        shared.track(tokio::spawn(run_sweeper(Arc::downgrade(&shared))));
        shared.track(tokio::spawn(run_heartbeat(
            Arc::downgrade(&shared),
            shared.config.heartbeat_interval,
        )));

        if shared.config.announce_on_start {
            shared.sink.shout(Shout::open(local_user.clone()));
        }
        log::debug!("Presence hub started for {local_user}");

        Self { shared }
    }

    pub fn with_defaults(local_user: impl Into<UserId>, sink: impl ShoutSink) -> Self {
        Self::new(local_user, sink, PresenceConfig::default())
    }

    pub fn local_user(&self) -> UserId {
        self.shared.lock().state.local_user().clone()
    }

    /// Feed an event from the document session. Non-shout events are ignored.
    pub fn handle_event(&self, event: &DocEvent) {
        self.shared.handle_event(event);
    }

    pub fn handle_shout(&self, shout: &Shout) {
        self.shared.handle_shout(shout);
    }

    /// Consume a document event stream on a task owned by this hub.
    pub fn attach<S>(&self, events: S)
    where
        S: Stream<Item = DocEvent> + Send + Unpin + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.track(tokio::spawn(run_listener(weak, events)));
    }

    /// Record local focus and announce it, throttled per field/locale.
    pub fn focus(&self, field_id: &str, locale_id: &str) {
        let path = FieldPath::new(field_id, locale_id);
        let deadline = {
            let mut inner = self.shared.lock();
            if inner.disposed || inner.departed {
                return;
            }
            inner.local_focus = Some(path.clone());
            match inner.throttle.offer(path, Instant::now()) {
                Offer::Scheduled(deadline) => deadline,
                Offer::Coalesced => return,
            }
        };

        let weak = Arc::downgrade(&self.shared);
        self.shared.track(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(shared) = weak.upgrade() else { return };
            for shout in shared.flush_focus(Instant::now()) {
                shared.sink.shout(shout);
            }
        }));
    }

    /// Forget local focus; the next heartbeat will `ping`.
    pub fn blur(&self) {
        self.shared.lock().local_focus = None;
    }

    pub fn local_focus(&self) -> Option<FieldPath> {
        self.shared.lock().local_focus.clone()
    }

    /// Tell the other editors we are leaving.
    ///
    /// Stops every outbound shout (heartbeat, focus, `open` replies) so the
    /// remote hubs do not bring us back. Inbound tracking keeps working.
    pub fn leave(&self) {
        let me = {
            let mut inner = self.shared.lock();
            if inner.disposed || inner.departed {
                return;
            }
            inner.departed = true;
            inner.throttle.clear();
            inner.state.local_user().clone()
        };
        self.shared.sink.shout(Shout::close(me.clone()));
        log::debug!("{me} left the document");
    }

    pub fn has_left(&self) -> bool {
        self.shared.lock().departed
    }

    /// Leave, stop background work and clear the views.
    pub fn dispose(&self) {
        let me = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.throttle.clear();
            inner.state.clear();
            self.shared.publish(&inner);
            let already_left = std::mem::replace(&mut inner.departed, true);
            (!already_left).then(|| inner.state.local_user().clone())
        };
        self.shared.abort_tasks();
        let Some(me) = me else {
            log::debug!("Presence hub disposed after leave");
            return;
        };
        self.shared.sink.shout(Shout::close(me.clone()));
        log::debug!("Presence hub for {me} disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    /// Live view of every present collaborator.
    pub fn collaborators(&self) -> watch::Receiver<Vec<Collaborator>> {
        self.shared.view.subscribe()
    }

    /// Live view of the collaborators focused on `fields.<field>.<locale>`.
    pub fn collaborators_for(&self, field_id: &str, locale_id: &str) -> FieldCollaborators {
        FieldCollaborators::new(
            self.shared.view.subscribe(),
            FieldPath::new(field_id, locale_id).to_string(),
        )
    }

    /// Ids of the current collaborators.
    pub fn collaborator_ids(&self) -> Vec<UserId> {
        self.shared
            .view
            .borrow()
            .iter()
            .map(|c| c.user.clone())
            .collect()
    }

    pub fn collaborator_count(&self) -> usize {
        self.shared.view.borrow().len()
    }
}

impl Drop for PresenceHub {
    fn drop(&mut self) {
        self.shared.abort_tasks();
    }
}

/// A live view filtered to one field path.
pub struct FieldCollaborators {
    rx: watch::Receiver<Vec<Collaborator>>,
    path: String,
    last: Vec<Collaborator>,
}

impl FieldCollaborators {
    fn new(rx: watch::Receiver<Vec<Collaborator>>, path: String) -> Self {
        let last = filter_path(&rx.borrow(), &path);
        Self { rx, path, last }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Collaborators focused on this path right now.
    pub fn current(&self) -> Vec<Collaborator> {
        filter_path(&self.rx.borrow(), &self.path)
    }

    /// Wait until the filtered list differs from the last one returned.
    ///
    /// Returns `None` once the hub is gone.
    pub async fn changed(&mut self) -> Option<Vec<Collaborator>> {
        loop {
            self.rx.changed().await.ok()?;
            let next = filter_path(&self.rx.borrow_and_update(), &self.path);
            if next != self.last {
                self.last = next.clone();
                return Some(next);
            }
        }
    }
}

fn filter_path(all: &[Collaborator], path: &str) -> Vec<Collaborator> {
    all.iter().filter(|c| c.is_focused_on(path)).cloned().collect()
}

// ───────────────────────────────────────────────────────────────────
// Background tasks
// ───────────────────────────────────────────────────────────────────

async fn run_sweeper(shared: Weak<Shared>) {
    loop {
        let wake = {
            let Some(shared) = shared.upgrade() else { return };
            match shared.sweep(Instant::now()) {
                Some(wake) => wake,
                None => return,
            }
        };

        let Some(notify_owner) = shared.upgrade() else { return };
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = notify_owner.reschedule.notified() => {}
        }
    }
}

async fn run_heartbeat(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else { return };
        match shared.heartbeat() {
            Some(shout) => shared.sink.shout(shout),
            None => return,
        }
    }
}

async fn run_listener<S>(shared: Weak<Shared>, mut events: S)
where
    S: Stream<Item = DocEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        let Some(shared) = shared.upgrade() else { return };
        shared.handle_event(&event);
    }
}

// ===================================================================
// Tests
// ===================================================================
