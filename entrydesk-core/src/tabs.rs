//! Editor tabs of a workspace.
//!
//! A [`TabList`] owns the open tabs in display order and tracks the single
//! active one. Activation and closing go through cancelable notifications:
//! every listener sees `WantsActive` / `WantsClose` and any of them may veto.
//!
//! ```text
//!            activate              close_tab / close_all
//!  inactive ──────────► active ──────────────────────────► closed
//!     ▲                   │
//!     └───────────────────┘  another tab activated
//! ```
//!
//! Listeners get `&mut TabList`, so they may call back into the list while a
//! notification is being delivered (e.g. open a tab from a `Closed` handler).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Message shown when a dirty tab has no closing message of its own.
pub const DEFAULT_CLOSING_MESSAGE: &str = "You have unsaved changes. Close the tab anyway?";

/// Handle of a tab inside its [`TabList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// Everything needed to open a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabOptions {
    /// Opaque view identifier (e.g. `"entries"`, `"assets"`)
    pub section: String,
    pub view_type: String,
    /// View-specific payload
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "default_can_close")]
    pub can_close: bool,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub closing_message: Option<String>,
}

fn default_can_close() -> bool {
    true
}

impl Default for TabOptions {
    fn default() -> Self {
        Self {
            section: String::new(),
            view_type: String::new(),
            params: Value::Null,
            title: String::new(),
            hidden: false,
            can_close: true,
            dirty: false,
            closing_message: None,
        }
    }
}

impl TabOptions {
    pub fn new(section: impl Into<String>, view_type: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            view_type: view_type.into(),
            ..Self::default()
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn closable(mut self, can_close: bool) -> Self {
        self.can_close = can_close;
        self
    }

    pub fn closing_message(mut self, message: impl Into<String>) -> Self {
        self.closing_message = Some(message.into());
        self
    }
}

/// An open editor tab.
#[derive(Debug, Clone, PartialEq)]
pub struct TabItem {
    id: TabId,
    list: Uuid,
    pub section: String,
    pub view_type: String,
    pub params: Value,
    pub title: String,
    pub hidden: bool,
    pub can_close: bool,
    /// The underlying entity has unsaved changes.
    pub dirty: bool,
    pub closing_message: Option<String>,
}

impl TabItem {
    fn new(id: TabId, list: Uuid, options: TabOptions) -> Self {
        Self {
            id,
            list,
            section: options.section,
            view_type: options.view_type,
            params: options.params,
            title: options.title,
            hidden: options.hidden,
            can_close: options.can_close,
            dirty: options.dirty,
            closing_message: options.closing_message,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    /// Id of the list that created this tab. Never changes.
    pub fn list_id(&self) -> Uuid {
        self.list
    }
}

/// Lifecycle notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEventKind {
    Added,
    /// Cancelable.
    WantsActive,
    BecameActive,
    /// Cancelable, except during `close_all`.
    WantsClose,
    Closed,
    /// The tab took the place of `old`.
    Replaced { old: TabId },
}

/// A notification together with a snapshot of the tab it concerns.
#[derive(Debug, Clone)]
pub struct TabEvent {
    pub kind: TabEventKind,
    pub tab: TabItem,
}

/// A listener's answer to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    /// Cancel the pending activation or close.
    Veto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&mut TabList, &TabEvent) -> Propagation + Send + Sync>;

/// Asks the user whether a dirty tab may be closed.
pub trait ConfirmDialog {
    /// Resolves to `true` when the user confirms.
    fn confirm(&self, message: &str) -> impl Future<Output = bool> + Send;
}

/// Ordered open tabs plus the active one.
pub struct TabList {
    id: Uuid,
    tabs: Vec<TabItem>,
    current: Option<TabId>,
    listeners: Vec<(ListenerId, Listener)>,
    next_tab: u64,
    next_listener: u64,
    closing_all: bool,
}

impl TabList {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            tabs: Vec::new(),
            current: None,
            listeners: Vec::new(),
            next_tab: 1,
            next_listener: 1,
            closing_all: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    // ── Listeners ────────────────────────────────────────────────

    /// Register a lifecycle listener.
    ///
    /// Every listener sees every notification; a single `Veto` cancels a
    /// cancelable one.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&mut TabList, &TabEvent) -> Propagation + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Deliver a notification. Returns `true` if any listener vetoed.
    fn emit(&mut self, kind: TabEventKind, tab: &TabItem) -> bool {
        let event = TabEvent {
            kind,
            tab: tab.clone(),
        };
        // Snapshot: listeners added or removed during delivery take effect
        // from the next notification on.
        let listeners: Vec<Listener> = self.listeners.iter().map(|(_, l)| l.clone()).collect();

        let mut vetoed = false;
        for listener in listeners {
            if listener(self, &event) == Propagation::Veto {
                vetoed = true;
            }
        }
        vetoed
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn tabs(&self) -> &[TabItem] {
        &self.tabs
    }

    pub fn get(&self, id: TabId) -> Option<&TabItem> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TabId) -> Option<&mut TabItem> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub fn position(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|t| t.id == id)
    }

    pub fn current(&self) -> Option<TabId> {
        self.current
    }

    pub fn current_tab(&self) -> Option<&TabItem> {
        self.current.and_then(|id| self.get(id))
    }

    pub fn is_active(&self, id: TabId) -> bool {
        self.current == Some(id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    /// Number of tabs that are not hidden.
    pub fn num_visible(&self) -> usize {
        self.tabs.iter().filter(|t| !t.hidden).count()
    }

    pub fn is_closing_all(&self) -> bool {
        self.closing_all
    }

    // ── Mutation ─────────────────────────────────────────────────

    pub fn set_dirty(&mut self, id: TabId, dirty: bool) -> bool {
        self.get_mut(id).map(|t| t.dirty = dirty).is_some()
    }

    pub fn set_title(&mut self, id: TabId, title: impl Into<String>) -> bool {
        let title = title.into();
        self.get_mut(id).map(|t| t.title = title).is_some()
    }

    pub fn set_hidden(&mut self, id: TabId, hidden: bool) -> bool {
        self.get_mut(id).map(|t| t.hidden = hidden).is_some()
    }

    fn make_item(&mut self, options: TabOptions) -> TabItem {
        let id = TabId(self.next_tab);
        self.next_tab += 1;
        TabItem::new(id, self.id, options)
    }

    /// Append a tab. Returns `None` while `close_all` is running.
    pub fn add(&mut self, options: TabOptions) -> Option<TabId> {
        if self.closing_all {
            log::debug!("Rejected new '{}' tab: closing all tabs", options.section);
            return None;
        }

        let item = self.make_item(options);
        let id = item.id;
        self.tabs.push(item.clone());
        log::debug!("Added {id} (total: {})", self.tabs.len());

        self.emit(TabEventKind::Added, &item);
        Some(id)
    }

    /// Make `id` the active tab unless a listener vetoes.
    ///
    /// Returns whether `id` is active afterwards.
    pub fn activate(&mut self, id: TabId) -> bool {
        if self.current == Some(id) {
            return true;
        }
        let Some(item) = self.get(id).cloned() else {
            return false;
        };

        if self.emit(TabEventKind::WantsActive, &item) {
            log::debug!("Activation of {id} vetoed");
            return false;
        }
        // A listener may have closed it in the meantime.
        let Some(item) = self.get(id).cloned() else {
            return false;
        };

        self.current = Some(id);
        log::debug!("Activated {id}");
        self.emit(TabEventKind::BecameActive, &item);
        true
    }

    /// Close a tab unless a listener vetoes. Returns whether it was closed.
    ///
    /// Closing the active tab activates its left neighbour (or the right one
    /// for the first tab), unless a listener activated something else first.
    pub fn close_tab(&mut self, id: TabId) -> bool {
        let Some(item) = self.get(id).cloned() else {
            return false;
        };

        if self.emit(TabEventKind::WantsClose, &item) {
            log::debug!("Close of {id} vetoed");
            return false;
        }
        let Some(index) = self.position(id) else {
            return false;
        };

        let was_active = self.current == Some(id);
        let next = if !was_active || self.tabs.len() == 1 {
            None
        } else if index > 0 {
            Some(self.tabs[index - 1].id)
        } else {
            Some(self.tabs[index + 1].id)
        };

        let item = self.tabs.remove(index);
        if was_active {
            self.current = None;
        }
        log::debug!("Closed {id} (remaining: {})", self.tabs.len());
        self.emit(TabEventKind::Closed, &item);

        if let Some(next) = next {
            if self.current.is_none() {
                self.activate(next);
            }
        }
        true
    }

    /// Close a tab, asking `dialog` first when it has unsaved changes.
    ///
    /// Clean tabs go straight to [`TabList::close_tab`]. `can_close` only
    /// tells the UI whether to draw a close button and is not checked here.
    pub async fn ask_to_close_tab<D: ConfirmDialog>(&mut self, id: TabId, dialog: &D) -> bool {
        let Some(item) = self.get(id) else {
            return false;
        };

        if item.dirty {
            let message = item
                .closing_message
                .clone()
                .unwrap_or_else(|| DEFAULT_CLOSING_MESSAGE.to_string());
            if !dialog.confirm(&message).await {
                log::debug!("Close of dirty {id} cancelled by user");
                return false;
            }
        }
        self.close_tab(id)
    }

    /// Close every tab. Vetoes are ignored.
    ///
    /// The list is emptied before any listener runs, so tabs added from a
    /// listener during teardown are rejected.
    pub fn close_all(&mut self) {
        self.closing_all = true;
        let closed = std::mem::take(&mut self.tabs);
        self.current = None;
        log::debug!("Closing all {} tabs", closed.len());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            for item in &closed {
                self.emit(TabEventKind::WantsClose, item);
                self.emit(TabEventKind::Closed, item);
            }
        }));

        self.closing_all = false;
        if let Err(payload) = outcome {
            panic::resume_unwind(payload);
        }
    }

    /// Put a new tab in place of `old`, keeping its position. If `old` was
    /// active the new tab is activated.
    pub fn replace_tab(&mut self, old: TabId, options: TabOptions) -> Option<TabId> {
        let index = self.position(old)?;
        let item = self.make_item(options);
        let id = item.id;

        self.tabs[index] = item.clone();
        let was_current = self.current == Some(old);
        if was_current {
            self.current = None;
        }
        log::debug!("Replaced {old} with {id}");
        self.emit(TabEventKind::Replaced { old }, &item);

        if was_current {
            self.activate(id);
        }
        Some(id)
    }
}

impl Default for TabList {
    fn default() -> Self {
        Self::new()
    }
}
