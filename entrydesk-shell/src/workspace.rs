//! Editor workspace: tabs plus one presence hub per open entry editor.
//!
//! ```text
//!  open_entry ──► TabList::add ──► room.join ──► PresenceHub (attached)
//!  close / close_all / replace ──► Closed|Replaced ──► queue ──► reap ──► dispose
//! ```
//!
//! Tab listeners are synchronous, so closing only queues the tab id; the
//! hub is disposed and the room left when the queue is reaped after the
//! operation.

use entrydesk_collab::{
    Collaborator, PresenceConfig, PresenceHub, RoomConfig, RoomRegistry, ShoutRoom, UserId,
};
use entrydesk_core::{ConfirmDialog, Propagation, TabEventKind, TabId, TabList, TabOptions};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const ENTRY_SECTION: &str = "entries";
pub const ENTRY_EDITOR_VIEW: &str = "entry-editor";

/// Shell configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Id announced to collaborators
    pub user: UserId,
    pub presence: PresenceConfig,
    pub room: RoomConfig,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            user: UserId::new(format!("user-{}", Uuid::new_v4().simple())),
            presence: PresenceConfig::default(),
            room: RoomConfig::default(),
        }
    }
}

struct EntryEditor {
    doc_id: Uuid,
    hub: PresenceHub,
}

pub struct Workspace {
    config: ShellConfig,
    tabs: TabList,
    rooms: RoomRegistry,
    editors: HashMap<TabId, EntryEditor>,
    closed: Arc<Mutex<Vec<TabId>>>,
}

impl Workspace {
    pub fn new(config: ShellConfig) -> Self {
        let mut tabs = TabList::new();
        let closed = Arc::new(Mutex::new(Vec::new()));

        let pending = closed.clone();
        tabs.subscribe(move |_, event| {
            let gone = match event.kind {
                TabEventKind::Closed => Some(event.tab.id()),
                TabEventKind::Replaced { old } => Some(old),
                _ => None,
            };
            if let (Some(id), Ok(mut queue)) = (gone, pending.lock()) {
                queue.push(id);
            }
            Propagation::Continue
        });

        Self {
            rooms: RoomRegistry::new(config.room.clone()),
            config,
            tabs,
            editors: HashMap::new(),
            closed,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.config.user
    }

    pub fn tabs(&self) -> &TabList {
        &self.tabs
    }

    /// Direct access to the tab list. Call [`Workspace::reap`] after closing
    /// tabs through it.
    pub fn tabs_mut(&mut self) -> &mut TabList {
        &mut self.tabs
    }

    /// Open (or focus) the editor tab for a document and start its presence.
    pub async fn open_entry(&mut self, doc_id: Uuid, title: &str) -> Option<TabId> {
        if let Some((&id, _)) = self.editors.iter().find(|(_, e)| e.doc_id == doc_id) {
            self.tabs.activate(id);
            return Some(id);
        }

        let options = TabOptions::new(ENTRY_SECTION, ENTRY_EDITOR_VIEW)
            .title(title)
            .params(json!({ "entryId": doc_id }));
        let id = self.tabs.add(options)?;

        let room = self.rooms.get_or_create(doc_id).await;
        let events = room.join(self.config.user.clone()).await;
        let hub = PresenceHub::new(
            self.config.user.clone(),
            room.sink(),
            self.config.presence.clone(),
        );
        hub.attach(events);
        self.editors.insert(id, EntryEditor { doc_id, hub });
        log::info!("Opened entry {doc_id} in {id}");

        self.tabs.activate(id);
        Some(id)
    }

    /// Open a tab without presence (dashboards, asset lists...).
    pub fn open_view(&mut self, options: TabOptions) -> Option<TabId> {
        let id = self.tabs.add(options)?;
        self.tabs.activate(id);
        Some(id)
    }

    pub async fn close(&mut self, id: TabId) -> bool {
        let closed = self.tabs.close_tab(id);
        self.reap().await;
        closed
    }

    pub async fn ask_to_close<D: ConfirmDialog>(&mut self, id: TabId, dialog: &D) -> bool {
        let closed = self.tabs.ask_to_close_tab(id, dialog).await;
        self.reap().await;
        closed
    }

    pub async fn close_all(&mut self) {
        self.tabs.close_all();
        self.reap().await;
    }

    /// Dispose the hubs of tabs that went away and leave their rooms.
    pub async fn reap(&mut self) {
        let gone: Vec<TabId> = match self.closed.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        for id in gone {
            let Some(editor) = self.editors.remove(&id) else {
                continue;
            };
            editor.hub.dispose();
            if let Some(room) = self.rooms.get(&editor.doc_id).await {
                room.leave(&self.config.user).await;
            }
            if self.rooms.remove_if_empty(&editor.doc_id).await {
                log::debug!("Room {} closed", editor.doc_id);
            }
            log::info!("Closed entry {} ({id})", editor.doc_id);
        }
    }

    pub async fn room(&self, doc_id: &Uuid) -> Option<Arc<ShoutRoom>> {
        self.rooms.get(doc_id).await
    }

    pub fn presence(&self, id: TabId) -> Option<&PresenceHub> {
        self.editors.get(&id).map(|e| &e.hub)
    }

    fn active_hub(&self) -> Option<&PresenceHub> {
        self.tabs.current().and_then(|id| self.presence(id))
    }

    /// Report local focus in the active editor.
    pub fn focus(&self, field_id: &str, locale_id: &str) -> bool {
        match self.active_hub() {
            Some(hub) => {
                hub.focus(field_id, locale_id);
                true
            }
            None => false,
        }
    }

    pub fn blur(&self) {
        if let Some(hub) = self.active_hub() {
            hub.blur();
        }
    }

    /// Collaborators on the active editor's document.
    pub fn active_collaborators(&self) -> Vec<Collaborator> {
        self.active_hub()
            .map(|hub| hub.collaborators().borrow().clone())
            .unwrap_or_default()
    }

    pub fn open_editor_count(&self) -> usize {
        self.editors.len()
    }

    /// Close everything and release all rooms.
    pub async fn shutdown(mut self) {
        self.close_all().await;
        log::info!("Workspace for {} shut down", self.config.user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(user: &str) -> ShellConfig {
        ShellConfig {
            user: UserId::from(user),
            ..ShellConfig::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// A second editor of the same document, outside the workspace.
    async fn remote(room: &ShoutRoom, user: &str) -> PresenceHub {
        let events = room.join(user.into()).await;
        let hub = PresenceHub::new(user, room.sink(), PresenceConfig::default());
        hub.attach(events);
        hub
    }

    fn ids(collaborators: &[Collaborator]) -> Vec<String> {
        collaborators.iter().map(|c| c.user.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_entry_binds_presence() {
        let mut workspace = Workspace::new(config("alice"));
        let doc = Uuid::new_v4();

        let tab = workspace.open_entry(doc, "Launch").await.unwrap();
        assert_eq!(workspace.tabs().current(), Some(tab));
        assert_eq!(workspace.open_editor_count(), 1);
        assert_eq!(workspace.tabs().get(tab).unwrap().params["entryId"], doc.to_string());

        let room = workspace.room(&doc).await.unwrap();
        let bob = remote(&room, "bob").await;
        settle().await;

        assert_eq!(ids(&workspace.active_collaborators()), vec!["bob"]);
        assert_eq!(bob.collaborator_ids(), vec![UserId::from("alice")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopening_entry_reuses_tab() {
        let mut workspace = Workspace::new(config("alice"));
        let doc = Uuid::new_v4();

        let first = workspace.open_entry(doc, "Launch").await.unwrap();
        workspace.open_view(TabOptions::new("home", "dashboard"));
        let second = workspace.open_entry(doc, "Launch").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(workspace.tabs().current(), Some(first));
        assert_eq!(workspace.open_editor_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_tab_says_goodbye() {
        let mut workspace = Workspace::new(config("alice"));
        let doc = Uuid::new_v4();
        let tab = workspace.open_entry(doc, "Launch").await.unwrap();

        let room = workspace.room(&doc).await.unwrap();
        let bob = remote(&room, "bob").await;
        settle().await;
        assert_eq!(bob.collaborator_count(), 1);

        assert!(workspace.close(tab).await);
        settle().await;

        assert_eq!(workspace.open_editor_count(), 0);
        assert_eq!(bob.collaborator_count(), 0);
        assert!(!room.has_member(&UserId::from("alice")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_all_releases_rooms() {
        let mut workspace = Workspace::new(config("alice"));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        workspace.open_entry(first, "One").await;
        workspace.open_entry(second, "Two").await;

        workspace.close_all().await;
        assert!(workspace.tabs().is_empty());
        assert_eq!(workspace.open_editor_count(), 0);
        assert!(workspace.room(&first).await.is_none());
        assert!(workspace.room(&second).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_follows_active_tab() {
        let mut workspace = Workspace::new(config("alice"));
        let doc = Uuid::new_v4();
        workspace.open_entry(doc, "Launch").await;
        let room = workspace.room(&doc).await.unwrap();
        let bob = remote(&room, "bob").await;

        assert!(workspace.focus("title", "en-US"));
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        let on_title = bob.collaborators_for("title", "en-US").current();
        assert_eq!(ids(&on_title), vec!["alice"]);

        // Moving to a view tab leaves no hub to focus.
        workspace.open_view(TabOptions::new("home", "dashboard"));
        assert!(!workspace.focus("body", "en-US"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_editor_is_reaped() {
        let mut workspace = Workspace::new(config("alice"));
        let doc = Uuid::new_v4();
        let tab = workspace.open_entry(doc, "Launch").await.unwrap();

        workspace
            .tabs_mut()
            .replace_tab(tab, TabOptions::new("home", "dashboard"));
        workspace.reap().await;

        assert_eq!(workspace.open_editor_count(), 0);
        assert_eq!(workspace.tabs().len(), 1);
    }
}
