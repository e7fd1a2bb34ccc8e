//! EntryDesk shell: scripted editing session.
//!
//! Opens an entry editor, lets a simulated remote collaborator join the same
//! document and logs what the presence layer reports along the way. Set
//! `ENTRYDESK_USER` to choose the local user id and `RUST_LOG` for verbosity.

use entrydesk_collab::{Collaborator, PresenceConfig, PresenceHub};
use entrydesk_core::{ConfirmDialog, TabOptions};
use entrydesk_shell::{ShellConfig, Workspace};
use log::info;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Confirms every close, logging the question.
struct AutoConfirm;

impl ConfirmDialog for AutoConfirm {
    fn confirm(&self, message: &str) -> impl Future<Output = bool> + Send {
        info!("Dialog: \"{message}\" -> yes");
        std::future::ready(true)
    }
}

fn log_presence(label: &str, collaborators: &[Collaborator]) {
    if collaborators.is_empty() {
        info!("[{label}] nobody else here");
    }
    for c in collaborators {
        match &c.focused_path {
            Some(path) => info!("[{label}] {} editing {path}", c.user),
            None => info!("[{label}] {} viewing", c.user),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ShellConfig::default();
    if let Ok(user) = std::env::var("ENTRYDESK_USER") {
        config.user = user.into();
    }
    info!("Starting EntryDesk shell as {}", config.user);
    let throttle = config.presence.focus_throttle;

    let mut workspace = Workspace::new(config);
    workspace.open_view(TabOptions::new("home", "dashboard").title("Home").closable(false));

    let doc = Uuid::new_v4();
    let Some(tab) = workspace.open_entry(doc, "Spring launch announcement").await else {
        log::error!("Could not open entry tab");
        return;
    };
    let Some(room) = workspace.room(&doc).await else {
        log::error!("Room for {doc} missing");
        return;
    };

    // Simulated remote collaborator on the same document.
    let events = room.join("remote-editor".into()).await;
    let remote = PresenceHub::new("remote-editor", room.sink(), PresenceConfig::default());
    remote.attach(events);
    remote.focus("title", "en-US");

    workspace.focus("body", "en-US");
    tokio::time::sleep(throttle + Duration::from_millis(200)).await;
    log_presence("local", &workspace.active_collaborators());
    log_presence("remote", &remote.collaborators().borrow());

    remote.focus("body", "en-US");
    tokio::time::sleep(throttle + Duration::from_millis(200)).await;
    log_presence("local", &workspace.active_collaborators());

    remote.dispose();
    tokio::time::sleep(Duration::from_millis(50)).await;
    log_presence("local", &workspace.active_collaborators());

    workspace.tabs_mut().set_dirty(tab, true);
    workspace.ask_to_close(tab, &AutoConfirm).await;
    info!(
        "{} tab(s) open, {} visible, {} editor(s)",
        workspace.tabs().len(),
        workspace.tabs().num_visible(),
        workspace.open_editor_count()
    );

    let stats = room.stats().await;
    info!(
        "Room {doc}: {} frames sent, {} dropped, {} member(s)",
        stats.frames_sent, stats.frames_dropped, stats.members
    );

    workspace.shutdown().await;
}
