//! Per-document shout fan-out.
//!
//! Stands in for the document session's event channel: every editor of a
//! document joins the same room, shouts are JSON-encoded once and handed to
//! all members through a tokio broadcast channel. The sender receives its own
//! frames too; filtering is the presence hub's job.
//!
//! ```text
//!  PresenceHub A ──RoomSink──┐                  ┌──► stream A ──► hub A
//!                            ├─► ShoutRoom ─────┼──► stream B ──► hub B
//!  PresenceHub B ──RoomSink──┘   (doc_id)       └──► stream C ──► hub C
//! ```

use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::presence::ShoutSink;
use crate::protocol::{DocEvent, Shout, ShoutError, UserId};

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Frames buffered per member before a slow member starts lagging
    pub capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// Statistics for monitoring room health.
#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub members: usize,
}

/// Lock-free counters shared with sinks and member streams.
#[derive(Default)]
struct AtomicRoomStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// All editors of one document.
pub struct ShoutRoom {
    doc_id: Uuid,
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    members: Arc<RwLock<HashSet<UserId>>>,
    capacity: usize,
    stats: Arc<AtomicRoomStats>,
}

impl ShoutRoom {
    pub fn new(doc_id: Uuid, config: &RoomConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity);
        Self {
            doc_id,
            sender,
            members: Arc::new(RwLock::new(HashSet::new())),
            capacity: config.capacity,
            stats: Arc::new(AtomicRoomStats::default()),
        }
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    /// Add a member and return its stream of decoded document events.
    pub async fn join(&self, user: UserId) -> BoxStream<'static, DocEvent> {
        log::debug!("{user} joined room {}", self.doc_id);
        self.members.write().await.insert(user);
        self.event_stream()
    }

    /// Remove a member. Returns whether it was present.
    pub async fn leave(&self, user: &UserId) -> bool {
        let removed = self.members.write().await.remove(user);
        if removed {
            log::debug!("{user} left room {}", self.doc_id);
        }
        removed
    }

    /// Decoded events from this point on, without registering a member.
    ///
    /// Frames that fail to decode are skipped; a lagging receiver counts the
    /// missed frames as dropped and keeps going.
    pub fn event_stream(&self) -> BoxStream<'static, DocEvent> {
        let rx = self.sender.subscribe();
        let stats = self.stats.clone();
        let doc_id = self.doc_id;

        stream::unfold((rx, stats), move |(mut rx, stats)| async move {
            loop {
                match rx.recv().await {
                    Ok(frame) => match DocEvent::decode(&frame) {
                        Ok(event) => return Some((event, (rx, stats))),
                        Err(e) => log::debug!("Skipping undecodable frame in room {doc_id}: {e}"),
                    },
                    Err(RecvError::Lagged(missed)) => {
                        log::warn!("Member of room {doc_id} lagged, {missed} frames dropped");
                        stats.frames_dropped.fetch_add(missed, Ordering::Relaxed);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Encode once and fan out to every member. Returns the receiver count.
    pub fn publish(&self, event: &DocEvent) -> Result<usize, ShoutError> {
        let encoded = Arc::new(event.encode()?);
        Ok(self.publish_raw(encoded))
    }

    /// Fan out a pre-encoded frame.
    pub fn publish_raw(&self, frame: Arc<Vec<u8>>) -> usize {
        send_frame(&self.sender, &self.stats, frame)
    }

    /// Outbound channel for a presence hub in this room.
    pub fn sink(&self) -> RoomSink {
        RoomSink {
            sender: self.sender.clone(),
            stats: self.stats.clone(),
        }
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn members(&self) -> Vec<UserId> {
        let mut members: Vec<UserId> = self.members.read().await.iter().cloned().collect();
        members.sort();
        members
    }

    pub async fn has_member(&self, user: &UserId) -> bool {
        self.members.read().await.contains(user)
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            members: self.members.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn send_frame(
    sender: &broadcast::Sender<Arc<Vec<u8>>>,
    stats: &AtomicRoomStats,
    frame: Arc<Vec<u8>>,
) -> usize {
    let count = sender.send(frame).unwrap_or(0);
    stats.frames_sent.fetch_add(1, Ordering::Relaxed);
    count
}

/// [`ShoutSink`] that publishes into a [`ShoutRoom`].
#[derive(Clone)]
pub struct RoomSink {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    stats: Arc<AtomicRoomStats>,
}

impl ShoutSink for RoomSink {
    fn shout(&self, shout: Shout) {
        match DocEvent::shout(&shout).encode() {
            Ok(frame) => {
                send_frame(&self.sender, &self.stats, Arc::new(frame));
            }
            Err(e) => log::warn!("Failed to encode {:?} shout: {e}", shout.kind()),
        }
    }
}

/// Maps document ids to rooms.
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<ShoutRoom>>>>,
    config: RoomConfig,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Get or create the room for a document.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<ShoutRoom> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&doc_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&doc_id) {
            return room.clone();
        }

        let room = Arc::new(ShoutRoom::new(doc_id, &self.config));
        rooms.insert(doc_id, room.clone());
        room
    }

    pub async fn get(&self, doc_id: &Uuid) -> Option<Arc<ShoutRoom>> {
        self.rooms.read().await.get(doc_id).cloned()
    }

    /// Remove a room once its last member left.
    pub async fn remove_if_empty(&self, doc_id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(doc_id) {
            if room.member_count().await == 0 {
                rooms.remove(doc_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FieldPath;

    #[tokio::test]
    async fn test_join_leave() {
        let room = ShoutRoom::new(Uuid::new_v4(), &RoomConfig::default());
        let alice = UserId::from("alice");

        let _events = room.join(alice.clone()).await;
        assert_eq!(room.member_count().await, 1);
        assert!(room.has_member(&alice).await);

        assert!(room.leave(&alice).await);
        assert!(!room.leave(&alice).await);
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_sink_fans_out_to_all_members() {
        let room = ShoutRoom::new(Uuid::new_v4(), &RoomConfig::default());
        let mut a = room.join("a".into()).await;
        let mut b = room.join("b".into()).await;

        let shout = Shout::focus("a", &FieldPath::new("title", "en"));
        room.sink().shout(shout.clone());

        // The sender hears its own shout as well.
        for events in [&mut a, &mut b] {
            let event = events.next().await.unwrap();
            assert_eq!(event.as_shout().unwrap().unwrap(), shout);
        }
        assert_eq!(room.stats().await.frames_sent, 1);
    }

    #[tokio::test]
    async fn test_undecodable_frames_skipped() {
        let room = ShoutRoom::new(Uuid::new_v4(), &RoomConfig::default());
        let mut events = room.join("a".into()).await;

        assert_eq!(room.publish_raw(Arc::new(b"not json".to_vec())), 1);
        room.publish(&DocEvent::shout(&Shout::ping("b"))).unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.as_shout().unwrap().unwrap(), Shout::ping("b"));
    }

    #[tokio::test]
    async fn test_lagging_member_counts_drops() {
        let room = ShoutRoom::new(Uuid::new_v4(), &RoomConfig { capacity: 2 });
        let mut events = room.join("slow".into()).await;

        for i in 0..5 {
            room.sink().shout(Shout::ping(format!("u{i}")));
        }

        let first = events.next().await.unwrap();
        assert_eq!(first.as_shout().unwrap().unwrap(), Shout::ping("u3"));
        let stats = room.stats().await;
        assert_eq!(stats.frames_sent, 5);
        assert_eq!(stats.frames_dropped, 3);
    }

    #[tokio::test]
    async fn test_registry_get_or_create() {
        let registry = RoomRegistry::default();
        let doc_id = Uuid::new_v4();

        let room1 = registry.get_or_create(doc_id).await;
        let room2 = registry.get_or_create(doc_id).await;
        assert!(Arc::ptr_eq(&room1, &room2));
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.get(&doc_id).await.is_some());
        assert_eq!(registry.active_documents().await, vec![doc_id]);
    }

    #[tokio::test]
    async fn test_registry_cleanup() {
        let registry = RoomRegistry::new(RoomConfig { capacity: 8 });
        let doc_id = Uuid::new_v4();
        let room = registry.get_or_create(doc_id).await;
        assert_eq!(room.capacity(), 8);

        let _events = room.join("alice".into()).await;
        assert!(!registry.remove_if_empty(&doc_id).await);

        room.leave(&"alice".into()).await;
        assert!(registry.remove_if_empty(&doc_id).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_members_sorted() {
        let room = ShoutRoom::new(Uuid::new_v4(), &RoomConfig::default());
        let _b = room.join("bob".into()).await;
        let _a = room.join("alice".into()).await;
        assert_eq!(room.members().await, vec![UserId::from("alice"), UserId::from("bob")]);
    }
}
