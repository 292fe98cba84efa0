//! Per-page fan-out of accepted strokes.
//!
//! Each page gets one tokio broadcast channel. An insert is encoded once and
//! the same `Arc<Vec<u8>>` frame is handed to every subscriber. A subscriber
//! that falls more than `capacity` frames behind loses the oldest ones.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use inkwall_core::PageId;

use crate::protocol::{FeedMessage, ProtocolError};

#[derive(Debug, Clone, Default)]
pub struct RoomStats {
    pub messages_sent: u64,
    /// Published while nobody was subscribed
    pub messages_unheard: u64,
    /// Frames skipped by lagging subscribers
    pub messages_lagged: u64,
    pub subscribers: usize,
}

struct AtomicRoomStats {
    messages_sent: AtomicU64,
    messages_unheard: AtomicU64,
    messages_lagged: AtomicU64,
}

impl AtomicRoomStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_unheard: AtomicU64::new(0),
            messages_lagged: AtomicU64::new(0),
        }
    }
}

/// Broadcast group for one page.
pub struct PageRoom {
    page_id: PageId,
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    /// Connection ids currently subscribed
    subscribers: RwLock<HashSet<Uuid>>,
    capacity: usize,
    stats: AtomicRoomStats,
}

impl PageRoom {
    pub fn new(page_id: PageId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            page_id,
            sender,
            subscribers: RwLock::new(HashSet::new()),
            capacity,
            stats: AtomicRoomStats::new(),
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Register a subscriber and hand back its receiver.
    pub async fn add_subscriber(&self, conn_id: Uuid) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.subscribers.write().await.insert(conn_id);
        self.sender.subscribe()
    }

    pub async fn remove_subscriber(&self, conn_id: &Uuid) -> bool {
        self.subscribers.write().await.remove(conn_id)
    }

    /// Encode once and fan out. Returns the number of receivers reached.
    pub fn publish(&self, msg: &FeedMessage) -> Result<usize, ProtocolError> {
        Ok(self.publish_raw(Arc::new(msg.encode()?)))
    }

    /// Fan out an already encoded frame.
    pub fn publish_raw(&self, encoded: Arc<Vec<u8>>) -> usize {
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(encoded) {
            Ok(count) => count,
            Err(_) => {
                self.stats.messages_unheard.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn record_lag(&self, skipped: u64) {
        self.stats.messages_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn stats(&self) -> RoomStats {
        RoomStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_unheard: self.stats.messages_unheard.load(Ordering::Relaxed),
            messages_lagged: self.stats.messages_lagged.load(Ordering::Relaxed),
            subscribers: self.subscriber_count().await,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps page ids to their rooms.
pub struct RoomManager {
    rooms: RwLock<HashMap<PageId, Arc<PageRoom>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Join a page's room, opening it if needed.
    ///
    /// Registration happens under the map's write lock, so a concurrent
    /// `remove_if_empty` cannot drop the room between lookup and join.
    pub async fn subscribe(
        &self,
        page_id: &PageId,
        conn_id: Uuid,
    ) -> (Arc<PageRoom>, broadcast::Receiver<Arc<Vec<u8>>>) {
        let mut rooms = self.rooms.write().await;
        let room = match rooms.get(page_id) {
            Some(room) => room.clone(),
            None => {
                let room = Arc::new(PageRoom::new(page_id.clone(), self.default_capacity));
                rooms.insert(page_id.clone(), room.clone());
                log::debug!("Opened feed room for page {page_id}");
                room
            }
        };
        let rx = room.add_subscriber(conn_id).await;
        (room, rx)
    }

    /// Existing room for a page, if anyone ever subscribed.
    pub async fn get(&self, page_id: &PageId) -> Option<Arc<PageRoom>> {
        self.rooms.read().await.get(page_id).cloned()
    }

    /// Drop the room once its last subscriber is gone.
    pub async fn remove_if_empty(&self, page_id: &PageId) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(page_id) {
            if room.subscriber_count().await == 0 {
                rooms.remove(page_id);
                log::debug!("Closed feed room for page {page_id}");
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_pages(&self) -> Vec<PageId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}
