//! Process-wide channel table (spec §4.2).
//!
//! Ids are stable and monotonically increasing, assigned once at insertion
//! and never reused or renumbered when other channels are removed -- a
//! deliberate departure from the teacher's ordinal-by-position lookup (see
//! DESIGN.md).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::channel::{Channel, ChannelHandle, Role};

pub struct Registry {
    next_id: AtomicU64,
    channels: Mutex<HashMap<u64, ChannelHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            next_id: AtomicU64::new(0),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates the next id, builds a `Channel` around it, and inserts it.
    pub async fn insert(&self, peer: SocketAddr, role: Role) -> ChannelHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let channel = Channel::new(id, peer, role);
        self.channels.lock().await.insert(id, channel.clone());
        channel
    }

    pub async fn remove(&self, id: u64) {
        self.channels.lock().await.remove(&id);
    }

    pub async fn lookup(&self, id: u64) -> Option<ChannelHandle> {
        self.channels.lock().await.get(&id).cloned()
    }

    /// A point-in-time copy of the live handles, safe to iterate without
    /// holding the table lock -- the only way this registry permits
    /// enumeration concurrent with insert/remove elsewhere (spec §4.2).
    pub async fn snapshot(&self) -> Vec<ChannelHandle> {
        self.channels.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
