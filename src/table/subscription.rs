//! Per-cell publish/subscribe.
//!
//! Callbacks run on the thread that mutated the store, after the store lock
//! has been released, so they may read the store freely. Each update carries
//! the table's version counter; a subscriber never sees an older version
//! after a newer one, and an update superseded before delivery is skipped.

use super::cell::Cell;
use crate::types::{CellAddress, SessionId};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Generation/edit state of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Idle,
    Streaming(SessionId),
    Editing,
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub address: CellAddress,
    /// `None` when the cell was removed (e.g. reverted to absent)
    pub cell: Option<Cell>,
    pub status: CellStatus,
    pub version: u64,
}

pub type UpdateCallback = Arc<dyn Fn(&CellUpdate) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: UpdateCallback,
    /// Last delivered version; reentrant so a callback may mutate the store
    delivered: ReentrantMutex<std::cell::Cell<u64>>,
}

/// Subscriber lists keyed by cell address
pub(crate) struct SubscriberMap {
    next_id: AtomicU64,
    entries: RwLock<HashMap<CellAddress, Vec<Arc<Subscriber>>>>,
}

impl SubscriberMap {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        address: CellAddress,
        callback: UpdateCallback,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            callback,
            delivered: ReentrantMutex::new(std::cell::Cell::new(0)),
        });
        self.entries
            .write()
            .entry(address.clone())
            .or_default()
            .push(subscriber);
        Subscription {
            id,
            address,
            map: Arc::downgrade(self),
        }
    }

    fn remove(&self, address: &CellAddress, id: u64) {
        let mut entries = self.entries.write();
        if let Some(list) = entries.get_mut(address) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                entries.remove(address);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self, address: &CellAddress) -> usize {
        self.entries
            .read()
            .get(address)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver updates in order. Must be called without the store lock held.
    pub(crate) fn publish(&self, updates: Vec<CellUpdate>) {
        for update in updates {
            let targets = match self.entries.read().get(&update.address) {
                Some(list) => list.clone(),
                None => continue,
            };
            for subscriber in targets {
                let delivered = subscriber.delivered.lock();
                if update.version > delivered.get() {
                    delivered.set(update.version);
                    (subscriber.callback)(&update);
                }
            }
        }
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    address: CellAddress,
    map: Weak<SubscriberMap>,
}

impl Subscription {
    pub fn address(&self) -> &CellAddress {
        &self.address
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(map) = self.map.upgrade() {
            map.remove(&self.address, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}
