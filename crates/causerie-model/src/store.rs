//! Shared model tables, one per (entity kind, account, room).
//!
//! All mutations go through short closure-scoped locks; nothing awaits
//! while a table is held, so a plain `Mutex` is enough to serialize
//! turn order (see the concurrency notes in the client crate).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use causerie_shared::{RoomId, UserId};

use crate::items::{Account, Event, Member, Room, Upload};

/// One ordered key-value table of model items.
#[derive(Debug)]
pub struct Model<T> {
    items: BTreeMap<String, T>,
    /// Bumped on every mutation; the UI publishes dirty tables on its
    /// own cadence.
    version: u64,
    /// Number of forced immediate publishes.
    publishes: u64,
    notify: Arc<Notify>,
}

impl<T> Default for Model<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            version: 0,
            publishes: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

impl<T: Clone> Model<T> {
    pub fn insert(&mut self, key: impl Into<String>, item: T) {
        self.items.insert(key.into(), item);
        self.version += 1;
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Mutate an item in place; no-op when the key is absent.
    pub fn update(&mut self, key: &str, f: impl FnOnce(&mut T)) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                f(item);
                self.version += 1;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        let removed = self.items.remove(key);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.version += 1;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    /// Force an immediate publish to the UI instead of waiting for the
    /// normal cadence.
    pub fn sync_now(&mut self) {
        self.publishes += 1;
        self.notify.notify_waiters();
    }

    /// Count of forced publishes so far (UI bookkeeping and tests).
    pub fn publish_count(&self) -> u64 {
        self.publishes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Handle the UI can await for forced publishes.
    pub fn publish_signal(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

/// Every model table of the process, shared by all logged-in accounts.
#[derive(Debug, Default)]
pub struct ModelStore {
    accounts: Mutex<Model<Account>>,
    rooms: Mutex<HashMap<UserId, Model<Room>>>,
    events: Mutex<HashMap<(UserId, RoomId), Model<Event>>>,
    members: Mutex<HashMap<(UserId, RoomId), Model<Member>>>,
    uploads: Mutex<HashMap<RoomId, Model<Upload>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts<R>(&self, f: impl FnOnce(&mut Model<Account>) -> R) -> R {
        let mut guard = self.accounts.lock().expect("accounts table poisoned");
        f(&mut guard)
    }

    pub fn with_rooms<R>(&self, account: &UserId, f: impl FnOnce(&mut Model<Room>) -> R) -> R {
        let mut guard = self.rooms.lock().expect("rooms table poisoned");
        f(guard.entry(account.clone()).or_default())
    }

    pub fn with_events<R>(
        &self,
        account: &UserId,
        room: &RoomId,
        f: impl FnOnce(&mut Model<Event>) -> R,
    ) -> R {
        let mut guard = self.events.lock().expect("events table poisoned");
        f(guard.entry((account.clone(), room.clone())).or_default())
    }

    pub fn with_members<R>(
        &self,
        account: &UserId,
        room: &RoomId,
        f: impl FnOnce(&mut Model<Member>) -> R,
    ) -> R {
        let mut guard = self.members.lock().expect("members table poisoned");
        f(guard.entry((account.clone(), room.clone())).or_default())
    }

    pub fn with_uploads<R>(&self, room: &RoomId, f: impl FnOnce(&mut Model<Upload>) -> R) -> R {
        let mut guard = self.uploads.lock().expect("uploads table poisoned");
        f(guard.entry(room.clone()).or_default())
    }

    /// Drop the event and member tables of a room (room forget).
    pub fn drop_room_tables(&self, account: &UserId, room: &RoomId) {
        let key = (account.clone(), room.clone());
        self.events
            .lock()
            .expect("events table poisoned")
            .remove(&key);
        self.members
            .lock()
            .expect("members table poisoned")
            .remove(&key);
    }

    /// Room ids that have an event table for this account.
    pub fn event_table_rooms(&self, account: &UserId) -> Vec<RoomId> {
        self.events
            .lock()
            .expect("events table poisoned")
            .keys()
            .filter(|(acc, _)| acc == account)
            .map(|(_, room)| room.clone())
            .collect()
    }
}
