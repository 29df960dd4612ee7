//! Multi-account hub.
//!
//! One `Backend` per process: the shared model tables, the per-room
//! send locks that keep outbound message order stable against the
//! server, the set of locally-authenticated accounts, the media cache
//! and the alert channel the UI listens on.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::info;

use causerie_media::{AvProbe, MediaCache, NullProbe};
use causerie_model::ModelStore;
use causerie_shared::error::Result;
use causerie_shared::{EventId, RoomId, UserId};

/// A user-facing notification request: an event arrived in a room,
/// after backlog, from someone who is not one of our accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub account: UserId,
    pub room_id: RoomId,
    pub event_id: EventId,
}

pub struct Backend {
    models: ModelStore,
    media: MediaCache,
    av_probe: Arc<dyn AvProbe>,
    /// Accounts currently logged in on this device.
    accounts: Mutex<HashSet<UserId>>,
    /// One lock per room, protecting the outbound send path only.
    send_locks: Mutex<HashMap<RoomId, Arc<tokio::sync::Mutex<()>>>>,
    alerts_tx: mpsc::UnboundedSender<Alert>,
}

impl Backend {
    /// Build the hub. The returned receiver carries alert requests for
    /// the UI layer.
    pub async fn new(
        data_dir: &Path,
        av_probe: Arc<dyn AvProbe>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Alert>)> {
        let media = MediaCache::new(data_dir)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let (alerts_tx, alerts_rx) = mpsc::unbounded_channel();

        let backend = Arc::new(Self {
            models: ModelStore::new(),
            media,
            av_probe,
            accounts: Mutex::new(HashSet::new()),
            send_locks: Mutex::new(HashMap::new()),
            alerts_tx,
        });
        Ok((backend, alerts_rx))
    }

    /// Hub with default collaborators, for tests.
    pub async fn for_tests() -> (Arc<Self>, mpsc::UnboundedReceiver<Alert>) {
        let dir = std::env::temp_dir().join("causerie-tests");
        Self::new(&dir, Arc::new(NullProbe))
            .await
            .expect("test backend")
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn media(&self) -> &MediaCache {
        &self.media
    }

    pub fn av_probe(&self) -> &Arc<dyn AvProbe> {
        &self.av_probe
    }

    pub(crate) fn register_account(&self, user_id: &UserId) {
        self.accounts
            .lock()
            .expect("accounts set poisoned")
            .insert(user_id.clone());
        info!(user = %user_id, "Account registered");
    }

    pub(crate) fn remove_account(&self, user_id: &UserId) {
        self.accounts
            .lock()
            .expect("accounts set poisoned")
            .remove(user_id);
        info!(user = %user_id, "Account removed");
    }

    /// Whether this user is one of the locally-authenticated accounts.
    pub fn is_local_account(&self, user_id: &UserId) -> bool {
        self.accounts
            .lock()
            .expect("accounts set poisoned")
            .contains(user_id)
    }

    pub fn account_ids(&self) -> Vec<UserId> {
        self.accounts
            .lock()
            .expect("accounts set poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// The send lock for a room; two concurrent sends to one room must
    /// not race past the server in reverse order.
    pub(crate) fn send_lock(&self, room: &RoomId) -> Arc<tokio::sync::Mutex<()>> {
        self.send_locks
            .lock()
            .expect("send locks poisoned")
            .entry(room.clone())
            .or_default()
            .clone()
    }

    pub(crate) fn raise_alert(&self, alert: Alert) {
        // UI may not be listening (headless tests); that is fine.
        let _ = self.alerts_tx.send(alert);
    }
}
