//! Per-account session: the operations exposed to the human-facing
//! layer and the sync supervisor keeping the local model consistent
//! with the remote service.
//!
//! Concurrency model: one continuous sync stream per account, any
//! number of upload/pagination/invite tasks, all interleaving at
//! well-defined suspension points on the cooperative scheduler. Model
//! mutations happen inside short lock scopes and never across awaits,
//! so turn order serializes them; only the outbound per-room send path
//! carries an explicit lock to keep message order stable against the
//! server.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use causerie_model::{Account, EventContent};
use causerie_shared::constants::{SYNC_RESTART_DELAY, SYNC_TIMEOUT, TRANSACTION_ID_KEY};
use causerie_shared::error::Result;
use causerie_shared::{CauserieError, EventId, RoomId, TxnId, UserId};

use crate::backend::Backend;
use crate::echo::register_local_echo;
use crate::registrar::{register_event, register_room};
use crate::service::{ChatService, CreateRoomRequest, RoomMembership, RoomSnapshot, SyncBatch};

/// Maximum delay between sync restarts.
const SYNC_BACKOFF_CAP_SECS: u64 = 30;

pub struct Session {
    pub(crate) backend: Arc<Backend>,
    pub(crate) service: Arc<dyn ChatService>,
    pub(crate) user_id: UserId,

    /// Flipped once the first full sync has completed.
    pub(crate) first_sync_tx: watch::Sender<bool>,
    /// Wall-clock date of first-sync completion; events older than
    /// this are backlog and never raise alerts.
    pub(crate) first_sync_date: Mutex<Option<DateTime<Utc>>>,

    /// Oldest fetched position per room, seeded once by sync.
    pub(crate) past_tokens: Mutex<HashMap<RoomId, String>>,
    /// Rooms whose creation event has been reached.
    pub(crate) fully_loaded_rooms: Mutex<HashSet<RoomId>>,
    /// Rooms paginated at least once (affects page size).
    pub(crate) loaded_once_rooms: Mutex<HashSet<RoomId>>,
    /// Rooms whose history the user discarded; pagination disabled.
    pub(crate) cleared_events_rooms: Mutex<HashSet<RoomId>>,
    /// Rooms we are only invited to.
    pub(crate) invited_rooms: Mutex<HashSet<RoomId>>,

    /// Latest authoritative state per room, for history dispatch.
    pub(crate) room_state: Mutex<HashMap<RoomId, RoomSnapshot>>,

    pagination_locks: Mutex<HashMap<RoomId, Arc<tokio::sync::Mutex<()>>>>,
    pub(crate) upload_cancels: Mutex<HashMap<Uuid, watch::Sender<bool>>>,

    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    /// Create a session for an authenticated account and register it
    /// with the hub.
    pub fn new(
        backend: Arc<Backend>,
        service: Arc<dyn ChatService>,
        user_id: UserId,
    ) -> Arc<Self> {
        backend.register_account(&user_id);
        backend.models().with_accounts(|accounts| {
            accounts.insert(user_id.0.clone(), Account::new(user_id.clone()));
        });

        let (first_sync_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            backend,
            service,
            user_id,
            first_sync_tx,
            first_sync_date: Mutex::new(None),
            past_tokens: Mutex::new(HashMap::new()),
            fully_loaded_rooms: Mutex::new(HashSet::new()),
            loaded_once_rooms: Mutex::new(HashSet::new()),
            cleared_events_rooms: Mutex::new(HashSet::new()),
            invited_rooms: Mutex::new(HashSet::new()),
            room_state: Mutex::new(HashMap::new()),
            pagination_locks: Mutex::new(HashMap::new()),
            upload_cancels: Mutex::new(HashMap::new()),
            shutdown_tx,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Spawn the profile refresh task and the sync supervisor.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let profile_session = self.clone();
        tokio::spawn(async move { profile_session.refresh_own_profile().await });

        let session = self.clone();
        tokio::spawn(async move { session.sync_supervisor().await })
    }

    /// Stop the sync supervisor and unregister the account. Models are
    /// left in place for the UI to tear down.
    pub fn logout(&self) {
        self.shutdown_tx.send_replace(true);
        self.backend.remove_account(&self.user_id);
        info!(user = %self.user_id, "Session logged out");
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Completes once the first full sync has finished.
    pub async fn first_sync_done(&self) {
        let mut rx = self.first_sync_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    // -----------------------------------------------------------------
    // Sync supervision
    // -----------------------------------------------------------------

    /// Run the sync stream forever, restarting with bounded backoff on
    /// any failure. Sync must never permanently stop while logged in.
    async fn sync_supervisor(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx();
        let mut since: Option<String> = None;
        let mut failures: u32 = 0;

        loop {
            let sync = self.service.sync(since.clone(), SYNC_TIMEOUT);
            let batch = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!(user = %self.user_id, "Sync supervisor stopped");
                    return;
                }
                result = sync => result,
            };

            match batch {
                Ok(batch) => {
                    failures = 0;
                    since = Some(batch.next_batch.clone());
                    self.process_sync_batch(batch).await;

                    if !*self.first_sync_tx.borrow() {
                        *self.first_sync_date.lock().expect("first sync date poisoned") =
                            Some(Utc::now());
                        // send_replace records the value even while no
                        // waiter is subscribed yet.
                        self.first_sync_tx.send_replace(true);
                        info!(user = %self.user_id, "First sync complete");
                    }
                }
                Err(err) => {
                    let delay = SYNC_RESTART_DELAY
                        .saturating_mul(1 << failures.min(4))
                        .min(std::time::Duration::from_secs(SYNC_BACKOFF_CAP_SECS));
                    failures = failures.saturating_add(1);
                    error!(
                        user = %self.user_id,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Sync failed, will restart"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stop| *stop) => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn process_sync_batch(&self, batch: SyncBatch) {
        let first_sync_date = *self.first_sync_date.lock().expect("first sync date poisoned");

        for room in batch.rooms {
            let room_id = room.snapshot.room_id.clone();

            {
                let mut invited = self.invited_rooms.lock().expect("invited set poisoned");
                if room.snapshot.membership == RoomMembership::Invited {
                    invited.insert(room_id.clone());
                } else {
                    invited.remove(&room_id);
                }
            }

            // The pagination token is seeded exactly once, the first
            // time sync observes the room; afterwards each backward
            // fetch advances it.
            if let Some(prev_batch) = &room.prev_batch {
                let mut tokens = self.past_tokens.lock().expect("past tokens poisoned");
                tokens.entry(room_id.clone()).or_insert(prev_batch.clone());
            }

            self.room_state
                .lock()
                .expect("room state poisoned")
                .insert(room_id.clone(), room.snapshot.clone());

            register_room(&self.backend, &self.user_id, &room.snapshot);

            for event in room.events {
                register_event(
                    &self.backend,
                    self.service.as_ref(),
                    &self.user_id,
                    &room.snapshot,
                    event,
                    first_sync_date,
                )
                .await;
            }
        }
    }

    async fn refresh_own_profile(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx();

        loop {
            match self.service.get_profile(&self.user_id).await {
                Ok(profile) => {
                    self.backend.models().with_accounts(|accounts| {
                        accounts.update(&self.user_id.0, |account| {
                            account.display_name = profile.display_name.clone().unwrap_or_default();
                            account.avatar_url = profile.avatar_url.clone().unwrap_or_default();
                            account.profile_updated = Some(Utc::now());
                        });
                    });
                    return;
                }
                Err(err) => {
                    warn!(user = %self.user_id, error = %err, "Own profile refresh failed");
                    tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|stop| *stop) => return,
                        _ = tokio::time::sleep(SYNC_RESTART_DELAY) => {}
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------

    /// Send a text message, registering a local echo first.
    ///
    /// `//text` and `\/text` escape a literal leading slash; `/me `
    /// marks an emote.
    pub async fn send_text(&self, room_id: &RoomId, text: &str) -> Result<EventId> {
        let mut text = text.to_owned();
        let mut escape = false;
        if text.starts_with("//") || text.starts_with(r"\/") {
            escape = true;
            text.remove(0);
        }

        let (body, msgtype) = match text.strip_prefix("/me ") {
            Some(rest) if !escape => (rest.to_owned(), "m.emote"),
            _ => (text, "m.text"),
        };

        let txn = TxnId::new();
        let content = json!({
            "msgtype": msgtype,
            "body": body,
            TRANSACTION_ID_KEY: txn.to_string(),
        });

        register_local_echo(&self.backend, &self.user_id, room_id, txn, body, None);
        self.send_message_content(room_id, content).await
    }

    /// The one outbound message path, serialized per room so two
    /// concurrent sends cannot race past the server in reverse order.
    pub(crate) async fn send_message_content(
        &self,
        room_id: &RoomId,
        content: serde_json::Value,
    ) -> Result<EventId> {
        let lock = self.backend.send_lock(room_id);
        let _guard = lock.lock().await;
        Ok(self.service.send_message(room_id, content).await?)
    }

    // -----------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------

    /// Start a direct chat with one user.
    pub async fn new_direct_chat(&self, invite: &UserId, encrypt: bool) -> Result<RoomId> {
        if *invite == self.user_id {
            return Err(CauserieError::InvalidUserInContext(invite.0.clone()));
        }
        if !UserId::is_valid(&invite.0) {
            return Err(CauserieError::InvalidUserId(invite.0.clone()));
        }
        if self.service.get_profile(invite).await.is_err() {
            return Err(CauserieError::UserNotFound(invite.0.clone()));
        }

        Ok(self
            .service
            .create_room(CreateRoomRequest {
                invite: vec![invite.clone()],
                direct: true,
                encrypt,
                federate: true,
                ..CreateRoomRequest::default()
            })
            .await?)
    }

    pub async fn new_group_chat(
        &self,
        name: Option<String>,
        topic: Option<String>,
        public: bool,
        encrypt: bool,
        federate: bool,
    ) -> Result<RoomId> {
        Ok(self
            .service
            .create_room(CreateRoomRequest {
                name,
                topic,
                public,
                encrypt,
                federate,
                ..CreateRoomRequest::default()
            })
            .await?)
    }

    /// Join a room by id or alias.
    pub async fn room_join(&self, reference: &str) -> Result<RoomId> {
        let reference = reference.trim();
        if !RoomId::is_valid_id_or_alias(reference) {
            return Err(CauserieError::InvalidRoomReference(reference.to_owned()));
        }
        Ok(self.service.join_room(reference).await?)
    }

    /// Leave and forget a room, dropping every model table for it.
    pub async fn room_forget(&self, room_id: &RoomId) -> Result<()> {
        self.service.leave_room(room_id).await?;
        self.service.forget_room(room_id).await?;

        self.backend.models().with_rooms(&self.user_id, |rooms| {
            rooms.remove(&room_id.0);
        });
        self.backend.models().drop_room_tables(&self.user_id, room_id);

        self.room_state
            .lock()
            .expect("room state poisoned")
            .remove(room_id);
        self.past_tokens
            .lock()
            .expect("past tokens poisoned")
            .remove(room_id);
        for set in [
            &self.fully_loaded_rooms,
            &self.loaded_once_rooms,
            &self.cleared_events_rooms,
            &self.invited_rooms,
        ] {
            set.lock().expect("room set poisoned").remove(room_id);
        }

        info!(room = %room_id, "Room forgotten");
        Ok(())
    }

    /// Invite many users at once; per-user failures do not abort the
    /// rest. Returns `(successes, failures)`.
    pub async fn room_mass_invite(
        &self,
        room_id: &RoomId,
        user_ids: Vec<UserId>,
    ) -> (Vec<UserId>, Vec<(UserId, CauserieError)>) {
        // The server answers 403 for users already in the room.
        let current: HashSet<String> = self
            .backend
            .models()
            .with_members(&self.user_id, room_id, |members| members.keys())
            .into_iter()
            .collect();

        let candidates: Vec<UserId> = user_ids
            .into_iter()
            .filter(|uid| !current.contains(&uid.0))
            .collect();

        let invites = candidates
            .iter()
            .map(|uid| self.invite_one(room_id, uid));
        let results = futures::future::join_all(invites).await;

        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for (uid, result) in candidates.into_iter().zip(results) {
            match result {
                Ok(()) => successes.push(uid),
                Err(err) => errors.push((uid, err)),
            }
        }
        (successes, errors)
    }

    async fn invite_one(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        if !UserId::is_valid(&user_id.0) {
            return Err(CauserieError::InvalidUserId(user_id.0.clone()));
        }
        if self.service.get_profile(user_id).await.is_err() {
            return Err(CauserieError::UserNotFound(user_id.0.clone()));
        }
        Ok(self.service.invite(room_id, user_id).await?)
    }

    /// Discard a room's visible history and disable pagination for it.
    pub fn clear_events(&self, room_id: &RoomId) {
        self.cleared_events_rooms
            .lock()
            .expect("cleared set poisoned")
            .insert(room_id.clone());

        self.backend
            .models()
            .with_events(&self.user_id, room_id, |events| {
                if !events.is_empty() {
                    events.clear();
                    events.sync_now();
                }
            });
    }

    pub(crate) fn pagination_lock(&self, room_id: &RoomId) -> Arc<tokio::sync::Mutex<()>> {
        self.pagination_locks
            .lock()
            .expect("pagination locks poisoned")
            .entry(room_id.clone())
            .or_default()
            .clone()
    }

    // -----------------------------------------------------------------
    // Profile / keys
    // -----------------------------------------------------------------

    /// Upload an image and set it as the account avatar.
    pub async fn set_avatar_from_file(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;

        if !causerie_media::looks_like_image(&bytes) {
            return Err(CauserieError::BadMimeType {
                wanted: "image/*".into(),
                got: "application/octet-stream".into(),
            });
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let response = self
            .service
            .upload(
                crate::service::UploadSource::Bytes(bytes),
                &filename,
                false,
                None,
            )
            .await?;
        Ok(self.service.set_avatar(&response.reference).await?)
    }

    /// Export the encryption key material to `path`.
    pub async fn export_keys(&self, path: &Path, passphrase: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // The UI asks about overwriting before getting here.
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::remove_file(path).await?;
        }
        Ok(self.service.export_keys(path, passphrase).await?)
    }

    /// Import key material, then retry decrypting what we could not
    /// read before.
    pub async fn import_keys(&self, path: &Path, passphrase: &str) -> Result<()> {
        self.service.import_keys(path, passphrase).await?;
        self.retry_decrypting_events().await;
        Ok(())
    }

    /// Best-effort sweep over undecryptable events; failures are
    /// skipped, never raised.
    pub async fn retry_decrypting_events(&self) {
        let first_sync_date = *self.first_sync_date.lock().expect("first sync date poisoned");

        for room_id in self.backend.models().event_table_rooms(&self.user_id) {
            let snapshot = self
                .room_state
                .lock()
                .expect("room state poisoned")
                .get(&room_id)
                .cloned();
            let Some(snapshot) = snapshot else {
                continue;
            };

            let events = self
                .backend
                .models()
                .with_events(&self.user_id, &room_id, |events| events.values());

            for event in events {
                let Some(source) = event.source else {
                    continue;
                };
                if !matches!(source.content, EventContent::Encrypted { .. }) {
                    continue;
                }

                match self.service.decrypt_event(&source).await {
                    Ok(decrypted) => {
                        register_event(
                            &self.backend,
                            self.service.as_ref(),
                            &self.user_id,
                            &snapshot,
                            decrypted,
                            first_sync_date,
                        )
                        .await;
                    }
                    Err(err) => {
                        debug!(
                            room = %room_id,
                            event = %source.event_id,
                            error = %err,
                            "Event still undecryptable"
                        );
                    }
                }
            }
        }
    }
}
