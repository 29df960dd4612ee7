//! The seam to the protocol service.
//!
//! Everything wire-level (login, sync long-polling, encryption, blob
//! transfer) lives behind [`ChatService`]; the pipeline only sees the
//! decoded types below. The trait is object-safe so sessions can hold
//! an `Arc<dyn ChatService>` and tests can script an in-memory
//! implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use causerie_model::RawEvent;
use causerie_shared::{EventId, RoomId, ServiceError, UserId};

use crate::monitor::ProgressSender;

// ---------------------------------------------------------------------------
// Room state as reported by sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomMembership {
    Joined,
    Invited,
    Left,
}

/// One member as reported in the room state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemberInfo {
    /// Display name, already disambiguated within the room; empty when
    /// the user never set one.
    pub display_name: String,
    pub avatar_url: String,
    pub power_level: i64,
    pub invited: bool,
}

/// Room permission levels, queried per user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PowerLevels {
    pub users: HashMap<UserId, i64>,
    pub users_default: i64,
    pub events_default: i64,
    pub state_default: i64,
    /// Per-event-type overrides (e.g. `m.room.name`).
    pub events: HashMap<String, i64>,
    pub invite: i64,
}

impl PowerLevels {
    pub fn user_level(&self, user: &UserId) -> i64 {
        self.users.get(user).copied().unwrap_or(self.users_default)
    }

    pub fn can_invite(&self, user: &UserId) -> bool {
        self.user_level(user) >= self.invite
    }

    pub fn can_send_message(&self, user: &UserId) -> bool {
        let required = self
            .events
            .get("m.room.message")
            .copied()
            .unwrap_or(self.events_default);
        self.user_level(user) >= required
    }

    pub fn can_send_state(&self, user: &UserId, event_type: &str) -> bool {
        let required = self
            .events
            .get(event_type)
            .copied()
            .unwrap_or(self.state_default);
        self.user_level(user) >= required
    }
}

/// Current authoritative state of one room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub name: String,
    pub display_name: String,
    pub avatar_url: String,
    pub topic: String,
    pub inviter: Option<UserId>,
    pub membership: RoomMembership,
    pub encrypted: bool,
    /// `invite` means an invitation is required to join.
    pub join_rule: String,
    /// `can_join` means guests are allowed.
    pub guest_access: String,
    pub typing: Vec<UserId>,
    pub members: HashMap<UserId, MemberInfo>,
    pub power_levels: PowerLevels,
}

impl RoomSnapshot {
    /// Minimal joined-room state; tests and callers fill in the rest.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            name: String::new(),
            display_name: String::new(),
            avatar_url: String::new(),
            topic: String::new(),
            inviter: None,
            membership: RoomMembership::Joined,
            encrypted: false,
            join_rule: "public".into(),
            guest_access: "forbidden".into(),
            typing: Vec::new(),
            members: HashMap::new(),
            power_levels: PowerLevels::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync / history / upload payloads
// ---------------------------------------------------------------------------

/// One room's slice of a sync response.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedRoom {
    pub snapshot: RoomSnapshot,
    pub events: Vec<RawEvent>,
    /// Token to fetch events older than this slice; sync only reports
    /// it the first time it observes the room.
    pub prev_batch: Option<String>,
}

/// One long-poll worth of sync traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    pub next_batch: String,
    pub rooms: Vec<SyncedRoom>,
}

/// Result of a backward history fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBatch {
    /// Token marking the new oldest fetched position.
    pub end: String,
    /// Events, newest first.
    pub events: Vec<RawEvent>,
}

/// What the service hands back after an upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResponse {
    /// Remote content reference.
    pub reference: String,
    /// Negotiated mime type.
    pub mime: String,
    /// Decryption descriptor when the blob was encrypted.
    pub decryption: Option<serde_json::Value>,
}

/// Data handed to the upload operation.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub invite: Vec<UserId>,
    pub direct: bool,
    pub public: bool,
    pub encrypt: bool,
    pub federate: bool,
}

// ---------------------------------------------------------------------------
// The service trait
// ---------------------------------------------------------------------------

/// Async operations provided by the external protocol service.
///
/// Every operation may fail with a structured [`ServiceError`].
#[async_trait]
pub trait ChatService: Send + Sync {
    /// One bounded long-poll of the continuous sync stream.
    async fn sync(
        &self,
        since: Option<String>,
        timeout: Duration,
    ) -> Result<SyncBatch, ServiceError>;

    /// Send a message event; returns the confirmed event id.
    async fn send_message(
        &self,
        room: &RoomId,
        content: serde_json::Value,
    ) -> Result<EventId, ServiceError>;

    /// Upload a blob, reporting progress through `progress` when given.
    async fn upload(
        &self,
        source: UploadSource,
        filename: &str,
        encrypt: bool,
        progress: Option<ProgressSender>,
    ) -> Result<UploadResponse, ServiceError>;

    /// Fetch history backward from `from`, at most `limit` events.
    async fn fetch_history(
        &self,
        room: &RoomId,
        from: &str,
        limit: u32,
    ) -> Result<HistoryBatch, ServiceError>;

    async fn get_profile(&self, user: &UserId) -> Result<Profile, ServiceError>;

    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomId, ServiceError>;

    /// Join by id or alias; returns the canonical room id.
    async fn join_room(&self, reference: &str) -> Result<RoomId, ServiceError>;

    async fn leave_room(&self, room: &RoomId) -> Result<(), ServiceError>;

    async fn forget_room(&self, room: &RoomId) -> Result<(), ServiceError>;

    async fn invite(&self, room: &RoomId, user: &UserId) -> Result<(), ServiceError>;

    async fn set_avatar(&self, reference: &str) -> Result<(), ServiceError>;

    /// Try to decrypt an [`EventContent::Encrypted`] payload.
    ///
    /// [`EventContent::Encrypted`]: causerie_model::EventContent::Encrypted
    async fn decrypt_event(&self, raw: &RawEvent) -> Result<RawEvent, ServiceError>;

    async fn export_keys(&self, path: &Path, passphrase: &str) -> Result<(), ServiceError>;

    async fn import_keys(&self, path: &Path, passphrase: &str) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_levels_fall_back_to_defaults() {
        let mut levels = PowerLevels {
            users_default: 0,
            events_default: 0,
            state_default: 50,
            invite: 50,
            ..PowerLevels::default()
        };
        let alice = UserId::from("@alice:example.org");
        levels.users.insert(alice.clone(), 100);
        let bob = UserId::from("@bob:example.org");

        assert!(levels.can_invite(&alice));
        assert!(!levels.can_invite(&bob));
        assert!(levels.can_send_message(&bob));
        assert!(levels.can_send_state(&alice, "m.room.name"));
        assert!(!levels.can_send_state(&bob, "m.room.name"));
    }

    #[test]
    fn event_type_overrides_beat_defaults() {
        let mut levels = PowerLevels {
            events_default: 0,
            ..PowerLevels::default()
        };
        levels.events.insert("m.room.message".into(), 25);
        let bob = UserId::from("@bob:example.org");
        assert!(!levels.can_send_message(&bob));
    }
}
