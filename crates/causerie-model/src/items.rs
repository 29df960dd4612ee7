//! Model item structs handed to the UI layer.
//!
//! Every struct derives `Serialize` so it can cross the IPC boundary
//! as-is; the tables themselves live in [`crate::store`].

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use causerie_shared::{EventId, RoomId, UserId};

use crate::raw::RawEvent;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A locally logged-in identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: String,
    /// When the profile was last refreshed from the service.
    pub profile_updated: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: String::new(),
            avatar_url: String::new(),
            profile_updated: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Classification tag distinguishing ordinary messages from state
/// changes, used by the last-event policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypeSpecifier {
    Normal,
    MembershipChange,
    ProfileChange,
}

/// A displayable unit in a room timeline.
///
/// Keyed in its table by `client_id`: the real protocol event id once
/// confirmed, or `echo-<correlation-id>` while still a local echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub client_id: String,
    /// Empty until the server confirms the event.
    pub event_id: EventId,
    pub date: DateTime<Utc>,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_avatar: String,
    /// For state events naming another user.
    pub target_id: String,
    pub target_name: String,
    pub target_avatar: String,
    pub is_local_echo: bool,
    pub type_specifier: TypeSpecifier,
    /// One-line rendered body.
    pub body: String,
    pub media_url: String,
    pub media_title: String,
    pub media_mime: String,
    pub media_size: u64,
    pub media_width: u32,
    pub media_height: u32,
    pub media_duration_ms: u64,
    pub thumbnail_url: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Raw underlying event; absent for pure echoes.
    pub source: Option<RawEvent>,
}

impl Event {
    /// A bare echo skeleton; callers fill in media fields as needed.
    pub fn new_echo(client_id: String, sender_id: UserId, body: String) -> Self {
        Self {
            client_id,
            event_id: EventId::default(),
            date: Utc::now(),
            sender_id,
            sender_name: String::new(),
            sender_avatar: String::new(),
            target_id: String::new(),
            target_name: String::new(),
            target_avatar: String::new(),
            is_local_echo: true,
            type_specifier: TypeSpecifier::Normal,
            body,
            media_url: String::new(),
            media_title: String::new(),
            media_mime: String::new(),
            media_size: 0,
            media_width: 0,
            media_height: 0,
            media_duration_ms: 0,
            thumbnail_url: String::new(),
            thumbnail_width: 0,
            thumbnail_height: 0,
            source: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Per-account view of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub room_id: RoomId,
    pub given_name: String,
    pub display_name: String,
    pub avatar_url: String,
    pub topic: String,
    pub inviter_id: String,
    pub inviter_name: String,
    pub inviter_avatar: String,
    /// Whether the logged-in account has left this room.
    pub left: bool,

    pub encrypted: bool,
    pub invite_required: bool,
    pub guests_allowed: bool,

    pub can_invite: bool,
    pub can_send_messages: bool,
    pub can_set_name: bool,
    pub can_set_topic: bool,
    pub can_set_avatar: bool,
    pub can_set_encryption: bool,
    pub can_set_join_rules: bool,
    pub can_set_guest_access: bool,

    /// Snapshot of the single event shown as "most recent"; only moves
    /// forward under the last-event policy.
    pub last_event: Option<Box<Event>>,
}

// ---------------------------------------------------------------------------
// Member
// ---------------------------------------------------------------------------

/// Per-room participant snapshot, replaced wholesale on every room
/// registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub user_id: UserId,
    /// Display name, disambiguated within the room.
    pub display_name: String,
    pub avatar_url: String,
    pub typing: bool,
    pub power_level: i64,
    pub invited: bool,
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Stage of an in-flight outgoing file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UploadStatus {
    Uploading,
    Caching,
    Error,
}

/// Error captured into an [`Upload`] record instead of being raised,
/// so the item stays inspectable until the user cancels it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferError {
    Io(String),
    Service { kind: String, message: String },
}

/// Transient record of one in-flight outgoing file; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Upload {
    pub id: Uuid,
    pub status: UploadStatus,
    pub filepath: PathBuf,
    pub total_size: u64,
    pub uploaded: u64,
    /// Instantaneous speed in bytes per second.
    pub speed: f64,
    pub time_left: Option<Duration>,
    pub error: Option<TransferError>,
}

impl Upload {
    pub fn new(id: Uuid, filepath: PathBuf, total_size: u64) -> Self {
        Self {
            id,
            status: UploadStatus::Uploading,
            filepath,
            total_size,
            uploaded: 0,
            speed: 0.0,
            time_left: None,
            error: None,
        }
    }
}
