//! Authoritative events as delivered by the sync stream.
//!
//! Incoming traffic is decoded by the protocol service into a closed
//! set of event kinds; the registrars dispatch on the variant instead
//! of open-ended runtime type matching.

use serde::{Deserialize, Serialize};

use causerie_shared::{EventId, UserId};

use crate::items::TypeSpecifier;

/// One authoritative event from the sync stream or a history fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    /// Server-assigned event id.
    pub event_id: EventId,
    /// Who sent the event.
    pub sender: UserId,
    /// Server timestamp in milliseconds; authoritative for ordering.
    pub server_timestamp_ms: i64,
    /// For state-change events, the user the event is about.
    pub state_key: Option<String>,
    /// Correlation id the sender embedded in the content, if any.
    pub transaction_id: Option<String>,
    /// The decoded event body.
    pub content: EventContent,
}

/// Media metadata attached to image/audio/video/file events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaMeta {
    /// Display name, usually the original filename.
    pub body: String,
    /// Remote content reference.
    pub url: String,
    pub mime: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub thumbnail_url: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

/// What a membership state event did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MembershipAction {
    Join,
    Leave,
    Invite,
    Ban,
    /// Membership unchanged, only the display name or avatar moved.
    ProfileChange,
}

/// Closed set of event kinds the pipeline understands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum EventContent {
    Text { body: String },
    Emote { body: String },
    Notice { body: String },
    Image(MediaMeta),
    Audio(MediaMeta),
    Video(MediaMeta),
    File(MediaMeta),
    Membership { action: MembershipAction },
    PowerLevels,
    RoomCreate,
    Redaction { redacts: EventId },
    /// Payload the service could not decrypt; kept for retry sweeps.
    Encrypted { payload: serde_json::Value },
    Unknown { event_type: String },
}

impl EventContent {
    /// Classification tag used by the last-event policy.
    pub fn type_specifier(&self) -> TypeSpecifier {
        match self {
            EventContent::Membership {
                action: MembershipAction::ProfileChange,
            } => TypeSpecifier::ProfileChange,
            EventContent::Membership { .. } => TypeSpecifier::MembershipChange,
            _ => TypeSpecifier::Normal,
        }
    }

    /// One-line body used for room summaries and echoes.
    pub fn plain_body(&self) -> String {
        match self {
            EventContent::Text { body }
            | EventContent::Emote { body }
            | EventContent::Notice { body } => body.clone(),
            EventContent::Image(m)
            | EventContent::Audio(m)
            | EventContent::Video(m)
            | EventContent::File(m) => m.body.clone(),
            EventContent::Membership { action } => match action {
                MembershipAction::Join => "joined the room".into(),
                MembershipAction::Leave => "left the room".into(),
                MembershipAction::Invite => "sent an invite".into(),
                MembershipAction::Ban => "was banned".into(),
                MembershipAction::ProfileChange => "changed their profile".into(),
            },
            EventContent::PowerLevels => "changed the room permissions".into(),
            EventContent::RoomCreate => "created the room".into(),
            EventContent::Redaction { .. } => "removed a message".into(),
            EventContent::Encrypted { .. } => "encrypted message".into(),
            EventContent::Unknown { event_type } => format!("unsupported event: {event_type}"),
        }
    }
}
