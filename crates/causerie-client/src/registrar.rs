//! Registration of authoritative sync data into the model tables.
//!
//! Live sync traffic and backward-paginated history both land here, so
//! local-echo reconciliation and room bookkeeping behave identically
//! for the two directions.

use chrono::{DateTime, Utc};
use tracing::debug;

use causerie_model::{Event, EventContent, Member, ModelStore, Room};
use causerie_shared::{RoomId, UserId};

use crate::backend::{Alert, Backend};
use crate::last_event::set_room_last_event;
use crate::service::{ChatService, RoomMembership, RoomSnapshot};

/// Refresh the Room item and the full Member set of one account from
/// the current room state.
pub(crate) fn register_room(backend: &Backend, account: &UserId, snapshot: &RoomSnapshot) {
    let models = backend.models();
    let room_id = &snapshot.room_id;
    let levels = &snapshot.power_levels;

    let previous_last_event =
        models.with_rooms(account, |rooms| rooms.get(&room_id.0).and_then(|r| r.last_event));

    let (inviter_id, inviter_name, inviter_avatar) = match &snapshot.inviter {
        Some(user) => {
            let info = snapshot.members.get(user);
            (
                user.0.clone(),
                info.map(|i| i.display_name.clone()).unwrap_or_default(),
                info.map(|i| i.avatar_url.clone()).unwrap_or_default(),
            )
        }
        None => Default::default(),
    };

    let room = Room {
        room_id: room_id.clone(),
        given_name: snapshot.name.clone(),
        display_name: snapshot.display_name.clone(),
        avatar_url: snapshot.avatar_url.clone(),
        topic: snapshot.topic.clone(),
        inviter_id,
        inviter_name,
        inviter_avatar,
        left: snapshot.membership == RoomMembership::Left,

        encrypted: snapshot.encrypted,
        invite_required: snapshot.join_rule == "invite",
        guests_allowed: snapshot.guest_access == "can_join",

        can_invite: levels.can_invite(account),
        can_send_messages: levels.can_send_message(account),
        can_set_name: levels.can_send_state(account, "m.room.name"),
        can_set_topic: levels.can_send_state(account, "m.room.topic"),
        can_set_avatar: levels.can_send_state(account, "m.room.avatar"),
        can_set_encryption: levels.can_send_state(account, "m.room.encryption"),
        can_set_join_rules: levels.can_send_state(account, "m.room.join_rules"),
        can_set_guest_access: levels.can_send_state(account, "m.room.guest_access"),

        last_event: previous_last_event,
    };

    models.with_rooms(account, |rooms| rooms.insert(room_id.0.clone(), room));

    models.with_members(account, room_id, |members| {
        // Users who left are deleted individually, the rest is
        // replaced wholesale.
        for key in members.keys() {
            if !snapshot.members.contains_key(&UserId(key.clone())) {
                members.remove(&key);
            }
        }

        for (user_id, info) in &snapshot.members {
            members.insert(
                user_id.0.clone(),
                Member {
                    user_id: user_id.clone(),
                    display_name: info.display_name.clone(),
                    avatar_url: info.avatar_url.clone(),
                    typing: snapshot.typing.contains(user_id),
                    power_level: info.power_level,
                    invited: info.invited,
                },
            );
        }
    });
}

/// Display name and avatar for a user, falling back to a profile
/// lookup when they are no longer a room member. Best-effort: empty
/// strings on failure.
async fn member_name_avatar(
    models: &ModelStore,
    service: &dyn ChatService,
    account: &UserId,
    room_id: &RoomId,
    user_id: &UserId,
) -> (String, String) {
    let member = models.with_members(account, room_id, |members| members.get(&user_id.0));

    match member {
        Some(member) => (member.display_name, member.avatar_url),
        None => match service.get_profile(user_id).await {
            Ok(profile) => (
                profile.display_name.unwrap_or_default(),
                profile.avatar_url.unwrap_or_default(),
            ),
            Err(err) => {
                debug!(user = %user_id, error = %err, "Profile lookup failed");
                (String::new(), String::new())
            }
        },
    }
}

/// Register one authoritative event into an account's room table,
/// reconciling it against any matching local echo.
pub(crate) async fn register_event(
    backend: &Backend,
    service: &dyn ChatService,
    account: &UserId,
    snapshot: &RoomSnapshot,
    raw: causerie_model::RawEvent,
    first_sync_date: Option<DateTime<Utc>>,
) {
    register_room(backend, account, snapshot);

    let models = backend.models();
    let room_id = &snapshot.room_id;

    let (sender_name, sender_avatar) =
        member_name_avatar(models, service, account, room_id, &raw.sender).await;

    let target_id = raw.state_key.clone().unwrap_or_default();
    let (target_name, target_avatar) = if target_id.is_empty() {
        (String::new(), String::new())
    } else {
        member_name_avatar(models, service, account, room_id, &UserId(target_id.clone())).await
    };

    // The event's own timestamp, not arrival time, drives ordering.
    let date = DateTime::<Utc>::from_timestamp_millis(raw.server_timestamp_ms)
        .unwrap_or_else(Utc::now);

    let mut item = Event {
        client_id: raw.event_id.0.clone(),
        event_id: raw.event_id.clone(),
        date,
        sender_id: raw.sender.clone(),
        sender_name,
        sender_avatar,
        target_id,
        target_name,
        target_avatar,
        is_local_echo: false,
        type_specifier: raw.content.type_specifier(),
        body: raw.content.plain_body(),
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
        source: Some(raw.clone()),
    };

    if let EventContent::Image(m)
    | EventContent::Audio(m)
    | EventContent::Video(m)
    | EventContent::File(m) = &raw.content
    {
        item.media_url = m.url.clone();
        item.media_title = m.body.clone();
        item.media_mime = m.mime.clone();
        item.media_size = m.size;
        item.media_width = m.width;
        item.media_height = m.height;
        item.media_duration_ms = m.duration_ms;
        item.thumbnail_url = m.thumbnail_url.clone();
        item.thumbnail_width = m.thumbnail_width;
        item.thumbnail_height = m.thumbnail_height;
    }

    // A correlation id from one of our own accounts means this event
    // confirms a local echo: reuse the echo's key so the insertion
    // overwrites instead of duplicating.
    let local_sender = backend.is_local_account(&raw.sender);
    if let Some(tx_id) = &raw.transaction_id {
        if local_sender {
            item.client_id = format!("echo-{tx_id}");
        }
    }

    let is_past = match first_sync_date {
        None => true,
        Some(first) => date < first,
    };
    if !local_sender && !is_past {
        backend.raise_alert(Alert {
            account: account.clone(),
            room_id: room_id.clone(),
            event_id: raw.event_id.clone(),
        });
    }

    models.with_events(account, room_id, |events| {
        events.insert(item.client_id.clone(), item.clone());
    });

    set_room_last_event(models, account, room_id, &item, false);

    if item.sender_id == *account {
        models.with_events(account, room_id, |events| events.sync_now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{MemberInfo, PowerLevels};
    use causerie_model::RawEvent;
    use causerie_shared::EventId;

    fn snapshot(room: &RoomId, members: &[(&UserId, i64)]) -> RoomSnapshot {
        let mut snap = RoomSnapshot::new(room.clone());
        snap.power_levels = PowerLevels {
            invite: 50,
            state_default: 50,
            ..PowerLevels::default()
        };
        for (user, level) in members {
            snap.members.insert(
                (*user).clone(),
                MemberInfo {
                    display_name: user.0.clone(),
                    power_level: *level,
                    ..MemberInfo::default()
                },
            );
            snap.power_levels.users.insert((*user).clone(), *level);
        }
        snap
    }

    #[tokio::test]
    async fn room_registration_computes_capability_flags() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let room = RoomId::from("!r:example.org");

        register_room(&backend, &alice, &snapshot(&room, &[(&alice, 100)]));
        let item = backend
            .models()
            .with_rooms(&alice, |rooms| rooms.get(&room.0))
            .unwrap();
        assert!(item.can_invite && item.can_set_name);

        register_room(&backend, &alice, &snapshot(&room, &[(&alice, 0)]));
        let item = backend
            .models()
            .with_rooms(&alice, |rooms| rooms.get(&room.0))
            .unwrap();
        assert!(!item.can_invite && !item.can_set_name);
        assert!(item.can_send_messages);
    }

    #[tokio::test]
    async fn departed_members_are_deleted_individually() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let bob = UserId::from("@bob:example.org");
        let room = RoomId::from("!r:example.org");

        register_room(
            &backend,
            &alice,
            &snapshot(&room, &[(&alice, 0), (&bob, 0)]),
        );
        let count = backend
            .models()
            .with_members(&alice, &room, |members| members.len());
        assert_eq!(count, 2);

        register_room(&backend, &alice, &snapshot(&room, &[(&alice, 0)]));
        let keys = backend
            .models()
            .with_members(&alice, &room, |members| members.keys());
        assert_eq!(keys, vec![alice.0.clone()]);
    }

    struct NoService;

    #[async_trait::async_trait]
    impl ChatService for NoService {
        async fn sync(
            &self,
            _since: Option<String>,
            _timeout: std::time::Duration,
        ) -> Result<crate::service::SyncBatch, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn send_message(
            &self,
            _room: &RoomId,
            _content: serde_json::Value,
        ) -> Result<EventId, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn upload(
            &self,
            _source: crate::service::UploadSource,
            _filename: &str,
            _encrypt: bool,
            _progress: Option<crate::monitor::ProgressSender>,
        ) -> Result<crate::service::UploadResponse, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn fetch_history(
            &self,
            _room: &RoomId,
            _from: &str,
            _limit: u32,
        ) -> Result<crate::service::HistoryBatch, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn get_profile(
            &self,
            _user: &UserId,
        ) -> Result<crate::service::Profile, causerie_shared::ServiceError> {
            Err(causerie_shared::ServiceError::new(
                causerie_shared::ServiceErrorKind::NotFound,
                "no profile",
            ))
        }
        async fn create_room(
            &self,
            _request: crate::service::CreateRoomRequest,
        ) -> Result<RoomId, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn join_room(
            &self,
            _reference: &str,
        ) -> Result<RoomId, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn leave_room(&self, _room: &RoomId) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn forget_room(&self, _room: &RoomId) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn invite(
            &self,
            _room: &RoomId,
            _user: &UserId,
        ) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn set_avatar(&self, _reference: &str) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn decrypt_event(
            &self,
            _raw: &RawEvent,
        ) -> Result<RawEvent, causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn export_keys(
            &self,
            _path: &std::path::Path,
            _passphrase: &str,
        ) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
        async fn import_keys(
            &self,
            _path: &std::path::Path,
            _passphrase: &str,
        ) -> Result<(), causerie_shared::ServiceError> {
            unimplemented!()
        }
    }

    fn text_event(id: &str, sender: &UserId, ts: i64, txn: Option<&str>) -> RawEvent {
        RawEvent {
            event_id: EventId(id.to_owned()),
            sender: sender.clone(),
            server_timestamp_ms: ts,
            state_key: None,
            transaction_id: txn.map(str::to_owned),
            content: EventContent::Text {
                body: "hello".into(),
            },
        }
    }

    #[tokio::test]
    async fn confirmation_overwrites_the_echo_in_place() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let room = RoomId::from("!r:example.org");
        backend.register_account(&alice);

        let snap = snapshot(&room, &[(&alice, 0)]);
        register_room(&backend, &alice, &snap);

        let txn = causerie_shared::TxnId::new();
        crate::echo::register_local_echo(
            &backend,
            &alice,
            &room,
            txn,
            "hello".into(),
            None,
        );

        let raw = text_event("$1", &alice, 1_700_000_000_000, Some(&txn.0.to_string()));
        register_event(&backend, &NoService, &alice, &snap, raw, None).await;

        let (len, event) = backend.models().with_events(&alice, &room, |events| {
            (events.len(), events.get(&txn.echo_key()))
        });
        assert_eq!(len, 1, "echo must be replaced, not duplicated");
        let event = event.unwrap();
        assert!(!event.is_local_echo);
        assert_eq!(event.event_id.0, "$1");
        assert_eq!(event.client_id, txn.echo_key());
    }

    #[tokio::test]
    async fn foreign_transaction_ids_never_touch_echo_keys() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let mallory = UserId::from("@mallory:example.org");
        let room = RoomId::from("!r:example.org");
        backend.register_account(&alice);

        let snap = snapshot(&room, &[(&alice, 0), (&mallory, 0)]);
        let raw = text_event("$evil", &mallory, 1_700_000_000_000, Some("spoofed"));
        register_event(&backend, &NoService, &alice, &snap, raw, None).await;

        let keys = backend
            .models()
            .with_events(&alice, &room, |events| events.keys());
        assert_eq!(keys, vec!["$evil".to_owned()]);
    }

    #[tokio::test]
    async fn alerts_fire_only_after_backlog() {
        let (backend, mut alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let bob = UserId::from("@bob:example.org");
        let room = RoomId::from("!r:example.org");
        backend.register_account(&alice);

        let snap = snapshot(&room, &[(&alice, 0), (&bob, 0)]);

        // Backlog: no first-sync date yet.
        let raw = text_event("$old", &bob, 1_700_000_000_000, None);
        register_event(&backend, &NoService, &alice, &snap, raw, None).await;
        assert!(alerts.try_recv().is_err());

        // Live traffic after the first sync completed.
        let first_sync = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let raw = text_event("$new", &bob, 1_700_000_500_000, None);
        register_event(&backend, &NoService, &alice, &snap, raw, Some(first_sync)).await;
        let alert = alerts.try_recv().expect("alert raised");
        assert_eq!(alert.event_id.0, "$new");
    }
}
