//! Local-echo registration.
//!
//! The instant a send is initiated, a provisional event appears in
//! every local account's view of the room, keyed `echo-<correlation-id>`
//! so the confirmed event can later overwrite it in place. This is
//! local bookkeeping only and must not fail.

use tracing::debug;

use causerie_model::Event;
use causerie_shared::{RoomId, TxnId, UserId};

use crate::backend::Backend;
use crate::last_event::set_room_last_event;

/// Media fields for file-send echoes.
#[derive(Debug, Clone, Default)]
pub struct EchoMedia {
    pub url: String,
    pub title: String,
    pub mime: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub thumbnail_url: String,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

/// Insert a provisional event for `txn` into the event table of every
/// local account that is a member of the room.
///
/// The acting account's tables publish immediately so the UI reflects
/// the action with zero latency; other accounts keep their own
/// cadence.
pub(crate) fn register_local_echo(
    backend: &Backend,
    acting: &UserId,
    room_id: &RoomId,
    txn: TxnId,
    body: String,
    media: Option<EchoMedia>,
) -> Event {
    let models = backend.models();
    let key = txn.echo_key();

    let our_info = models.with_members(acting, room_id, |members| members.get(&acting.0));

    let mut event = Event::new_echo(key.clone(), acting.clone(), body);
    if let Some(info) = our_info {
        event.sender_name = info.display_name;
        event.sender_avatar = info.avatar_url;
    }
    if let Some(media) = media {
        event.media_url = media.url;
        event.media_title = media.title;
        event.media_mime = media.mime;
        event.media_size = media.size;
        event.media_width = media.width;
        event.media_height = media.height;
        event.media_duration_ms = media.duration_ms;
        event.thumbnail_url = media.thumbnail_url;
        event.thumbnail_width = media.thumbnail_width;
        event.thumbnail_height = media.thumbnail_height;
    }

    for account in backend.account_ids() {
        let is_acting = account == *acting;

        // Membership is judged from the acting account's member table;
        // the sender itself always sees its echo.
        let is_member = is_acting
            || models.with_members(acting, room_id, |members| members.contains(&account.0));
        if !is_member {
            continue;
        }

        models.with_events(&account, room_id, |events| {
            events.insert(key.clone(), event.clone());
            if is_acting {
                events.sync_now();
            }
        });

        set_room_last_event(models, &account, room_id, &event, is_acting);
    }

    debug!(room = %room_id, key = %key, "Local echo registered");
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_model::Member;

    fn member(user: &UserId) -> Member {
        Member {
            user_id: user.clone(),
            display_name: "Alice".into(),
            avatar_url: String::new(),
            typing: false,
            power_level: 0,
            invited: false,
        }
    }

    #[tokio::test]
    async fn echo_lands_in_every_member_accounts_table() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let bob = UserId::from("@bob:example.org");
        let room = RoomId::from("!r:example.org");

        backend.register_account(&alice);
        backend.register_account(&bob);
        backend.models().with_members(&alice, &room, |members| {
            members.insert(alice.0.clone(), member(&alice));
            members.insert(bob.0.clone(), member(&bob));
        });

        let txn = TxnId::new();
        register_local_echo(&backend, &alice, &room, txn, "hello".into(), None);

        for account in [&alice, &bob] {
            let found = backend
                .models()
                .with_events(account, &room, |events| events.get(&txn.echo_key()));
            let event = found.expect("echo present");
            assert!(event.is_local_echo);
            assert_eq!(event.client_id, txn.echo_key());
            assert!(event.event_id.is_empty());
        }
    }

    #[tokio::test]
    async fn only_the_acting_account_publishes_immediately() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let bob = UserId::from("@bob:example.org");
        let room = RoomId::from("!r:example.org");

        backend.register_account(&alice);
        backend.register_account(&bob);
        backend.models().with_members(&alice, &room, |members| {
            members.insert(alice.0.clone(), member(&alice));
            members.insert(bob.0.clone(), member(&bob));
        });

        register_local_echo(&backend, &alice, &room, TxnId::new(), "hi".into(), None);

        let alice_publishes = backend
            .models()
            .with_events(&alice, &room, |events| events.publish_count());
        let bob_publishes = backend
            .models()
            .with_events(&bob, &room, |events| events.publish_count());
        assert_eq!(alice_publishes, 1);
        assert_eq!(bob_publishes, 0);
    }

    #[tokio::test]
    async fn non_member_accounts_are_skipped() {
        let (backend, _alerts) = Backend::for_tests().await;
        let alice = UserId::from("@alice:example.org");
        let carol = UserId::from("@carol:example.org");
        let room = RoomId::from("!r:example.org");

        backend.register_account(&alice);
        backend.register_account(&carol);
        backend.models().with_members(&alice, &room, |members| {
            members.insert(alice.0.clone(), member(&alice));
        });

        register_local_echo(&backend, &alice, &room, TxnId::new(), "hi".into(), None);

        let carol_events = backend
            .models()
            .with_events(&carol, &room, |events| events.len());
        assert_eq!(carol_events, 0);
    }
}
