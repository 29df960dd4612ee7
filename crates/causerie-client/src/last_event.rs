//! Policy deciding which event a room summary shows as "most recent".

use causerie_model::{Event, ModelStore, TypeSpecifier};
use causerie_shared::{RoomId, UserId};

/// Whether `candidate` should replace the currently displayed event.
///
/// Profile changes are filler: they never bump a substantive message,
/// and an older event may only replace one. Local echoes are revised
/// in place, so an echo's earlier timestamp must not regress the
/// display either.
pub fn should_replace_last_event(prev: Option<&Event>, candidate: &Event) -> bool {
    let Some(prev) = prev else {
        return true;
    };

    let cand_is_profile = candidate.type_specifier == TypeSpecifier::ProfileChange;
    let prev_is_profile = prev.type_specifier == TypeSpecifier::ProfileChange;

    if cand_is_profile && !prev_is_profile {
        return false;
    }

    if candidate.date < prev.date && !prev_is_profile {
        return false;
    }

    true
}

/// Run the selector against a room's current snapshot and overwrite it
/// on acceptance. `force_publish` makes the room table publish
/// immediately (local echoes for the acting account only).
pub(crate) fn set_room_last_event(
    models: &ModelStore,
    account: &UserId,
    room_id: &RoomId,
    item: &Event,
    force_publish: bool,
) {
    models.with_rooms(account, |rooms| {
        let Some(room) = rooms.get(&room_id.0) else {
            return;
        };

        if !should_replace_last_event(room.last_event.as_deref(), item) {
            return;
        }

        rooms.update(&room_id.0, |room| {
            room.last_event = Some(Box::new(item.clone()));
        });

        if force_publish {
            rooms.sync_now();
        }
    });
}
