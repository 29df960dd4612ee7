//! Backward history loading, coordinated with the live sync stream.

use causerie_model::EventContent;
use causerie_shared::constants::{FIRST_PAGE_SIZE, NEXT_PAGE_SIZE, TOKEN_POLL_INTERVAL};
use causerie_shared::error::Result;
use causerie_shared::RoomId;
use tracing::{debug, error};

use crate::registrar::register_event;
use crate::session::Session;

impl Session {
    /// Load one page of events older than what we have for `room_id`.
    ///
    /// Returns `Ok(true)` while more history may remain, `Ok(false)`
    /// once the room's creation event has been reached or pagination
    /// does not apply (invitation pending, history cleared). A failed
    /// fetch logs and reports `Ok(true)` so the caller can simply try
    /// again.
    ///
    /// Concurrent calls for the same room serialize on a per-room
    /// lock; at most one backward fetch is in flight per room.
    pub async fn load_past_events(&self, room_id: &RoomId) -> Result<bool> {
        if self.pagination_disabled(room_id) {
            return Ok(false);
        }

        let lock = self.pagination_lock(room_id);
        let _guard = lock.lock().await;

        // The set may have changed while we waited for the lock.
        if self.pagination_disabled(room_id) {
            return Ok(false);
        }

        // Tokens only exist after sync has observed the room.
        self.first_sync_done().await;
        let from = loop {
            let token = self
                .past_tokens
                .lock()
                .expect("past tokens poisoned")
                .get(room_id)
                .cloned();
            match token {
                Some(token) => break token,
                None => tokio::time::sleep(TOKEN_POLL_INTERVAL).await,
            }
        };

        let limit = if self
            .loaded_once_rooms
            .lock()
            .expect("loaded once set poisoned")
            .contains(room_id)
        {
            NEXT_PAGE_SIZE
        } else {
            FIRST_PAGE_SIZE
        };

        let batch = match self.service.fetch_history(room_id, &from, limit).await {
            Ok(batch) => batch,
            Err(err) => {
                error!(room = %room_id, error = %err, "History fetch failed");
                return Ok(true);
            }
        };

        self.loaded_once_rooms
            .lock()
            .expect("loaded once set poisoned")
            .insert(room_id.clone());
        self.past_tokens
            .lock()
            .expect("past tokens poisoned")
            .insert(room_id.clone(), batch.end.clone());

        let snapshot = self
            .room_state
            .lock()
            .expect("room state poisoned")
            .get(room_id)
            .cloned();
        let Some(snapshot) = snapshot else {
            // Sync seeded a token but the room vanished since.
            debug!(room = %room_id, "No room state for paginated events");
            return Ok(true);
        };

        let first_sync_date = *self.first_sync_date.lock().expect("first sync date poisoned");

        let mut more = true;
        for event in batch.events {
            if matches!(event.content, EventContent::RoomCreate) {
                self.fully_loaded_rooms
                    .lock()
                    .expect("fully loaded set poisoned")
                    .insert(room_id.clone());
                more = false;
            }

            register_event(
                &self.backend,
                self.service.as_ref(),
                &self.user_id,
                &snapshot,
                event,
                first_sync_date,
            )
            .await;
        }

        Ok(more)
    }

    fn pagination_disabled(&self, room_id: &RoomId) -> bool {
        self.fully_loaded_rooms
            .lock()
            .expect("fully loaded set poisoned")
            .contains(room_id)
            || self
                .invited_rooms
                .lock()
                .expect("invited set poisoned")
                .contains(room_id)
            || self
                .cleared_events_rooms
                .lock()
                .expect("cleared set poisoned")
                .contains(room_id)
    }
}
