use std::time::Duration;

/// Content key carrying the correlation id in outgoing messages.
///
/// Standard transaction ids are only visible to the sending device, so
/// other logged-in accounts could never match echoes back; this key is
/// embedded in the content itself.
pub const TRANSACTION_ID_KEY: &str = "io.causerie.transaction_id";

/// Thumbnails must fit within this box (width, height).
pub const THUMBNAIL_MAX: (u32, u32) = (800, 600);

/// Backward page size for the first fetch of a room.
pub const FIRST_PAGE_SIZE: u32 = 25;

/// Backward page size once a room has been paginated at least once.
pub const NEXT_PAGE_SIZE: u32 = 100;

/// Poll interval while waiting for sync to produce a pagination token.
pub const TOKEN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Long-poll timeout handed to the sync operation.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before restarting the sync loop after a failure.
pub const SYNC_RESTART_DELAY: Duration = Duration::from_secs(2);
