//! # causerie-client
//!
//! The client-side chat core: per-account sessions driving a
//! continuous sync stream, local-echo reconciliation, the file send
//! pipeline and backward history loading, all writing into the shared
//! model tables from `causerie-model`.

use tracing_subscriber::{fmt, EnvFilter};

pub mod backend;
pub mod echo;
pub mod last_event;
pub mod monitor;
pub mod pagination;
pub mod registrar;
pub mod service;
pub mod session;
pub mod upload;

pub use backend::{Alert, Backend};
pub use echo::EchoMedia;
pub use last_event::should_replace_last_event;
pub use monitor::{transfer_monitor, ProgressSample, ProgressSender};
pub use service::{
    ChatService, CreateRoomRequest, HistoryBatch, MemberInfo, PowerLevels, Profile,
    RoomMembership, RoomSnapshot, SyncBatch, SyncedRoom, UploadResponse, UploadSource,
};
pub use session::Session;

/// Install the process-wide log subscriber. Call once from the
/// embedding application's entry point.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("causerie_client=debug,causerie_media=info,causerie_model=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
