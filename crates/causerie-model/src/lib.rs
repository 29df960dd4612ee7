//! # causerie-model
//!
//! In-memory model tables shared between every logged-in account and
//! the UI layer.
//!
//! Each table is an ordered key-value map of model items with a
//! "publish now" signal: mutations mark the table dirty and the UI
//! publishes on its own cadence, while `sync_now` forces an immediate
//! publish (used so a local echo shows up with zero latency).

pub mod items;
pub mod raw;
pub mod store;

pub use items::{
    Account, Event, Member, Room, TransferError, TypeSpecifier, Upload, UploadStatus,
};
pub use raw::{EventContent, MediaMeta, MembershipAction, RawEvent};
pub use store::{Model, ModelStore};
