//! # causerie-shared
//!
//! Identifiers, constants and the error taxonomy shared by every
//! Causerie crate.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{CauserieError, ServiceError, ServiceErrorKind};
pub use types::{EventId, RoomId, TxnId, UserId};
