use thiserror::Error;

/// Structured failure categories reported by the protocol service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidUser,
    NotFound,
    PermissionDenied,
    RateLimited,
    Network,
    Other,
}

/// A failure returned by the protocol service, carrying the original
/// structured payload for the caller to inspect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("service error ({kind:?}): {message}")]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
    /// Server-provided retry hint, if any (milliseconds).
    pub retry_after_ms: Option<u64>,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }
}

/// Top-level error for every operation exposed to the human-facing
/// layer.
///
/// Local validation variants are raised synchronously, before any
/// network call is made.
#[derive(Debug, Error)]
pub enum CauserieError {
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("malformed user id: {0}")]
    InvalidUserId(String),

    #[error("user cannot be used here: {0}")]
    InvalidUserInContext(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("not a room id or alias: {0}")]
    InvalidRoomReference(String),

    #[error("bad media type: wanted {wanted}, got {got}")]
    BadMimeType { wanted: String, got: String },

    #[error("no account logged in for {0}")]
    NoSuchAccount(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CauserieError>;
