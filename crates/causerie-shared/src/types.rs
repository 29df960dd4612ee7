use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = "@localpart:server" string, as reported by the
// protocol service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    /// Shape check only: `@something:somewhere`.
    pub fn is_valid(s: &str) -> bool {
        let mut parts = s.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(local), Some(server)) => {
                local.len() > 1 && local.starts_with('@') && !server.is_empty()
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

impl RoomId {
    /// Accepts room ids (`!abc:server`) and aliases (`#room:server`).
    pub fn is_valid_id_or_alias(s: &str) -> bool {
        let mut chars = s.chars();
        matches!(chars.next(), Some('!') | Some('#')) && s.contains(':') && s.len() > 3
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Server-assigned event identifier, empty until a local echo is
/// confirmed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub String);

impl EventId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated correlation id embedded in outgoing content so a
/// confirmed event can be matched back to its local echo.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxnId(pub Uuid);

impl TxnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The model key used for the echo entry: `echo-<correlation-id>`.
    pub fn echo_key(&self) -> String {
        format!("echo-{}", self.0)
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
