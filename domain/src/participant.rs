use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const MAX_USERNAME_BYTES: usize = 64;

/// Session-scoped opaque participant identity. The surrounding application
/// assigns these; a client without one generates a v4 UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One member of the drawing session. The participant list is
/// server-authoritative; layer stacking is derived from join order with the
/// earliest joiner on top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub username: String,
    pub joined_at_ms: u64,
}

impl Participant {
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>, joined_at_ms: u64) -> Self {
        Self {
            user_id,
            username: username.into(),
            joined_at_ms,
        }
    }
}
