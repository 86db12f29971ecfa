use serde::{Deserialize, Serialize};
use std::fmt;

use crate::participant::UserId;

/// Transport lifecycle as seen by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    CatchingUp,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::CatchingUp => write!(f, "catching-up"),
        }
    }
}

/// How the reconciler resolved a batch of concurrent operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    LocalFirst,
    RemoteFirst,
    TimestampOrder,
    SelectiveRollback,
    FullRollback,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalFirst => write!(f, "local-first"),
            Self::RemoteFirst => write!(f, "remote-first"),
            Self::TimestampOrder => write!(f, "timestamp-order"),
            Self::SelectiveRollback => write!(f, "selective-rollback"),
            Self::FullRollback => write!(f, "full-rollback"),
        }
    }
}

/// Fan-out notifications for the embedding UI, published through the
/// events port: chat lines, connection changes, catch-up progress, and
/// conflict-resolution outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Chat {
        user_id: UserId,
        username: String,
        message: String,
        timestamp_ms: u64,
    },
    ConnectionChanged {
        state: ConnectionState,
    },
    CatchupProgress {
        applied: usize,
        pending: usize,
    },
    ConflictResolved {
        strategy: ConflictStrategy,
        rolled_back_ops: usize,
    },
    SessionEnded {
        post_url: String,
    },
}
