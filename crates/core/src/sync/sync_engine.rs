//! How the drain reacts to an entry that failed to sync.

use serde::{Deserialize, Serialize};

use crate::errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    /// Transient; the entry is retried next cycle.
    Retryable,
    /// The entry is rejected as-is and will keep failing until it is fixed or deleted.
    Permanent,
    /// The session was refused. Every remaining entry would fail the same way.
    ReauthRequired,
}

impl SyncRetryClass {
    pub fn of(err: &Error) -> Self {
        match err {
            Error::Auth(_) => Self::ReauthRequired,
            Error::Validation(_) | Error::Serialization(_) => Self::Permanent,
            _ => Self::Retryable,
        }
    }
}

/// Attempts after which a retryable entry is reported as stuck in logs.
pub const SYNC_ATTEMPT_WARN_THRESHOLD: i32 = 5;
