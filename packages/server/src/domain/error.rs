//! Domain error types.

use thiserror::Error;

use super::value_object::RoomId;

/// Validation failures of value objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("room id must not be empty")]
    EmptyRoomId,
    #[error("room id must be at most {0} characters")]
    RoomIdTooLong(usize),
    #[error("session token must not be empty")]
    EmptyToken,
    #[error("name must not be empty")]
    EmptyName,
    #[error("name must be at most {0} characters")]
    NameTooLong(usize),
    #[error("value must be at most {0} characters")]
    ValueTooLong(usize),
}

/// Failures of the underlying key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend itself failed (I/O, SQL, poisoned task).
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored document could not be encoded or decoded.
    #[error("failed to encode or decode value at '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A change-feed subscriber fell behind and missed events.
    #[error("watch on '{key}' lagged behind by {skipped} events")]
    WatchLagged { key: String, skipped: u64 },

    /// The change feed ended.
    #[error("watch on '{0}' closed")]
    WatchClosed(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Errors surfaced by room operations.
///
/// `RoomNotFound`, `NotAMember`, `InvalidToken`, `RoomFull` and `InvalidInput`
/// are terminal. `Busy` may be retried by the caller after backing off.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room '{0}' not found")]
    RoomNotFound(RoomId),

    #[error("session is not a member of room '{0}'")]
    NotAMember(RoomId),

    #[error("session token is unknown or expired")]
    InvalidToken,

    #[error("room '{room_id}' is full ({max} participants)")]
    RoomFull { room_id: RoomId, max: usize },

    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValueObjectError),

    #[error("room '{room_id}' is busy, gave up after {attempts} attempts")]
    Busy { room_id: RoomId, attempts: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl RoomError {
    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}
