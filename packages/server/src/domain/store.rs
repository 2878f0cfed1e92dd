//! Key-value store capability.
//!
//! ドメイン層が必要とするストアのインターフェースです。RoomRepository はこの trait
//! にだけ依存し、具体的なバックエンド（インメモリ / SQLite）は Infrastructure 層が
//! 提供します（依存性の逆転）。
//!
//! The store offers versioned reads, an atomic commit guarded by version checks
//! (compare-and-swap), prefix scans and a per-key change feed.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Serialize, de::DeserializeOwned};

use super::{
    error::StoreError,
    value_object::{RoomId, SessionToken, Version},
};

/// Key layout shared by every backend.
pub mod keys {
    use super::{RoomId, SessionToken};

    pub const ROOMS_PREFIX: &str = "rooms/";
    pub const SESSIONS_PREFIX: &str = "sessions/";
    pub const SOCKET_INSTANCES_PREFIX: &str = "socket_instances/";

    pub fn room(id: &RoomId) -> String {
        format!("{ROOMS_PREFIX}{}", id.as_str())
    }

    pub fn session(token: &SessionToken) -> String {
        format!("{SESSIONS_PREFIX}{}", token.as_str())
    }

    pub fn socket_instance(token: &SessionToken) -> String {
        format!("{SOCKET_INSTANCES_PREFIX}{}", token.as_str())
    }

    /// Strip `prefix` from a listed key.
    pub fn suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
        key.strip_prefix(prefix)
    }
}

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: Version,
}

impl Entry {
    /// Decode the JSON document held by this entry.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_slice(&self.value).map_err(|source| StoreError::Codec {
            key: self.key.clone(),
            source,
        })
    }
}

/// One write inside an [`AtomicWrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A version check inside an [`AtomicWrite`]. `expected: None` means the key
/// must not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub key: String,
    pub expected: Option<Version>,
}

/// A batch of mutations that applies all-or-nothing, and only if every check
/// still holds at commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AtomicWrite {
    pub checks: Vec<Check>,
    pub mutations: Vec<Mutation>,
}

impl AtomicWrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to still be at `expected` (or absent for `None`).
    pub fn check(mut self, key: impl Into<String>, expected: Option<Version>) -> Self {
        self.checks.push(Check {
            key: key.into(),
            expected,
        });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.mutations.push(Mutation::Set {
            key: key.into(),
            value,
        });
        self
    }

    /// Serialize `value` as JSON and set it at `key`.
    pub fn set_json<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self, StoreError> {
        let key = key.into();
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Codec {
            key: key.clone(),
            source,
        })?;
        Ok(self.set(key, bytes))
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.mutations.push(Mutation::Delete { key: key.into() });
        self
    }
}

/// Result of [`KeyValueStore::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Every mutation was applied; mutated keys now carry this version.
    Committed(Version),
    /// At least one check failed; nothing was written.
    Conflict,
}

/// Change notification for a watched key.
///
/// `version: None` means the key no longer exists. Subscribers are expected to
/// re-read the key rather than trust the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub version: Option<Version>,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

/// Ordered key-value store with compare-and-swap and a change feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a key with its current version.
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError>;

    /// Apply `write` atomically if all of its checks hold.
    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, StoreError>;

    /// Subscribe to changes of `key`.
    ///
    /// The stream yields the key's current state first, then one event per
    /// subsequent change (possibly coalesced).
    async fn watch(&self, key: &str) -> Result<WatchStream, StoreError>;
}
