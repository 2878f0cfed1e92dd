//! InMemory key-value store 実装
//!
//! ドメイン層が定義する KeyValueStore trait のインメモリ実装です。
//! BTreeMap をストレージとして使い、変更通知は `tokio::sync::broadcast` で配信します。
//! プロセス内でのみ共有されるため、単一プロセス構成とテスト用です。

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::domain::{
    AtomicWrite, CommitOutcome, Entry, KeyValueStore, Mutation, StoreError, Version, WatchEvent,
    WatchStream,
};

/// Default capacity of the change feed before slow subscribers start lagging.
const DEFAULT_FEED_CAPACITY: usize = 1024;

struct Inner {
    entries: BTreeMap<String, (Vec<u8>, Version)>,
    last_version: u64,
}

/// インメモリ KeyValueStore 実装
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<WatchEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a store whose change feed buffers at most `capacity` events per
    /// subscriber.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                last_version: 0,
            }),
            changes,
        }
    }

    fn current_version(&self, key: &str) -> Option<Version> {
        self.inner.lock().entries.get(key).map(|(_, v)| *v)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.entries.get(key).map(|(value, version)| Entry {
            key: key.to_string(),
            value: value.clone(),
            version: *version,
        }))
    }

    async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, StoreError> {
        let (version, events) = {
            let mut inner = self.inner.lock();

            let all_hold = write.checks.iter().all(|check| {
                inner.entries.get(&check.key).map(|(_, v)| *v) == check.expected
            });
            if !all_hold {
                return Ok(CommitOutcome::Conflict);
            }

            inner.last_version += 1;
            let version = Version::new(inner.last_version);
            let mut events = Vec::with_capacity(write.mutations.len());
            for mutation in write.mutations {
                match mutation {
                    Mutation::Set { key, value } => {
                        inner.entries.insert(key.clone(), (value, version));
                        events.push(WatchEvent {
                            key,
                            version: Some(version),
                        });
                    }
                    Mutation::Delete { key } => {
                        if inner.entries.remove(&key).is_some() {
                            events.push(WatchEvent { key, version: None });
                        }
                    }
                }
            }
            (version, events)
        };

        for event in events {
            // No subscribers is not an error.
            let _ = self.changes.send(event);
        }
        Ok(CommitOutcome::Committed(version))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Entry>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, version))| Entry {
                key: key.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect())
    }

    async fn watch(&self, key: &str) -> Result<WatchStream, StoreError> {
        // Subscribe before reading so no change slips between the two.
        let rx = self.changes.subscribe();
        let initial = WatchEvent {
            key: key.to_string(),
            version: self.current_version(key),
        };

        let changes = stream::unfold((rx, key.to_string()), |(mut rx, key)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.key == key => return Some((Ok(event), (rx, key))),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        let err = StoreError::WatchLagged {
                            key: key.clone(),
                            skipped,
                        };
                        return Some((Err(err), (rx, key)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::once(async move { Ok(initial) }).chain(changes).boxed())
    }
}
