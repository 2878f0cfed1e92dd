//! SessionRegistry: session token → live connection handle
//!
//! ## 責務
//!
//! - このプロセスに接続中のコネクションの送信チャネルを管理
//! - トークンがどのプロセスに接続しているかを示すマーカー
//!   (`socket_instances/{token}` → InstanceId) を共有ストアに公開
//! - クラッシュしたプロセスが残したマーカーの回収
//!
//! ## 設計ノート
//!
//! WebSocket の生成は UI 層で行われ、ここでは生成済みの `UnboundedSender` だけを
//! 受け取ります。エントリの削除は ConnectionId が一致する場合に限るため、
//! 再接続した新しいコネクションを古いコネクションの切断処理が消すことはありません。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{
    AtomicWrite, CommitOutcome, ConnectionId, InstanceId, KeyValueStore, RoomId, SessionToken,
    StoreError, Version, store::keys,
};

/// Frame queued for delivery to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Ask the transport to close the connection.
    Close,
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;

/// Delivery failures of [`SessionRegistry::push_to`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("session {0} has no local connection")]
    NotConnected(String),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Live connection of one session on this process.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: ConnectionId,
    pub room_id: RoomId,
    sender: OutboundSender,
}

impl ConnectionHandle {
    pub fn new(connection_id: ConnectionId, room_id: RoomId, sender: OutboundSender) -> Self {
        Self {
            connection_id,
            room_id,
            sender,
        }
    }

    fn send(&self, frame: OutboundFrame) -> bool {
        self.sender.send(frame).is_ok()
    }
}

pub struct SessionRegistry {
    instance_id: InstanceId,
    store: Arc<dyn KeyValueStore>,
    connections: Mutex<HashMap<SessionToken, ConnectionHandle>>,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(instance_id: InstanceId, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            instance_id,
            store,
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Allocate an id for a new transport connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `handle` as the live connection of `token` and publish the
    /// ownership marker.
    ///
    /// A connection previously registered for the same token is replaced and
    /// asked to close. If the marker cannot be written the entry is rolled back.
    pub async fn add(&self, token: &SessionToken, handle: ConnectionHandle) -> Result<(), StoreError> {
        let connection_id = handle.connection_id;
        let marker = AtomicWrite::new().set_json(keys::socket_instance(token), &self.instance_id)?;
        let replaced = self.connections.lock().insert(token.clone(), handle);
        if let Some(old) = replaced.filter(|old| old.connection_id != connection_id) {
            tracing::info!(
                "Session {} moved from {} to {}",
                token.short(),
                old.connection_id,
                connection_id
            );
            old.send(OutboundFrame::Close);
        }

        if let Err(e) = self.store.commit(marker).await {
            self.forget(token, connection_id);
            tracing::warn!("Could not publish marker of {}, unregistered: {}", token.short(), e);
            return Err(e);
        }
        tracing::debug!("Session {} registered as {}", token.short(), connection_id);
        Ok(())
    }

    /// Drop the local entry of `token` if it still belongs to `connection_id`.
    fn forget(&self, token: &SessionToken, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        match connections.get(token) {
            Some(handle) if handle.connection_id == connection_id => {
                connections.remove(token);
                true
            }
            _ => false,
        }
    }

    /// Unregister `token` if it is still bound to `connection_id`.
    ///
    /// Returns whether an entry was removed. The marker is only deleted while
    /// it still names this process.
    pub async fn remove(
        &self,
        token: &SessionToken,
        connection_id: ConnectionId,
    ) -> Result<bool, StoreError> {
        if !self.forget(token, connection_id) {
            return Ok(false);
        }

        self.delete_own_marker(token).await?;
        tracing::debug!("Session {} unregistered ({})", token.short(), connection_id);
        Ok(true)
    }

    async fn delete_own_marker(&self, token: &SessionToken) -> Result<bool, StoreError> {
        let key = keys::socket_instance(token);
        let Some(entry) = self.store.get(&key).await? else {
            return Ok(false);
        };
        if entry.decode::<InstanceId>()? != self.instance_id {
            return Ok(false);
        }
        let write = AtomicWrite::new()
            .check(key.as_str(), Some(entry.version))
            .delete(key.as_str());
        Ok(matches!(self.store.commit(write).await?, CommitOutcome::Committed(_)))
    }

    pub fn get(&self, token: &SessionToken) -> Option<ConnectionHandle> {
        self.connections.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Local connections bound to `room_id`.
    pub fn connections_in(&self, room_id: &RoomId) -> Vec<(SessionToken, ConnectionHandle)> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, handle)| &handle.room_id == room_id)
            .map(|(token, handle)| (token.clone(), handle.clone()))
            .collect()
    }

    pub fn has_connections_in(&self, room_id: &RoomId) -> bool {
        self.connections
            .lock()
            .values()
            .any(|handle| &handle.room_id == room_id)
    }

    /// Queue `frame` for the local connection of `token`.
    ///
    /// A connection whose receiving side is gone is dropped from the registry;
    /// its marker is left for [`Self::reconcile_orphaned_markers`].
    pub fn push_to(&self, token: &SessionToken, frame: OutboundFrame) -> Result<(), PushError> {
        let mut connections = self.connections.lock();
        let Some(handle) = connections.get(token) else {
            return Err(PushError::NotConnected(token.short().to_string()));
        };
        if handle.send(frame) {
            return Ok(());
        }
        let connection_id = handle.connection_id;
        connections.remove(token);
        tracing::warn!("Dropped stale connection {} of {}", connection_id, token.short());
        Err(PushError::Closed(connection_id))
    }

    /// Which process currently holds the connection of `token`, if any.
    pub async fn owner_of(&self, token: &SessionToken) -> Result<Option<InstanceId>, StoreError> {
        match self.store.get(&keys::socket_instance(token)).await? {
            Some(entry) => Ok(Some(entry.decode()?)),
            None => Ok(None),
        }
    }

    /// Remove markers that no longer describe a live connection: markers of
    /// this process without a local connection, and markers of other processes
    /// whose session no longer exists.
    ///
    /// Returns the number of markers removed.
    pub async fn reconcile_orphaned_markers(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.store.list(keys::SOCKET_INSTANCES_PREFIX).await? {
            let Some(raw_token) = keys::suffix(&entry.key, keys::SOCKET_INSTANCES_PREFIX) else {
                continue;
            };
            let Ok(token) = SessionToken::try_from(raw_token.to_string()) else {
                continue;
            };
            let owner: InstanceId = match entry.decode() {
                Ok(owner) => owner,
                Err(e) => {
                    tracing::warn!("Removing undecodable marker: {}", e);
                    if self.delete_if_unchanged(&entry.key, entry.version).await? {
                        removed += 1;
                    }
                    continue;
                }
            };

            let orphaned = if owner == self.instance_id {
                self.get(&token).is_none()
            } else {
                self.store.get(&keys::session(&token)).await?.is_none()
            };
            if orphaned && self.delete_if_unchanged(&entry.key, entry.version).await? {
                tracing::debug!("Removed orphaned marker of {} (owner {})", token.short(), owner);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Reconciled {} orphaned session markers", removed);
        }
        Ok(removed)
    }

    async fn delete_if_unchanged(&self, key: &str, version: Version) -> Result<bool, StoreError> {
        let write = AtomicWrite::new().check(key, Some(version)).delete(key);
        Ok(matches!(self.store.commit(write).await?, CommitOutcome::Committed(_)))
    }
}
