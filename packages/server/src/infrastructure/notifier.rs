//! ChangeNotifier: per-room watchers that push snapshots to local connections
//!
//! ## 責務
//!
//! - ローカルに接続がある Room ごとに 1 つ、ストアの変更フィードを購読する
//! - 変更を受けたら Room を読み直し、ローカルの参加者ごとに RoomSnapshot を送る
//! - Room が削除されたらローカルの接続を閉じて監視を終了する
//! - ストリームのエラーや終了時は一定時間後に必ず再開する
//!
//! ## 状態遷移
//!
//! ```text
//! Idle -> Watching -> (Stopped | Errored)
//! Errored -> (backoff) -> Watching
//! ```
//!
//! 停止はフラグ（`tokio::sync::watch`）で伝え、イベント待ちの間だけ反応します。
//! 実行中のストア読み取りを中断することはありません。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    domain::{KeyValueStore, RoomError, RoomId, RoomSnapshot, StoreError, store::keys},
    infrastructure::{
        dto::websocket::ServerMessage,
        repository::RoomRepository,
        session_registry::{OutboundFrame, SessionRegistry},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Spawned, not yet subscribed.
    Idle,
    Watching,
    /// The room was deleted; waiting for the last local connection to go.
    Stopped,
    /// The feed failed; a restart is scheduled.
    Errored,
}

struct Watcher {
    generation: u64,
    state: WatcherState,
    stop: watch::Sender<bool>,
}

enum Exit {
    StopRequested,
    RoomDeleted,
}

pub struct ChangeNotifier {
    store: Arc<dyn KeyValueStore>,
    repository: Arc<RoomRepository>,
    registry: Arc<SessionRegistry>,
    restart_backoff: Duration,
    watchers: Mutex<HashMap<RoomId, Watcher>>,
    next_generation: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        repository: Arc<RoomRepository>,
        registry: Arc<SessionRegistry>,
        restart_backoff: Duration,
    ) -> Self {
        Self {
            store,
            repository,
            registry,
            restart_backoff,
            watchers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn state(&self, room_id: &RoomId) -> Option<WatcherState> {
        self.watchers.lock().get(room_id).map(|w| w.state)
    }

    /// Start watching `room_id` unless a live watcher already exists.
    pub fn ensure_watching(self: &Arc<Self>, room_id: &RoomId) {
        let mut watchers = self.watchers.lock();
        if let Some(existing) = watchers.get(room_id) {
            if existing.state != WatcherState::Stopped {
                return;
            }
            let _ = existing.stop.send(true);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (stop, stop_rx) = watch::channel(false);
        watchers.insert(
            room_id.clone(),
            Watcher {
                generation,
                state: WatcherState::Idle,
                stop,
            },
        );
        drop(watchers);

        tracing::info!("Starting watcher for room {}", room_id);
        tokio::spawn(Arc::clone(self).run(room_id.clone(), generation, stop_rx));
    }

    /// Stop watching `room_id` if no local connection is bound to it anymore.
    pub fn release(&self, room_id: &RoomId) {
        let mut watchers = self.watchers.lock();
        if self.registry.has_connections_in(room_id) {
            return;
        }
        if let Some(watcher) = watchers.remove(room_id) {
            let _ = watcher.stop.send(true);
            tracing::info!("Stopped watcher for room {}", room_id);
        }
    }

    fn set_state(&self, room_id: &RoomId, generation: u64, state: WatcherState) {
        if let Some(watcher) = self.watchers.lock().get_mut(room_id) {
            if watcher.generation == generation {
                watcher.state = state;
            }
        }
    }

    async fn run(self: Arc<Self>, room_id: RoomId, generation: u64, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }
            match self.watch_once(&room_id, generation, &mut stop).await {
                Ok(Exit::StopRequested) => break,
                Ok(Exit::RoomDeleted) => {
                    self.set_state(&room_id, generation, WatcherState::Stopped);
                    tracing::info!("Room {} deleted, watcher stopped", room_id);
                    break;
                }
                Err(e) => {
                    self.set_state(&room_id, generation, WatcherState::Errored);
                    tracing::error!(
                        "Watcher for room {} failed, restarting in {:?}: {}",
                        room_id,
                        self.restart_backoff,
                        e
                    );
                    tokio::select! {
                        _ = stop.changed() => break,
                        _ = tokio::time::sleep(self.restart_backoff) => {}
                    }
                }
            }
        }
        tracing::debug!("Watcher task for room {} exited", room_id);
    }

    async fn watch_once(
        &self,
        room_id: &RoomId,
        generation: u64,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Exit, RoomError> {
        let key = keys::room(room_id);
        let mut events = self.store.watch(&key).await?;
        self.set_state(room_id, generation, WatcherState::Watching);

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.changed() => return Ok(Exit::StopRequested),
                event = events.next() => event,
            };
            match event {
                Some(Ok(_)) => {
                    // The event payload is only a hint; always re-read.
                    if !self.refresh(room_id).await? {
                        return Ok(Exit::RoomDeleted);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(StoreError::WatchClosed(key).into()),
            }
        }
    }

    /// Push the current snapshot to every local participant of `room_id`.
    ///
    /// Returns `false` when the room no longer exists, after asking its local
    /// connections to close.
    pub async fn refresh(&self, room_id: &RoomId) -> Result<bool, RoomError> {
        let local = self.registry.connections_in(room_id);
        let Some((room, version)) = self.repository.find(room_id).await? else {
            for (token, _) in &local {
                let _ = self.registry.push_to(token, OutboundFrame::Close);
            }
            tracing::info!("Closing {} local connections of deleted room {}", local.len(), room_id);
            return Ok(false);
        };

        for (token, handle) in local {
            if !room.contains(&token) {
                continue;
            }
            let message = ServerMessage::Room {
                snapshot: RoomSnapshot::for_viewer(&room, &token),
            };
            let frame = match message.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Failed to encode snapshot of room {}: {}", room_id, e);
                    continue;
                }
            };
            if let Err(e) = self.registry.push_to(&token, OutboundFrame::Text(frame)) {
                tracing::debug!("Snapshot not delivered to {}: {}", handle.connection_id, e);
            }
        }
        tracing::debug!("Pushed room {} at version {}", room_id, version.value());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use futures_util::stream;
    use tokio::sync::mpsc;
    use zashiki_shared::time::SystemClock;

    use crate::{
        config::SyncConfig,
        domain::{
            AtomicWrite, CommitOutcome, Entry, InstanceId, ParticipantName, RoomConfig,
            SessionToken, SubmittedValue, WatchStream,
        },
        infrastructure::{session_registry::ConnectionHandle, store::InMemoryStore},
    };

    const BACKOFF: Duration = Duration::from_millis(50);

    /// One server process sharing `store` with others.
    struct Process {
        repository: Arc<RoomRepository>,
        registry: Arc<SessionRegistry>,
        notifier: Arc<ChangeNotifier>,
    }

    fn process(store: Arc<dyn KeyValueStore>) -> Process {
        let repository = Arc::new(RoomRepository::new(
            store.clone(),
            Arc::new(SystemClock),
            &SyncConfig::default(),
        ));
        let registry = Arc::new(SessionRegistry::new(InstanceId::generate(), store.clone()));
        let notifier = Arc::new(ChangeNotifier::new(
            store,
            repository.clone(),
            registry.clone(),
            BACKOFF,
        ));
        Process {
            repository,
            registry,
            notifier,
        }
    }

    async fn connect(
        process: &Process,
        room_id: &RoomId,
        token: &SessionToken,
    ) -> mpsc::UnboundedReceiver<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(process.registry.next_connection_id(), room_id.clone(), tx);
        process.registry.add(token, handle).await.unwrap();
        process.notifier.ensure_watching(room_id);
        rx
    }

    async fn next_snapshot(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> RoomSnapshot {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("channel closed");
        match frame {
            OutboundFrame::Text(text) => match serde_json::from_str::<ServerMessage>(&text).unwrap() {
                ServerMessage::Room { snapshot } => snapshot,
            },
            OutboundFrame::Close => panic!("unexpected close"),
        }
    }

    fn name(s: &str) -> ParticipantName {
        ParticipantName::try_from(s.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_pushes_snapshot_on_change() {
        // テスト項目: Room の変更がローカルの参加者にスナップショットとして届く
        // given (前提条件):
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let p = process(store);
        let alice = SessionToken::generate();
        let (room, _) = p
            .repository
            .create(&alice, &name("Alice"), RoomConfig::default())
            .await
            .unwrap();
        let mut rx = connect(&p, &room.id, &alice).await;
        let initial = next_snapshot(&mut rx).await;

        // when (操作):
        let value = SubmittedValue::try_from("5".to_string()).unwrap();
        p.repository.submit_value(&room.id, &alice, &value).await.unwrap();
        let updated = next_snapshot(&mut rx).await;

        // then (期待する結果):
        assert_eq!(initial.participants[0].value, "");
        assert!(initial.participants[0].is_self);
        assert_eq!(updated.participants[0].value, "5");
        assert_eq!(p.notifier.state(&room.id), Some(WatcherState::Watching));
    }

    #[tokio::test]
    async fn test_change_reaches_connections_on_other_process() {
        // テスト項目: 別プロセスで行われた変更が、各プロセスのローカル接続に届く
        // given (前提条件):
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let first = process(store.clone());
        let second = process(store);
        let alice = SessionToken::generate();
        let (room, _) = first
            .repository
            .create(&alice, &name("Alice"), RoomConfig::default())
            .await
            .unwrap();
        let (_, _, bob) = second.repository.join(&room.id, &name("Bob"), None).await.unwrap();
        let mut alice_rx = connect(&first, &room.id, &alice).await;
        let mut bob_rx = connect(&second, &room.id, &bob).await;
        next_snapshot(&mut alice_rx).await;
        next_snapshot(&mut bob_rx).await;

        // when (操作):
        second.repository.clear_values(&room.id).await.unwrap();

        // then (期待する結果):
        let seen_by_alice = next_snapshot(&mut alice_rx).await;
        let seen_by_bob = next_snapshot(&mut bob_rx).await;
        assert_eq!(seen_by_alice.self_member_number(), Some(0));
        assert_eq!(seen_by_bob.self_member_number(), Some(1));
        assert!(first.registry.get(&bob).is_none());
    }

    #[tokio::test]
    async fn test_room_deletion_closes_local_connections() {
        // テスト項目: Room が削除されるとローカル接続に Close が送られ、監視は Stopped になる
        // given (前提条件):
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let p = process(store);
        let alice = SessionToken::generate();
        let (room, _) = p
            .repository
            .create(&alice, &name("Alice"), RoomConfig::default())
            .await
            .unwrap();
        let mut rx = connect(&p, &room.id, &alice).await;
        next_snapshot(&mut rx).await;

        // when (操作):
        p.repository.leave(Some(&room.id), &alice).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();

        // then (期待する結果):
        assert_eq!(frame, Some(OutboundFrame::Close));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(p.notifier.state(&room.id), Some(WatcherState::Stopped));
    }

    #[tokio::test]
    async fn test_release_stops_watcher_only_without_local_connections() {
        // テスト項目: ローカル接続が残っている間は release しても監視が続き、なくなると停止する
        // given (前提条件):
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let p = process(store);
        let alice = SessionToken::generate();
        let (room, _) = p
            .repository
            .create(&alice, &name("Alice"), RoomConfig::default())
            .await
            .unwrap();
        let _rx = connect(&p, &room.id, &alice).await;
        let connection_id = p.registry.get(&alice).unwrap().connection_id;

        // when (操作):
        p.notifier.release(&room.id);
        let while_connected = p.notifier.state(&room.id);
        p.registry.remove(&alice, connection_id).await.unwrap();
        p.notifier.release(&room.id);

        // then (期待する結果):
        assert!(while_connected.is_some());
        assert_eq!(p.notifier.state(&room.id), None);
    }

    /// Store whose first watch stream fails right after the initial event.
    struct FlakyStore {
        inner: InMemoryStore,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Entry>, StoreError> {
            self.inner.get(key).await
        }

        async fn commit(&self, write: AtomicWrite) -> Result<CommitOutcome, StoreError> {
            self.inner.commit(write).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<Entry>, StoreError> {
            self.inner.list(prefix).await
        }

        async fn watch(&self, key: &str) -> Result<WatchStream, StoreError> {
            if self.failed_once.swap(true, Ordering::SeqCst) {
                return self.inner.watch(key).await;
            }
            let failure = StoreError::Backend("connection reset".to_string());
            Ok(stream::iter(vec![Err(failure)]).boxed())
        }
    }

    #[tokio::test]
    async fn test_errored_watcher_restarts_after_backoff() {
        // テスト項目: 変更フィードのエラー後、バックオフを経て監視が再開し、更新が届く
        // given (前提条件):
        let store: Arc<dyn KeyValueStore> = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            failed_once: AtomicBool::new(false),
        });
        let p = process(store);
        let alice = SessionToken::generate();
        let (room, _) = p
            .repository
            .create(&alice, &name("Alice"), RoomConfig::default())
            .await
            .unwrap();

        // when (操作):
        let mut rx = connect(&p, &room.id, &alice).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let during_backoff = p.notifier.state(&room.id);
        let after_restart = next_snapshot(&mut rx).await;
        let value = SubmittedValue::try_from("3".to_string()).unwrap();
        p.repository.submit_value(&room.id, &alice, &value).await.unwrap();
        let updated = next_snapshot(&mut rx).await;

        // then (期待する結果):
        assert_eq!(during_backoff, Some(WatcherState::Errored));
        assert_eq!(after_restart.participants.len(), 1);
        assert_eq!(updated.participants[0].value, "3");
        assert_eq!(p.notifier.state(&room.id), Some(WatcherState::Watching));
    }
}
