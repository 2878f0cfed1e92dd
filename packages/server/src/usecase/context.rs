//! Process-scoped context.
//!
//! One instance per server process, built once at startup. It owns the
//! connection registry, the watcher table and the grace timers, and is shared
//! by every ConnectionSession and use case of the process.

use std::sync::Arc;

use zashiki_shared::time::Clock;

use crate::{
    config::SyncConfig,
    domain::{InstanceId, KeyValueStore, RoomId, SessionToken},
    infrastructure::{ChangeNotifier, DisconnectGracePeriod, RoomRepository, SessionRegistry},
};

/// Key of a pending disconnect.
pub type GraceKey = (RoomId, SessionToken);

pub struct ProcessContext {
    pub config: SyncConfig,
    pub repository: Arc<RoomRepository>,
    pub registry: Arc<SessionRegistry>,
    pub notifier: Arc<ChangeNotifier>,
    pub grace: DisconnectGracePeriod<GraceKey>,
}

impl ProcessContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
        instance_id: InstanceId,
    ) -> Arc<Self> {
        let repository = Arc::new(RoomRepository::new(store.clone(), clock, &config));
        let registry = Arc::new(SessionRegistry::new(instance_id, store.clone()));
        let notifier = Arc::new(ChangeNotifier::new(
            store,
            repository.clone(),
            registry.clone(),
            config.watch_restart_backoff,
        ));
        let grace = DisconnectGracePeriod::new(config.grace_period);
        tracing::info!("Process context ready (instance {})", registry.instance_id());
        Arc::new(Self {
            config,
            repository,
            registry,
            notifier,
            grace,
        })
    }
}
