//! UseCase: 定期的な後片付け
//!
//! - 一定時間変更のない Room を閉じる
//! - クラッシュしたプロセスなどが残したソケットマーカーを回収する

use std::{sync::Arc, time::Duration};

use crate::{
    domain::{RoomError, RoomId},
    infrastructure::{RoomRepository, SessionRegistry},
};

/// Outcome of one janitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub closed_rooms: Vec<RoomId>,
    pub removed_markers: usize,
}

pub struct JanitorUseCase {
    repository: Arc<RoomRepository>,
    registry: Arc<SessionRegistry>,
    idle_room_threshold: Duration,
}

impl JanitorUseCase {
    pub fn new(
        repository: Arc<RoomRepository>,
        registry: Arc<SessionRegistry>,
        idle_room_threshold: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            idle_room_threshold,
        }
    }

    /// Run one pass. Marker reconciliation runs even if closing rooms failed.
    pub async fn execute(&self) -> Result<JanitorReport, RoomError> {
        let closed = self.repository.close_idle_rooms(self.idle_room_threshold).await;
        let removed_markers = self.registry.reconcile_orphaned_markers().await?;
        let report = JanitorReport {
            closed_rooms: closed?,
            removed_markers,
        };
        tracing::debug!(
            "Janitor pass: {} rooms closed, {} markers removed",
            report.closed_rooms.len(),
            report.removed_markers
        );
        Ok(report)
    }
}
