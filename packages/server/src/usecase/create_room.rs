//! UseCase: Room 作成

use std::sync::Arc;

use crate::{
    domain::{ParticipantName, RoomConfig, RoomError, RoomSnapshot, SessionToken},
    infrastructure::RoomRepository,
};

use super::RoomEntry;

/// Room 作成のユースケース
pub struct CreateRoomUseCase {
    repository: Arc<RoomRepository>,
}

impl CreateRoomUseCase {
    pub fn new(repository: Arc<RoomRepository>) -> Self {
        Self { repository }
    }

    /// Create a room with the caller as its first participant.
    pub async fn execute(&self, name: String) -> Result<RoomEntry, RoomError> {
        let name = ParticipantName::try_from(name)?;
        let token = SessionToken::generate();
        let (room, _) = self
            .repository
            .create(&token, &name, RoomConfig::default())
            .await?;
        let snapshot = RoomSnapshot::for_viewer(&room, &token);
        Ok(RoomEntry {
            room_id: room.id,
            member_number: snapshot.self_member_number().unwrap_or(0),
            token,
            snapshot,
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SyncConfig, infrastructure::store::InMemoryStore};
    use zashiki_shared::time::SystemClock;

    fn usecase() -> CreateRoomUseCase {
        CreateRoomUseCase::new(Arc::new(RoomRepository::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            &SyncConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_create_room_returns_creator_as_member_zero() {
        // テスト項目: 作成者はメンバー番号 0 で、スナップショットに自分だけが含まれる
        // given (前提条件):
        let usecase = usecase();

        // when (操作):
        let entry = usecase.execute("Alice".to_string()).await.unwrap();

        // then (期待する結果):
        assert_eq!(entry.member_number, 0);
        assert_eq!(entry.snapshot.participants.len(), 1);
        assert!(entry.snapshot.participants[0].is_self);
        assert_eq!(entry.snapshot.id, entry.room_id);
    }

    #[tokio::test]
    async fn test_create_room_rejects_blank_name() {
        // テスト項目: 空白だけの名前は InvalidInput になる
        // given (前提条件):
        let usecase = usecase();

        // when (操作):
        let result = usecase.execute("   ".to_string()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(RoomError::InvalidInput(_))));
    }
}
