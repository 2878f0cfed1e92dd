//! UseCase: 以前参加した Room への再参加（読み取りのみ）

use std::sync::Arc;

use crate::{
    domain::{RoomError, RoomId, RoomSnapshot, SessionToken},
    infrastructure::RoomRepository,
};

use super::RoomEntry;

/// Room 再参加のユースケース
pub struct RejoinRoomUseCase {
    repository: Arc<RoomRepository>,
}

impl RejoinRoomUseCase {
    pub fn new(repository: Arc<RoomRepository>) -> Self {
        Self { repository }
    }

    pub async fn execute(&self, room_id: String, token: String) -> Result<RoomEntry, RoomError> {
        let room_id = RoomId::try_from(room_id)?;
        let token = SessionToken::try_from(token)?;
        let (room, _, _) = self.repository.rejoin(&room_id, &token).await?;

        let participant = room
            .participant(&token)
            .ok_or_else(|| RoomError::NotAMember(room_id.clone()))?;
        let name = participant.name.clone();
        let snapshot = RoomSnapshot::for_viewer(&room, &token);
        Ok(RoomEntry {
            room_id,
            member_number: snapshot.self_member_number().unwrap_or(0),
            token,
            snapshot,
            name,
        })
    }
}
