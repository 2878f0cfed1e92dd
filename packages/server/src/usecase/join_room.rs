//! UseCase: Room への参加

use std::sync::Arc;

use crate::{
    domain::{ParticipantName, RoomError, RoomId, RoomSnapshot, SessionToken},
    infrastructure::RoomRepository,
};

use super::RoomEntry;

/// Room 参加のユースケース
pub struct JoinRoomUseCase {
    repository: Arc<RoomRepository>,
}

impl JoinRoomUseCase {
    pub fn new(repository: Arc<RoomRepository>) -> Self {
        Self { repository }
    }

    /// Join `room_id`, minting a token when none (or a blank one) is given.
    pub async fn execute(
        &self,
        room_id: String,
        name: String,
        token: Option<String>,
    ) -> Result<RoomEntry, RoomError> {
        let room_id = RoomId::try_from(room_id)?;
        let name = ParticipantName::try_from(name)?;
        let token = token
            .filter(|t| !t.trim().is_empty())
            .map(SessionToken::try_from)
            .transpose()?;

        let (room, _, token) = self.repository.join(&room_id, &name, token).await?;
        let snapshot = RoomSnapshot::for_viewer(&room, &token);
        let member_number = snapshot
            .self_member_number()
            .ok_or_else(|| RoomError::NotAMember(room_id.clone()))?;
        Ok(RoomEntry {
            room_id,
            token,
            member_number,
            snapshot,
            name,
        })
    }
}
