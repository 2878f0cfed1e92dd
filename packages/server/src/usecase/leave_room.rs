//! UseCase: Room からの退出

use std::sync::Arc;

use crate::{
    domain::{RoomError, RoomId, SessionToken},
    infrastructure::{LeaveOutcome, RoomRepository},
};

/// Room 退出のユースケース
pub struct LeaveRoomUseCase {
    repository: Arc<RoomRepository>,
}

impl LeaveRoomUseCase {
    pub fn new(repository: Arc<RoomRepository>) -> Self {
        Self { repository }
    }

    pub async fn execute(&self, room_id: String, token: String) -> Result<LeaveOutcome, RoomError> {
        let room_id = RoomId::try_from(room_id)?;
        let token = SessionToken::try_from(token)?;
        self.repository.leave(Some(&room_id), &token).await
    }
}
