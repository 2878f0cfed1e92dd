//! UseCase layer.
//!
//! HTTP 向けのユースケース（create / join / leave / rejoin）、
//! コネクションごとの ConnectionSession、定期実行の Janitor をまとめます。

pub mod connection_session;
pub mod context;
pub mod create_room;
pub mod janitor;
pub mod join_room;
pub mod leave_room;
pub mod rejoin_room;

pub use connection_session::{ConnectionSession, SessionError};
pub use context::{GraceKey, ProcessContext};
pub use create_room::CreateRoomUseCase;
pub use janitor::{JanitorReport, JanitorUseCase};
pub use join_room::JoinRoomUseCase;
pub use leave_room::LeaveRoomUseCase;
pub use rejoin_room::RejoinRoomUseCase;

use crate::domain::{ParticipantName, RoomId, RoomSnapshot, SessionToken};

/// A session's view of a room right after create / join / rejoin.
#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub room_id: RoomId,
    pub token: SessionToken,
    pub member_number: usize,
    pub snapshot: RoomSnapshot,
    pub name: ParticipantName,
}
