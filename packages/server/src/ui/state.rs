//! Shared application state.

use std::sync::Arc;

use crate::usecase::{
    CreateRoomUseCase, JoinRoomUseCase, LeaveRoomUseCase, ProcessContext, RejoinRoomUseCase,
};

/// State handed to every handler.
pub struct AppState {
    /// Process-scoped context (registry, watchers, grace timers)
    pub context: Arc<ProcessContext>,
    pub create_room_usecase: CreateRoomUseCase,
    pub join_room_usecase: JoinRoomUseCase,
    pub leave_room_usecase: LeaveRoomUseCase,
    pub rejoin_room_usecase: RejoinRoomUseCase,
}

impl AppState {
    pub fn new(context: Arc<ProcessContext>) -> Self {
        let repository = context.repository.clone();
        Self {
            create_room_usecase: CreateRoomUseCase::new(repository.clone()),
            join_room_usecase: JoinRoomUseCase::new(repository.clone()),
            leave_room_usecase: LeaveRoomUseCase::new(repository.clone()),
            rejoin_room_usecase: RejoinRoomUseCase::new(repository),
            context,
        }
    }
}
