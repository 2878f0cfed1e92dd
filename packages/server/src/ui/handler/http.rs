//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    infrastructure::{
        LeaveOutcome,
        dto::http::{
            CreateRoomRequest, CreateRoomResponse, HealthResponse, JoinRoomRequest,
            JoinRoomResponse, LeaveRoomRequest, LeaveRoomResponse, RejoinRoomRequest,
            RejoinRoomResponse,
        },
    },
    ui::{error::ApiError, state::AppState},
};

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), ApiError> {
    let entry = state.create_room_usecase.execute(body.name).await?;
    tracing::info!(
        "Room {} created by {}",
        entry.room_id,
        entry.token.short()
    );

    // Domain Model から DTO への変換
    let response = CreateRoomResponse {
        room_id: entry.room_id.into_string(),
        token: entry.token.as_str().to_string(),
        member_number: entry.member_number,
        snapshot: entry.snapshot,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/rooms/{room_id}/join
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<JoinRoomRequest>,
) -> Result<Json<JoinRoomResponse>, ApiError> {
    let entry = state
        .join_room_usecase
        .execute(room_id, body.name, body.token)
        .await?;
    tracing::info!(
        "{} joined room {} as #{}",
        entry.token.short(),
        entry.room_id,
        entry.member_number
    );

    Ok(Json(JoinRoomResponse {
        token: entry.token.as_str().to_string(),
        member_number: entry.member_number,
        snapshot: entry.snapshot,
    }))
}

/// POST /api/rooms/{room_id}/leave
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<LeaveRoomRequest>,
) -> Result<Json<LeaveRoomResponse>, ApiError> {
    match state.leave_room_usecase.execute(room_id.clone(), body.token).await? {
        LeaveOutcome::Left { .. } => tracing::info!("Participant left room {}", room_id),
        LeaveOutcome::Deleted => tracing::info!("Last participant left, room {} deleted", room_id),
    }
    Ok(Json(LeaveRoomResponse { ok: true }))
}

/// POST /api/rooms/{room_id}/rejoin
pub async fn rejoin_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(body): Json<RejoinRoomRequest>,
) -> Result<Json<RejoinRoomResponse>, ApiError> {
    let entry = state.rejoin_room_usecase.execute(room_id, body.token).await?;

    Ok(Json(RejoinRoomResponse {
        token: entry.token.as_str().to_string(),
        member_number: entry.member_number,
        snapshot: entry.snapshot,
        name: entry.name.as_str().to_string(),
    }))
}
