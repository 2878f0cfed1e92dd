//! HTTP API request / response bodies.

use serde::{Deserialize, Serialize};

use crate::domain::RoomSnapshot;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomRequest {
    pub name: String,
    #[serde(default, alias = "userToken")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    #[serde(alias = "userToken")]
    pub token: String,
}

pub type LeaveRoomRequest = TokenRequest;
pub type RejoinRoomRequest = TokenRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_id: String,
    pub token: String,
    pub member_number: usize,
    pub snapshot: RoomSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub token: String,
    pub member_number: usize,
    pub snapshot: RoomSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRoomResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinRoomResponse {
    pub token: String,
    pub member_number: usize,
    pub snapshot: RoomSnapshot,
    pub name: String,
}

/// Error body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
