//! WebSocket frame DTOs.
//!
//! Inbound frames are a tagged union on `type`. Parsing happens in two steps so
//! that an unknown tag is reported as [`InboundError::UnknownType`] rather than
//! being folded into a generic parse failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RoomSnapshot;

/// Liveness check sent as a bare text frame, outside the JSON envelope.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

const KNOWN_TYPES: [&str; 4] = ["auth", "submitValue", "clearValues", "setSpectator"];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Auth {
        #[serde(alias = "userToken")]
        token: String,
    },
    SubmitValue {
        value: String,
    },
    ClearValues,
    #[serde(rename_all = "camelCase")]
    SetSpectator {
        is_spectator: bool,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let raw: serde_json::Value =
            serde_json::from_str(text).map_err(|e| InboundError::Malformed(e.to_string()))?;
        let kind = raw
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| InboundError::Malformed("missing 'type'".to_string()))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(InboundError::UnknownType(kind.to_string()));
        }
        serde_json::from_value(raw).map_err(|e| InboundError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Room { snapshot: RoomSnapshot },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
