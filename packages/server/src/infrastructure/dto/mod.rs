//! Data Transfer Objects (DTOs).
//!
//! DTOs are organized by protocol:
//! - `websocket`: WebSocket frames
//! - `http`: HTTP API request / response bodies

pub mod http;
pub mod websocket;
