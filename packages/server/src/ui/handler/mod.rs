//! HTTP and WebSocket handlers.

mod http;
mod websocket;

pub use http::{create_room, health_check, join_room, leave_room, rejoin_room};
pub use websocket::websocket_handler;
