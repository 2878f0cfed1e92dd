//! WebSocket connection handler.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::sync::mpsc;

use crate::{
    domain::RoomId,
    infrastructure::OutboundFrame,
    ui::state::AppState,
    usecase::ConnectionSession,
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let room_id = match RoomId::try_from(room_id.clone()) {
        Ok(id) => id,
        Err(_) => {
            tracing::warn!("Invalid room id in WebSocket path: '{}'", room_id);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, room_id)))
}

/// Forward outbound frames of one connection to its WebSocket sink.
///
/// Ends after sending a Close frame, when every sender is dropped, or when the
/// socket rejects a write.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: RoomId) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    let mut session = ConnectionSession::new(state.context.clone(), room_id, tx);
    let connection_id = session.connection_id();
    let mut send_task = pusher_loop(rx, sender);

    loop {
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!("{} outbound side finished", connection_id);
                break;
            }
            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::warn!("{} WebSocket error: {}", connection_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        if let Err(e) = session.handle_text(text.as_str()).await {
                            tracing::warn!("{} dropped frame: {}", connection_id, e);
                        }
                    }
                    Message::Close(_) => {
                        tracing::info!("{} requested close", connection_id);
                        break;
                    }
                    // Ping/pong is handled automatically by the WebSocket protocol
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    session.on_close().await;
}
