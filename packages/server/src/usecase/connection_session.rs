//! ConnectionSession: one transport connection bound to at most one session
//!
//! ## 責務
//!
//! - `auth` メッセージでトークンを束縛し、SessionRegistry に登録する
//! - 受信メッセージを RoomRepository の操作に振り分ける
//! - 切断時にレジストリから外し、猶予期間付きの退出を予約する
//!
//! 認証前のドメインメッセージは黙って捨てます。トランスポートは認証との
//! 順序を保証しないためです。スナップショットの送信は ChangeNotifier が行います。

use std::sync::Arc;

use thiserror::Error;

use crate::{
    domain::{ConnectionId, RoomError, RoomId, RoomSnapshot, SessionToken, SubmittedValue},
    infrastructure::{
        ConnectionHandle, OutboundFrame,
        dto::websocket::{ClientMessage, InboundError, PING, PONG, ServerMessage},
        session_registry::OutboundSender,
    },
};

use super::context::ProcessContext;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Inbound(#[from] InboundError),
    #[error(transparent)]
    Room(#[from] RoomError),
}

pub struct ConnectionSession {
    ctx: Arc<ProcessContext>,
    room_id: RoomId,
    connection_id: ConnectionId,
    sender: OutboundSender,
    token: Option<SessionToken>,
}

impl ConnectionSession {
    pub fn new(ctx: Arc<ProcessContext>, room_id: RoomId, sender: OutboundSender) -> Self {
        let connection_id = ctx.registry.next_connection_id();
        tracing::debug!("{} opened for room {}", connection_id, room_id);
        Self {
            ctx,
            room_id,
            connection_id,
            sender,
            token: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Result<(), SessionError> {
        if text == PING {
            let _ = self.sender.send(OutboundFrame::Text(PONG.to_string()));
            return Ok(());
        }
        let message = ClientMessage::parse(text)?;
        self.dispatch(message).await
    }

    pub async fn dispatch(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        if let ClientMessage::Auth { token } = message {
            return self.authenticate(SessionToken::try_from(token).map_err(RoomError::from)?).await;
        }

        let Some(token) = self.token.clone() else {
            tracing::debug!("{} dropped a message before auth", self.connection_id);
            return Ok(());
        };
        let repository = &self.ctx.repository;
        match message {
            ClientMessage::SubmitValue { value } => {
                let value = SubmittedValue::try_from(value).map_err(RoomError::from)?;
                repository.submit_value(&self.room_id, &token, &value).await?;
            }
            ClientMessage::ClearValues => {
                repository.clear_values_by(&self.room_id, &token).await?;
            }
            ClientMessage::SetSpectator { is_spectator } => {
                repository.set_spectator(&self.room_id, &token, is_spectator).await?;
            }
            ClientMessage::Auth { .. } => {}
        }
        Ok(())
    }

    async fn authenticate(&mut self, token: SessionToken) -> Result<(), SessionError> {
        if let Some(previous) = self.token.take().filter(|previous| previous != &token) {
            self.ctx
                .registry
                .remove(&previous, self.connection_id)
                .await
                .map_err(RoomError::from)?;
        }

        let handle = ConnectionHandle::new(self.connection_id, self.room_id.clone(), self.sender.clone());
        self.ctx
            .registry
            .add(&token, handle)
            .await
            .map_err(RoomError::from)?;
        self.token = Some(token.clone());

        let grace_key = (self.room_id.clone(), token.clone());
        if self.ctx.grace.cancel(&grace_key) {
            tracing::info!("{} reconnected within grace period", token.short());
        }
        self.ctx.notifier.ensure_watching(&self.room_id);
        tracing::info!("{} bound to {} in room {}", self.connection_id, token.short(), self.room_id);

        self.push_current_snapshot(&token).await
    }

    async fn push_current_snapshot(&self, token: &SessionToken) -> Result<(), SessionError> {
        match self.ctx.repository.find(&self.room_id).await? {
            Some((room, _)) if room.contains(token) => {
                let message = ServerMessage::Room {
                    snapshot: RoomSnapshot::for_viewer(&room, token),
                };
                match message.to_json() {
                    Ok(frame) => {
                        let _ = self.sender.send(OutboundFrame::Text(frame));
                    }
                    Err(e) => tracing::error!("Failed to encode snapshot: {}", e),
                }
            }
            Some(_) => {
                tracing::debug!("{} is not a member of room {}", token.short(), self.room_id);
            }
            None => {
                let _ = self.sender.send(OutboundFrame::Close);
            }
        }
        Ok(())
    }

    /// Transport closed: unregister and arm the deferred leave.
    pub async fn on_close(self) {
        if let Some(token) = &self.token {
            match self.ctx.registry.remove(token, self.connection_id).await {
                Ok(true) => self.schedule_leave(token.clone()),
                Ok(false) => {
                    tracing::debug!("{} was already replaced by a newer connection", self.connection_id);
                }
                Err(e) => {
                    tracing::warn!("Failed to unregister {}: {}", self.connection_id, e);
                    self.schedule_leave(token.clone());
                }
            }
        }
        self.ctx.notifier.release(&self.room_id);
        tracing::debug!("{} closed", self.connection_id);
    }

    /// The leave is skipped when the token has meanwhile reconnected to
    /// another process, which the ownership marker reveals.
    fn schedule_leave(&self, token: SessionToken) {
        let repository = Arc::clone(&self.ctx.repository);
        let registry = Arc::clone(&self.ctx.registry);
        let room_id = self.room_id.clone();
        let key = (room_id.clone(), token.clone());
        tracing::debug!(
            "{} disconnected, leaving room {} in {:?} unless it reconnects",
            token.short(),
            room_id,
            self.ctx.grace.delay()
        );
        self.ctx.grace.schedule(key, move || async move {
            match registry.owner_of(&token).await {
                Ok(Some(owner)) if &owner != registry.instance_id() => {
                    tracing::info!("{} reconnected on instance {}, skipping leave", token.short(), owner);
                    return;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not look up owner of {}: {}", token.short(), e),
            }
            match repository.leave(Some(&room_id), &token).await {
                Ok(_) => tracing::info!("{} left room {} after disconnect", token.short(), room_id),
                Err(RoomError::RoomNotFound(_)) => {}
                Err(e) => tracing::warn!("Deferred leave of {} failed: {}", token.short(), e),
            }
        });
    }
}
