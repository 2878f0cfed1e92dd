//! Room Repository 実装
//!
//! KeyValueStore の上に Room / SessionInfo の操作を実装します。
//! すべての変更は「1 回の読み取り → compare-and-swap 書き込み」で行い、
//! 競合した場合は上限回数まで読み取りからやり直します。上限に達した場合は
//! `RoomError::Busy` を返し、呼び出し側に再試行を委ねます。
//!
//! 読み取りは常に `(Room, Version)` の組を返し、条件付き書き込みはその
//! Version を必ず受け取ります。

use std::{sync::Arc, time::Duration};

use zashiki_shared::time::{Clock, timestamp_to_rfc3339};

use crate::{
    config::SyncConfig,
    domain::{
        AtomicWrite, CommitOutcome, KeyValueStore, Participant, ParticipantName, Room, RoomConfig,
        RoomError, RoomId, SessionInfo, SessionToken, SubmittedValue, Timestamp, Version,
        store::keys,
    },
};

/// Result of [`RoomRepository::leave`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The participant left; the room lives on at `version`.
    Left { room: Room, version: Version },
    /// The participant was the last one and the room was deleted.
    Deleted,
}

/// What a room mutation decided after looking at the freshly read room.
enum Plan {
    /// Nothing to write.
    Keep,
    /// Write the modified room plus the given writes in one commit.
    Write(AtomicWrite),
    /// Delete the room plus the given writes in one commit.
    Delete(AtomicWrite),
}

enum Applied {
    Unchanged(Room, Version),
    Stored(Room, Version),
    Deleted(Room),
}

impl Applied {
    fn into_stored(self) -> Result<(Room, Version), RoomError> {
        match self {
            Self::Unchanged(room, version) | Self::Stored(room, version) => Ok((room, version)),
            Self::Deleted(room) => Err(RoomError::RoomNotFound(room.id)),
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Room operations over a shared KeyValueStore.
pub struct RoomRepository {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    session_ttl: Duration,
}

impl RoomRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: &SyncConfig) -> Self {
        Self {
            store,
            clock,
            max_attempts: config.max_cas_attempts.max(1),
            session_ttl: config.session_ttl,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Read a room with the version it was read at.
    pub async fn find(&self, room_id: &RoomId) -> Result<Option<(Room, Version)>, RoomError> {
        match self.store.get(&keys::room(room_id)).await? {
            Some(entry) => Ok(Some((entry.decode()?, entry.version))),
            None => Ok(None),
        }
    }

    /// Read a session, treating expired sessions as absent.
    pub async fn find_session(&self, token: &SessionToken) -> Result<Option<SessionInfo>, RoomError> {
        let Some(entry) = self.store.get(&keys::session(token)).await? else {
            return Ok(None);
        };
        let info: SessionInfo = entry.decode()?;
        if info.is_expired(self.now(), millis(self.session_ttl)) {
            tracing::debug!("Session {} expired", token.short());
            return Ok(None);
        }
        Ok(Some(info))
    }

    async fn mutate_room<F>(&self, room_id: &RoomId, mut plan: F) -> Result<Applied, RoomError>
    where
        F: FnMut(&mut Room) -> Result<Plan, RoomError> + Send,
    {
        let key = keys::room(room_id);
        for attempt in 1..=self.max_attempts {
            let (mut room, version) = self
                .find(room_id)
                .await?
                .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;

            let step = plan(&mut room)?;
            let deleting = matches!(step, Plan::Delete(_));
            let write = match step {
                Plan::Keep => return Ok(Applied::Unchanged(room, version)),
                Plan::Write(extra) => {
                    room.touch(self.now());
                    extra.check(key.as_str(), Some(version)).set_json(key.as_str(), &room)?
                }
                Plan::Delete(extra) => extra.check(key.as_str(), Some(version)).delete(key.as_str()),
            };

            match self.store.commit(write).await? {
                CommitOutcome::Committed(_) if deleting => return Ok(Applied::Deleted(room)),
                CommitOutcome::Committed(new_version) => return Ok(Applied::Stored(room, new_version)),
                CommitOutcome::Conflict => {
                    tracing::debug!(
                        "Room {} changed concurrently (attempt {}/{})",
                        room_id,
                        attempt,
                        self.max_attempts
                    );
                }
            }
        }
        tracing::warn!("Giving up on room {} after {} attempts", room_id, self.max_attempts);
        Err(RoomError::Busy {
            room_id: room_id.clone(),
            attempts: self.max_attempts,
        })
    }

    /// Create a room whose only participant is `token`, and its SessionInfo,
    /// in one commit.
    pub async fn create(
        &self,
        token: &SessionToken,
        name: &ParticipantName,
        config: RoomConfig,
    ) -> Result<(Room, Version), RoomError> {
        let mut last_id = None;
        for _ in 0..self.max_attempts {
            let now = self.now();
            let room_id = RoomId::generate();
            let room = Room::new(
                room_id.clone(),
                Participant::new(token.clone(), name.clone()),
                config,
                now,
            );
            let info = SessionInfo::new(token.clone(), room_id.clone(), name.clone(), now);
            let room_key = keys::room(&room_id);
            let write = AtomicWrite::new()
                .check(room_key.as_str(), None)
                .set_json(room_key.as_str(), &room)?
                .set_json(keys::session(token), &info)?;

            match self.store.commit(write).await? {
                CommitOutcome::Committed(version) => {
                    tracing::info!("Room {} created by {}", room_id, token.short());
                    return Ok((room, version));
                }
                CommitOutcome::Conflict => {
                    tracing::warn!("Room id {} already taken, allocating another", room_id);
                    last_id = Some(room_id);
                }
            }
        }
        Err(RoomError::Busy {
            room_id: last_id.unwrap_or_else(RoomId::generate),
            attempts: self.max_attempts,
        })
    }

    /// Add `token` (minted when `None`) to a room and refresh its SessionInfo.
    ///
    /// Joining again with the same token does not duplicate the participant.
    pub async fn join(
        &self,
        room_id: &RoomId,
        name: &ParticipantName,
        token: Option<SessionToken>,
    ) -> Result<(Room, Version, SessionToken), RoomError> {
        let token = token.unwrap_or_else(SessionToken::generate);
        let now = self.now();

        let applied = self
            .mutate_room(room_id, |room| {
                if !room.add_participant(Participant::new(token.clone(), name.clone()))? {
                    room.rename_participant(&token, name);
                }
                let info = SessionInfo {
                    token: token.clone(),
                    current_room_id: Some(room.id.clone()),
                    name: name.clone(),
                    is_spectator: room.participant(&token).is_some_and(|p| p.is_spectator),
                    last_accessed_at: now,
                };
                Ok(Plan::Write(AtomicWrite::new().set_json(keys::session(&token), &info)?))
            })
            .await?;

        let (room, version) = applied.into_stored()?;
        tracing::info!(
            "{} joined room {} ({} participants)",
            token.short(),
            room_id,
            room.participants.len()
        );
        Ok((room, version, token))
    }

    /// Overwrite the sender's value. A token that is not a participant is a
    /// silent no-op.
    pub async fn submit_value(
        &self,
        room_id: &RoomId,
        token: &SessionToken,
        value: &SubmittedValue,
    ) -> Result<(Room, Version), RoomError> {
        self.mutate_room(room_id, |room| {
            if room.set_value(token, value.clone()) {
                Ok(Plan::Write(AtomicWrite::new()))
            } else {
                tracing::debug!("Ignoring value from non-member {} in room {}", token.short(), room_id);
                Ok(Plan::Keep)
            }
        })
        .await?
        .into_stored()
    }

    /// Reset every participant's value.
    pub async fn clear_values(&self, room_id: &RoomId) -> Result<(Room, Version), RoomError> {
        self.mutate_room(room_id, |room| {
            room.clear_values();
            Ok(Plan::Write(AtomicWrite::new()))
        })
        .await?
        .into_stored()
    }

    /// Clear every value on behalf of `token`. A requester who is not a member
    /// leaves the room unchanged.
    pub async fn clear_values_by(
        &self,
        room_id: &RoomId,
        token: &SessionToken,
    ) -> Result<(Room, Version), RoomError> {
        self.mutate_room(room_id, |room| {
            if !room.contains(token) {
                tracing::debug!("{} is not in room {}, ignoring clear", token.short(), room.id);
                return Ok(Plan::Keep);
            }
            room.clear_values();
            Ok(Plan::Write(AtomicWrite::new()))
        })
        .await?
        .into_stored()
    }

    /// Toggle spectator mode for `token`. Non-members and rooms that disallow
    /// spectators leave the room unchanged.
    pub async fn set_spectator(
        &self,
        room_id: &RoomId,
        token: &SessionToken,
        is_spectator: bool,
    ) -> Result<(Room, Version), RoomError> {
        self.mutate_room(room_id, |room| {
            if room.set_spectator(token, is_spectator) {
                Ok(Plan::Write(AtomicWrite::new()))
            } else {
                Ok(Plan::Keep)
            }
        })
        .await?
        .into_stored()
    }

    /// Remove `token` from its room.
    ///
    /// Without `room_id` the room is resolved through the token's SessionInfo.
    /// The room is deleted rather than written back empty, and the SessionInfo
    /// is deleted whatever the outcome.
    pub async fn leave(
        &self,
        room_id: Option<&RoomId>,
        token: &SessionToken,
    ) -> Result<LeaveOutcome, RoomError> {
        let room_id = match room_id {
            Some(id) => id.clone(),
            None => self
                .find_session(token)
                .await?
                .and_then(|info| info.current_room_id)
                .ok_or(RoomError::InvalidToken)?,
        };
        let session_key = keys::session(token);

        let applied = self
            .mutate_room(&room_id, |room| {
                if !room.remove_participant(token) {
                    return Ok(Plan::Keep);
                }
                let extra = AtomicWrite::new().delete(session_key.as_str());
                if room.is_empty() {
                    Ok(Plan::Delete(extra))
                } else {
                    Ok(Plan::Write(extra))
                }
            })
            .await;

        match applied {
            Ok(Applied::Stored(room, version)) => {
                tracing::info!("{} left room {}", token.short(), room_id);
                Ok(LeaveOutcome::Left { room, version })
            }
            Ok(Applied::Deleted(_)) => {
                tracing::info!("{} left room {}, room deleted", token.short(), room_id);
                Ok(LeaveOutcome::Deleted)
            }
            Ok(Applied::Unchanged(room, version)) => {
                self.delete_session(token).await?;
                Ok(LeaveOutcome::Left { room, version })
            }
            Err(RoomError::RoomNotFound(id)) => {
                self.delete_session(token).await?;
                Err(RoomError::RoomNotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<(), RoomError> {
        self.store
            .commit(AtomicWrite::new().delete(keys::session(token)))
            .await?;
        Ok(())
    }

    /// Look up a previously joined session. Pure read.
    ///
    /// A vanished room is reported as `RoomNotFound` even when the token's
    /// SessionInfo is already gone, so clients can tell "room gone" apart from
    /// "never joined".
    pub async fn rejoin(
        &self,
        room_id: &RoomId,
        token: &SessionToken,
    ) -> Result<(Room, Version, SessionInfo), RoomError> {
        let (room, version) = self
            .find(room_id)
            .await?
            .ok_or_else(|| RoomError::RoomNotFound(room_id.clone()))?;
        let info = self.find_session(token).await?.ok_or(RoomError::InvalidToken)?;
        if !room.contains(token) {
            return Err(RoomError::NotAMember(room_id.clone()));
        }
        Ok((room, version, info))
    }

    /// Delete every room untouched for longer than `threshold`, together with
    /// the sessions and socket markers of its remaining participants.
    ///
    /// Each room goes away in one version-guarded commit; a room touched while
    /// the scan runs is skipped until the next pass.
    pub async fn close_idle_rooms(&self, threshold: Duration) -> Result<Vec<RoomId>, RoomError> {
        let now = self.now();
        let threshold = millis(threshold);
        let mut closed = Vec::new();

        for entry in self.store.list(keys::ROOMS_PREFIX).await? {
            let room: Room = match entry.decode() {
                Ok(room) => room,
                Err(e) => {
                    tracing::warn!("Skipping undecodable room entry: {}", e);
                    continue;
                }
            };
            if !room.is_idle(now, threshold) {
                continue;
            }

            let mut write = AtomicWrite::new()
                .check(entry.key.as_str(), Some(entry.version))
                .delete(entry.key.as_str());
            for p in &room.participants {
                write = write
                    .delete(keys::session(&p.token))
                    .delete(keys::socket_instance(&p.token));
            }

            match self.store.commit(write).await? {
                CommitOutcome::Committed(_) => {
                    tracing::info!(
                        "Closed idle room {} ({} participants, last update {})",
                        room.id,
                        room.participants.len(),
                        timestamp_to_rfc3339(room.updated_at.value())
                    );
                    closed.push(room.id);
                }
                CommitOutcome::Conflict => {
                    tracing::debug!("Room {} changed during idle scan, skipping", room.id);
                }
            }
        }
        Ok(closed)
    }
}
