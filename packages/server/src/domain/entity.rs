//! Entities: Room aggregate, Participant and SessionInfo.
//!
//! Room と SessionInfo はストアが所有します。ここにあるのは読み出したコピーに対する
//! 純粋な変更ロジックだけで、永続化は RoomRepository が compare-and-swap で行います。

use serde::{Deserialize, Serialize};

use super::{
    error::RoomError,
    value_object::{ParticipantName, RoomId, SessionToken, SubmittedValue, Timestamp},
};

/// Default number of participants a room accepts.
pub const DEFAULT_MAX_PARTICIPANTS: usize = 50;

/// One joined identity within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub token: SessionToken,
    pub name: ParticipantName,
    pub value: SubmittedValue,
    #[serde(default)]
    pub is_spectator: bool,
}

impl Participant {
    pub fn new(token: SessionToken, name: ParticipantName) -> Self {
        Self {
            token,
            name,
            value: SubmittedValue::empty(),
            is_spectator: false,
        }
    }
}

/// Per-room settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub allow_spectators: bool,
    pub max_participants: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            allow_spectators: true,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
        }
    }
}

/// The shared session aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub participants: Vec<Participant>,
    pub config: RoomConfig,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Room {
    /// Create a room holding its creator as the only participant.
    pub fn new(id: RoomId, creator: Participant, config: RoomConfig, now: Timestamp) -> Self {
        Self {
            id,
            participants: vec![creator],
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Position of `token` in the participant list (its member number).
    pub fn position_of(&self, token: &SessionToken) -> Option<usize> {
        self.participants.iter().position(|p| &p.token == token)
    }

    pub fn participant(&self, token: &SessionToken) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.token == token)
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.position_of(token).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Append a participant unless its token is already present.
    ///
    /// Returns `Ok(false)` when the token was already a member.
    pub fn add_participant(&mut self, participant: Participant) -> Result<bool, RoomError> {
        if self.contains(&participant.token) {
            return Ok(false);
        }
        if self.participants.len() >= self.config.max_participants {
            return Err(RoomError::RoomFull {
                room_id: self.id.clone(),
                max: self.config.max_participants,
            });
        }
        self.participants.push(participant);
        Ok(true)
    }

    /// Rename an existing participant. Returns whether anything changed.
    pub fn rename_participant(&mut self, token: &SessionToken, name: &ParticipantName) -> bool {
        match self.participants.iter_mut().find(|p| &p.token == token) {
            Some(p) if &p.name != name => {
                p.name = name.clone();
                true
            }
            _ => false,
        }
    }

    /// Remove a participant. Returns whether it was present.
    pub fn remove_participant(&mut self, token: &SessionToken) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| &p.token != token);
        before != self.participants.len()
    }

    /// Overwrite the value of one participant. Returns whether it was present.
    pub fn set_value(&mut self, token: &SessionToken, value: SubmittedValue) -> bool {
        match self.participants.iter_mut().find(|p| &p.token == token) {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    /// Reset every participant's value, including those who never submitted.
    pub fn clear_values(&mut self) {
        for p in &mut self.participants {
            p.value = SubmittedValue::empty();
        }
    }

    /// Toggle spectator mode for one participant.
    ///
    /// Returns whether it was applied; rooms that disallow spectators only
    /// accept switching back to a regular participant.
    pub fn set_spectator(&mut self, token: &SessionToken, is_spectator: bool) -> bool {
        if is_spectator && !self.config.allow_spectators {
            return false;
        }
        match self.participants.iter_mut().find(|p| &p.token == token) {
            Some(p) => {
                p.is_spectator = is_spectator;
                true
            }
            None => false,
        }
    }

    /// Record a mutation. `updated_at` never goes backwards and always moves.
    pub fn touch(&mut self, now: Timestamp) {
        let next = now.value().max(self.updated_at.value() + 1);
        self.updated_at = Timestamp::new(next);
    }

    /// Whether the room has not been mutated for longer than `threshold_millis`.
    pub fn is_idle(&self, now: Timestamp, threshold_millis: i64) -> bool {
        now.value() - self.updated_at.value() > threshold_millis
    }
}

/// Secondary index: which room a token was last in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub token: SessionToken,
    pub current_room_id: Option<RoomId>,
    pub name: ParticipantName,
    pub is_spectator: bool,
    pub last_accessed_at: Timestamp,
}

impl SessionInfo {
    pub fn new(token: SessionToken, room_id: RoomId, name: ParticipantName, now: Timestamp) -> Self {
        Self {
            token,
            current_room_id: Some(room_id),
            name,
            is_spectator: false,
            last_accessed_at: now,
        }
    }

    /// Whether the session outlived its TTL.
    pub fn is_expired(&self, now: Timestamp, ttl_millis: i64) -> bool {
        now.value() - self.last_accessed_at.value() > ttl_millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> SessionToken {
        SessionToken::try_from(s.to_string()).unwrap()
    }

    fn name(s: &str) -> ParticipantName {
        ParticipantName::try_from(s.to_string()).unwrap()
    }

    fn room_with(tokens: &[&str], config: RoomConfig) -> Room {
        let mut room = Room::new(
            RoomId::generate(),
            Participant::new(token(tokens[0]), name(tokens[0])),
            config,
            Timestamp::new(1000),
        );
        for t in &tokens[1..] {
            room.add_participant(Participant::new(token(t), name(t))).unwrap();
        }
        room
    }

    #[test]
    fn test_add_participant_is_idempotent_per_token() {
        // テスト項目: 同じトークンで再度追加しても参加者は重複しない
        // given (前提条件):
        let mut room = room_with(&["alice"], RoomConfig::default());

        // when (操作):
        let first = room.add_participant(Participant::new(token("bob"), name("bob")));
        let again = room.add_participant(Participant::new(token("bob"), name("bobby")));

        // then (期待する結果):
        assert!(first.unwrap());
        assert!(!again.unwrap());
        assert_eq!(room.participants.len(), 2);
        assert_eq!(room.position_of(&token("bob")), Some(1));
    }

    #[test]
    fn test_add_participant_rejects_when_full() {
        // テスト項目: 定員に達した Room には新しい参加者を追加できない
        // given (前提条件):
        let config = RoomConfig {
            allow_spectators: true,
            max_participants: 2,
        };
        let mut room = room_with(&["alice", "bob"], config);

        // when (操作):
        let result = room.add_participant(Participant::new(token("carol"), name("carol")));

        // then (期待する結果):
        assert!(matches!(result, Err(RoomError::RoomFull { max: 2, .. })));
        assert_eq!(room.participants.len(), 2);
    }

    #[test]
    fn test_clear_values_resets_everyone() {
        // テスト項目: clear_values で未提出の参加者も含め全員の値が空になる
        // given (前提条件):
        let mut room = room_with(&["alice", "bob", "carol"], RoomConfig::default());
        room.set_value(&token("alice"), SubmittedValue::try_from("5".to_string()).unwrap());
        room.set_value(&token("bob"), SubmittedValue::try_from("8".to_string()).unwrap());

        // when (操作):
        room.clear_values();

        // then (期待する結果):
        assert!(room.participants.iter().all(|p| p.value.is_empty()));
    }

    #[test]
    fn test_set_value_for_unknown_token_is_noop() {
        // テスト項目: 参加者でないトークンの値設定は何も変更しない
        // given (前提条件):
        let mut room = room_with(&["alice"], RoomConfig::default());
        let before = room.clone();

        // when (操作):
        let applied = room.set_value(&token("ghost"), SubmittedValue::try_from("1".to_string()).unwrap());

        // then (期待する結果):
        assert!(!applied);
        assert_eq!(room, before);
    }

    #[test]
    fn test_set_spectator_respects_config() {
        // テスト項目: allow_spectators が false の場合は観戦者に切り替えられない
        // given (前提条件):
        let config = RoomConfig {
            allow_spectators: false,
            max_participants: 10,
        };
        let mut room = room_with(&["alice"], config);

        // when (操作):
        let to_spectator = room.set_spectator(&token("alice"), true);
        let to_player = room.set_spectator(&token("alice"), false);

        // then (期待する結果):
        assert!(!to_spectator);
        assert!(to_player);
        assert!(!room.participants[0].is_spectator);
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        // テスト項目: touch は時計が進まなくても updated_at を必ず進める
        // given (前提条件):
        let mut room = room_with(&["alice"], RoomConfig::default());

        // when (操作):
        room.touch(Timestamp::new(1000));
        let first = room.updated_at;
        room.touch(Timestamp::new(500));
        let second = room.updated_at;
        room.touch(Timestamp::new(5000));

        // then (期待する結果):
        assert_eq!(first, Timestamp::new(1001));
        assert_eq!(second, Timestamp::new(1002));
        assert_eq!(room.updated_at, Timestamp::new(5000));
    }

    #[test]
    fn test_room_json_uses_camel_case() {
        // テスト項目: 永続化される Room の JSON は camelCase のフィールド名を持つ
        // given (前提条件):
        let room = room_with(&["alice"], RoomConfig::default());

        // when (操作):
        let json = serde_json::to_value(&room).unwrap();

        // then (期待する結果):
        assert_eq!(json["config"]["allowSpectators"], true);
        assert_eq!(json["config"]["maxParticipants"], 50);
        assert_eq!(json["participants"][0]["isSpectator"], false);
        assert_eq!(json["participants"][0]["value"], "");
        assert_eq!(json["createdAt"], 1000);
    }
}
