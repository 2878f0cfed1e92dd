//! Client-facing projection of a Room.
//!
//! Tokens never leave the server: each participant is identified by its
//! position (`memberNumber`) and `isSelf` is computed for the viewer.

use serde::{Deserialize, Serialize};

use super::{
    entity::{Room, RoomConfig},
    value_object::{RoomId, SessionToken, Timestamp},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSnapshot {
    pub name: String,
    pub member_number: usize,
    pub is_self: bool,
    pub value: String,
    pub is_spectator: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub participants: Vec<ParticipantSnapshot>,
    pub config: RoomConfig,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RoomSnapshot {
    /// Project `room` as seen by `viewer`.
    pub fn for_viewer(room: &Room, viewer: &SessionToken) -> Self {
        Self {
            id: room.id.clone(),
            participants: room
                .participants
                .iter()
                .enumerate()
                .map(|(i, p)| ParticipantSnapshot {
                    name: p.name.as_str().to_string(),
                    member_number: i,
                    is_self: &p.token == viewer,
                    value: p.value.as_str().to_string(),
                    is_spectator: p.is_spectator,
                })
                .collect(),
            config: room.config,
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }

    /// The viewer's own member number, if the viewer is in the room.
    pub fn self_member_number(&self) -> Option<usize> {
        self.participants
            .iter()
            .find(|p| p.is_self)
            .map(|p| p.member_number)
    }

    /// True once every non-spectator has submitted a value.
    pub fn everyone_submitted(&self) -> bool {
        let mut voters = self.participants.iter().filter(|p| !p.is_spectator).peekable();
        voters.peek().is_some() && voters.all(|p| !p.value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        entity::Participant,
        value_object::{ParticipantName, SubmittedValue},
    };

    fn token(s: &str) -> SessionToken {
        SessionToken::try_from(s.to_string()).unwrap()
    }

    fn participant(t: &str, value: &str, is_spectator: bool) -> Participant {
        Participant {
            token: token(t),
            name: ParticipantName::try_from(t.to_string()).unwrap(),
            value: SubmittedValue::try_from(value.to_string()).unwrap(),
            is_spectator,
        }
    }

    fn room(participants: Vec<Participant>) -> Room {
        Room {
            id: RoomId::try_from("room-1".to_string()).unwrap(),
            participants,
            config: RoomConfig::default(),
            created_at: Timestamp::new(1),
            updated_at: Timestamp::new(2),
        }
    }

    #[test]
    fn test_snapshot_strips_tokens_and_marks_viewer() {
        // テスト項目: スナップショットにはトークンが含まれず、閲覧者のみ isSelf になる
        // given (前提条件):
        let room = room(vec![participant("alice", "", false), participant("bob", "3", false)]);

        // when (操作):
        let snapshot = RoomSnapshot::for_viewer(&room, &token("bob"));
        let json = serde_json::to_string(&snapshot).unwrap();

        // then (期待する結果):
        assert!(!json.contains("token"));
        assert_eq!(snapshot.participants[0].member_number, 0);
        assert!(!snapshot.participants[0].is_self);
        assert!(snapshot.participants[1].is_self);
        assert_eq!(snapshot.self_member_number(), Some(1));
        assert!(json.contains("\"memberNumber\":1"));
    }

    #[test]
    fn test_everyone_submitted_ignores_spectators() {
        // テスト項目: 観戦者は「全員提出済み」の判定から除外される
        // given (前提条件):
        let room = room(vec![
            participant("alice", "5", false),
            participant("bob", "8", false),
            participant("carol", "", true),
        ]);

        // when (操作):
        let snapshot = RoomSnapshot::for_viewer(&room, &token("alice"));

        // then (期待する結果):
        assert!(snapshot.everyone_submitted());
    }

    #[test]
    fn test_everyone_submitted_false_when_pending_or_no_voters() {
        // テスト項目: 未提出者がいる場合や投票者がいない場合は false
        // given (前提条件):
        let pending = room(vec![participant("alice", "5", false), participant("bob", "", false)]);
        let spectators_only = room(vec![participant("carol", "", true)]);

        // when (操作):
        let pending = RoomSnapshot::for_viewer(&pending, &token("alice"));
        let spectators_only = RoomSnapshot::for_viewer(&spectators_only, &token("carol"));

        // then (期待する結果):
        assert!(!pending.everyone_submitted());
        assert!(!spectators_only.everyone_submitted());
    }
}
