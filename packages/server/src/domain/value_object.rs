//! Value objects.
//!
//! 値オブジェクトは生成時に検証を行い、以降は不変として扱います。
//! ストアから読み戻した値は検証済みとみなし、serde では素通しします。

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ValueObjectError;

/// Maximum length of a participant name (in characters, after sanitizing).
pub const MAX_NAME_CHARS: usize = 24;
/// Maximum length of a submitted value (in characters, after sanitizing).
pub const MAX_VALUE_CHARS: usize = 256;
/// Maximum length of a room id accepted from the outside.
pub const MAX_ROOM_ID_CHARS: usize = 64;

/// Remove characters that would be unsafe to echo back into markup.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect()
}

/// Room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Allocate a fresh, random room id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::EmptyRoomId);
        }
        if value.chars().count() > MAX_ROOM_ID_CHARS {
            return Err(ValueObjectError::RoomIdTooLong(MAX_ROOM_ID_CHARS));
        }
        Ok(Self(value))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque bearer credential identifying a participant across reconnects.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a new, unguessable token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix suitable for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(6)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl TryFrom<String> for SessionToken {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(ValueObjectError::EmptyToken);
        }
        Ok(Self(value))
    }
}

// Tokens are credentials: keep them out of Debug output.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.short())
    }
}

/// Display name of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantName(String);

impl ParticipantName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ParticipantName {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let sanitized = sanitize(value.trim());
        if sanitized.is_empty() {
            return Err(ValueObjectError::EmptyName);
        }
        if sanitized.chars().count() > MAX_NAME_CHARS {
            return Err(ValueObjectError::NameTooLong(MAX_NAME_CHARS));
        }
        Ok(Self(sanitized))
    }
}

/// A participant's private submission. Empty means "no submission yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmittedValue(String);

impl SubmittedValue {
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubmittedValue {
    type Error = ValueObjectError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let sanitized = sanitize(&value);
        if sanitized.chars().count() > MAX_VALUE_CHARS {
            return Err(ValueObjectError::ValueTooLong(MAX_VALUE_CHARS));
        }
        Ok(Self(sanitized))
    }
}

/// Unix timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Self(millis)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Opaque store version of a key, strictly increasing per commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Process-local identifier of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of one running server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_name_is_trimmed_and_sanitized() {
        // テスト項目: 名前は前後の空白が除去され、危険な文字が取り除かれる
        // given (前提条件):
        let raw = "  <Alice> & 'Bob'  ".to_string();

        // when (操作):
        let name = ParticipantName::try_from(raw).unwrap();

        // then (期待する結果):
        assert_eq!(name.as_str(), "Alice  Bob");
    }

    #[test]
    fn test_participant_name_rejects_empty_and_too_long() {
        // テスト項目: 空の名前と長すぎる名前は拒否される
        // given (前提条件):
        let empty = "   ".to_string();
        let only_markup = "<>".to_string();
        let too_long = "a".repeat(MAX_NAME_CHARS + 1);

        // when (操作):
        let results = (
            ParticipantName::try_from(empty),
            ParticipantName::try_from(only_markup),
            ParticipantName::try_from(too_long),
        );

        // then (期待する結果):
        assert_eq!(results.0, Err(ValueObjectError::EmptyName));
        assert_eq!(results.1, Err(ValueObjectError::EmptyName));
        assert_eq!(results.2, Err(ValueObjectError::NameTooLong(MAX_NAME_CHARS)));
    }

    #[test]
    fn test_submitted_value_allows_empty_but_limits_length() {
        // テスト項目: 提出値は空を許容し、上限を超えると拒否される
        // given (前提条件):
        let ok_max = "9".repeat(MAX_VALUE_CHARS);
        let too_long = "9".repeat(MAX_VALUE_CHARS + 1);

        // when (操作):
        let empty = SubmittedValue::try_from(String::new()).unwrap();
        let max = SubmittedValue::try_from(ok_max);
        let over = SubmittedValue::try_from(too_long);

        // then (期待する結果):
        assert!(empty.is_empty());
        assert!(max.is_ok());
        assert_eq!(over, Err(ValueObjectError::ValueTooLong(MAX_VALUE_CHARS)));
    }

    #[test]
    fn test_room_id_validation() {
        // テスト項目: RoomId は空文字と長すぎる値を拒否する
        // given (前提条件):
        let generated = RoomId::generate();

        // when (操作):
        let empty = RoomId::try_from(String::new());
        let too_long = RoomId::try_from("x".repeat(MAX_ROOM_ID_CHARS + 1));
        let parsed = RoomId::try_from(generated.as_str().to_string());

        // then (期待する結果):
        assert_eq!(empty, Err(ValueObjectError::EmptyRoomId));
        assert_eq!(too_long, Err(ValueObjectError::RoomIdTooLong(MAX_ROOM_ID_CHARS)));
        assert_eq!(parsed, Ok(generated));
    }

    #[test]
    fn test_session_token_debug_does_not_leak_full_token() {
        // テスト項目: SessionToken の Debug 出力にトークン全体が含まれない
        // given (前提条件):
        let token = SessionToken::try_from("abcdef-0123456789".to_string()).unwrap();

        // when (操作):
        let debug = format!("{token:?}");

        // then (期待する結果):
        assert!(debug.contains("abcdef"));
        assert!(!debug.contains("0123456789"));
    }
}
