//! Core data types shared by every channel.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ProtocolError;

/// Identifier assigned to a chat message by the message store.
pub type MessageId = String;

/// Stable identity of an authenticated participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a new participant ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role a participant plays.
///
/// The identity provider historically labels supervisors `doctor` and
/// monitored participants `patient`; both spellings are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Observes monitored participants and chats with them.
    #[serde(alias = "doctor")]
    Supervisor,
    /// Streams session telemetry and is observed.
    #[serde(alias = "patient")]
    Monitored,
}

impl Role {
    /// The other role in the two-role model.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Role::Supervisor => Role::Monitored,
            Role::Monitored => Role::Supervisor,
        }
    }

    /// Wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Monitored => "monitored",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UTC timestamp in fixed-width RFC 3339 form with microsecond precision,
/// e.g. `2024-03-01T09:15:02.000120Z`.
///
/// Because the width and timezone never vary, comparing two timestamps as
/// strings gives the same answer as comparing the instants they denote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

impl Timestamp {
    /// The current instant.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Format an instant.
    #[must_use]
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    /// Parse any RFC 3339 timestamp and normalise it to the fixed form.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid RFC 3339.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let instant = DateTime::parse_from_rfc3339(input)
            .map_err(|e| ProtocolError::InvalidTimestamp(format!("{input}: {e}")))?;
        Ok(Self::from_datetime(instant.with_timezone(&Utc)))
    }

    /// Get the timestamp as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> String {
        ts.0
    }
}

/// A chat message before the store has assigned it an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub sender_id: ParticipantId,
    pub recipient_id: ParticipantId,
    pub content: String,
    pub sender_role: Role,
    pub recipient_role: Role,
    pub created_at: Timestamp,
}

impl NewChatMessage {
    /// Attach a store-assigned identifier.
    #[must_use]
    pub fn into_stored(self, id: impl Into<MessageId>) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            content: self.content,
            sender_role: self.sender_role,
            recipient_role: self.recipient_role,
            created_at: self.created_at,
        }
    }
}

/// A persisted, immutable chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: ParticipantId,
    pub recipient_id: ParticipantId,
    pub content: String,
    pub sender_role: Role,
    pub recipient_role: Role,
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Whether this message was exchanged between `a` and `b`, in either
    /// direction.
    #[must_use]
    pub fn is_between(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        (&self.sender_id == a && &self.recipient_id == b)
            || (&self.sender_id == b && &self.recipient_id == a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_role_aliases() {
        let doctor: Role = serde_json::from_str("\"doctor\"").unwrap();
        let patient: Role = serde_json::from_str("\"patient\"").unwrap();
        assert_eq!(doctor, Role::Supervisor);
        assert_eq!(patient, Role::Monitored);
        assert_eq!(serde_json::to_string(&Role::Supervisor).unwrap(), "\"supervisor\"");
        assert_eq!(Role::Monitored.opposite(), Role::Supervisor);
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let whole = Timestamp::from_datetime(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        assert_eq!(whole.as_str(), "2024-03-01T09:00:00.000000Z");
        assert_eq!(whole.as_str().len(), Timestamp::now().as_str().len());
    }

    #[test]
    fn test_timestamp_string_order_is_chronological() {
        // Raw, "10:00:00Z" sorts after "10:00:00.5Z" because 'Z' > '.'.
        let a = Timestamp::parse("2024-03-01T10:00:00Z").unwrap();
        let b = Timestamp::parse("2024-03-01T10:00:00.5Z").unwrap();
        let c = Timestamp::parse("2024-03-01T11:00:00+01:00").unwrap();

        assert!(a < b);
        assert_eq!(a, c);
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_err());
        assert!(serde_json::from_str::<Timestamp>("\"not a time\"").is_err());
    }

    #[test]
    fn test_chat_message_is_between() {
        let msg = NewChatMessage {
            sender_id: "a".into(),
            recipient_id: "b".into(),
            content: "hi".into(),
            sender_role: Role::Supervisor,
            recipient_role: Role::Monitored,
            created_at: Timestamp::now(),
        }
        .into_stored("m-1");

        assert!(msg.is_between(&"a".into(), &"b".into()));
        assert!(msg.is_between(&"b".into(), &"a".into()));
        assert!(!msg.is_between(&"a".into(), &"c".into()));
    }
}
