use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ParticipantId = String;

/// Server-assigned message id, or a `local-` placeholder until reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn placeholder() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque value echoed back by the server when it confirms a local send.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(pub String);

impl CorrelationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unordered pair of participants. Both orderings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[ParticipantId; 2]", into = "[ParticipantId; 2]")]
pub struct ConversationId {
    low: ParticipantId,
    high: ParticipantId,
}

impl ConversationId {
    pub fn new(a: impl Into<ParticipantId>, b: impl Into<ParticipantId>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

impl From<[ParticipantId; 2]> for ConversationId {
    fn from([a, b]: [ParticipantId; 2]) -> Self {
        Self::new(a, b)
    }
}

impl From<ConversationId> for [ParticipantId; 2] {
    fn from(id: ConversationId) -> Self {
        [id.low, id.high]
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

/// The conversation as seen from this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub local: ParticipantId,
    pub remote: ParticipantId,
}

impl Conversation {
    pub fn new(local: impl Into<ParticipantId>, remote: impl Into<ParticipantId>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    pub fn id(&self) -> ConversationId {
        ConversationId::new(self.local.clone(), self.remote.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn of(author: &str, local: &str) -> Self {
        if author == local {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Optimistic,
    Confirmed,
}

/// One entry of the conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub author: ParticipantId,
    pub text: String,
    /// Unix milliseconds. Client clock for optimistic records, server clock once confirmed.
    pub timestamp: i64,
    pub direction: Direction,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<CorrelationToken>,
}

impl MessageRecord {
    pub fn is_optimistic(&self) -> bool {
        self.status == DeliveryStatus::Optimistic
    }
}

/// A confirmed message as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub author: ParticipantId,
    pub text: String,
    pub timestamp: i64,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_identity_ignores_participant_order() {
        let ours = Conversation::new("alice", "bob").id();
        let theirs = Conversation::new("bob", "alice").id();
        assert_eq!(ours, theirs);
        assert_eq!(serde_json::to_string(&ours).unwrap(), r#"["alice","bob"]"#);

        let parsed: ConversationId = serde_json::from_str(r#"["bob","alice"]"#).unwrap();
        assert_eq!(parsed, ours);
    }

    #[test]
    fn placeholders_are_distinct_and_marked() {
        let first = MessageId::placeholder();
        let second = MessageId::placeholder();
        assert_ne!(first, second);
        assert!(first.is_placeholder());
        assert!(!MessageId::from("64f1c0ffee").is_placeholder());
    }

    #[test]
    fn direction_follows_author() {
        assert_eq!(Direction::of("alice", "alice"), Direction::Outgoing);
        assert_eq!(Direction::of("bob", "alice"), Direction::Incoming);
    }
}
