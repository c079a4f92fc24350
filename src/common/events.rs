use serde::{Deserialize, Serialize};

use super::types::{ConversationId, CorrelationToken, MessageId, ParticipantId};

/// Events this client writes to the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    /// Presence announcement so the remote end can route events to us.
    Join {
        local_participant: ParticipantId,
        conversation_identity: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    Send {
        local_participant: ParticipantId,
        conversation_identity: ConversationId,
        text: String,
        correlation_token: CorrelationToken,
        timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
}

/// Events the live channel delivers to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundEvent {
    Delivered(DeliveredMessage),
}

/// A server-confirmed message. `correlation_token` is present when it echoes one of our sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    pub id: MessageId,
    pub author: ParticipantId,
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<CorrelationToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Joined,
    Closed,
}

/// Notices a live channel worker sends to its owner, tagged with the adapter epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelNotice {
    pub epoch: u64,
    pub kind: ChannelNoticeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNoticeKind {
    Delivered(DeliveredMessage),
    StateChanged(ChannelState),
    /// Reconnect attempts exhausted; the adapter is closed.
    Lost,
}
