pub mod commands;
pub mod events;
pub mod types;

pub use commands::SessionCommand;
pub use events::{
    ChannelNotice, ChannelNoticeKind, ChannelState, DeliveredMessage, InboundEvent, OutboundEvent,
};
pub use types::{
    Conversation, ConversationId, CorrelationToken, DeliveryStatus, Direction, HistoryEntry,
    MessageId, MessageRecord, ParticipantId, now_millis,
};
