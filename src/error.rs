/// Error types for the chat synchronization core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// History could not be fetched; the timeline degrades to an empty baseline.
    #[error("History unavailable: {0}")]
    Fetch(String),

    /// The live channel is not joined. `retryable` is false once the channel is closed for good.
    #[error("Channel not ready (retryable: {retryable})")]
    ChannelNotReady { retryable: bool },

    #[error("Channel lost after exhausting reconnect attempts")]
    ChannelLost,

    /// Replayed or already reconciled event. Logged, never shown to the user.
    #[error("Duplicate event: {0}")]
    DuplicateEvent(String),

    #[error("Baseline already loaded for this conversation")]
    BaselineAlreadyLoaded,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("No pending message for token {0}")]
    UnknownToken(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Fetch(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
