use tokio::sync::oneshot;

use super::types::CorrelationToken;
use crate::error::Result;

/// Commands the presentation layer sends to a running chat session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Append an optimistic record and emit it on the live channel.
    Send {
        text: String,
        reply: oneshot::Sender<Result<CorrelationToken>>,
    },
    /// Re-emit a still-pending record with its original token.
    Resend {
        token: CorrelationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Withdraw a still-pending record from the timeline.
    Cancel {
        token: CorrelationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}
