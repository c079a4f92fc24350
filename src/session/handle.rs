use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::common::{
    Conversation, ConversationId, CorrelationToken, MessageRecord, SessionCommand,
};
use crate::error::{ChatError, Result};

use super::controller::SessionStatus;

/// What the view holds on to: read the timeline, send messages, observe changes.
///
/// Dropping the handle ends the session just like [`SessionHandle::close`],
/// without waiting for teardown to finish.
pub struct SessionHandle {
    conversation: Conversation,
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<Vec<MessageRecord>>,
    status: watch::Receiver<SessionStatus>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub(crate) fn new(
        conversation: Conversation,
        commands: mpsc::Sender<SessionCommand>,
        snapshot: watch::Receiver<Vec<MessageRecord>>,
        status: watch::Receiver<SessionStatus>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            conversation,
            commands,
            snapshot,
            status,
            task: Some(task),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn id(&self) -> ConversationId {
        self.conversation.id()
    }

    /// Shows `text` immediately and emits it; returns the token of the optimistic record.
    pub async fn send(&self, text: impl Into<String>) -> Result<CorrelationToken> {
        let (reply, response) = oneshot::channel();
        self.request(SessionCommand::Send {
            text: text.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub async fn resend(&self, token: CorrelationToken) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(SessionCommand::Resend { token, reply }).await?;
        response.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub async fn cancel(&self, token: CorrelationToken) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.request(SessionCommand::Cancel { token, reply }).await?;
        response.await.map_err(|_| ChatError::SessionClosed)?
    }

    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every timeline change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<MessageRecord>> {
        self.snapshot.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn status_updates(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// The session gave up on its channel and will not reconnect by itself.
    pub fn is_offline(&self) -> bool {
        self.status.borrow().offline
    }

    /// Tears the session down and waits until the channel is released.
    pub async fn close(mut self) {
        let _ = self.commands.send(SessionCommand::Close).await;
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::warn!("Session task for {} ended abnormally: {err}", self.id());
            }
        }
    }

    async fn request(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::SessionClosed)
    }
}
