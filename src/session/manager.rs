use crate::common::{Conversation, ParticipantId};

use super::controller::{ChatSession, SessionDeps, SessionSettings};
use super::handle::SessionHandle;

/// Keeps exactly one session alive: the one for the conversation on screen.
pub struct ConversationManager {
    local: ParticipantId,
    deps: SessionDeps,
    settings: SessionSettings,
    current: Option<SessionHandle>,
}

impl ConversationManager {
    pub fn new(local: impl Into<ParticipantId>, deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            local: local.into(),
            deps,
            settings,
            current: None,
        }
    }

    /// Opens the conversation with `remote`, closing any other one first.
    /// Entering the conversation that is already open keeps its session,
    /// unless that session has gone offline; then it is replaced.
    pub async fn enter(&mut self, remote: impl Into<ParticipantId>) -> &SessionHandle {
        let conversation = Conversation::new(self.local.clone(), remote);

        let session = match self.current.take() {
            Some(current)
                if current.id() == conversation.id()
                    && !current.is_closed()
                    && !current.is_offline() =>
            {
                current
            }
            previous => {
                if let Some(previous) = previous {
                    if previous.is_offline() {
                        log::info!("Reopening offline conversation {}", previous.id());
                    } else {
                        log::info!("Leaving conversation {}", previous.id());
                    }
                    previous.close().await;
                }
                ChatSession::spawn(conversation, self.deps.clone(), self.settings.clone())
            }
        };

        self.current.insert(session)
    }

    pub fn current(&self) -> Option<&SessionHandle> {
        self.current.as_ref()
    }

    /// Closes the open conversation, if any.
    pub async fn exit(&mut self) {
        if let Some(current) = self.current.take() {
            current.close().await;
        }
    }
}
