use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{
    ChannelNotice, ChannelNoticeKind, ChannelState, Conversation, CorrelationToken, InboundEvent,
    OutboundEvent,
};
use crate::error::{ChatError, Result};

use super::transport::{Connector, Link};

const COMMAND_BUFFER: usize = 100;

/// Bounded retry schedule used for the first connect and after an unexpected drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry` (0-based), doubling up to the cap.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Handle to the persistent channel of one conversation.
///
/// The connection itself is owned by a spawned worker; this handle only
/// forwards sends and observes state. Dropping it releases the connection.
pub struct LiveChannel {
    conversation: Conversation,
    display_name: Option<String>,
    epoch: u64,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    sink: Option<mpsc::Sender<ChannelNotice>>,
    outbound: Option<mpsc::Sender<OutboundEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl LiveChannel {
    pub fn new(
        conversation: Conversation,
        display_name: Option<String>,
        epoch: u64,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            conversation,
            display_name,
            epoch,
            connector,
            policy,
            state: Arc::new(state),
            sink: None,
            outbound: None,
            worker: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Registers where inbound messages and state notices go. Must precede `connect`.
    pub fn on_message(&mut self, sink: mpsc::Sender<ChannelNotice>) {
        if self.worker.is_some() {
            log::warn!("Message handler registered after connect; it will not be used");
        }
        self.sink = Some(sink);
    }

    /// Starts connecting in the background. Only the first call has an effect.
    pub fn connect(&mut self) {
        if self.state() != ChannelState::Disconnected {
            log::debug!(
                "Ignoring connect for channel {} in state {:?}",
                self.epoch,
                self.state()
            );
            return;
        }
        if self.sink.is_none() {
            log::warn!("Channel {} connecting without a message handler", self.epoch);
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = ChannelWorker {
            conversation: self.conversation.clone(),
            display_name: self.display_name.clone(),
            epoch: self.epoch,
            connector: Arc::clone(&self.connector),
            policy: self.policy.clone(),
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
            commands: command_rx,
        };

        self.state.send_replace(ChannelState::Connecting);
        self.outbound = Some(command_tx);
        self.worker = Some(tokio::spawn(worker.run()));
    }

    /// Queues an outbound message without waiting for acknowledgment.
    pub fn send(&self, text: &str, token: &CorrelationToken, timestamp: i64) -> Result<()> {
        match self.state() {
            ChannelState::Joined => {}
            ChannelState::Closed => return Err(ChatError::ChannelNotReady { retryable: false }),
            _ => return Err(ChatError::ChannelNotReady { retryable: true }),
        }

        let outbound = self
            .outbound
            .as_ref()
            .ok_or(ChatError::ChannelNotReady { retryable: true })?;
        let event = OutboundEvent::Send {
            local_participant: self.conversation.local.clone(),
            conversation_identity: self.conversation.id(),
            text: text.to_string(),
            correlation_token: token.clone(),
            timestamp,
            display_name: self.display_name.clone(),
        };

        outbound.try_send(event).map_err(|err| {
            log::warn!("Channel {} rejected send: {err}", self.epoch);
            ChatError::ChannelNotReady { retryable: true }
        })
    }

    /// Releases the channel. Safe in every state and safe to repeat.
    pub fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.outbound = None;
        let previous = self.state.send_replace(ChannelState::Closed);
        if previous != ChannelState::Closed {
            log::info!(
                "Closed channel {} for {} (was {:?})",
                self.epoch,
                self.conversation.id(),
                previous
            );
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

struct ChannelWorker {
    conversation: Conversation,
    display_name: Option<String>,
    epoch: u64,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    sink: Option<mpsc::Sender<ChannelNotice>>,
    commands: mpsc::Receiver<OutboundEvent>,
}

impl ChannelWorker {
    async fn run(mut self) {
        let Some(mut link) = self.establish().await else {
            self.give_up().await;
            return;
        };

        // A send the dropped connection refused; replayed on the next one.
        let mut unsent: Option<OutboundEvent> = None;

        loop {
            let dropped = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(event) => match link.outbound.send(event).await {
                        Ok(()) => false,
                        Err(err) => {
                            unsent = Some(err.0);
                            true
                        }
                    },
                    None => break,
                },
                inbound = link.inbound.recv() => match inbound {
                    Some(InboundEvent::Delivered(message)) => {
                        self.notify(ChannelNoticeKind::Delivered(message)).await;
                        false
                    }
                    None => true,
                },
            };

            if !dropped {
                continue;
            }
            log::warn!(
                "Channel {} for {} dropped; reconnecting",
                self.epoch,
                self.conversation.id()
            );
            link = match self.establish().await {
                Some(fresh) => fresh,
                None => {
                    if let Some(event) = unsent.take() {
                        report_unsent(&event);
                    }
                    self.give_up().await;
                    return;
                }
            };
            if let Some(event) = unsent.take() {
                if let Err(err) = link.outbound.send(event).await {
                    report_unsent(&err.0);
                }
            }
        }

        log::debug!("Channel {} worker stopped", self.epoch);
    }

    /// Connects and announces presence, retrying with backoff.
    async fn establish(&self) -> Option<Link> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
            }
            self.set_state(ChannelState::Connecting).await;

            let link = match self.connector.connect(&self.conversation).await {
                Ok(link) => link,
                Err(err) => {
                    log::warn!(
                        "Connect attempt {}/{} for {} failed: {err}",
                        attempt + 1,
                        attempts,
                        self.conversation.id()
                    );
                    continue;
                }
            };

            let join = OutboundEvent::Join {
                local_participant: self.conversation.local.clone(),
                conversation_identity: self.conversation.id(),
                display_name: self.display_name.clone(),
            };
            if link.outbound.send(join).await.is_err() {
                log::warn!("Connection for {} closed before join", self.conversation.id());
                continue;
            }

            self.set_state(ChannelState::Joined).await;
            log::info!(
                "Joined conversation {} on channel {}",
                self.conversation.id(),
                self.epoch
            );
            return Some(link);
        }
        None
    }

    async fn give_up(&mut self) {
        log::error!(
            "Channel {} for {} lost after {} attempts",
            self.epoch,
            self.conversation.id(),
            self.policy.max_attempts.max(1)
        );
        self.set_state(ChannelState::Closed).await;
        self.commands.close();
        while let Ok(event) = self.commands.try_recv() {
            report_unsent(&event);
        }
        self.notify(ChannelNoticeKind::Lost).await;
    }

    /// Closed is terminal; a late worker update never reopens it.
    async fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == ChannelState::Closed || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            self.notify(ChannelNoticeKind::StateChanged(next)).await;
        }
    }

    async fn notify(&self, kind: ChannelNoticeKind) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let notice = ChannelNotice {
            epoch: self.epoch,
            kind,
        };
        if let Err(err) = sink.send(notice).await {
            log::debug!("Channel {} notice dropped: {err}", self.epoch);
        }
    }
}

/// The matching optimistic record stays pending; resending its token retries it.
fn report_unsent(event: &OutboundEvent) {
    if let OutboundEvent::Send {
        correlation_token, ..
    } = event
    {
        log::warn!("Send {correlation_token} was not delivered before the channel dropped");
    }
}
