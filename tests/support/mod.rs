#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chat_sync::common::{
    Conversation, CorrelationToken, DeliveredMessage, HistoryEntry, InboundEvent, MessageId,
    OutboundEvent,
};
use chat_sync::network::{Connector, HistorySource, Link, ReconnectPolicy};
use chat_sync::session::SessionSettings;
use chat_sync::{ChatError, Result};
use tokio::sync::{Notify, mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for the session")
}

/// Waits until the watched value satisfies `predicate`.
pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, predicate: impl Fn(&T) -> bool) {
    within(async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("sender dropped before condition was met");
            }
        }
    })
    .await
}

pub fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

pub fn test_settings() -> SessionSettings {
    SessionSettings {
        display_name: Some("Alice".to_string()),
        reconnect: fast_policy(2),
        max_channel_renewals: 2,
    }
}

pub fn entry(id: &str, author: &str, text: &str) -> HistoryEntry {
    HistoryEntry {
        id: MessageId::from(id),
        author: author.to_string(),
        text: text.to_string(),
        timestamp: 1,
    }
}

pub fn delivered(id: &str, author: &str, text: &str) -> DeliveredMessage {
    DeliveredMessage {
        id: MessageId::from(id),
        author: author.to_string(),
        text: text.to_string(),
        timestamp: 2,
        correlation_token: None,
    }
}

pub fn echo(id: &str, author: &str, text: &str, token: &CorrelationToken) -> DeliveredMessage {
    DeliveredMessage {
        correlation_token: Some(token.clone()),
        ..delivered(id, author, text)
    }
}

/// Server side of one fake connection.
pub struct Remote {
    pub conversation: Conversation,
    pub outbound: mpsc::Receiver<OutboundEvent>,
    pub inbound: mpsc::Sender<InboundEvent>,
}

impl Remote {
    pub async fn next_event(&mut self) -> OutboundEvent {
        within(self.outbound.recv())
            .await
            .expect("connection closed")
    }

    pub async fn deliver(&self, message: DeliveredMessage) {
        self.inbound
            .send(InboundEvent::Delivered(message))
            .await
            .expect("client dropped the connection");
    }

    /// Resolves once the client side has released the connection.
    pub async fn closed(&mut self) {
        within(async {
            while self.outbound.recv().await.is_some() {}
        })
        .await
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    accepted: mpsc::UnboundedSender<Remote>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
    gate: Option<Arc<Notify>>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Remote>) {
        let (accepted, remotes) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                failures: Arc::new(AtomicU32::new(0)),
                attempts: Arc::new(AtomicU32::new(0)),
                gate: None,
            },
            remotes,
        )
    }

    /// Connects only after the returned `Notify` fires, once per attempt.
    pub fn gated() -> (Self, mpsc::UnboundedReceiver<Remote>, Arc<Notify>) {
        let (mut connector, remotes) = Self::new();
        let gate = Arc::new(Notify::new());
        connector.gate = Some(Arc::clone(&gate));
        (connector, remotes, gate)
    }

    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, conversation: &Conversation) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChatError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused by test",
            )));
        }

        let (link, outbound, inbound) = Link::pair();
        let remote = Remote {
            conversation: conversation.clone(),
            outbound,
            inbound,
        };
        self.accepted
            .send(remote)
            .map_err(|_| ChatError::Io(std::io::Error::other("test dropped remotes")))?;
        Ok(link)
    }
}

pub struct FakeHistory {
    entries: Vec<HistoryEntry>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    calls: Arc<AtomicU32>,
}

impl FakeHistory {
    pub fn ready(entries: Vec<HistoryEntry>) -> Self {
        Self {
            entries,
            fail: false,
            gate: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Resolves only after the returned `Notify` fires.
    pub fn gated(entries: Vec<HistoryEntry>) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let history = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::ready(entries)
        };
        (history, gate)
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ready(Vec::new())
        }
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch(&self, _conversation: &Conversation) -> Result<Vec<HistoryEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(ChatError::Fetch("history service returned 503".to_string()));
        }
        Ok(self.entries.clone())
    }
}
