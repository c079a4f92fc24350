use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{
    ChannelNotice, ChannelNoticeKind, ChannelState, Conversation, CorrelationToken, DeliveredMessage, HistoryEntry, MessageRecord, SessionCommand, now_millis,
};
use crate::config::AppConfig;
use crate::error::{ChatError, Result};
use crate::network::{Connector, HistorySource, LiveChannel, ReconnectPolicy};
use crate::storage::ReconcilingStore;

use super::handle::SessionHandle;

const COMMAND_BUFFER: usize = 32;
const NOTICE_BUFFER: usize = 100;

/// External collaborators a session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub history: Arc<dyn HistorySource>,
    pub connector: Arc<dyn Connector>,
}

impl SessionDeps {
    pub fn new(history: impl HistorySource, connector: impl Connector) -> Self {
        Self {
            history: Arc::new(history),
            connector: Arc::new(connector),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub display_name: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub max_channel_renewals: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            display_name: config.display_name.clone(),
            reconnect: config.reconnect.clone(),
            max_channel_renewals: config.max_channel_renewals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryState {
    Loading,
    /// Number of baseline records applied.
    Loaded(usize),
    /// Fetch failed; the timeline runs on live events only.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub channel: ChannelState,
    pub history: HistoryState,
    /// Channel generation; bumps on every renewal.
    pub epoch: u64,
    /// Renewals since the channel was last joined.
    pub renewals: u32,
    /// Renewals ran out; the channel stays closed until the conversation is reopened.
    pub offline: bool,
    pub open: bool,
}

impl SessionStatus {
    fn initial() -> Self {
        Self {
            channel: ChannelState::Disconnected,
            history: HistoryState::Loading,
            epoch: 1,
            renewals: 0,
            offline: false,
            open: true,
        }
    }
}

/// History results travel on a channel private to one session, and the fetch
/// task is aborted on teardown, so a result never lands in another conversation.
type HistoryOutcome = Result<Vec<HistoryEntry>>;

enum Baseline {
    /// Live messages that arrived before the history fetch resolved, in arrival order.
    Pending(Vec<DeliveredMessage>),
    Applied,
}

/// Owns the store and the current channel for one conversation.
///
/// Everything runs on the single task spawned by [`ChatSession::spawn`], so
/// history results, channel notices and user commands mutate the store one at
/// a time.
pub struct ChatSession {
    conversation: Conversation,
    deps: SessionDeps,
    settings: SessionSettings,
    store: ReconcilingStore,
    baseline: Baseline,
    channel: LiveChannel,
    epoch: u64,
    renewals: u32,
    commands: mpsc::Receiver<SessionCommand>,
    notice_sender: mpsc::Sender<ChannelNotice>,
    notices: mpsc::Receiver<ChannelNotice>,
    history_sender: mpsc::Sender<HistoryOutcome>,
    history_outcomes: mpsc::Receiver<HistoryOutcome>,
    history_task: Option<JoinHandle<()>>,
    snapshot: watch::Sender<Vec<MessageRecord>>,
    status: watch::Sender<SessionStatus>,
}

impl ChatSession {
    /// Starts the session task and returns the handle the view talks to.
    pub fn spawn(
        conversation: Conversation,
        deps: SessionDeps,
        settings: SessionSettings,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());
        let (status_tx, status_rx) = watch::channel(SessionStatus::initial());
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let (history_tx, history_rx) = mpsc::channel(1);

        let epoch = 1;
        let channel = new_channel(&conversation, &deps, &settings, epoch, &notice_tx);
        let session = Self {
            store: ReconcilingStore::new(conversation.local.clone()),
            conversation: conversation.clone(),
            deps,
            settings,
            baseline: Baseline::Pending(Vec::new()),
            channel,
            epoch,
            renewals: 0,
            commands: command_rx,
            notice_sender: notice_tx,
            notices: notice_rx,
            history_sender: history_tx,
            history_outcomes: history_rx,
            history_task: None,
            snapshot: snapshot_tx,
            status: status_tx,
        };

        let task = tokio::spawn(session.run());
        SessionHandle::new(conversation, command_tx, snapshot_rx, status_rx, task)
    }

    async fn run(mut self) {
        log::info!("Opening conversation {}", self.conversation.id());
        self.start_history();
        self.channel.connect();
        self.sync_channel_status();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Close) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(outcome) = self.history_outcomes.recv() => self.handle_history(outcome),
                Some(notice) = self.notices.recv() => self.handle_notice(notice),
            }
        }

        self.teardown();
    }

    fn start_history(&mut self) {
        let history = Arc::clone(&self.deps.history);
        let conversation = self.conversation.clone();
        let sender = self.history_sender.clone();

        self.history_task = Some(tokio::spawn(async move {
            let outcome = history.fetch(&conversation).await;
            if sender.send(outcome).await.is_err() {
                log::debug!("History for {} resolved after teardown", conversation.id());
            }
        }));
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Send { text, reply } => {
                let result = self.send(text);
                let _ = reply.send(result);
            }
            SessionCommand::Resend { token, reply } => {
                let _ = reply.send(self.resend(&token));
            }
            SessionCommand::Cancel { token, reply } => {
                let result = self.store.cancel_optimistic(&token).map(|_| ());
                if result.is_ok() {
                    self.publish_snapshot();
                }
                let _ = reply.send(result);
            }
            SessionCommand::Close => {}
        }
    }

    fn send(&mut self, text: String) -> Result<CorrelationToken> {
        self.ensure_joined()?;

        let token = self
            .store
            .append_optimistic(text.clone(), self.conversation.local.clone())?;
        let timestamp = self
            .store
            .pending(&token)
            .map(|record| record.timestamp)
            .unwrap_or_else(now_millis);

        if let Err(err) = self.channel.send(&text, &token, timestamp) {
            let _ = self.store.cancel_optimistic(&token);
            return Err(err);
        }

        self.publish_snapshot();
        Ok(token)
    }

    fn resend(&mut self, token: &CorrelationToken) -> Result<()> {
        self.ensure_joined()?;
        let (text, timestamp) = self
            .store
            .pending(token)
            .map(|record| (record.text.clone(), record.timestamp))
            .ok_or_else(|| ChatError::UnknownToken(token.to_string()))?;
        self.channel.send(&text, token, timestamp)
    }

    fn ensure_joined(&self) -> Result<()> {
        match self.channel.state() {
            ChannelState::Joined => Ok(()),
            ChannelState::Closed => Err(ChatError::ChannelNotReady {
                retryable: self.renewals < self.settings.max_channel_renewals,
            }),
            _ => Err(ChatError::ChannelNotReady { retryable: true }),
        }
    }

    fn handle_history(&mut self, outcome: HistoryOutcome) {
        if matches!(self.baseline, Baseline::Applied) {
            log::warn!("History for {} resolved twice", self.conversation.id());
            return;
        }
        self.history_task = None;

        let (entries, failure) = match outcome {
            Ok(entries) => (entries, None),
            Err(err) => {
                log::warn!(
                    "History for {} unavailable, continuing with live messages: {err}",
                    self.conversation.id()
                );
                (Vec::new(), Some(err.to_string()))
            }
        };

        match self.store.load_baseline(entries) {
            Ok(count) => {
                let history = match failure {
                    Some(reason) => HistoryState::Unavailable(reason),
                    None => HistoryState::Loaded(count),
                };
                self.status.send_modify(|status| status.history = history);
            }
            Err(err) => log::warn!("Baseline rejected: {err}"),
        }

        if let Baseline::Pending(buffered) = std::mem::replace(&mut self.baseline, Baseline::Applied) {
            if !buffered.is_empty() {
                log::debug!("Flushing {} live messages buffered before history", buffered.len());
            }
            for message in buffered {
                self.apply_delivered(message);
            }
        }

        self.publish_snapshot();
    }

    fn handle_notice(&mut self, notice: ChannelNotice) {
        if notice.epoch != self.epoch {
            log::debug!(
                "Dropping notice from stale channel {} (current {})",
                notice.epoch,
                self.epoch
            );
            return;
        }

        match notice.kind {
            ChannelNoticeKind::Delivered(message) => {
                if let Baseline::Pending(buffered) = &mut self.baseline {
                    buffered.push(message);
                    return;
                }
                self.apply_delivered(message);
                self.publish_snapshot();
            }
            ChannelNoticeKind::StateChanged(state) => {
                if state == ChannelState::Joined && self.renewals > 0 {
                    log::info!(
                        "Channel for {} recovered after {} renewals",
                        self.conversation.id(),
                        self.renewals
                    );
                    self.renewals = 0;
                }
                let renewals = self.renewals;
                self.status.send_modify(|status| {
                    status.channel = state;
                    status.renewals = renewals;
                });
            }
            ChannelNoticeKind::Lost => self.renew_channel(),
        }
    }

    fn apply_delivered(&mut self, message: DeliveredMessage) {
        match self.store.reconcile_or_append(message) {
            Ok(applied) => log::debug!("Applied live message: {applied:?}"),
            Err(ChatError::DuplicateEvent(reason)) => {
                log::debug!("Dropping duplicate event: {reason}");
            }
            Err(err) => log::warn!("Failed to apply live message: {err}"),
        }
    }

    /// Replaces a lost adapter with a fresh one for the same conversation. The store is kept.
    fn renew_channel(&mut self) {
        if self.renewals >= self.settings.max_channel_renewals {
            log::error!(
                "{} for {} after {} renewals; staying offline",
                ChatError::ChannelLost,
                self.conversation.id(),
                self.renewals
            );
            self.channel.close();
            self.status.send_modify(|status| status.offline = true);
            self.sync_channel_status();
            return;
        }

        self.renewals += 1;
        self.epoch += 1;
        log::warn!(
            "Channel for {} lost; opening channel {} (renewal {}/{})",
            self.conversation.id(),
            self.epoch,
            self.renewals,
            self.settings.max_channel_renewals
        );

        self.channel.close();
        self.channel = new_channel(
            &self.conversation,
            &self.deps,
            &self.settings,
            self.epoch,
            &self.notice_sender,
        );
        self.channel.connect();

        let (renewals, epoch) = (self.renewals, self.epoch);
        self.status.send_modify(|status| {
            status.renewals = renewals;
            status.epoch = epoch;
        });
        self.sync_channel_status();
    }

    fn sync_channel_status(&self) {
        let state = self.channel.state();
        self.status.send_modify(|status| status.channel = state);
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(self.store.snapshot());
    }

    fn teardown(&mut self) {
        self.channel.close();
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
        self.status.send_modify(|status| {
            status.channel = ChannelState::Closed;
            status.open = false;
        });
        log::info!(
            "Closed conversation {} with {} messages",
            self.conversation.id(),
            self.store.len()
        );
    }
}

fn new_channel(
    conversation: &Conversation,
    deps: &SessionDeps,
    settings: &SessionSettings,
    epoch: u64,
    notices: &mpsc::Sender<ChannelNotice>,
) -> LiveChannel {
    let mut channel = LiveChannel::new(
        conversation.clone(),
        settings.display_name.clone(),
        epoch,
        Arc::clone(&deps.connector),
        settings.reconnect.clone(),
    );
    channel.on_message(notices.clone());
    channel
}
