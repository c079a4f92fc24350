use std::collections::{HashMap, HashSet};

use crate::common::{
    CorrelationToken, DeliveredMessage, DeliveryStatus, Direction, HistoryEntry, MessageId,
    MessageRecord, ParticipantId, now_millis,
};
use crate::error::{ChatError, Result};

/// How an inbound confirmed message landed in the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// An optimistic record at `position` was swapped for its confirmed copy.
    Replaced { position: usize },
    Appended { position: usize },
    /// The confirmed copy was already present (from history), so the optimistic
    /// record that used to sit at `position` was withdrawn.
    Superseded { position: usize },
}

/// Ordered, deduplicated message list for one conversation.
///
/// Display order is insertion order: the baseline first, then optimistic and
/// live records in arrival order. Nothing is ever re-sorted by timestamp.
#[derive(Debug)]
pub struct ReconcilingStore {
    local_participant: ParticipantId,
    records: Vec<MessageRecord>,
    ids: HashSet<MessageId>,
    /// token -> placeholder id of the optimistic record awaiting confirmation
    pending: HashMap<CorrelationToken, MessageId>,
    settled: HashSet<CorrelationToken>,
    baseline_loaded: bool,
}

impl ReconcilingStore {
    pub fn new(local_participant: impl Into<ParticipantId>) -> Self {
        Self {
            local_participant: local_participant.into(),
            records: Vec::new(),
            ids: HashSet::new(),
            pending: HashMap::new(),
            settled: HashSet::new(),
            baseline_loaded: false,
        }
    }

    /// Places the fetched history ahead of anything sent while the fetch was in
    /// flight. Returns the number of records added.
    pub fn load_baseline(&mut self, entries: Vec<HistoryEntry>) -> Result<usize> {
        if self.baseline_loaded {
            return Err(ChatError::BaselineAlreadyLoaded);
        }
        self.baseline_loaded = true;

        let mut baseline = Vec::with_capacity(entries.len());
        for entry in entries {
            if !self.ids.insert(entry.id.clone()) {
                log::debug!("Skipping repeated history entry {}", entry.id);
                continue;
            }
            baseline.push(MessageRecord {
                direction: Direction::of(&entry.author, &self.local_participant),
                id: entry.id,
                author: entry.author,
                text: entry.text,
                timestamp: entry.timestamp,
                status: DeliveryStatus::Confirmed,
                correlation_token: None,
            });
        }

        let count = baseline.len();
        self.records.splice(0..0, baseline);
        Ok(count)
    }

    pub fn append_optimistic(
        &mut self,
        text: impl Into<String>,
        author: impl Into<ParticipantId>,
    ) -> Result<CorrelationToken> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let author = author.into();
        let token = CorrelationToken::generate();
        let id = MessageId::placeholder();
        self.ids.insert(id.clone());
        self.pending.insert(token.clone(), id.clone());
        self.records.push(MessageRecord {
            id,
            direction: Direction::of(&author, &self.local_participant),
            author,
            text,
            timestamp: now_millis(),
            status: DeliveryStatus::Optimistic,
            correlation_token: Some(token.clone()),
        });
        Ok(token)
    }

    /// Folds a confirmed message into the timeline.
    ///
    /// Fails with [`ChatError::DuplicateEvent`] when the token was already
    /// reconciled or the id is already present; callers log and drop those.
    pub fn reconcile_or_append(&mut self, incoming: DeliveredMessage) -> Result<Applied> {
        if let Some(token) = incoming.correlation_token.as_ref() {
            if self.settled.contains(token) {
                return Err(ChatError::DuplicateEvent(format!(
                    "token {token} already reconciled"
                )));
            }

            if let Some(placeholder) = self.pending.remove(token) {
                self.settled.insert(token.clone());
                self.ids.remove(&placeholder);

                if let Some(position) = self.position_of(&placeholder) {
                    if self.ids.contains(&incoming.id) {
                        self.records.remove(position);
                        return Ok(Applied::Superseded { position });
                    }
                    self.ids.insert(incoming.id.clone());
                    let record = self.confirmed(incoming);
                    self.records[position] = record;
                    return Ok(Applied::Replaced { position });
                }
                log::warn!("Pending record {placeholder} missing from timeline");
            }
        }

        if self.ids.contains(&incoming.id) {
            return Err(ChatError::DuplicateEvent(format!(
                "message {} already in timeline",
                incoming.id
            )));
        }

        let position = self.records.len();
        self.ids.insert(incoming.id.clone());
        let record = self.confirmed(incoming);
        self.records.push(record);
        Ok(Applied::Appended { position })
    }

    /// Withdraws an optimistic record that has not been confirmed yet.
    pub fn cancel_optimistic(&mut self, token: &CorrelationToken) -> Result<MessageRecord> {
        let placeholder = self
            .pending
            .remove(token)
            .ok_or_else(|| ChatError::UnknownToken(token.to_string()))?;
        self.ids.remove(&placeholder);
        let position = self
            .position_of(&placeholder)
            .ok_or_else(|| ChatError::UnknownToken(token.to_string()))?;
        Ok(self.records.remove(position))
    }

    pub fn pending(&self, token: &CorrelationToken) -> Option<&MessageRecord> {
        let placeholder = self.pending.get(token)?;
        self.records.iter().find(|record| &record.id == placeholder)
    }

    pub fn snapshot(&self) -> Vec<MessageRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn baseline_loaded(&self) -> bool {
        self.baseline_loaded
    }

    pub fn local_participant(&self) -> &str {
        &self.local_participant
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }

    fn confirmed(&self, incoming: DeliveredMessage) -> MessageRecord {
        MessageRecord {
            direction: Direction::of(&incoming.author, &self.local_participant),
            id: incoming.id,
            author: incoming.author,
            text: incoming.text,
            timestamp: incoming.timestamp,
            status: DeliveryStatus::Confirmed,
            correlation_token: incoming.correlation_token,
        }
    }
}
