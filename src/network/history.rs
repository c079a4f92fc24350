use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::common::{Conversation, HistoryEntry};
use crate::error::{ChatError, Result};

/// One-shot fetch of prior messages, oldest first. Implementations do not retry.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
    async fn fetch(&self, conversation: &Conversation) -> Result<Vec<HistoryEntry>>;
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryEntry>,
}

/// `GET {base_url}/chat/{remote}` returning `{ "messages": [...] }`.
pub struct HttpHistorySource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpHistorySource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url)
            .map_err(|err| ChatError::Config(format!("invalid history url {base_url}: {err}")))?;
        if parsed.cannot_be_a_base() {
            return Err(ChatError::Config(format!(
                "history url {base_url} cannot take a path"
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// Participant ids are pushed as single path segments, so they are percent-encoded.
    fn url_for(&self, conversation: &Conversation) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("chat")
                .push(&conversation.remote);
        }
        url
    }
}

#[async_trait]
impl HistorySource for HttpHistorySource {
    async fn fetch(&self, conversation: &Conversation) -> Result<Vec<HistoryEntry>> {
        let url = self.url_for(conversation);
        log::debug!("Fetching history from {url}");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Fetch(format!("{url} answered {status}")));
        }

        let body: HistoryResponse = response.json().await?;
        log::info!(
            "Fetched {} history messages for {}",
            body.messages.len(),
            conversation.id()
        );
        Ok(body.messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MessageId;

    #[test]
    fn url_targets_remote_participant() {
        let source = HttpHistorySource::new("http://localhost:7777/", Duration::from_secs(1)).unwrap();
        let url = source.url_for(&Conversation::new("alice", "bob"));
        assert_eq!(url.as_str(), "http://localhost:7777/chat/bob");

        let nested = HttpHistorySource::new("http://localhost:7777/api", Duration::from_secs(1)).unwrap();
        let url = nested.url_for(&Conversation::new("alice", "bob"));
        assert_eq!(url.as_str(), "http://localhost:7777/api/chat/bob");
    }

    #[test]
    fn remote_id_cannot_change_the_route() {
        let source = HttpHistorySource::new("http://localhost:7777", Duration::from_secs(1)).unwrap();
        let url = source.url_for(&Conversation::new("alice", "../admin?all=1#x"));
        assert_eq!(url.as_str(), "http://localhost:7777/chat/..%2Fadmin%3Fall=1%23x");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().unwrap().count(), 2);
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpHistorySource::new("not a url", Duration::from_secs(1)),
            Err(ChatError::Config(_))
        ));
        assert!(matches!(
            HttpHistorySource::new("mailto:chat@example.com", Duration::from_secs(1)),
            Err(ChatError::Config(_))
        ));
    }

    #[test]
    fn response_accepts_backend_id_field() {
        let body: HistoryResponse = serde_json::from_str(
            r#"{"messages":[{"_id":"m1","author":"bob","text":"hey","timestamp":10},
                            {"id":"m2","author":"alice","text":"yo","timestamp":11}]}"#,
        )
        .unwrap();
        let ids: Vec<_> = body.messages.iter().map(|entry| entry.id.clone()).collect();
        assert_eq!(ids, vec![MessageId::from("m1"), MessageId::from("m2")]);

        let empty: HistoryResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.messages.is_empty());
    }
}
