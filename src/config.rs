use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};
use crate::network::ReconnectPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

const ENV_HISTORY_URL: &str = "CHAT_HISTORY_URL";
const ENV_CHANNEL_ADDR: &str = "CHAT_CHANNEL_ADDR";
const ENV_LOCAL_PARTICIPANT: &str = "CHAT_LOCAL_PARTICIPANT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history_base_url: String,
    /// `host:port` of the live channel endpoint
    pub channel_addr: String,
    pub local_participant: String,
    pub display_name: Option<String>,
    pub history_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    /// How many fresh adapters a session may create after a channel is lost.
    pub max_channel_renewals: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_base_url: "http://localhost:7777".to_string(),
            channel_addr: "127.0.0.1:7778".to_string(),
            local_participant: String::new(),
            display_name: None,
            history_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
            max_channel_renewals: 3,
        }
    }
}

impl AppConfig {
    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    /// Applies `CHAT_*` environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_HISTORY_URL) {
            self.history_base_url = url;
        }
        if let Some(addr) = lookup(ENV_CHANNEL_ADDR) {
            self.channel_addr = addr;
        }
        if let Some(local) = lookup(ENV_LOCAL_PARTICIPANT) {
            self.local_participant = local;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_participant.trim().is_empty() {
            return Err(ChatError::Config(
                "local participant id is not set".to_string(),
            ));
        }
        if self.channel_addr.trim().is_empty() {
            return Err(ChatError::Config("channel address is not set".to_string()));
        }
        Ok(())
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    }
}

pub fn save_config(path: &str, config: &AppConfig) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("chat-sync-{}-{}", name, std::process::id()))
            .join("chat.json")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"local_participant":"alice","reconnect":{"max_attempts":2}}"#)
                .unwrap();
        assert_eq!(config.local_participant, "alice");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.initial_backoff_ms, 500);
        assert_eq!(config.channel_addr, AppConfig::default().channel_addr);
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        assert_eq!(load_config("/nonexistent/chat.json"), AppConfig::default());

        let path = temp_path("broken");
        save_config(&path, &AppConfig::default()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config(&path), AppConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let path = temp_path("saved");
        let config = AppConfig {
            local_participant: "alice".to_string(),
            display_name: Some("Alice".to_string()),
            max_channel_renewals: 7,
            ..AppConfig::default()
        };
        save_config(&path, &config).unwrap();
        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CHANNEL_ADDR, "10.0.0.1:9000"),
            (ENV_LOCAL_PARTICIPANT, "bob"),
        ]);
        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.channel_addr, "10.0.0.1:9000");
        assert_eq!(config.local_participant, "bob");
        assert_eq!(config.history_base_url, AppConfig::default().history_base_url);
    }

    #[test]
    fn validation_requires_local_participant() {
        let config = AppConfig::default();
        assert!(matches!(config.validate(), Err(ChatError::Config(_))));
    }
}
