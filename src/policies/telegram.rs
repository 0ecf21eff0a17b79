//! Telegram policy: forwards filtered update summaries to configured
//! chats via the Bot HTTP API.
//!
//! Without an API key the policy is constructed suspended. Sends are
//! fire-and-forget: a failed delivery is logged and the pass continues.

use super::{kind_ignored, speaker_allowed, Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use soundtouch_events::{Update, UpdateKind};
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "Telegram";
const DESCRIPTION: &str = "Forwards update messages to Telegram chats";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the telegram policy
# [telegram]

## speakers for which messages should be forwarded. If empty, all
# speakers = ["Office", "Kitchen"]

## ignore_messages describes the message types to be ignored
## one or more of "ConnectionStateUpdated", "NowPlaying", "Volume"
# ignore_messages = ["ConnectionStateUpdated"]

## Telegram API key and the chats to notify
# api_key = "x:y"
# chat_ids = [999999, 888888]
"#;

const API_BASE: &str = "https://api.telegram.org";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub ignore_messages: Vec<String>,
}

pub struct Telegram {
    config: TelegramConfig,
    client: Client,
    state: Toggle,
}

impl Telegram {
    /// Build the notifier. A missing API key suspends the policy.
    pub fn new(config: TelegramConfig) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(policy = NAME, error = %err,
                    "failed to build HTTP client with custom config, using default");
                Client::default()
            });
        let state = if config.api_key.is_empty() {
            debug!(policy = NAME, "no API key provided, suspending policy");
            Toggle::disabled()
        } else {
            debug!(policy = NAME, "initialised");
            Toggle::enabled()
        };
        Self {
            config,
            client,
            state,
        }
    }
}

#[async_trait]
impl Policy for Telegram {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn sample_config(&self) -> &'static str {
        SAMPLE_CONFIG
    }

    fn enable(&self) {
        self.state.enable();
    }

    fn disable(&self) {
        self.state.disable();
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    async fn execute(
        &self,
        _ctx: &PolicyContext,
        update: &Update,
        speaker: &Speaker,
    ) -> anyhow::Result<()> {
        if kind_ignored(&self.config.ignore_messages, update.kind_name()) {
            return Ok(());
        }
        if !speaker_allowed(&self.config.speakers, speaker.name()) {
            return Ok(());
        }

        let text = message_text(update, speaker);
        let url = format!("{API_BASE}/bot{}/sendMessage", self.config.api_key);
        for chat_id in &self.config.chat_ids {
            let body = json!({ "chat_id": chat_id, "text": text });
            match self.client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(policy = NAME, chat_id, "message delivered");
                }
                Ok(response) => {
                    warn!(policy = NAME, chat_id, status = %response.status(),
                        "Telegram rejected the message");
                }
                Err(err) => {
                    warn!(policy = NAME, chat_id, error = %err, "message delivery failed");
                }
            }
        }
        Ok(())
    }
}

/// Short human-readable summary of one update.
fn message_text(update: &Update, speaker: &Speaker) -> String {
    match &update.kind {
        UpdateKind::NowPlaying(np) => {
            let source = np
                .content
                .as_ref()
                .map(|c| c.source.as_str())
                .unwrap_or("NONE");
            if np.artist.is_empty() && np.track.is_empty() {
                format!("{}: now playing from {source}", speaker.name())
            } else {
                format!(
                    "{}: now playing {} - {} ({source})",
                    speaker.name(),
                    np.artist,
                    np.track
                )
            }
        }
        UpdateKind::Volume(volume) => {
            if volume.muted {
                format!("{}: volume {} (muted)", speaker.name(), volume.actual)
            } else {
                format!("{}: volume {}", speaker.name(), volume.actual)
            }
        }
        UpdateKind::ConnectionState(conn) => format!(
            "{}: connection {} ({})",
            speaker.name(),
            conn.state,
            if conn.up { "up" } else { "down" }
        ),
    }
}
