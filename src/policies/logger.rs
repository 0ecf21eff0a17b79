//! Logger policy: writes filtered update messages to the log.

use super::{kind_ignored, speaker_allowed, Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::Update;
use tracing::{debug, info};

const NAME: &str = "Logger";
const DESCRIPTION: &str = "Logs update messages";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the logger policy
# [logger]

## speakers for which messages should be logged. If empty, all
# speakers = ["Office", "Kitchen"]

## ignore_messages describes the message types to be ignored
## one or more of "ConnectionStateUpdated", "NowPlaying", "Volume"
# ignore_messages = ["ConnectionStateUpdated"]
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub ignore_messages: Vec<String>,
}

pub struct Logger {
    config: LoggerConfig,
    state: Toggle,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        debug!(policy = NAME, "initialised");
        Self {
            config,
            state: Toggle::enabled(),
        }
    }
}

#[async_trait]
impl Policy for Logger {
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
        info!(policy = NAME, speaker = %speaker.name(), update = update.kind_name(),
            payload = ?update.kind, "update");
        Ok(())
    }
}
