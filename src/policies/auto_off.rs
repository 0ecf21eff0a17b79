//! AutoOff policy: powering on one speaker switches configured others off.
//!
//! The trigger is a speaker starting to play from its PRODUCT input (the
//! TV on soundbars); every speaker listed in that trigger's rule is
//! powered off.

use super::{Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::{Source, Update, UpdateKind};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

const NAME: &str = "AutoOff";
const DESCRIPTION: &str = "Switches speakers off if one is switched on";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the auto_off policy
# [auto_off]

## speakers that trigger an autooff
# [auto_off.rules.Wohnzimmer]
# then_off = ["Kueche", "Schrank"]
# [auto_off.rules.Schlafzimmer]
# then_off = ["Office"]
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct AutoOffRule {
    #[serde(default)]
    pub then_off: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoOffConfig {
    #[serde(default)]
    pub rules: HashMap<String, AutoOffRule>,
}

pub struct AutoOff {
    config: AutoOffConfig,
    state: Toggle,
}

impl AutoOff {
    pub fn new(config: AutoOffConfig) -> Self {
        debug!(policy = NAME, rules = config.rules.len(), "initialised");
        Self {
            config,
            state: Toggle::enabled(),
        }
    }
}

#[async_trait]
impl Policy for AutoOff {
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
        ctx: &PolicyContext,
        update: &Update,
        speaker: &Speaker,
    ) -> anyhow::Result<()> {
        let UpdateKind::NowPlaying(_) = &update.kind else {
            return Ok(());
        };
        let Some(rule) = self.config.rules.get(speaker.name()) else {
            return Ok(());
        };
        let playing_from_product = update
            .content_item()
            .is_some_and(|c| c.source == Source::Product);
        if !playing_from_product || !speaker.is_alive().await {
            return Ok(());
        }

        for target in &rule.then_off {
            match ctx.directory.by_name(target).await {
                Some(other) => {
                    info!(policy = NAME, trigger = %speaker.name(), target = %target,
                        "powering off");
                    if let Err(err) = other.power_off().await {
                        warn!(policy = NAME, target = %target, error = %err,
                            "power off failed");
                    }
                }
                None => {
                    error!(policy = NAME, target = %target,
                        "configured speaker not present in the network, check the config file");
                }
            }
        }
        Ok(())
    }
}
