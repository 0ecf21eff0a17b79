//! AuxJoin policy: a speaker switched to its AUX input joins a compatible
//! running stream.
//!
//! Same coordinator as MagicZone, with a broader compatibility predicate:
//! any alive speaker currently playing from one of the accepted sources
//! qualifies, same content or not.

use super::{speaker_allowed, Policy, Toggle};
use crate::coordinator::{GroupOutcome, GroupingMode};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::{PlayStatus, Source, Update, UpdateKind};
use tracing::{debug, info, trace};

const NAME: &str = "AuxJoin";
const DESCRIPTION: &str = "If Aux is selected the speaker joins an existing stream";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the aux_join policy
# [aux_join]

## ordered list of speakers that can join in zones. All if empty.
# speakers = ["Office", "Kitchen", "Schlafzimmer", "Schrank"]

## sources a running speaker must play from to be joined
# sources = ["LOCAL_INTERNET_RADIO", "STORED_MUSIC", "SPOTIFY", "ALEXA"]
"#;

fn default_sources() -> Vec<Source> {
    vec![
        Source::LocalInternetRadio,
        Source::StoredMusic,
        Source::Spotify,
        Source::Alexa,
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuxJoinConfig {
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default = "default_sources")]
    pub sources: Vec<Source>,
}

impl Default for AuxJoinConfig {
    fn default() -> Self {
        Self {
            speakers: Vec::new(),
            sources: default_sources(),
        }
    }
}

pub struct AuxJoin {
    config: AuxJoinConfig,
    state: Toggle,
}

impl AuxJoin {
    pub fn new(config: AuxJoinConfig) -> Self {
        debug!(policy = NAME, "initialised");
        Self {
            config,
            state: Toggle::enabled(),
        }
    }
}

#[async_trait]
impl Policy for AuxJoin {
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
        let UpdateKind::NowPlaying(np) = &update.kind else {
            return Ok(());
        };
        if !speaker_allowed(&self.config.speakers, speaker.name()) {
            return Ok(());
        }
        let on_aux = np.play_status == PlayStatus::Playing
            && np.content.as_ref().is_some_and(|c| c.source == Source::Aux);
        if !on_aux {
            trace!(policy = NAME, speaker = %speaker.name(), "not playing from AUX, done");
            return Ok(());
        }

        let outcome = ctx
            .coordinator
            .group(
                update.device_id.clone(),
                GroupingMode::CompatibleSource {
                    accepted: self.config.sources.clone(),
                },
            )
            .await?;
        match outcome {
            GroupOutcome::Created { master } | GroupOutcome::Joined { master } => {
                info!(policy = NAME, speaker = %speaker.name(), master = %master,
                    "joined running stream");
            }
            GroupOutcome::AlreadyGrouped { .. } | GroupOutcome::NoAction => {
                trace!(policy = NAME, speaker = %speaker.name(),
                    "AUX had no effect, no target to join");
            }
        }
        Ok(())
    }
}
