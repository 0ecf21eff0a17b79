//! MagicZone policy: groups speakers that play the same radio stream into
//! a synchronized zone.
//!
//! The decision and mutation live in the zone coordinator; this policy
//! only filters its trigger conditions and hands over the content
//! descriptor to match against.

use super::{speaker_allowed, Policy, Toggle};
use crate::coordinator::{GroupOutcome, GroupingMode};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::{PlayStatus, StreamType, Update, UpdateKind};
use tracing::{debug, info};

const NAME: &str = "MagicZone";
const DESCRIPTION: &str = "Groups speakers that play the same content in a zone";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the magic_zone policy
# [magic_zone]

## ordered list of speakers that should be grouped in zones. All if empty.
# speakers = ["Office", "Kitchen"]
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MagicZoneConfig {
    #[serde(default)]
    pub speakers: Vec<String>,
}

pub struct MagicZone {
    config: MagicZoneConfig,
    state: Toggle,
}

impl MagicZone {
    pub fn new(config: MagicZoneConfig) -> Self {
        debug!(policy = NAME, "initialised");
        Self {
            config,
            state: Toggle::enabled(),
        }
    }
}

#[async_trait]
impl Policy for MagicZone {
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
        if np.play_status != PlayStatus::Playing {
            debug!(policy = NAME, speaker = %speaker.name(), "not playing, done");
            return Ok(());
        }
        if np.stream_type != StreamType::RadioStreaming {
            debug!(policy = NAME, speaker = %speaker.name(), "not a radio stream, done");
            return Ok(());
        }
        let Some(content) = np.content.clone() else {
            return Ok(());
        };

        let outcome = ctx
            .coordinator
            .group(update.device_id.clone(), GroupingMode::SameContent { content })
            .await?;
        match outcome {
            GroupOutcome::Created { master } => {
                info!(policy = NAME, speaker = %speaker.name(), master = %master,
                    "created new zone");
            }
            GroupOutcome::Joined { master } => {
                info!(policy = NAME, speaker = %speaker.name(), master = %master,
                    "joined existing zone");
            }
            GroupOutcome::AlreadyGrouped { .. } | GroupOutcome::NoAction => {
                debug!(policy = NAME, speaker = %speaker.name(), ?outcome, "no grouping");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ZoneCoordinator;
    use crate::directory::fake::FakeClient;
    use crate::directory::Directory;
    use soundtouch_events::{ContentItem, DeviceId, NowPlaying, Source};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn radio_np() -> NowPlaying {
        NowPlaying {
            content: Some(ContentItem::new(
                Source::LocalInternetRadio,
                "stationId:1234",
                "Radio Swiss Jazz",
            )),
            play_status: PlayStatus::Playing,
            stream_type: StreamType::RadioStreaming,
            ..NowPlaying::default()
        }
    }

    struct Harness {
        ctx: PolicyContext,
        directory: Arc<Directory>,
        trigger: Arc<Speaker>,
        candidate_client: Arc<FakeClient>,
    }

    async fn harness(trigger_name: &str) -> Harness {
        let directory = Arc::new(Directory::new());
        let trigger = Arc::new(Speaker::new(
            trigger_name,
            "A1",
            "10.0.0.1",
            Arc::new(FakeClient::new()),
        ));
        directory.insert(trigger.clone()).await;

        let candidate_client = Arc::new(FakeClient::playing(radio_np()));
        let candidate = Arc::new(Speaker::new(
            "Kitchen2",
            "B2",
            "10.0.0.2",
            candidate_client.clone(),
        ));
        directory.insert(candidate).await;

        let (coordinator, _task) =
            ZoneCoordinator::spawn(directory.clone(), CancellationToken::new());
        Harness {
            ctx: PolicyContext {
                directory: directory.clone(),
                coordinator,
            },
            directory,
            trigger,
            candidate_client,
        }
    }

    #[tokio::test]
    async fn test_groups_same_radio_content() {
        let h = harness("Office").await;
        let policy = MagicZone::new(MagicZoneConfig::default());

        let update = Update::now_playing("A1", radio_np());
        policy.execute(&h.ctx, &update, &h.trigger).await.unwrap();

        let zones = h.directory.zones().await;
        assert_eq!(zones.len(), 1);
        assert!(zones[0].is_master(&DeviceId::from("B2")));
        assert!(zones[0].contains(&DeviceId::from("A1")));
    }

    #[tokio::test]
    async fn test_filtered_speaker_has_no_side_effects() {
        let h = harness("Office").await;
        let policy = MagicZone::new(MagicZoneConfig {
            speakers: vec!["Kitchen".to_string()],
        });

        let update = Update::now_playing("A1", radio_np());
        policy.execute(&h.ctx, &update, &h.trigger).await.unwrap();

        // The body never ran: no zone, no compatibility scan.
        assert!(h.directory.zones().await.is_empty());
        assert_eq!(
            h.candidate_client
                .now_playing_queries
                .load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_ignores_non_radio_and_non_playing() {
        let h = harness("Office").await;
        let policy = MagicZone::new(MagicZoneConfig::default());

        let paused = NowPlaying {
            play_status: PlayStatus::Paused,
            ..radio_np()
        };
        policy
            .execute(&h.ctx, &Update::now_playing("A1", paused), &h.trigger)
            .await
            .unwrap();

        let on_demand = NowPlaying {
            stream_type: StreamType::TrackOnDemand,
            ..radio_np()
        };
        policy
            .execute(&h.ctx, &Update::now_playing("A1", on_demand), &h.trigger)
            .await
            .unwrap();

        assert!(h.directory.zones().await.is_empty());
    }
}
