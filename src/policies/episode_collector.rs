//! EpisodeCollector policy: records every episode heard for the tracked
//! artists, so other policies (the volume butler) have a per-album record
//! to attach learned state to.

use super::{artist_tracked, speaker_allowed, Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use crate::store::{read_or_create_album, KeyedStore, ALL_SPEAKERS};
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::{Update, UpdateKind};
use tracing::{debug, info, warn};

const NAME: &str = "EpisodeCollector";
const DESCRIPTION: &str = "Collects episodes for specific artists";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the episode_collector policy
# [episode_collector]

## speakers for which episodes should be stored. If empty, all
# speakers = ["Office", "Kitchen"]

## for which artists to collect the episodes. All if empty
# artists = ["Drei Frageezeichen", "John Sinclair"]

## database contains the directory name for the episodes database
# database = "episode.db"
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeCollectorConfig {
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub database: String,
}

pub struct EpisodeCollector {
    config: EpisodeCollectorConfig,
    store: Option<KeyedStore>,
    state: Toggle,
}

impl EpisodeCollector {
    /// Build the collector. A missing database path disables the policy
    /// permanently; a database that cannot be opened aborts startup.
    pub fn new(config: EpisodeCollectorConfig) -> anyhow::Result<Self> {
        if config.database.is_empty() {
            warn!(policy = NAME, "no database configured, policy disabled");
            return Ok(Self {
                config,
                store: None,
                state: Toggle::disabled(),
            });
        }
        let store = KeyedStore::open(&config.database)?;
        debug!(policy = NAME, database = %config.database, artists = ?config.artists,
            "initialised");
        Ok(Self {
            config,
            store: Some(store),
            state: Toggle::enabled(),
        })
    }
}

#[async_trait]
impl Policy for EpisodeCollector {
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
        if !matches!(
            update.kind,
            UpdateKind::NowPlaying(_) | UpdateKind::Volume(_)
        ) {
            return Ok(());
        }
        if !speaker_allowed(&self.config.speakers, speaker.name()) {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };

        let (Some(artist), Some(album)) = (update.artist(), update.album()) else {
            return Ok(());
        };
        if !artist_tracked(&self.config.artists, artist) || !update.has_content_item() {
            debug!(policy = NAME, album, "ignoring album");
            return Ok(());
        }

        info!(policy = NAME, speaker = %speaker.name(), artist, album, "found album");
        read_or_create_album(store, ALL_SPEAKERS, album, update);
        Ok(())
    }
}
