//! VolumeButler policy: learns a preferred volume per (speaker, album) and
//! reapplies it once the learned value is old enough.
//!
//! For a qualifying update the butler reapplies a stale learned volume,
//! then holds an observation window: it sleeps for the window duration
//! with a subscription to the speaker's own update stream open, drains
//! whatever volume events were buffered meanwhile keeping only the most
//! recent one, and persists the mean of stored and observed volume. The
//! window blocks only this speaker's worker; other devices keep
//! dispatching.

use super::{artist_tracked, speaker_allowed, Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use crate::store::{read_or_create_album, KeyedStore, ALL_SPEAKERS};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use soundtouch_events::{Update, UpdateKind, Volume};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, info, warn};

const NAME: &str = "VolumeButler";
const DESCRIPTION: &str = "Automatically adjusts volume based on listening history";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the volume_butler policy
# [volume_butler]

## speakers for which volumes are handled. All if empty
# speakers = ["Office", "Kitchen"]

## for which artists volumes should be handled. All if empty
# artists = ["Drei Frageezeichen", "John Sinclair"]

## database contains the directory name for the volumes database
# database = "episode.db"

## minutes a learned volume must rest before it is reapplied
# staleness_minutes = 20

## seconds the observation window stays open after a qualifying event
# window_secs = 60
"#;

const DEFAULT_STALENESS_MINUTES: i64 = 20;
const DEFAULT_WINDOW_SECS: u64 = 60;

fn default_staleness_minutes() -> i64 {
    DEFAULT_STALENESS_MINUTES
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeButlerConfig {
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: i64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for VolumeButlerConfig {
    fn default() -> Self {
        Self {
            speakers: Vec::new(),
            artists: Vec::new(),
            database: String::new(),
            staleness_minutes: DEFAULT_STALENESS_MINUTES,
            window_secs: DEFAULT_WINDOW_SECS,
        }
    }
}

pub struct VolumeButler {
    config: VolumeButlerConfig,
    staleness: chrono::Duration,
    window: Duration,
    store: Option<KeyedStore>,
    state: Toggle,
}

impl VolumeButler {
    /// Build the butler. A missing database path disables the policy
    /// permanently; a database that cannot be opened aborts startup.
    pub fn new(config: VolumeButlerConfig) -> anyhow::Result<Self> {
        let staleness = chrono::Duration::minutes(config.staleness_minutes);
        let window = Duration::from_secs(config.window_secs);
        if config.database.is_empty() {
            warn!(policy = NAME, "no database configured, policy disabled");
            return Ok(Self {
                config,
                staleness,
                window,
                store: None,
                state: Toggle::disabled(),
            });
        }
        let store = KeyedStore::open(&config.database)?;
        debug!(policy = NAME, database = %config.database, artists = ?config.artists,
            "initialised");
        Ok(Self {
            config,
            staleness,
            window,
            store: Some(store),
            state: Toggle::enabled(),
        })
    }
}

#[async_trait]
impl Policy for VolumeButler {
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
            debug!(policy = NAME, speaker = %speaker.name(), "speaker not handled, done");
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };
        let (Some(artist), Some(album)) = (update.artist(), update.album()) else {
            return Ok(());
        };
        if !artist_tracked(&self.config.artists, artist) || !update.has_content_item() {
            debug!(policy = NAME, album, artist, "ignoring album");
            return Ok(());
        }

        info!(policy = NAME, speaker = %speaker.name(), album, artist, "found album");
        let entry = read_or_create_album(store, speaker.name(), album, update);

        // Reapply a learned volume once it has rested long enough.
        if entry.volume != 0 && entry.is_stale(Utc::now(), self.staleness) {
            info!(policy = NAME, speaker = %speaker.name(), volume = entry.volume,
                "reapplying learned volume");
            if let Err(err) = speaker.set_volume(entry.volume).await {
                warn!(policy = NAME, speaker = %speaker.name(), error = %err,
                    "volume apply failed");
            }
        }

        // Observation window: subscribe first so volume corrections made
        // during the wait are buffered, then drain to the latest one.
        let mut rx = speaker.subscribe();
        debug!(policy = NAME, speaker = %speaker.name(), secs = self.window.as_secs(),
            "opening observation window");
        tokio::time::sleep(self.window).await;

        if let Some(observed) = drain_latest_volume(&mut rx) {
            let mut entry = store.read(speaker.name(), album).unwrap_or(entry);
            entry.volume = entry.smoothed(observed.target);
            entry.last_updated = Utc::now();
            info!(policy = NAME, speaker = %speaker.name(), album,
                volume = entry.volume, "storing smoothed volume");
            store.write(speaker.name(), album, &entry);
            store.write(ALL_SPEAKERS, album, &entry);
        }
        Ok(())
    }
}

/// Drain all currently-queued updates, keeping the most recent volume.
///
/// `Empty` (or `Closed`) is the queue-empty sentinel that ends the drain;
/// a lagged receiver just lost old events, so the drain continues.
fn drain_latest_volume(rx: &mut broadcast::Receiver<Update>) -> Option<Volume> {
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(update) => {
                if let UpdateKind::Volume(volume) = update.kind {
                    latest = Some(volume);
                }
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    latest
}
