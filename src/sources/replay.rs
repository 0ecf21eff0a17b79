//! Replay transport: drives the daemon from a JSONL event file.
//!
//! One JSON record per line:
//!
//! ```text
//! {"announce": {"name": "Office", "device_id": "A1", "addr": "10.0.0.17"}}
//! {"update": {"device_id": "A1", "type": "Volume", "payload": {"actual": 20, "target": 20}}}
//! {"wait_ms": 500}
//! ```
//!
//! Announced speakers are backed by a [`ReplayClient`] that snapshots the
//! last replayed state, so policies querying playback on demand see what
//! the file last said. Lines starting with `#` and blank lines are
//! skipped.

use super::UpdateSource;
use crate::directory::{DeviceClient, DeviceError, Directory, Speaker};
use async_trait::async_trait;
use serde::Deserialize;
use soundtouch_events::{DeviceId, NowPlaying, Update, UpdateKind, Volume};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Path of the JSONL file to replay.
    pub file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplayRecord {
    Announce {
        name: String,
        device_id: DeviceId,
        addr: String,
    },
    Update(Update),
    WaitMs(u64),
}

/// Device client answering on-demand queries from the last replayed state.
#[derive(Default)]
pub struct ReplayClient {
    powered_off: AtomicBool,
    now_playing: RwLock<NowPlaying>,
    volume: RwLock<Volume>,
}

impl ReplayClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a replayed update into the snapshot.
    async fn observe(&self, update: &Update) {
        match &update.kind {
            UpdateKind::NowPlaying(np) => *self.now_playing.write().await = np.clone(),
            UpdateKind::Volume(volume) => *self.volume.write().await = *volume,
            UpdateKind::ConnectionState(_) => {}
        }
    }
}

#[async_trait]
impl DeviceClient for ReplayClient {
    async fn is_alive(&self) -> bool {
        !self.powered_off.load(Ordering::SeqCst)
    }

    async fn now_playing(&self) -> Result<NowPlaying, DeviceError> {
        Ok(self.now_playing.read().await.clone())
    }

    async fn volume(&self) -> Result<Volume, DeviceError> {
        Ok(*self.volume.read().await)
    }

    async fn set_volume(&self, target: i32) -> Result<(), DeviceError> {
        let mut volume = self.volume.write().await;
        volume.actual = target;
        volume.target = target;
        Ok(())
    }

    async fn power_off(&self) -> Result<(), DeviceError> {
        self.powered_off.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ReplaySource {
    config: ReplayConfig,
    clients: HashMap<DeviceId, Arc<ReplayClient>>,
}

impl ReplaySource {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            clients: HashMap::new(),
        }
    }

    async fn handle_record(
        &mut self,
        record: ReplayRecord,
        directory: &Directory,
        dispatcher: &crate::dispatcher::Dispatcher,
        shutdown: &CancellationToken,
    ) {
        match record {
            ReplayRecord::Announce {
                name,
                device_id,
                addr,
            } => {
                let client = Arc::new(ReplayClient::new());
                self.clients.insert(device_id.clone(), client.clone());
                let speaker = Arc::new(Speaker::new(&name, device_id.clone(), addr, client));
                info!(speaker = %name, device_id = %device_id, ip = %speaker.addr(),
                    "found device");
                directory.insert(speaker.clone()).await;
                // The worker is detached; it stops with the shutdown token.
                let _ = dispatcher.attach(speaker);
            }
            ReplayRecord::Update(update) => {
                if let Some(client) = self.clients.get(&update.device_id) {
                    client.observe(&update).await;
                }
                match directory.by_id(&update.device_id).await {
                    Some(speaker) => speaker.publish(update),
                    None => warn!(device_id = %update.device_id,
                        "update for unannounced device, skipping"),
                }
            }
            ReplayRecord::WaitMs(ms) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
    }
}

#[async_trait]
impl UpdateSource for ReplaySource {
    async fn run(
        mut self: Box<Self>,
        directory: Arc<Directory>,
        dispatcher: Arc<crate::dispatcher::Dispatcher>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let contents = tokio::fs::read_to_string(&self.config.file).await?;
        info!(file = %self.config.file, "replaying events");

        for line in contents.lines() {
            if shutdown.is_cancelled() {
                break;
            }
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match serde_json::from_str::<ReplayRecord>(line) {
                Ok(record) => {
                    self.handle_record(record, &directory, &dispatcher, &shutdown)
                        .await;
                }
                Err(err) => warn!(line, error = %err, "skipping bad replay record"),
            }
        }

        debug!("replay finished");
        Ok(())
    }
}
