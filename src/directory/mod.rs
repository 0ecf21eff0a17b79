//! Device directory: the known-speaker registry and the exclusive owner of
//! zone assignment.
//!
//! Policies never write zone state directly. Grouping policies go through
//! the zone coordinator, which calls the mutating methods here; every
//! mutation re-validates against current state under the directory's write
//! lock, so a stale decision fails with a [`ZoneError`] instead of being
//! applied partially.
//!
//! Enumeration order is deterministic (sorted by device id) because the
//! coordinator's master election picks the first compatible candidate.

use async_trait::async_trait;
use soundtouch_events::{DeviceId, NowPlaying, Update, Volume, Zone};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Buffered updates per speaker before slow subscribers start lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// On-demand query/command interface of a single device.
///
/// This is the boundary where the network transport plugs in; the core
/// never caches playback state and asks through this trait instead.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn is_alive(&self) -> bool;
    async fn now_playing(&self) -> Result<NowPlaying, DeviceError>;
    async fn volume(&self) -> Result<Volume, DeviceError>;
    async fn set_volume(&self, target: i32) -> Result<(), DeviceError>;
    async fn power_off(&self) -> Result<(), DeviceError>;
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device request failed: {0}")]
    Request(String),
}

/// Zone mutation rejections. All of these leave zone state untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ZoneError {
    #[error("device {0} is not known to the directory")]
    UnknownDevice(DeviceId),
    #[error("device {0} is not a zone master")]
    NotMaster(DeviceId),
    #[error("device {0} already belongs to a zone")]
    AlreadyZoned(DeviceId),
}

/// A known speaker: identity, address, its update stream and the client
/// used for on-demand queries and commands.
pub struct Speaker {
    name: String,
    device_id: DeviceId,
    addr: String,
    client: Arc<dyn DeviceClient>,
    updates: broadcast::Sender<Update>,
}

impl Speaker {
    pub fn new(
        name: impl Into<String>,
        device_id: impl Into<DeviceId>,
        addr: impl Into<String>,
        client: Arc<dyn DeviceClient>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            device_id: device_id.into(),
            addr: addr.into(),
            client,
            updates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Subscribe to this speaker's update stream.
    ///
    /// The dispatcher holds one subscription per speaker; policies may take
    /// additional short-lived ones (the volume butler's observation window).
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    /// Publish an update into the speaker's stream.
    ///
    /// A send with no live subscribers is fine; the update is dropped.
    pub fn publish(&self, update: Update) {
        let _ = self.updates.send(update);
    }

    pub async fn is_alive(&self) -> bool {
        self.client.is_alive().await
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, DeviceError> {
        self.client.now_playing().await
    }

    pub async fn volume(&self) -> Result<Volume, DeviceError> {
        self.client.volume().await
    }

    pub async fn set_volume(&self, target: i32) -> Result<(), DeviceError> {
        self.client.set_volume(target).await
    }

    pub async fn power_off(&self) -> Result<(), DeviceError> {
        self.client.power_off().await
    }
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker")
            .field("name", &self.name)
            .field("device_id", &self.device_id)
            .field("addr", &self.addr)
            .finish()
    }
}

/// Registry of known speakers plus the zone assignments they belong to.
///
/// Zones are keyed by their master's device id. Lock order is always
/// speakers before zones.
#[derive(Default)]
pub struct Directory {
    speakers: RwLock<HashMap<DeviceId, Arc<Speaker>>>,
    zones: RwLock<HashMap<DeviceId, Zone>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, speaker: Arc<Speaker>) {
        self.speakers
            .write()
            .await
            .insert(speaker.device_id().clone(), speaker);
    }

    /// Remove a speaker and detach it from any zone it belongs to.
    pub async fn remove(&self, id: &DeviceId) -> Option<Arc<Speaker>> {
        let removed = self.speakers.write().await.remove(id);
        if removed.is_some() {
            let mut zones = self.zones.write().await;
            zones.remove(id);
            zones.retain(|_, zone| {
                zone.remove_member(id);
                // A zone needs at least its master and one member to exist.
                zone.members().len() > 1
            });
        }
        removed
    }

    /// All known speakers, sorted by device id.
    pub async fn all(&self) -> Vec<Arc<Speaker>> {
        let speakers = self.speakers.read().await;
        let mut all: Vec<_> = speakers.values().cloned().collect();
        all.sort_by(|a, b| a.device_id().cmp(b.device_id()));
        all
    }

    pub async fn by_id(&self, id: &DeviceId) -> Option<Arc<Speaker>> {
        self.speakers.read().await.get(id).cloned()
    }

    pub async fn by_name(&self, name: &str) -> Option<Arc<Speaker>> {
        self.speakers
            .read()
            .await
            .values()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// The zone a device currently belongs to, master or member.
    pub async fn zone_of(&self, id: &DeviceId) -> Option<Zone> {
        self.zones
            .read()
            .await
            .values()
            .find(|zone| zone.contains(id))
            .cloned()
    }

    pub async fn is_zone_master(&self, id: &DeviceId) -> bool {
        self.zones.read().await.contains_key(id)
    }

    /// Snapshot of all current zones, for logging and tests.
    pub async fn zones(&self) -> Vec<Zone> {
        self.zones.read().await.values().cloned().collect()
    }

    /// Create a new zone with `master` feeding `member`.
    ///
    /// Re-validates under the write lock: both devices must be known and
    /// neither may already belong to any zone.
    pub async fn create_zone(
        &self,
        master: &DeviceId,
        member: &DeviceId,
    ) -> Result<Zone, ZoneError> {
        self.require_known(master).await?;
        self.require_known(member).await?;

        let mut zones = self.zones.write().await;
        if zones.values().any(|z| z.contains(master)) {
            return Err(ZoneError::AlreadyZoned(master.clone()));
        }
        if zones.values().any(|z| z.contains(member)) {
            return Err(ZoneError::AlreadyZoned(member.clone()));
        }

        let zone = Zone::new(master.clone(), member.clone());
        zones.insert(master.clone(), zone.clone());
        Ok(zone)
    }

    /// Add `member` to the zone mastered by `master`.
    ///
    /// Fails if `master` no longer masters a zone (stale decision) or if
    /// `member` already belongs to any zone, including this one.
    pub async fn add_zone_member(
        &self,
        master: &DeviceId,
        member: &DeviceId,
    ) -> Result<Zone, ZoneError> {
        self.require_known(member).await?;

        let mut zones = self.zones.write().await;
        if zones.values().any(|z| z.contains(member)) {
            return Err(ZoneError::AlreadyZoned(member.clone()));
        }
        let zone = zones
            .get_mut(master)
            .ok_or_else(|| ZoneError::NotMaster(master.clone()))?;
        zone.add_member(member.clone());
        Ok(zone.clone())
    }

    /// Replace the zone assignment for the zone's master outright.
    ///
    /// External-boundary operation: a device transport reporting the zone
    /// topology it observed. Members zoned elsewhere are rejected.
    pub async fn set_zone(&self, zone: Zone) -> Result<(), ZoneError> {
        let mut zones = self.zones.write().await;
        for member in zone.members() {
            if zones
                .iter()
                .any(|(master, z)| master != zone.master() && z.contains(member))
            {
                return Err(ZoneError::AlreadyZoned(member.clone()));
            }
        }
        zones.insert(zone.master().clone(), zone);
        Ok(())
    }

    async fn require_known(&self, id: &DeviceId) -> Result<(), ZoneError> {
        if self.speakers.read().await.contains_key(id) {
            Ok(())
        } else {
            Err(ZoneError::UnknownDevice(id.clone()))
        }
    }
}

#[cfg(test)]
pub(crate) mod fake;
