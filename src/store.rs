//! Keyed JSON persistence and the listening-history records kept in it.
//!
//! `KeyedStore` is a minimal get/put store: one JSON file per
//! (collection, key), collections as directories. Failing to open the
//! store at startup is fatal; read and write failures afterwards are
//! logged and degrade to "entry absent" / "write dropped" so a flaky disk
//! never takes a policy down with it.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use soundtouch_events::{ContentItem, DeviceId, Update};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Collection shared by all speakers; smoothed entries are mirrored here.
pub const ALL_SPEAKERS: &str = "all";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File-backed keyed store: `root/<collection>/<key>.json`.
pub struct KeyedStore {
    root: PathBuf,
}

impl KeyedStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Open {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read an entry. Any failure - missing, unreadable, corrupt - yields
    /// `None`; only genuine I/O trouble is logged.
    pub fn read<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Option<T> {
        let path = self.entry_path(collection, key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err,
                    "store read failed, treating entry as absent");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(path = %path.display(), error = %err,
                    "corrupt store entry, treating as absent");
                None
            }
        }
    }

    /// Write an entry. Failures are logged and the write is dropped.
    pub fn write<T: Serialize>(&self, collection: &str, key: &str, value: &T) {
        let dir = self.root.join(sanitize(collection));
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!(path = %dir.display(), error = %err, "store write dropped");
            return;
        }
        let path = self.entry_path(collection, key);
        let bytes = match serde_json::to_vec_pretty(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "store write dropped");
                return;
            }
        };
        if let Err(err) = fs::write(&path, bytes) {
            warn!(path = %path.display(), error = %err, "store write dropped");
        }
    }

    fn entry_path(&self, collection: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize(collection))
            .join(format!("{}.json", sanitize(key)))
    }
}

/// Album names and speaker names end up as file names; keep them tame.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Per-(device, album) listening-history record: the learned volume and
/// when it was last refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumEntry {
    pub album: String,
    pub device_id: DeviceId,
    pub content: Option<ContentItem>,
    /// Smoothed volume; 0 means no volume has been learned yet.
    #[serde(default)]
    pub volume: i32,
    pub last_updated: DateTime<Utc>,
}

impl AlbumEntry {
    pub fn new(album: impl Into<String>, device_id: DeviceId, content: Option<ContentItem>) -> Self {
        Self {
            album: album.into(),
            device_id,
            content,
            volume: 0,
            last_updated: Utc::now(),
        }
    }

    /// Mean of the stored and the newly observed volume, integer floor.
    /// With no stored volume the observation becomes the baseline.
    pub fn smoothed(&self, observed: i32) -> i32 {
        let old = if self.volume == 0 {
            observed
        } else {
            self.volume
        };
        (old + observed) / 2
    }

    /// Whether the learned volume is old enough to reapply.
    ///
    /// The boundary is exclusive: exactly `threshold` old is not yet
    /// stale, one unit past it is.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now > self.last_updated + threshold
    }
}

/// Look up the album entry in `collection`, creating (and mirroring into
/// the shared collection) a fresh volume-less record on first observation.
pub fn read_or_create_album(
    store: &KeyedStore,
    collection: &str,
    album: &str,
    update: &Update,
) -> AlbumEntry {
    if let Some(entry) = store.read(collection, album) {
        return entry;
    }
    let entry = AlbumEntry::new(
        album,
        update.device_id.clone(),
        update.content_item().cloned(),
    );
    store.write(collection, album, &entry);
    store.write(ALL_SPEAKERS, album, &entry);
    entry
}
