//! Scriptable in-memory device client used across the crate's tests.

use super::{DeviceClient, DeviceError};
use async_trait::async_trait;
use soundtouch_events::{NowPlaying, Volume};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) struct FakeClient {
    alive: AtomicBool,
    fail_queries: AtomicBool,
    now_playing: Mutex<NowPlaying>,
    volume: Mutex<Volume>,
    pub set_volumes: Mutex<Vec<i32>>,
    pub power_offs: AtomicUsize,
    pub now_playing_queries: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            fail_queries: AtomicBool::new(false),
            now_playing: Mutex::new(NowPlaying::default()),
            volume: Mutex::new(Volume::default()),
            set_volumes: Mutex::new(Vec::new()),
            power_offs: AtomicUsize::new(0),
            now_playing_queries: AtomicUsize::new(0),
        }
    }

    pub fn playing(np: NowPlaying) -> Self {
        let client = Self::new();
        client.set_now_playing(np);
        client
    }

    pub fn set_now_playing(&self, np: NowPlaying) {
        *self.now_playing.lock().unwrap() = np;
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_device_volume(&self, volume: Volume) {
        *self.volume.lock().unwrap() = volume;
    }

    /// Make all queries fail, simulating an unreachable device.
    pub fn fail_queries(&self) {
        self.fail_queries.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceClient for FakeClient {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn now_playing(&self) -> Result<NowPlaying, DeviceError> {
        self.now_playing_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("fake failure".to_string()));
        }
        Ok(self.now_playing.lock().unwrap().clone())
    }

    async fn volume(&self) -> Result<Volume, DeviceError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("fake failure".to_string()));
        }
        Ok(*self.volume.lock().unwrap())
    }

    async fn set_volume(&self, target: i32) -> Result<(), DeviceError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("fake failure".to_string()));
        }
        self.set_volumes.lock().unwrap().push(target);
        let mut volume = self.volume.lock().unwrap();
        volume.actual = target;
        volume.target = target;
        Ok(())
    }

    async fn power_off(&self) -> Result<(), DeviceError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(DeviceError::Unreachable("fake failure".to_string()));
        }
        self.power_offs.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}
