//! Automation policies.
//!
//! Every piece of automation is a policy: a named unit that the dispatcher
//! runs against each update, in registration order. Policies filter events
//! themselves (speaker allow-list, event-kind lists); the dispatcher only
//! skips disabled ones.
//!
//! A policy whose required configuration is invalid is constructed in a
//! permanently disabled state rather than aborting startup; only a
//! persistence store that cannot be opened is fatal.

pub mod auto_off;
pub mod aux_join;
pub mod episode_collector;
pub mod influx;
pub mod logger;
pub mod magic_zone;
pub mod telegram;
pub mod volume_butler;

use crate::config::AppConfig;
use crate::dispatcher::PolicyContext;
use crate::directory::Speaker;
use async_trait::async_trait;
use soundtouch_events::Update;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// The capability contract every policy variant implements.
#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Commented TOML snippet showing how to configure the policy.
    fn sample_config(&self) -> &'static str;
    /// Whether a pass should stop after this policy ran.
    fn is_terminal(&self) -> bool {
        false
    }
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;

    /// Run the policy against one update from one speaker.
    ///
    /// May read the directory, read/write the policy's own persisted
    /// state and request zone mutations through the coordinator; must not
    /// block beyond its own bounded work.
    async fn execute(
        &self,
        ctx: &PolicyContext,
        update: &Update,
        speaker: &Speaker,
    ) -> anyhow::Result<()>;
}

/// Enabled/disabled state of a policy.
///
/// Toggled at runtime and read from every device worker, so it is an
/// atomic rather than a plain flag.
#[derive(Debug)]
pub struct Toggle(AtomicBool);

impl Toggle {
    pub fn enabled() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn disabled() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn enable(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Speaker allow-list check: an empty list allows every speaker.
pub(crate) fn speaker_allowed(allow: &[String], name: &str) -> bool {
    allow.is_empty() || allow.iter().any(|s| s == name)
}

/// Deny-list check for event kinds ("ignore_messages").
pub(crate) fn kind_ignored(deny: &[String], kind: &str) -> bool {
    deny.iter().any(|s| s == kind)
}

/// Allow-list check for event kinds ("log_messages"); empty allows all.
pub(crate) fn kind_selected(allow: &[String], kind: &str) -> bool {
    allow.is_empty() || allow.iter().any(|s| s == kind)
}

/// Tracked-artist check: an empty list tracks every artist.
pub(crate) fn artist_tracked(artists: &[String], artist: &str) -> bool {
    artists.is_empty() || artists.iter().any(|a| a == artist)
}

/// Build the policy chain from configuration, in the fixed registration
/// order. A policy section that is absent is simply not registered.
///
/// Fails only when a configured persistence store cannot be opened.
pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Vec<Arc<dyn Policy>>> {
    let mut policies: Vec<Arc<dyn Policy>> = Vec::new();

    if let Some(c) = &cfg.logger {
        policies.push(Arc::new(logger::Logger::new(c.clone())));
    }
    if let Some(c) = &cfg.episode_collector {
        policies.push(Arc::new(episode_collector::EpisodeCollector::new(
            c.clone(),
        )?));
    }
    if let Some(c) = &cfg.magic_zone {
        policies.push(Arc::new(magic_zone::MagicZone::new(c.clone())));
    }
    if let Some(c) = &cfg.influx_db {
        policies.push(Arc::new(influx::InfluxConnector::new(c.clone())));
    }
    if let Some(c) = &cfg.volume_butler {
        policies.push(Arc::new(volume_butler::VolumeButler::new(c.clone())?));
    }
    if let Some(c) = &cfg.auto_off {
        policies.push(Arc::new(auto_off::AutoOff::new(c.clone())));
    }
    if let Some(c) = &cfg.telegram {
        policies.push(Arc::new(telegram::Telegram::new(c.clone())));
    }
    if let Some(c) = &cfg.aux_join {
        policies.push(Arc::new(aux_join::AuxJoin::new(c.clone())));
    }

    for policy in &policies {
        info!(policy = policy.name(), enabled = policy.is_enabled(), "registered");
    }
    Ok(policies)
}

/// Sample-configuration snippets of every policy this build knows,
/// configured or not, in registration order.
pub fn sample_configs() -> [&'static str; 8] {
    [
        logger::SAMPLE_CONFIG,
        episode_collector::SAMPLE_CONFIG,
        magic_zone::SAMPLE_CONFIG,
        influx::SAMPLE_CONFIG,
        volume_butler::SAMPLE_CONFIG,
        auto_off::SAMPLE_CONFIG,
        telegram::SAMPLE_CONFIG,
        aux_join::SAMPLE_CONFIG,
    ]
}
