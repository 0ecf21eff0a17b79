//! Configuration management.
//!
//! Precedence follows the usual layering: defaults < config file <
//! environment variables (`SOUNDTOUCH_` prefix, `__` as section
//! separator). A policy section that is absent means the policy is not
//! registered at all.

use crate::policies::auto_off::AutoOffConfig;
use crate::policies::aux_join::AuxJoinConfig;
use crate::policies::episode_collector::EpisodeCollectorConfig;
use crate::policies::influx::InfluxConfig;
use crate::policies::logger::LoggerConfig;
use crate::policies::magic_zone::MagicZoneConfig;
use crate::policies::telegram::TelegramConfig;
use crate::policies::volume_butler::VolumeButlerConfig;
use crate::sources::replay::ReplayConfig;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    /// Print a sample configuration file and exit.
    #[serde(default)]
    pub sample_config: bool,

    pub logger: Option<LoggerConfig>,
    pub episode_collector: Option<EpisodeCollectorConfig>,
    pub magic_zone: Option<MagicZoneConfig>,
    pub influx_db: Option<InfluxConfig>,
    pub volume_butler: Option<VolumeButlerConfig>,
    pub auto_off: Option<AutoOffConfig>,
    pub telegram: Option<TelegramConfig>,
    pub aux_join: Option<AuxJoinConfig>,

    /// Development transport replaying announcements and updates from a
    /// JSONL file.
    pub replay: Option<ReplayConfig>,
}

/// Global, policy-independent parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Network interface the device transport listens on.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Number of speakers to scan for; ignored when static speakers are set.
    #[serde(default = "default_no_of_systems")]
    pub no_of_soundtouch_systems: i32,

    /// Static list of speaker IPs, superseding the scan when non-empty.
    #[serde(default)]
    pub static_speakers: Vec<String>,
}

fn default_interface() -> String {
    "en0".to_string()
}

fn default_no_of_systems() -> i32 {
    -1
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            no_of_soundtouch_systems: default_no_of_systems(),
            static_speakers: Vec::new(),
        }
    }
}

/// Load configuration from `path` (extension resolved by the config
/// crate; the file is optional) plus environment overrides.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let config = ::config::Config::builder()
        .add_source(::config::File::with_name(path).required(false))
        .add_source(
            ::config::Environment::with_prefix("SOUNDTOUCH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}
