//! InfluxConnector policy: forwards update events to an InfluxDB instance
//! as line protocol.
//!
//! Sends are bounded by an HTTP timeout and never fail the policy pass; a
//! run of consecutive failures disables the policy for good. `dry_run`
//! logs the equivalent curl command instead of sending.

use super::{kind_selected, speaker_allowed, Policy, Toggle};
use crate::directory::Speaker;
use crate::dispatcher::PolicyContext;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use soundtouch_events::{Update, UpdateKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

const NAME: &str = "InfluxConnector";
const DESCRIPTION: &str = "Writes event data to InfluxDB";

pub const SAMPLE_CONFIG: &str = r#"
## Enabling the influx_db policy
# [influx_db]

## speakers for which messages should be forwarded. If empty, all
# speakers = ["Office", "Kitchen"]

## log_messages describes the message types to be forwarded
## one or more of "ConnectionStateUpdated", "NowPlaying", "Volume"
## all if empty
# log_messages = ["ConnectionStateUpdated", "NowPlaying", "Volume"]

## URL of the InfluxDB
# influx_url = "http://influxdb:8086"

## database where to store the events
# database = "soundtouch"

## dry_run logs the line protocol as a curl statement instead of sending
# dry_run = false
"#;

/// Consecutive send failures after which the policy disables itself.
const MAX_FAILURES: u32 = 20;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfluxConfig {
    #[serde(default)]
    pub influx_url: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub speakers: Vec<String>,
    #[serde(default)]
    pub log_messages: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

pub struct InfluxConnector {
    config: InfluxConfig,
    write_url: Option<Url>,
    client: Client,
    failures: AtomicU32,
    state: Toggle,
}

impl InfluxConnector {
    /// Build the connector. A missing or invalid URL suspends the policy
    /// instead of aborting startup.
    pub fn new(config: InfluxConfig) -> Self {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(policy = NAME, error = %err,
                    "failed to build HTTP client with custom config, using default");
                Client::default()
            });

        if config.influx_url.is_empty() {
            debug!(policy = NAME, "no InfluxDB URL configured, suspending policy");
            return Self {
                config,
                write_url: None,
                client,
                failures: AtomicU32::new(0),
                state: Toggle::disabled(),
            };
        }

        let write_url = match Url::parse(&config.influx_url).and_then(|u| u.join("write")) {
            Ok(url) => Some(url),
            Err(err) => {
                info!(policy = NAME, url = %config.influx_url, error = %err, "not a valid URL");
                info!(policy = NAME, "suspending policy");
                None
            }
        };
        let state = if write_url.is_some() {
            Toggle::enabled()
        } else {
            Toggle::disabled()
        };

        debug!(policy = NAME, "initialised");
        Self {
            config,
            write_url,
            client,
            failures: AtomicU32::new(0),
            state,
        }
    }
}

#[async_trait]
impl Policy for InfluxConnector {
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
        if !kind_selected(&self.config.log_messages, update.kind_name()) {
            return Ok(());
        }
        if !speaker_allowed(&self.config.speakers, speaker.name()) {
            return Ok(());
        }

        let line = line_protocol(update, speaker);
        let Some(write_url) = &self.write_url else {
            return Ok(());
        };
        let mut url = write_url.clone();
        url.query_pairs_mut().append_pair("db", &self.config.database);

        if self.config.dry_run {
            info!(policy = NAME, "curl -i -XPOST \"{url}\" --data-binary '{line}'");
            return Ok(());
        }

        let sent = self
            .client
            .post(url)
            .body(line)
            .send()
            .await
            .map(|response| response.status().is_success());
        match sent {
            Ok(true) => {
                self.failures.store(0, Ordering::SeqCst);
                debug!(policy = NAME, "write succeeded");
            }
            Ok(false) | Err(_) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= MAX_FAILURES {
                    self.state.disable();
                    error!(policy = NAME, failures, "failed too often to connect, disabling policy");
                } else {
                    warn!(policy = NAME, failures, "write failed");
                }
            }
        }
        Ok(())
    }
}

/// Render one update as an InfluxDB line-protocol record.
///
/// The measurement is the event kind; speaker name and device id are tags.
fn line_protocol(update: &Update, speaker: &Speaker) -> String {
    let tags = format!(
        "speaker={},device_id={}",
        escape_tag(speaker.name()),
        escape_tag(update.device_id.as_str())
    );
    match &update.kind {
        UpdateKind::NowPlaying(np) => {
            let source = np
                .content
                .as_ref()
                .map(|c| c.source.as_str())
                .unwrap_or("NONE");
            format!(
                "now_playing,{tags} source=\"{}\",play_status=\"{:?}\",stream_type=\"{:?}\",artist=\"{}\",album=\"{}\",track=\"{}\"",
                escape_field(source),
                np.play_status,
                np.stream_type,
                escape_field(&np.artist),
                escape_field(&np.album),
                escape_field(&np.track),
            )
        }
        UpdateKind::Volume(volume) => format!(
            "volume,{tags} actual={}i,target={}i,muted={}",
            volume.actual, volume.target, volume.muted
        ),
        UpdateKind::ConnectionState(conn) => format!(
            "connection_state,{tags} state=\"{}\",up={}",
            escape_field(&conn.state),
            conn.up
        ),
    }
}

fn escape_tag(value: &str) -> String {
    value
        .replace(' ', "\\ ")
        .replace(',', "\\,")
        .replace('=', "\\=")
}

fn escape_field(value: &str) -> String {
    value.replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeClient;
    use soundtouch_events::{ConnectionState, ContentItem, NowPlaying, PlayStatus, Source, StreamType, Volume};
    use std::sync::Arc;

    fn speaker(name: &str) -> Speaker {
        Speaker::new(name, "AABBCC", "10.0.0.1", Arc::new(FakeClient::new()))
    }

    #[test]
    fn test_volume_line_protocol() {
        let line = line_protocol(
            &Update::volume(
                "AABBCC",
                Volume {
                    actual: 28,
                    target: 30,
                    muted: false,
                },
            ),
            &speaker("Office"),
        );
        assert_eq!(
            line,
            "volume,speaker=Office,device_id=AABBCC actual=28i,target=30i,muted=false"
        );
    }

    #[test]
    fn test_now_playing_line_protocol_escapes_tags() {
        let np = NowPlaying {
            content: Some(ContentItem::new(Source::Spotify, "track:1", "")),
            play_status: PlayStatus::Playing,
            stream_type: StreamType::TrackOnDemand,
            artist: "Miles Davis".to_string(),
            album: "Kind of Blue".to_string(),
            track: "So What".to_string(),
            ..NowPlaying::default()
        };
        let line = line_protocol(&Update::now_playing("AABBCC", np), &speaker("Living Room"));
        assert!(line.starts_with("now_playing,speaker=Living\\ Room,device_id=AABBCC "));
        assert!(line.contains("artist=\"Miles Davis\""));
        assert!(line.contains("source=\"SPOTIFY\""));
    }

    #[test]
    fn test_connection_state_line_protocol() {
        let line = line_protocol(
            &Update::connection_state(
                "AABBCC",
                ConnectionState {
                    state: "NETWORK_WIFI_CONNECTED".to_string(),
                    up: true,
                },
            ),
            &speaker("Office"),
        );
        assert!(line.contains("state=\"NETWORK_WIFI_CONNECTED\""));
        assert!(line.ends_with("up=true"));
    }

    #[test]
    fn test_missing_url_suspends_policy() {
        let policy = InfluxConnector::new(InfluxConfig::default());
        assert!(!policy.is_enabled());
    }

    #[test]
    fn test_invalid_url_suspends_policy() {
        let policy = InfluxConnector::new(InfluxConfig {
            influx_url: "not a url".to_string(),
            ..InfluxConfig::default()
        });
        assert!(!policy.is_enabled());
    }

    #[test]
    fn test_valid_url_enables_policy() {
        let policy = InfluxConnector::new(InfluxConfig {
            influx_url: "http://influxdb:8086".to_string(),
            database: "soundtouch".to_string(),
            ..InfluxConfig::default()
        });
        assert!(policy.is_enabled());
    }
}
