//! Per-device state-change events.
//!
//! `Update` is the event the dispatcher fans out to policies: the
//! originating device id plus an explicit tagged payload. Policies match
//! on [`UpdateKind`] variants; there is no runtime type-name inspection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a speaker, as reported by the device itself.
///
/// Device ids are opaque strings; their lexicographic order is the
/// deterministic enumeration order used for zone-master election.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Content source selected on a speaker.
///
/// Serialized as the wire names the devices report; names this build does
/// not know map to `Unknown` instead of failing the whole update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Source {
    LocalInternetRadio,
    TuneIn,
    StoredMusic,
    Spotify,
    Alexa,
    Bluetooth,
    Aux,
    /// The speaker's own product input (TV on soundbars).
    Product,
    Standby,
    #[default]
    Unknown,
}

impl Source {
    /// Wire name of the source, as the devices report it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalInternetRadio => "LOCAL_INTERNET_RADIO",
            Self::TuneIn => "TUNEIN",
            Self::StoredMusic => "STORED_MUSIC",
            Self::Spotify => "SPOTIFY",
            Self::Alexa => "ALEXA",
            Self::Bluetooth => "BLUETOOTH",
            Self::Aux => "AUX",
            Self::Product => "PRODUCT",
            Self::Standby => "STANDBY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            "LOCAL_INTERNET_RADIO" => Self::LocalInternetRadio,
            "TUNEIN" => Self::TuneIn,
            "STORED_MUSIC" => Self::StoredMusic,
            "SPOTIFY" => Self::Spotify,
            "ALEXA" => Self::Alexa,
            "BLUETOOTH" => Self::Bluetooth,
            "AUX" => Self::Aux,
            "PRODUCT" => Self::Product,
            "STANDBY" => Self::Standby,
            _ => Self::Unknown,
        }
    }
}

/// Transport state of the current selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayStatus {
    Playing,
    Paused,
    Stopped,
    Buffering,
    #[default]
    Unknown,
}

impl PlayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "PLAY_STATE",
            Self::Paused => "PAUSE_STATE",
            Self::Stopped => "STOP_STATE",
            Self::Buffering => "BUFFERING_STATE",
            Self::Unknown => "INVALID_PLAY_STATUS",
        }
    }
}

impl From<&str> for PlayStatus {
    fn from(s: &str) -> Self {
        match s {
            "PLAY_STATE" => Self::Playing,
            "PAUSE_STATE" => Self::Paused,
            "STOP_STATE" => Self::Stopped,
            "BUFFERING_STATE" => Self::Buffering,
            _ => Self::Unknown,
        }
    }
}

/// Stream category of the current selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamType {
    RadioStreaming,
    TrackOnDemand,
    NoTransportControls,
    #[default]
    Unknown,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RadioStreaming => "RADIO_STREAMING",
            Self::TrackOnDemand => "TRACK_ONDEMAND",
            Self::NoTransportControls => "NO_TRANSPORT_CONTROLS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<&str> for StreamType {
    fn from(s: &str) -> Self {
        match s {
            "RADIO_STREAMING" => Self::RadioStreaming,
            "TRACK_ONDEMAND" => Self::TrackOnDemand,
            "NO_TRANSPORT_CONTROLS" => Self::NoTransportControls,
            _ => Self::Unknown,
        }
    }
}

/// The wire-name serde treatment shared by the three closed enums above:
/// serialize as the wire string, deserialize unknown names to `Unknown`.
macro_rules! wire_name_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let name = String::deserialize(deserializer)?;
                Ok(Self::from(name.as_str()))
            }
        }
    };
}

wire_name_serde!(Source);
wire_name_serde!(PlayStatus);
wire_name_serde!(StreamType);

/// The content descriptor of a selection: where it comes from and which
/// stream it is. Two speakers playing the same `ContentItem` are candidates
/// for zone grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub source: Source,
    /// Content identifier within the source (stream URL, track id, ...).
    pub location: String,
    /// Display name of the selection (station or album name).
    #[serde(default)]
    pub name: String,
}

impl ContentItem {
    pub fn new(source: Source, location: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source,
            location: location.into(),
            name: name.into(),
        }
    }
}

/// Snapshot of what a speaker is currently playing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    /// Selected content, absent in standby.
    #[serde(default)]
    pub content: Option<ContentItem>,
    #[serde(default)]
    pub play_status: PlayStatus,
    #[serde(default)]
    pub stream_type: StreamType,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
}

/// Volume state of a speaker. Values are the device's 0-100 scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub actual: i32,
    pub target: i32,
    #[serde(default)]
    pub muted: bool,
}

/// Network connection state of a speaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub state: String,
    pub up: bool,
}

/// A single state-change event from one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub device_id: DeviceId,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

/// The payload of an [`Update`], tagged by event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UpdateKind {
    ConnectionState(ConnectionState),
    NowPlaying(NowPlaying),
    Volume(Volume),
}

impl UpdateKind {
    /// Event-kind name used in allow/deny lists and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionState(_) => "ConnectionStateUpdated",
            Self::NowPlaying(_) => "NowPlaying",
            Self::Volume(_) => "Volume",
        }
    }
}

impl Update {
    pub fn now_playing(device_id: impl Into<DeviceId>, np: NowPlaying) -> Self {
        Self {
            device_id: device_id.into(),
            kind: UpdateKind::NowPlaying(np),
        }
    }

    pub fn volume(device_id: impl Into<DeviceId>, volume: Volume) -> Self {
        Self {
            device_id: device_id.into(),
            kind: UpdateKind::Volume(volume),
        }
    }

    pub fn connection_state(device_id: impl Into<DeviceId>, state: ConnectionState) -> Self {
        Self {
            device_id: device_id.into(),
            kind: UpdateKind::ConnectionState(state),
        }
    }

    /// Event-kind name (see [`UpdateKind::name`]).
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// Artist of the playing selection, if this is a `NowPlaying` update.
    pub fn artist(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::NowPlaying(np) if !np.artist.is_empty() => Some(&np.artist),
            _ => None,
        }
    }

    /// Album of the playing selection, if this is a `NowPlaying` update.
    pub fn album(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::NowPlaying(np) if !np.album.is_empty() => Some(&np.album),
            _ => None,
        }
    }

    /// Content descriptor carried by the update, if any.
    pub fn content_item(&self) -> Option<&ContentItem> {
        match &self.kind {
            UpdateKind::NowPlaying(np) => np.content.as_ref(),
            _ => None,
        }
    }

    pub fn has_content_item(&self) -> bool {
        self.content_item().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radio_now_playing() -> NowPlaying {
        NowPlaying {
            content: Some(ContentItem::new(
                Source::LocalInternetRadio,
                "stationId:1234",
                "Radio Swiss Jazz",
            )),
            play_status: PlayStatus::Playing,
            stream_type: StreamType::RadioStreaming,
            track: "Night Train".to_string(),
            artist: "Oscar Peterson".to_string(),
            album: "Night Train".to_string(),
        }
    }

    #[test]
    fn test_kind_names() {
        let np = Update::now_playing("AA11", radio_now_playing());
        assert_eq!(np.kind_name(), "NowPlaying");

        let vol = Update::volume("AA11", Volume::default());
        assert_eq!(vol.kind_name(), "Volume");

        let conn = Update::connection_state("AA11", ConnectionState::default());
        assert_eq!(conn.kind_name(), "ConnectionStateUpdated");
    }

    #[test]
    fn test_content_helpers() {
        let np = Update::now_playing("AA11", radio_now_playing());
        assert_eq!(np.artist(), Some("Oscar Peterson"));
        assert_eq!(np.album(), Some("Night Train"));
        assert!(np.has_content_item());
        assert_eq!(
            np.content_item().map(|c| c.location.as_str()),
            Some("stationId:1234")
        );

        let vol = Update::volume("AA11", Volume::default());
        assert_eq!(vol.artist(), None);
        assert!(!vol.has_content_item());
    }

    #[test]
    fn test_update_serialization() {
        let update = Update::now_playing("AA11", radio_now_playing());
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("NowPlaying"));
        assert!(json.contains("RADIO_STREAMING"));

        let deserialized: Update = serde_json::from_str(&json).unwrap();
        assert_eq!(update, deserialized);
    }

    #[test]
    fn test_source_from_wire_name() {
        assert_eq!(
            Source::from("LOCAL_INTERNET_RADIO"),
            Source::LocalInternetRadio
        );
        assert_eq!(Source::from("AUX"), Source::Aux);
        assert_eq!(Source::from("SOMETHING_NEW"), Source::Unknown);
    }

    #[test]
    fn test_unknown_wire_values_deserialize() {
        let json = r#"{"source":"SOME_FUTURE_SOURCE","location":"x","name":"y"}"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.source, Source::Unknown);

        let json = r#""BUFFERING_STATE""#;
        let status: PlayStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status, PlayStatus::Buffering);
    }

    #[test]
    fn test_device_id_ordering() {
        let mut ids = vec![DeviceId::from("C3"), DeviceId::from("A1"), DeviceId::from("B2")];
        ids.sort();
        assert_eq!(
            ids.iter().map(DeviceId::as_str).collect::<Vec<_>>(),
            vec!["A1", "B2", "C3"]
        );
    }
}
