//! Shared domain types for the SoundTouch automation ecosystem.
//!
//! This crate defines the types that cross boundaries between:
//! - the automation daemon (dispatcher, policies, zone coordinator)
//! - device transports that announce speakers and publish their updates
//! - persistence records derived from update content
//!
//! # Modules
//! - [`update`] - Per-device state-change events (Update, NowPlaying, Volume, ...)
//! - [`zone`] - Synchronized-playback zone types

pub mod update;
pub mod zone;

// Re-export commonly used types at crate root
pub use update::{
    ConnectionState, ContentItem, DeviceId, NowPlaying, PlayStatus, Source, StreamType, Update,
    UpdateKind, Volume,
};
pub use zone::Zone;
