//! Device transports feeding the dispatcher.
//!
//! The network discovery and wire protocol live outside this crate; a
//! transport only has to announce speakers into the directory, attach
//! them to the dispatcher and publish their updates. The bundled
//! [`replay`] transport drives the daemon from a JSONL file for
//! development and integration testing.

pub mod replay;

use crate::config::AppConfig;
use crate::directory::Directory;
use crate::dispatcher::Dispatcher;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A producer of speakers and their per-device update sequences.
#[async_trait]
pub trait UpdateSource: Send {
    /// Run until exhausted or cancelled.
    async fn run(
        self: Box<Self>,
        directory: Arc<Directory>,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Pick the update source named by the configuration, if any.
pub fn from_config(cfg: &AppConfig) -> Option<Box<dyn UpdateSource>> {
    cfg.replay
        .as_ref()
        .map(|c| Box::new(replay::ReplaySource::new(c.clone())) as Box<dyn UpdateSource>)
}
