//! SoundTouch Automation daemon.
//!
//! Wires the policy chain, the zone coordinator and the dispatcher
//! together, then hands control to the configured update source until
//! ctrl-c.

use anyhow::Result;
use soundtouch_automation::config;
use soundtouch_automation::coordinator::ZoneCoordinator;
use soundtouch_automation::directory::Directory;
use soundtouch_automation::dispatcher::{Dispatcher, PolicyContext};
use soundtouch_automation::{policies, sources, version};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SAMPLE_HEADER: &str = r#"# SoundTouch Automation Configuration
# Created by {version}
#
# SoundTouch Automation is entirely policy driven. All functionality is
# performed by policies.
#
# Policies must be declared in here to be active.
# To deactivate a policy, comment out its section and any variables.
#
# Where parameters can be set in the config file or environment variables
# the order of precedence is as follows:
#     defaults < config file < environment variables.

# Global section contains global, policy independent parameters
[global]
interface = "en0"

# Will be ignored if static_speakers defined
no_of_soundtouch_systems = 7

# static_speakers = [
#     "192.168.178.21",
#     "192.168.178.32",
# ]
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soundtouch_automation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting {}", version::full_version());

    let config_path =
        std::env::var("SOUNDTOUCH_CONFIG").unwrap_or_else(|_| "config".to_string());
    let cfg = config::load_config(&config_path)?;
    tracing::debug!(?cfg, "configuration loaded");

    if cfg.sample_config {
        print_sample_config();
        tracing::info!("Dumped sample config file");
        return Ok(());
    }

    // A persistence store that cannot be opened aborts startup here,
    // before any dispatch begins.
    let chain = policies::from_config(&cfg)?;

    let directory = Arc::new(Directory::new());
    let shutdown = CancellationToken::new();
    let (coordinator, coordinator_task) =
        ZoneCoordinator::spawn(directory.clone(), shutdown.clone());
    let ctx = Arc::new(PolicyContext {
        directory: directory.clone(),
        coordinator,
    });
    let dispatcher = Arc::new(Dispatcher::new(chain, ctx, shutdown.clone()));

    let source_task = match sources::from_config(&cfg) {
        Some(source) => {
            let directory = directory.clone();
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = source.run(directory, dispatcher, shutdown).await {
                    tracing::error!(error = %err, "update source failed");
                }
            }))
        }
        None => {
            tracing::warn!("no update source configured, waiting for shutdown");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    if let Some(task) = source_task {
        let _ = task.await;
    }
    let _ = coordinator_task.await;
    Ok(())
}

fn print_sample_config() {
    let mut sample = SAMPLE_HEADER.replace("{version}", &version::full_version());
    for snippet in policies::sample_configs() {
        sample.push_str(snippet);
    }
    println!("{sample}");
}
