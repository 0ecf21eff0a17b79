//! Event dispatcher: one worker per speaker, one ordered policy pass per
//! update.
//!
//! Each attached speaker gets its own task pumping that speaker's update
//! stream. Within a worker, updates are handled strictly in order and the
//! next update is not taken until the current policy pass finishes; across
//! workers there is no ordering guarantee. A policy failing - an `Err` or
//! a panic - is logged at the dispatch boundary and never stops the
//! remaining policies or the worker.

use crate::coordinator::CoordinatorHandle;
use crate::directory::{Directory, Speaker};
use crate::policies::Policy;
use futures::FutureExt;
use soundtouch_events::Update;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dependencies handed to every policy invocation.
///
/// Policies read the directory and request zone mutations through the
/// coordinator handle; they hold no global state.
pub struct PolicyContext {
    pub directory: Arc<Directory>,
    pub coordinator: CoordinatorHandle,
}

/// Fans in per-speaker update streams and runs the policy chain.
pub struct Dispatcher {
    policies: Arc<[Arc<dyn Policy>]>,
    ctx: Arc<PolicyContext>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        policies: Vec<Arc<dyn Policy>>,
        ctx: Arc<PolicyContext>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            policies: policies.into(),
            ctx,
            shutdown,
        }
    }

    pub fn policies(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Run one policy pass for a single update, in registration order.
    pub async fn dispatch(&self, speaker: &Speaker, update: &Update) {
        run_policy_pass(&self.policies, &self.ctx, speaker, update).await;
    }

    /// Spawn the worker pumping this speaker's update stream.
    pub fn attach(&self, speaker: Arc<Speaker>) -> JoinHandle<()> {
        let policies = self.policies.clone();
        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.clone();
        let mut rx = speaker.subscribe();

        tokio::spawn(async move {
            info!(speaker = %speaker.name(), device_id = %speaker.device_id(),
                "dispatching updates");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(update) => {
                            run_policy_pass(&policies, &ctx, &speaker, &update).await;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(speaker = %speaker.name(), missed,
                                "update stream lagged, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
            debug!(speaker = %speaker.name(), "dispatch worker stopped");
        })
    }
}

async fn run_policy_pass(
    policies: &[Arc<dyn Policy>],
    ctx: &PolicyContext,
    speaker: &Speaker,
    update: &Update,
) {
    for policy in policies {
        if !policy.is_enabled() {
            continue;
        }
        let outcome = AssertUnwindSafe(policy.execute(ctx, update, speaker))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(policy = policy.name(), speaker = %speaker.name(),
                    update = update.kind_name(), error = %err,
                    "policy execution failed");
            }
            Err(_) => {
                error!(policy = policy.name(), speaker = %speaker.name(),
                    update = update.kind_name(),
                    "policy panicked, continuing with remaining policies");
            }
        }
        if policy.is_terminal() {
            debug!(policy = policy.name(), "terminal policy, chain stopped");
            break;
        }
    }
}
