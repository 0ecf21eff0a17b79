//! Zone coordinator: the single serializing path for zone grouping.
//!
//! Device workers run concurrently, so two speakers can qualify against
//! each other before either mutation lands. All grouping therefore goes
//! through one actor: policies send a [`GroupingMode`] request over the
//! handle, the actor performs the scan-decide-mutate sequence one request
//! at a time, and the directory re-validates every mutation. A mutation
//! rejected because the world moved (a zone appeared or a device got
//! zoned between scan and write) triggers one rescan; if that fails too,
//! the request ends as a no-op.
//!
//! Election is deterministic: candidates are scanned in device-id order
//! (see `Directory::all`), so concurrent triggers converge on the same
//! master instead of electing two.

use crate::directory::{Directory, Speaker};
use soundtouch_events::{ContentItem, DeviceId, PlayStatus, Source};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

const REQUEST_QUEUE_CAPACITY: usize = 32;

/// Scan attempts per request; the second attempt runs only after a
/// conflicting concurrent mutation invalidated the first decision.
const MAX_MUTATION_ATTEMPTS: usize = 2;

/// Compatibility predicate for a grouping request.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupingMode {
    /// Candidates must currently play exactly this content (MagicZone).
    SameContent { content: ContentItem },
    /// Candidates must be playing from one of the accepted sources (AuxJoin).
    CompatibleSource { accepted: Vec<Source> },
}

/// What the coordinator did for a grouping request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// A new zone was created; the trigger is its first member.
    Created { master: DeviceId },
    /// The trigger joined an existing zone.
    Joined { master: DeviceId },
    /// The trigger was already a member of the winning zone.
    AlreadyGrouped { master: DeviceId },
    /// No compatible device qualified, or the request was contended away.
    NoAction,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("zone coordinator is not running")]
    Unavailable,
}

struct GroupRequest {
    trigger: DeviceId,
    mode: GroupingMode,
    reply: oneshot::Sender<GroupOutcome>,
}

/// Cloneable handle used by policies to request grouping.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<GroupRequest>,
}

impl CoordinatorHandle {
    /// Ask the coordinator to group `trigger` per `mode` and wait for the
    /// outcome. The wait is bounded by the coordinator's own work; the
    /// actor never blocks on anything but directory and device queries.
    pub async fn group(
        &self,
        trigger: DeviceId,
        mode: GroupingMode,
    ) -> Result<GroupOutcome, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(GroupRequest {
                trigger,
                mode,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CoordinatorError::Unavailable)?;
        reply_rx.await.map_err(|_| CoordinatorError::Unavailable)
    }
}

/// The grouping actor. One instance per daemon; owns no state of its own,
/// only the serialization of mutations against the directory.
pub struct ZoneCoordinator {
    directory: Arc<Directory>,
    rx: mpsc::Receiver<GroupRequest>,
    shutdown: CancellationToken,
}

impl ZoneCoordinator {
    pub fn spawn(
        directory: Arc<Directory>,
        shutdown: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let coordinator = Self {
            directory,
            rx,
            shutdown,
        };
        (CoordinatorHandle { tx }, tokio::spawn(coordinator.run()))
    }

    async fn run(mut self) {
        debug!("zone coordinator started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => {
                        let outcome = self
                            .handle_request(&request.trigger, &request.mode)
                            .await;
                        let _ = request.reply.send(outcome);
                    }
                    None => break,
                }
            }
        }
        debug!("zone coordinator stopped");
    }

    async fn handle_request(&self, trigger: &DeviceId, mode: &GroupingMode) -> GroupOutcome {
        'attempts: for attempt in 1..=MAX_MUTATION_ATTEMPTS {
            let candidates = self.compatible_candidates(trigger, mode).await;
            if candidates.is_empty() {
                // Expected steady state, not an error.
                debug!(trigger = %trigger, "no compatible device found");
                return GroupOutcome::NoAction;
            }

            // Existing-zone preference: converge on a zone that already has
            // a compatible master instead of fragmenting.
            for candidate in &candidates {
                let Some(zone) = self.directory.zone_of(candidate.device_id()).await else {
                    continue;
                };
                if !zone.is_master(candidate.device_id()) {
                    continue;
                }
                let master = candidate.device_id().clone();
                if zone.contains(trigger) {
                    debug!(trigger = %trigger, master = %master, "already a member");
                    return GroupOutcome::AlreadyGrouped { master };
                }
                match self.directory.add_zone_member(&master, trigger).await {
                    Ok(_) => {
                        info!(trigger = %trigger, master = %master, "joined existing zone");
                        return GroupOutcome::Joined { master };
                    }
                    Err(err) => {
                        debug!(attempt, trigger = %trigger, master = %master, error = %err,
                            "zone changed during grouping, rescanning");
                        continue 'attempts;
                    }
                }
            }

            // New-zone election: the first compatible device in enumeration
            // order becomes master, if it is still free. A first candidate
            // that is already someone's member yields no action.
            let elected = candidates[0].clone();
            let master = elected.device_id().clone();
            if self.directory.zone_of(&master).await.is_some() {
                debug!(trigger = %trigger, candidate = %master,
                    "first compatible device already zoned, nothing to do");
                return GroupOutcome::NoAction;
            }
            match self.directory.create_zone(&master, trigger).await {
                Ok(_) => {
                    info!(trigger = %trigger, master = %master, "created new zone");
                    return GroupOutcome::Created { master };
                }
                Err(err) => {
                    debug!(attempt, trigger = %trigger, master = %master, error = %err,
                        "zone changed during election, rescanning");
                    continue 'attempts;
                }
            }
        }

        debug!(trigger = %trigger, "grouping contended, giving up without mutation");
        GroupOutcome::NoAction
    }

    /// All other known devices satisfying the request's predicate, in
    /// deterministic enumeration order. Devices failing liveness or whose
    /// playback query fails are excluded.
    async fn compatible_candidates(
        &self,
        trigger: &DeviceId,
        mode: &GroupingMode,
    ) -> Vec<Arc<Speaker>> {
        let mut candidates = Vec::new();
        for speaker in self.directory.all().await {
            if speaker.device_id() == trigger {
                continue;
            }
            if !speaker.is_alive().await {
                trace!(speaker = %speaker.name(), "not alive, excluded");
                continue;
            }
            let np = match speaker.now_playing().await {
                Ok(np) => np,
                Err(err) => {
                    debug!(speaker = %speaker.name(), error = %err,
                        "playback query failed, excluded");
                    continue;
                }
            };
            let compatible = match mode {
                GroupingMode::SameContent { content } => np.content.as_ref() == Some(content),
                GroupingMode::CompatibleSource { accepted } => {
                    np.play_status == PlayStatus::Playing
                        && np
                            .content
                            .as_ref()
                            .is_some_and(|c| accepted.contains(&c.source))
                }
            };
            if compatible {
                trace!(speaker = %speaker.name(), "compatible");
                candidates.push(speaker);
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::fake::FakeClient;
    use soundtouch_events::{NowPlaying, StreamType};

    fn radio(content_location: &str) -> NowPlaying {
        NowPlaying {
            content: Some(ContentItem::new(
                Source::LocalInternetRadio,
                content_location,
                "Some Station",
            )),
            play_status: PlayStatus::Playing,
            stream_type: StreamType::RadioStreaming,
            ..NowPlaying::default()
        }
    }

    fn same_content(content_location: &str) -> GroupingMode {
        GroupingMode::SameContent {
            content: ContentItem::new(Source::LocalInternetRadio, content_location, "Some Station"),
        }
    }

    fn aux_accepted() -> Vec<Source> {
        vec![
            Source::LocalInternetRadio,
            Source::StoredMusic,
            Source::Spotify,
            Source::Alexa,
        ]
    }

    async fn add_speaker(
        directory: &Directory,
        name: &str,
        id: &str,
        client: Arc<FakeClient>,
    ) -> Arc<Speaker> {
        let speaker = Arc::new(Speaker::new(name, id, "10.0.0.1", client));
        directory.insert(speaker.clone()).await;
        speaker
    }

    fn start(directory: Arc<Directory>) -> (CoordinatorHandle, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (handle, _task) = ZoneCoordinator::spawn(directory, shutdown.clone());
        (handle, shutdown)
    }

    #[tokio::test]
    async fn test_two_streamers_converge_to_one_zone() {
        let directory = Arc::new(Directory::new());
        let b_client = Arc::new(FakeClient::playing(radio("stationId:1234")));
        let a_client = Arc::new(FakeClient::playing(radio("stationId:1234")));
        add_speaker(&directory, "Kitchen", "B", b_client).await;
        add_speaker(&directory, "Office", "A", a_client).await;
        let (handle, _shutdown) = start(directory.clone());

        // B was already streaming when A starts: A's trigger elects B.
        let outcome = handle
            .group(DeviceId::from("A"), same_content("stationId:1234"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Created {
                master: DeviceId::from("B")
            }
        );

        let zones = directory.zones().await;
        assert_eq!(zones.len(), 1);
        assert!(zones[0].is_master(&DeviceId::from("B")));
        assert!(zones[0].contains(&DeviceId::from("A")));

        // B's own trigger event arrives afterwards: A is zoned but not a
        // master, so nothing further happens.
        let outcome = handle
            .group(DeviceId::from("B"), same_content("stationId:1234"))
            .await
            .unwrap();
        assert_eq!(outcome, GroupOutcome::NoAction);
        assert_eq!(directory.zones().await.len(), 1);
    }

    #[tokio::test]
    async fn test_existing_zone_preferred_over_election() {
        let directory = Arc::new(Directory::new());
        add_speaker(
            &directory,
            "Kitchen",
            "B",
            Arc::new(FakeClient::playing(radio("stationId:1"))),
        )
        .await;
        add_speaker(
            &directory,
            "Bedroom",
            "C",
            Arc::new(FakeClient::playing(radio("stationId:1"))),
        )
        .await;
        add_speaker(&directory, "Office", "A", Arc::new(FakeClient::new())).await;
        directory
            .create_zone(&DeviceId::from("B"), &DeviceId::from("C"))
            .await
            .unwrap();
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(DeviceId::from("A"), same_content("stationId:1"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Joined {
                master: DeviceId::from("B")
            }
        );
        let zones = directory.zones().await;
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].members().len(), 3);
    }

    #[tokio::test]
    async fn test_idempotent_when_already_member() {
        let directory = Arc::new(Directory::new());
        add_speaker(
            &directory,
            "Kitchen",
            "B",
            Arc::new(FakeClient::playing(radio("stationId:1"))),
        )
        .await;
        add_speaker(&directory, "Office", "A", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let first = handle
            .group(DeviceId::from("A"), same_content("stationId:1"))
            .await
            .unwrap();
        assert_eq!(
            first,
            GroupOutcome::Created {
                master: DeviceId::from("B")
            }
        );
        let zones_before = directory.zones().await;

        // Unchanged world state: re-running the algorithm mutates nothing.
        let second = handle
            .group(DeviceId::from("A"), same_content("stationId:1"))
            .await
            .unwrap();
        assert_eq!(
            second,
            GroupOutcome::AlreadyGrouped {
                master: DeviceId::from("B")
            }
        );
        assert_eq!(directory.zones().await, zones_before);
    }

    #[tokio::test]
    async fn test_no_compatible_device_is_a_no_op() {
        let directory = Arc::new(Directory::new());
        add_speaker(
            &directory,
            "Kitchen",
            "B",
            Arc::new(FakeClient::playing(radio("stationId:9"))),
        )
        .await;
        add_speaker(&directory, "Office", "A", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(DeviceId::from("A"), same_content("stationId:1"))
            .await
            .unwrap();
        assert_eq!(outcome, GroupOutcome::NoAction);
        assert!(directory.zones().await.is_empty());
    }

    #[tokio::test]
    async fn test_dead_and_unreachable_devices_excluded() {
        let directory = Arc::new(Directory::new());
        let dead = Arc::new(FakeClient::playing(radio("stationId:1")));
        dead.set_alive(false);
        let unreachable = Arc::new(FakeClient::playing(radio("stationId:1")));
        unreachable.fail_queries();
        add_speaker(&directory, "Kitchen", "B", dead).await;
        add_speaker(&directory, "Bedroom", "C", unreachable).await;
        add_speaker(&directory, "Office", "A", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(DeviceId::from("A"), same_content("stationId:1"))
            .await
            .unwrap();
        assert_eq!(outcome, GroupOutcome::NoAction);
        assert!(directory.zones().await.is_empty());
    }

    #[tokio::test]
    async fn test_aux_join_requires_playing_accepted_source() {
        let directory = Arc::new(Directory::new());
        // Paused spotify does not qualify; neither does playing AUX.
        let paused = NowPlaying {
            play_status: PlayStatus::Paused,
            content: Some(ContentItem::new(Source::Spotify, "track:1", "")),
            ..NowPlaying::default()
        };
        let aux = NowPlaying {
            play_status: PlayStatus::Playing,
            content: Some(ContentItem::new(Source::Aux, "", "")),
            ..NowPlaying::default()
        };
        add_speaker(&directory, "Kitchen", "B", Arc::new(FakeClient::playing(paused))).await;
        add_speaker(&directory, "Bedroom", "D", Arc::new(FakeClient::playing(aux))).await;
        add_speaker(&directory, "Office", "C", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(
                DeviceId::from("C"),
                GroupingMode::CompatibleSource {
                    accepted: aux_accepted(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, GroupOutcome::NoAction);
        assert!(directory.zones().await.is_empty());
    }

    #[tokio::test]
    async fn test_aux_join_elects_playing_streamer() {
        let directory = Arc::new(Directory::new());
        let streaming = NowPlaying {
            play_status: PlayStatus::Playing,
            content: Some(ContentItem::new(Source::StoredMusic, "album:7", "")),
            ..NowPlaying::default()
        };
        add_speaker(
            &directory,
            "Kitchen",
            "B",
            Arc::new(FakeClient::playing(streaming)),
        )
        .await;
        add_speaker(&directory, "Office", "C", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(
                DeviceId::from("C"),
                GroupingMode::CompatibleSource {
                    accepted: aux_accepted(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Created {
                master: DeviceId::from("B")
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_triggers_converge() {
        // A and B each see the other as compatible at the same logical time.
        let directory = Arc::new(Directory::new());
        add_speaker(
            &directory,
            "Office",
            "A",
            Arc::new(FakeClient::playing(radio("stationId:5"))),
        )
        .await;
        add_speaker(
            &directory,
            "Kitchen",
            "B",
            Arc::new(FakeClient::playing(radio("stationId:5"))),
        )
        .await;
        let (handle, _shutdown) = start(directory.clone());

        let h1 = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .group(DeviceId::from("A"), same_content("stationId:5"))
                    .await
                    .unwrap()
            })
        };
        let h2 = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .group(DeviceId::from("B"), same_content("stationId:5"))
                    .await
                    .unwrap()
            })
        };
        let (o1, o2) = (h1.await.unwrap(), h2.await.unwrap());

        // Exactly one zone with one master, regardless of arrival order.
        let zones = directory.zones().await;
        assert_eq!(zones.len(), 1, "got outcomes {o1:?} / {o2:?}");
        let zone = &zones[0];
        assert_eq!(zone.members().len(), 2);
        let mutations = [&o1, &o2]
            .iter()
            .filter(|o| matches!(o, GroupOutcome::Created { .. } | GroupOutcome::Joined { .. }))
            .count();
        assert_eq!(mutations, 1);
    }

    #[tokio::test]
    async fn test_election_order_is_deterministic() {
        // Three compatible candidates; the smallest device id wins.
        let directory = Arc::new(Directory::new());
        for (name, id) in [("Bedroom", "C"), ("Kitchen", "B"), ("Bath", "D")] {
            add_speaker(
                &directory,
                name,
                id,
                Arc::new(FakeClient::playing(radio("stationId:5"))),
            )
            .await;
        }
        add_speaker(&directory, "Office", "A", Arc::new(FakeClient::new())).await;
        let (handle, _shutdown) = start(directory.clone());

        let outcome = handle
            .group(DeviceId::from("A"), same_content("stationId:5"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            GroupOutcome::Created {
                master: DeviceId::from("B")
            }
        );
    }
}
