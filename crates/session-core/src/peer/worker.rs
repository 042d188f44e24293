//! Per-participant negotiation worker
//!
//! Each link gets one task that performs its asynchronous operations strictly
//! in command order and reports results back to the session queue. Different
//! participants negotiate concurrently; one participant's steps never
//! interleave.
//!
//! Workers are stopped cooperatively. A cancelled worker closes whatever link
//! it has created, including one the session has not heard about yet.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use telecare_media_core::{LocalTrack, TrackKind};
use telecare_signaling::{IceCandidate, SessionDescription};

use crate::events::InboundEvent;
use crate::ice::IceConfiguration;
use crate::peer::link::{DataChannelLink, LinkError, LinkEventSender, LinkId, PeerLink, PeerLinkFactory};
use crate::types::ParticipantId;

/// Step requested from a worker
#[derive(Debug)]
pub(crate) enum PeerCommand {
    CreateOffer,
    /// Apply a remote offer and answer it
    AnswerOffer(SessionDescription),
    ApplyAnswer(SessionDescription),
    AddCandidates(Vec<IceCandidate>),
    ReplaceTrack(TrackKind, LocalTrack),
}

/// Result reported by a worker
#[derive(Debug)]
pub(crate) enum PeerOutcome {
    /// The link exists; `channel` is set when this side created the data channel
    LinkReady {
        link: Arc<dyn PeerLink>,
        channel: Option<Arc<dyn DataChannelLink>>,
    },
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    RemoteDescriptionApplied,
    CandidatesApplied { applied: usize, failed: usize },
    TrackReplaced(TrackKind),
    /// A negotiation step failed; the worker has stopped
    Failed { reason: String },
}

pub(crate) struct WorkerSetup {
    pub participant: ParticipantId,
    pub link_id: LinkId,
    pub factory: Arc<dyn PeerLinkFactory>,
    pub ice: IceConfiguration,
    pub tracks: Vec<LocalTrack>,
    /// Label of the data channel to create; `None` on the answering side
    pub data_channel: Option<String>,
    pub inbound: mpsc::Sender<InboundEvent>,
}

/// Handle to a running worker
///
/// Dropping the handle cancels the worker just like [`PeerWorker::cancel`].
pub(crate) struct PeerWorker {
    commands: mpsc::UnboundedSender<PeerCommand>,
    cancel: oneshot::Sender<()>,
}

impl PeerWorker {
    pub fn spawn(setup: WorkerSetup) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (cancel, cancelled) = oneshot::channel();
        tokio::spawn(run(setup, commands_rx, cancelled));
        Self { commands, cancel }
    }

    /// Queue a command; returns false if the worker has stopped
    pub fn send(&self, command: PeerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Stop at the next await point and close the link if one was created
    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}

struct Reporter {
    participant: ParticipantId,
    link_id: LinkId,
    inbound: mpsc::Sender<InboundEvent>,
}

impl Reporter {
    async fn report(&self, outcome: PeerOutcome) -> bool {
        self.inbound
            .send(InboundEvent::Peer {
                participant: self.participant.clone(),
                link_id: self.link_id,
                outcome,
            })
            .await
            .is_ok()
    }
}

async fn run(
    setup: WorkerSetup,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    mut cancelled: oneshot::Receiver<()>,
) {
    let participant = setup.participant.clone();
    let link_id = setup.link_id;
    let mut created = None;

    // Sender dropped counts as cancellation too
    let cancelled = tokio::select! {
        biased;
        _ = &mut cancelled => true,
        _ = negotiate(setup, commands, &mut created) => false,
    };

    if cancelled {
        if let Some(link) = created {
            debug!("Worker for {}#{} cancelled, closing its link", participant, link_id);
            link.close().await;
        }
    }
}

async fn negotiate(
    setup: WorkerSetup,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    created: &mut Option<Arc<dyn PeerLink>>,
) {
    let WorkerSetup { participant, link_id, factory, ice, tracks, data_channel, inbound } = setup;
    let reporter = Reporter { participant: participant.clone(), link_id, inbound: inbound.clone() };

    let events = LinkEventSender::new(participant.clone(), link_id, inbound);
    let link = match factory.create_link(&participant, &ice, events).await {
        Ok(link) => link,
        Err(e) => {
            reporter.report(PeerOutcome::Failed { reason: format!("link creation failed: {}", e) }).await;
            return;
        }
    };
    *created = Some(link.clone());

    for track in &tracks {
        if let Err(e) = link.add_track(track).await {
            link.close().await;
            reporter.report(PeerOutcome::Failed { reason: format!("adding {:?} track failed: {}", track.kind(), e) }).await;
            return;
        }
    }

    let channel = match data_channel {
        Some(label) => match link.create_data_channel(&label).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("Data channel to {} unavailable: {}", participant, e);
                None
            }
        },
        None => None,
    };

    if !reporter.report(PeerOutcome::LinkReady { link: link.clone(), channel }).await {
        link.close().await;
        return;
    }
    debug!("Peer link {}#{} ready", participant, link_id);

    while let Some(command) = commands.recv().await {
        let result = execute(link.as_ref(), command, &reporter).await;
        match result {
            Ok(Some(outcome)) => {
                if !reporter.report(outcome).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                reporter.report(PeerOutcome::Failed { reason: e.to_string() }).await;
                break;
            }
        }
    }
}

async fn execute(
    link: &dyn PeerLink,
    command: PeerCommand,
    reporter: &Reporter,
) -> Result<Option<PeerOutcome>, LinkError> {
    match command {
        PeerCommand::CreateOffer => {
            let offer = link.create_offer().await?;
            link.set_local_description(&offer).await?;
            Ok(Some(PeerOutcome::OfferCreated(offer)))
        }
        PeerCommand::AnswerOffer(offer) => {
            link.set_remote_description(&offer).await?;
            reporter.report(PeerOutcome::RemoteDescriptionApplied).await;
            let answer = link.create_answer().await?;
            link.set_local_description(&answer).await?;
            Ok(Some(PeerOutcome::AnswerCreated(answer)))
        }
        PeerCommand::ApplyAnswer(answer) => {
            link.set_remote_description(&answer).await?;
            Ok(Some(PeerOutcome::RemoteDescriptionApplied))
        }
        PeerCommand::AddCandidates(candidates) => {
            let mut applied = 0;
            let mut failed = 0;
            for candidate in &candidates {
                match link.add_ice_candidate(candidate).await {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        warn!("Rejected ICE candidate from {}: {}", reporter.participant, e);
                        failed += 1;
                    }
                }
            }
            Ok(Some(PeerOutcome::CandidatesApplied { applied, failed }))
        }
        PeerCommand::ReplaceTrack(kind, track) => match link.replace_track(kind, &track).await {
            Ok(()) => Ok(Some(PeerOutcome::TrackReplaced(kind))),
            Err(e) => {
                warn!("Track substitution for {} failed: {}", reporter.participant, e);
                Ok(None)
            }
        },
    }
}
