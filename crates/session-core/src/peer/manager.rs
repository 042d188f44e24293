//! Peer connection lifecycle for every remote participant
//!
//! The manager runs inside the session task. It decides what each signaling
//! frame, link callback and worker result means for a participant, and hands
//! the asynchronous link work to that participant's [`PeerWorker`].
//!
//! Glare (both sides offering at once) is resolved by participant id: the
//! lexicographically smaller id keeps its offer, the larger one drops its
//! pending link and answers on a fresh one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use telecare_media_core::{LocalTrack, RemoteTrack, TrackKind};
use telecare_signaling::{IceCandidate, SessionDescription, SignalingMessage, SignalingTransport};

use crate::channel::{ChannelMessage, DataChannelProtocol};
use crate::error::{Result, SessionError};
use crate::events::{InboundEvent, SessionEvent};
use crate::ice::IceConfiguration;
use crate::peer::link::{LinkEvent, LinkId, LinkState, PeerLink, PeerLinkFactory};
use crate::peer::state::{PeerConnectionState, SignalingPhase};
use crate::peer::worker::{PeerCommand, PeerOutcome, PeerWorker, WorkerSetup};
use crate::types::{ParticipantId, ParticipantInfo, ParticipantRole, SessionId};

/// Whether our pending offer wins a glare against `remote`
pub fn keeps_local_offer(local: &ParticipantId, remote: &ParticipantId) -> bool {
    local < remote
}

pub(crate) struct PeerManagerSetup {
    pub session_id: SessionId,
    pub local_id: ParticipantId,
    pub factory: Arc<dyn PeerLinkFactory>,
    pub ice: IceConfiguration,
    pub signaling: SignalingTransport,
    pub inbound: mpsc::Sender<InboundEvent>,
    pub events: broadcast::Sender<SessionEvent>,
    pub negotiation_timeout: Duration,
    pub channels: DataChannelProtocol,
}

struct PeerEntry {
    role: ParticipantRole,
    joined_at: DateTime<Utc>,
    state: PeerConnectionState,
    link_id: LinkId,
    worker: Option<PeerWorker>,
    link: Option<Arc<dyn PeerLink>>,
    local_description_sent: bool,
    // Local candidates gathered before our offer/answer went out
    local_candidates: Vec<IceCandidate>,
    connected: bool,
    remote_tracks: Vec<RemoteTrack>,
    timeout: Option<JoinHandle<()>>,
}

impl PeerEntry {
    fn new(role: ParticipantRole) -> Self {
        Self {
            role,
            joined_at: Utc::now(),
            state: PeerConnectionState::new(),
            link_id: 0,
            worker: None,
            link: None,
            local_description_sent: false,
            local_candidates: Vec::new(),
            connected: false,
            remote_tracks: Vec::new(),
            timeout: None,
        }
    }

    /// Stop the worker and timer and return the link for closing
    ///
    /// A link still being set up is closed by the cancelled worker itself.
    fn release(&mut self) -> Option<Arc<dyn PeerLink>> {
        if let Some(worker) = self.worker.take() {
            worker.cancel();
        }
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
        self.connected = false;
        self.local_description_sent = false;
        self.local_candidates.clear();
        self.remote_tracks.clear();
        self.link.take()
    }

    fn send(&self, command: PeerCommand) {
        match &self.worker {
            Some(worker) => {
                if !worker.send(command) {
                    debug!("Worker for link {} already stopped", self.link_id);
                }
            }
            None => debug!("No worker for link {}, dropping {:?}", self.link_id, command),
        }
    }
}

/// Negotiation and lifecycle of all peer links in a session
pub struct PeerConnectionManager {
    session_id: SessionId,
    local_id: ParticipantId,
    factory: Arc<dyn PeerLinkFactory>,
    ice: IceConfiguration,
    signaling: SignalingTransport,
    inbound: mpsc::Sender<InboundEvent>,
    events: broadcast::Sender<SessionEvent>,
    negotiation_timeout: Duration,
    channels: DataChannelProtocol,
    local_audio: Option<LocalTrack>,
    outgoing_video: Option<LocalTrack>,
    peers: HashMap<ParticipantId, PeerEntry>,
    seen: Vec<ParticipantId>,
    next_link_id: LinkId,
}

impl PeerConnectionManager {
    pub(crate) fn new(setup: PeerManagerSetup) -> Self {
        Self {
            session_id: setup.session_id,
            local_id: setup.local_id,
            factory: setup.factory,
            ice: setup.ice,
            signaling: setup.signaling,
            inbound: setup.inbound,
            events: setup.events,
            negotiation_timeout: setup.negotiation_timeout,
            channels: setup.channels,
            local_audio: None,
            outgoing_video: None,
            peers: HashMap::new(),
            seen: Vec::new(),
            next_link_id: 0,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Tracks attached to links created from now on
    pub fn set_local_tracks(&mut self, audio: Option<LocalTrack>, video: Option<LocalTrack>) {
        self.local_audio = audio;
        self.outgoing_video = video;
    }

    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.peers.contains_key(participant)
    }

    pub fn phase(&self, participant: &ParticipantId) -> Option<SignalingPhase> {
        self.peers.get(participant).map(|entry| entry.state.phase)
    }

    pub fn is_connected(&self) -> bool {
        self.peers.values().any(|entry| entry.connected)
    }

    /// Participants whose link is not closed
    pub fn active_participants(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .peers
            .iter()
            .filter(|(_, entry)| entry.state.phase != SignalingPhase::Closed)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every participant seen during the session, in order of first appearance
    pub fn seen_participants(&self) -> &[ParticipantId] {
        &self.seen
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        let mut list: Vec<ParticipantInfo> = self
            .peers
            .iter()
            .map(|(id, entry)| ParticipantInfo {
                participant_id: id.clone(),
                role: entry.role,
                phase: entry.state.phase,
                connected: entry.connected,
                joined_at: entry.joined_at,
                remote_tracks: entry.remote_tracks.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.participant_id.cmp(&b.participant_id)));
        list
    }

    /// Links that currently carry media
    pub fn connected_links(&self) -> Vec<Arc<dyn PeerLink>> {
        self.peers
            .values()
            .filter(|entry| entry.connected)
            .filter_map(|entry| entry.link.clone())
            .collect()
    }

    pub fn channels(&self) -> &DataChannelProtocol {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut DataChannelProtocol {
        &mut self.channels
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn is_current(&self, participant: &ParticipantId, link_id: LinkId) -> bool {
        self.peers
            .get(participant)
            .map_or(false, |entry| entry.link_id == link_id && entry.state.phase != SignalingPhase::Closed)
    }

    async fn send_signal(&self, message: telecare_signaling::Result<SignalingMessage>) {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to build signaling frame: {}", e);
                return;
            }
        };
        if let Err(e) = self.signaling.send(&message).await {
            warn!(kind = %message.kind, to = ?message.to, error = %e, "Signaling send failed");
        }
    }

    fn register(&mut self, participant: &ParticipantId, role: ParticipantRole) {
        self.peers.insert(participant.clone(), PeerEntry::new(role));
        if !self.seen.contains(participant) {
            self.seen.push(participant.clone());
        }
        self.emit(SessionEvent::ParticipantJoined { participant_id: participant.clone(), role });
    }

    fn arm_timeout(&self, participant: &ParticipantId, link_id: LinkId) -> JoinHandle<()> {
        let inbound = self.inbound.clone();
        let participant = participant.clone();
        let timeout = self.negotiation_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = inbound.send(InboundEvent::NegotiationTimeout { participant, link_id }).await;
        })
    }

    /// Replace the participant's link with a fresh one and return the old link
    fn start_link(&mut self, participant: &ParticipantId, offerer: bool) -> Option<Arc<dyn PeerLink>> {
        self.next_link_id += 1;
        let link_id = self.next_link_id;

        let tracks: Vec<LocalTrack> = self.local_audio.iter().chain(self.outgoing_video.iter()).cloned().collect();
        let worker = PeerWorker::spawn(WorkerSetup {
            participant: participant.clone(),
            link_id,
            factory: self.factory.clone(),
            ice: self.ice.clone(),
            tracks,
            data_channel: offerer.then(|| self.channels.label().to_string()),
            inbound: self.inbound.clone(),
        });
        let timeout = self.arm_timeout(participant, link_id);

        let entry = self.peers.get_mut(participant)?;
        let previous = entry.release();
        entry.link_id = link_id;
        entry.worker = Some(worker);
        entry.timeout = Some(timeout);
        previous
    }

    /// Start negotiating with a participant that just announced itself.
    ///
    /// A participant already in the roster is treated as a rejoin and starts
    /// from fresh state.
    pub async fn handle_user_joined(&mut self, participant: &ParticipantId, role: ParticipantRole) {
        if self.contains(participant) {
            info!(participant = %participant, "Participant rejoined, resetting peer state");
            self.teardown(participant).await;
        }
        self.register(participant, role);
        if let Err(e) = self.create_offer(participant).await {
            warn!(participant = %participant, error = %e, "Could not start negotiation");
        }
    }

    /// Create a link and send an offer to `participant`
    pub async fn create_offer(&mut self, participant: &ParticipantId) -> Result<()> {
        let phase = self
            .phase(participant)
            .ok_or_else(|| SessionError::ParticipantNotFound { participant_id: participant.to_string() })?;
        if phase.is_negotiating() || phase == SignalingPhase::Connected {
            return Err(SessionError::invalid_state(SignalingPhase::Idle, phase));
        }

        let previous = self.start_link(participant, true);
        self.channels.mark_closed(participant);
        if let Some(entry) = self.peers.get_mut(participant) {
            entry.state = PeerConnectionState::new();
            entry.state.phase = SignalingPhase::OfferSent;
            entry.state.has_local_offer = true;
            entry.send(PeerCommand::CreateOffer);
        }
        if let Some(link) = previous {
            link.close().await;
        }

        info!(participant = %participant, "Offer requested");
        Ok(())
    }

    /// Answer a remote offer, resolving glare by participant id
    pub async fn handle_offer(&mut self, from: &ParticipantId, offer: SessionDescription) -> Result<()> {
        if !self.contains(from) {
            self.register(from, ParticipantRole::Unknown);
        }

        let phase = self.phase(from).unwrap_or(SignalingPhase::Idle);
        match phase {
            SignalingPhase::OfferSent => {
                if keeps_local_offer(&self.local_id, from) {
                    info!(participant = %from, "Glare: keeping local offer, ignoring remote offer");
                    // Candidates so far belong to the discarded remote offer
                    if let Some(entry) = self.peers.get_mut(from) {
                        entry.state.ice_candidates_queued.clear();
                    }
                    return Err(SessionError::GlareConflict { participant_id: from.to_string() });
                }
                info!(participant = %from, "Glare: yielding to remote offer");
            }
            SignalingPhase::OfferReceived | SignalingPhase::Answered | SignalingPhase::Connected => {
                let reason = format!("renegotiation not supported (offer received while {:?})", phase);
                self.fail(from, reason.clone()).await;
                return Err(SessionError::negotiation(from, reason));
            }
            SignalingPhase::Idle | SignalingPhase::Closed => {}
        }

        // Remote candidates queued so far belong to this offer
        let queued = self
            .peers
            .get_mut(from)
            .map(|entry| std::mem::take(&mut entry.state.ice_candidates_queued))
            .unwrap_or_default();

        let previous = self.start_link(from, false);
        self.channels.mark_closed(from);
        if let Some(entry) = self.peers.get_mut(from) {
            entry.state = PeerConnectionState::new();
            entry.state.ice_candidates_queued = queued;
            entry.state.phase = SignalingPhase::OfferReceived;
            entry.send(PeerCommand::AnswerOffer(offer));
        }
        if let Some(link) = previous {
            link.close().await;
        }
        Ok(())
    }

    /// Apply the answer to our pending offer
    pub fn handle_answer(&mut self, from: &ParticipantId, answer: SessionDescription) -> Result<()> {
        let entry = self
            .peers
            .get_mut(from)
            .ok_or_else(|| SessionError::ParticipantNotFound { participant_id: from.to_string() })?;

        if entry.state.phase != SignalingPhase::OfferSent {
            warn!(participant = %from, phase = ?entry.state.phase, "Ignoring unexpected answer");
            return Ok(());
        }
        entry.send(PeerCommand::ApplyAnswer(answer));
        debug!(participant = %from, "Applying answer");
        Ok(())
    }

    /// Apply a remote candidate, or queue it until the remote description is set
    pub fn handle_ice_candidate(&mut self, from: &ParticipantId, candidate: IceCandidate) -> Result<()> {
        let Some(entry) = self.peers.get_mut(from) else {
            debug!(participant = %from, "Candidate for unknown participant dropped");
            return Ok(());
        };
        if entry.state.phase == SignalingPhase::Closed {
            trace!(participant = %from, "Candidate for closed link dropped");
            return Ok(());
        }

        match entry.state.accept_candidate(candidate) {
            Some(candidate) => entry.send(PeerCommand::AddCandidates(vec![candidate])),
            None => trace!(
                participant = %from,
                queued = entry.state.ice_candidates_queued.len(),
                "Candidate queued until remote description is set"
            ),
        }
        Ok(())
    }

    /// Process a worker result
    pub(crate) async fn handle_outcome(&mut self, participant: &ParticipantId, link_id: LinkId, outcome: PeerOutcome) {
        if !self.is_current(participant, link_id) {
            if let PeerOutcome::LinkReady { link, channel } = outcome {
                debug!(participant = %participant, link_id, "Closing stale link");
                if let Some(channel) = channel {
                    channel.close().await;
                }
                link.close().await;
            }
            return;
        }

        match outcome {
            PeerOutcome::LinkReady { link, channel } => {
                if let Some(entry) = self.peers.get_mut(participant) {
                    entry.link = Some(link);
                }
                if let Some(channel) = channel {
                    self.channels.attach(participant, channel).await;
                }
            }
            PeerOutcome::OfferCreated(offer) => {
                let message = SignalingMessage::offer(self.session_id.as_str(), self.local_id.as_str(), participant.as_str(), &offer);
                self.send_signal(message).await;
                self.flush_local_candidates(participant).await;
            }
            PeerOutcome::AnswerCreated(answer) => {
                if let Some(entry) = self.peers.get_mut(participant) {
                    if entry.state.phase == SignalingPhase::OfferReceived {
                        entry.state.phase = SignalingPhase::Answered;
                    }
                }
                let message = SignalingMessage::answer(self.session_id.as_str(), self.local_id.as_str(), participant.as_str(), &answer);
                self.send_signal(message).await;
                self.flush_local_candidates(participant).await;
            }
            PeerOutcome::RemoteDescriptionApplied => {
                if let Some(entry) = self.peers.get_mut(participant) {
                    let queued = entry.state.remote_description_applied();
                    if !queued.is_empty() {
                        debug!(participant = %participant, count = queued.len(), "Flushing queued candidates");
                        entry.send(PeerCommand::AddCandidates(queued));
                    }
                }
            }
            PeerOutcome::CandidatesApplied { applied, failed } => {
                trace!(participant = %participant, applied, failed, "Candidates applied");
            }
            PeerOutcome::TrackReplaced(kind) => {
                debug!(participant = %participant, ?kind, "Track replaced");
            }
            PeerOutcome::Failed { reason } => {
                self.fail(participant, reason).await;
            }
        }
    }

    async fn flush_local_candidates(&mut self, participant: &ParticipantId) {
        let pending = match self.peers.get_mut(participant) {
            Some(entry) => {
                entry.local_description_sent = true;
                std::mem::take(&mut entry.local_candidates)
            }
            None => return,
        };
        for candidate in pending {
            self.send_local_candidate(participant, &candidate).await;
        }
    }

    async fn send_local_candidate(&self, participant: &ParticipantId, candidate: &IceCandidate) {
        let message = SignalingMessage::ice_candidate(
            self.session_id.as_str(),
            self.local_id.as_str(),
            participant.as_str(),
            candidate,
        );
        self.send_signal(message).await;
    }

    /// Process a link callback; returns a data channel message if one arrived
    pub(crate) async fn handle_link_event(
        &mut self,
        participant: &ParticipantId,
        link_id: LinkId,
        event: LinkEvent,
    ) -> Option<ChannelMessage> {
        if !self.is_current(participant, link_id) {
            trace!(participant = %participant, link_id, "Dropping event from stale link");
            if let LinkEvent::DataChannel(channel) = event {
                channel.close().await;
            }
            return None;
        }

        match event {
            LinkEvent::IceCandidate(candidate) => {
                let entry = self.peers.get_mut(participant)?;
                if entry.local_description_sent {
                    self.send_local_candidate(participant, &candidate).await;
                } else {
                    entry.local_candidates.push(candidate);
                }
            }
            LinkEvent::StateChanged(LinkState::Connected) => {
                let entry = self.peers.get_mut(participant)?;
                if !entry.connected {
                    entry.connected = true;
                    entry.state.phase = SignalingPhase::Connected;
                    if let Some(timeout) = entry.timeout.take() {
                        timeout.abort();
                    }
                    info!(participant = %participant, "Peer connected");
                    self.emit(SessionEvent::ParticipantConnected { participant_id: participant.clone() });
                }
            }
            LinkEvent::StateChanged(state) if state.is_terminal() => {
                self.fail(participant, format!("connection {:?}", state).to_lowercase()).await;
            }
            LinkEvent::StateChanged(state) => {
                debug!(participant = %participant, ?state, "Link state");
            }
            LinkEvent::TrackAdded(track) => {
                let entry = self.peers.get_mut(participant)?;
                entry.remote_tracks.push(track.clone());
                self.emit(SessionEvent::RemoteTrackAdded { participant_id: participant.clone(), track });
            }
            LinkEvent::DataChannel(channel) => {
                self.channels.attach(participant, channel).await;
            }
            LinkEvent::ChannelOpen => {
                self.channels.mark_open(participant).await;
            }
            LinkEvent::ChannelMessage(text) => {
                return ChannelMessage::decode(&text);
            }
            LinkEvent::ChannelClosed => {
                debug!(participant = %participant, "Data channel closed");
                self.channels.mark_closed(participant);
            }
        }
        None
    }

    /// Close a participant whose link has not connected in time
    pub(crate) async fn handle_timeout(&mut self, participant: &ParticipantId, link_id: LinkId) -> Result<()> {
        if !self.is_current(participant, link_id) {
            return Ok(());
        }
        let phase = self.phase(participant).unwrap_or(SignalingPhase::Closed);
        if !phase.is_negotiating() {
            return Ok(());
        }

        let reason = format!("negotiation timed out in {:?}", phase);
        self.fail(participant, reason.clone()).await;
        Err(SessionError::negotiation(participant, reason))
    }

    async fn fail(&mut self, participant: &ParticipantId, reason: String) {
        warn!(participant = %participant, reason = %reason, "Peer link failed");
        self.close(participant).await;
        self.emit(SessionEvent::PeerFailed { participant_id: participant.clone(), reason });
    }

    async fn teardown(&mut self, participant: &ParticipantId) {
        let link = self.peers.get_mut(participant).and_then(PeerEntry::release);
        self.channels.detach(participant).await;
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// Close the participant's link; the participant stays listed as closed
    pub async fn close(&mut self, participant: &ParticipantId) {
        self.teardown(participant).await;
        if let Some(entry) = self.peers.get_mut(participant) {
            entry.state = PeerConnectionState::new();
            entry.state.phase = SignalingPhase::Closed;
        }
    }

    /// The participant left the session
    pub async fn remove_participant(&mut self, participant: &ParticipantId) {
        if !self.contains(participant) {
            return;
        }
        self.teardown(participant).await;
        self.peers.remove(participant);
        info!(participant = %participant, "Participant left");
        self.emit(SessionEvent::ParticipantLeft { participant_id: participant.clone() });
    }

    /// Send `track` as video on every link without renegotiating
    pub fn replace_video_track(&mut self, track: LocalTrack) -> usize {
        self.outgoing_video = Some(track.clone());
        let mut replaced = 0;
        for entry in self.peers.values() {
            if entry.worker.is_some() {
                entry.send(PeerCommand::ReplaceTrack(TrackKind::Video, track.clone()));
                replaced += 1;
            }
        }
        debug!("Video track {} substituted on {} links", track.id(), replaced);
        replaced
    }

    /// Close every link and data channel
    pub async fn close_all(&mut self) -> usize {
        let links: Vec<Arc<dyn PeerLink>> = self.peers.values_mut().filter_map(PeerEntry::release).collect();
        for entry in self.peers.values_mut() {
            entry.state = PeerConnectionState::new();
            entry.state.phase = SignalingPhase::Closed;
        }
        self.channels.close_all().await;

        let count = links.len();
        join_all(links.iter().map(|link| link.close())).await;
        info!("Closed {} peer links", count);
        count
    }
}

impl std::fmt::Debug for PeerConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionManager")
            .field("local_id", &self.local_id)
            .field("peers", &self.peers.len())
            .finish()
    }
}
