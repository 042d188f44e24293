//! The session task
//!
//! Everything that changes session state happens here, one event at a time:
//! signaling frames, link callbacks, worker results, stats samples and API
//! commands. Slow work (link operations, stats collection, uploads,
//! reconnects) runs in spawned tasks that report back through the inbound
//! queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use telecare_media_core::{AdaptationAction, ConnectionStats, MediaCaptureController, QualityAdapter, QualityMonitor};
use telecare_signaling::{SignalKind, SignalingMessage, SignalingTransport, TransportEvent};

use crate::archive::{ArchiveError, FileUpload, SessionArchive, SessionSummary, UploadedFile};
use crate::channel::{ChannelMessage, Delivery};
use crate::error::{Result, SessionError};
use crate::events::{InboundEvent, SessionEvent};
use crate::orchestrator::commands::{Reply, SessionCommand};
use crate::orchestrator::QualitySnapshot;
use crate::peer::PeerConnectionManager;
use crate::types::{ParticipantId, ParticipantRole, SessionId, SessionState};

/// State owned by the session task
pub(crate) struct SessionContext {
    pub session_id: SessionId,
    pub local_id: ParticipantId,
    pub transport: SignalingTransport,
    pub capture: MediaCaptureController,
    pub peers: PeerConnectionManager,
    pub monitor: QualityMonitor,
    pub adapter: QualityAdapter,
    pub archive: Arc<dyn SessionArchive>,
    pub inbound_tx: mpsc::Sender<InboundEvent>,
    pub events: broadcast::Sender<SessionEvent>,
    pub state: watch::Sender<SessionState>,
    pub connected: watch::Sender<bool>,
    /// Chat and file notices sent or received, in order
    pub messages: Vec<ChannelMessage>,
    pub attachment_urls: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub sampling: Option<JoinHandle<()>>,
}

pub(crate) struct SessionActor {
    context: SessionContext,
    inbound: mpsc::Receiver<InboundEvent>,
    transport_events: mpsc::Receiver<TransportEvent>,
}

impl SessionActor {
    pub fn new(
        context: SessionContext,
        inbound: mpsc::Receiver<InboundEvent>,
        transport_events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { context, inbound, transport_events }
    }

    pub async fn run(self) {
        let SessionActor { mut context, mut inbound, mut transport_events } = self;

        let period = context.monitor.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            tokio::select! {
                Some(event) = inbound.recv() => {
                    if context.handle_inbound(event).await {
                        break;
                    }
                }
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => context.handle_transport(event).await,
                    None => transport_open = false,
                },
                _ = ticker.tick() => context.start_sampling(),
            }
            context.publish_connected();
        }

        debug!(session = %context.session_id, "Session task stopped");
    }
}

impl SessionContext {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn is_active(&self) -> bool {
        *self.state.borrow() == SessionState::Active
    }

    fn publish_connected(&self) {
        let now = self.peers.is_connected();
        self.connected.send_if_modified(|connected| {
            if *connected == now {
                false
            } else {
                *connected = now;
                true
            }
        });
    }

    /// Returns true once the session has ended
    async fn handle_inbound(&mut self, event: InboundEvent) -> bool {
        match event {
            InboundEvent::Link { participant, link_id, event } => {
                if let Some(message) = self.peers.handle_link_event(&participant, link_id, event).await {
                    self.on_channel_message(participant, message);
                }
            }
            InboundEvent::Peer { participant, link_id, outcome } => {
                self.peers.handle_outcome(&participant, link_id, outcome).await;
            }
            InboundEvent::NegotiationTimeout { participant, link_id } => {
                if let Err(e) = self.peers.handle_timeout(&participant, link_id).await {
                    warn!(participant = %participant, error = %e, "Negotiation abandoned");
                }
            }
            InboundEvent::StatsSampled(stats) => self.on_stats(stats).await,
            InboundEvent::FileUploaded { upload, result, reply } => {
                let _ = reply.send(self.on_file_uploaded(upload, result).await);
            }
            InboundEvent::Command(command) => return self.handle_command(command).await,
        }
        false
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!(session = %self.session_id, "Signaling connected");
                self.emit(SessionEvent::SignalingConnected);
            }
            TransportEvent::Message(message) => self.on_signal(message).await,
            TransportEvent::Disconnected { code, reason } => {
                warn!(session = %self.session_id, code, reason = %reason, "Signaling lost, media continues");
                self.emit(SessionEvent::SignalingDisconnected { reason: format!("{} (code {})", reason, code) });
            }
            TransportEvent::Closed => debug!(session = %self.session_id, "Signaling closed"),
        }
    }

    async fn on_signal(&mut self, message: SignalingMessage) {
        if message.session_id != self.session_id.as_str() {
            debug!("Ignoring {} for session {}", message.kind, message.session_id);
            return;
        }
        let Some(from) = message.from.as_deref() else {
            debug!("Ignoring {} without sender", message.kind);
            return;
        };
        if from == self.local_id.as_str() || !message.is_addressed_to(self.local_id.as_str()) {
            trace!("Ignoring {} from {} not meant for us", message.kind, from);
            return;
        }
        let from = ParticipantId::from(from);

        match message.kind {
            SignalKind::UserJoined => {
                let role = ParticipantRole::from_wire(message.join_info().role.as_deref());
                info!(participant = %from, role = role.as_str(), "Participant joined");
                self.peers.handle_user_joined(&from, role).await;
            }
            SignalKind::UserLeft => self.peers.remove_participant(&from).await,
            SignalKind::Offer => match message.session_description() {
                Ok(offer) => {
                    if let Err(e) = self.peers.handle_offer(&from, offer).await {
                        match e {
                            SessionError::GlareConflict { .. } => debug!(participant = %from, "{}", e),
                            _ => warn!(participant = %from, error = %e, "Offer rejected"),
                        }
                    }
                }
                Err(e) => warn!(participant = %from, error = %e, "Malformed offer"),
            },
            SignalKind::Answer => match message.session_description() {
                Ok(answer) => {
                    if let Err(e) = self.peers.handle_answer(&from, answer) {
                        warn!(participant = %from, error = %e, "Answer rejected");
                    }
                }
                Err(e) => warn!(participant = %from, error = %e, "Malformed answer"),
            },
            SignalKind::IceCandidate => match message.candidate() {
                Ok(candidate) => {
                    if let Err(e) = self.peers.handle_ice_candidate(&from, candidate) {
                        warn!(participant = %from, error = %e, "Candidate rejected");
                    }
                }
                Err(e) => warn!(participant = %from, error = %e, "Malformed candidate"),
            },
        }
    }

    fn record(&mut self, message: &ChannelMessage) {
        if let ChannelMessage::FileNotice(notice) = message {
            self.attachment_urls.push(notice.url.clone());
        }
        self.messages.push(message.clone());
    }

    fn on_channel_message(&mut self, from: ParticipantId, message: ChannelMessage) {
        self.record(&message);
        match message {
            ChannelMessage::Text(_) => {
                debug!(participant = %from, "Chat message received");
                self.emit(SessionEvent::ChatReceived { from, message });
            }
            ChannelMessage::FileNotice(_) => {
                debug!(participant = %from, "File shared");
                self.emit(SessionEvent::FileShared { from, message });
            }
        }
    }

    fn start_sampling(&mut self) {
        if !self.is_active() {
            return;
        }
        if self.sampling.as_ref().map_or(false, |task| !task.is_finished()) {
            debug!("Previous stats sample still running, skipping tick");
            return;
        }

        let links = self.peers.connected_links();
        let inbound = self.inbound_tx.clone();
        self.sampling = Some(tokio::spawn(async move {
            let stats = QualityMonitor::sample(links.as_slice()).await;
            let _ = inbound.send(InboundEvent::StatsSampled(stats)).await;
        }));
    }

    async fn on_stats(&mut self, stats: ConnectionStats) {
        if !self.is_active() {
            return;
        }
        let Some(change) = self.monitor.observe(stats) else {
            return;
        };

        let mut profile = self.capture.current_profile();
        if let Some(AdaptationAction::ApplyProfile { from, to }) = self.adapter.adapt(change.level) {
            match self.capture.apply_quality_profile(to).await {
                Ok(()) => profile = to,
                Err(e) => {
                    warn!("Could not switch video profile to {}: {}", to, e);
                    self.adapter.set_current_profile(from);
                }
            }
        }

        self.emit(SessionEvent::QualityChanged {
            level: change.level,
            stats: change.stats,
            profile,
            trend: change.trend,
        });
    }

    async fn on_file_uploaded(
        &mut self,
        upload: FileUpload,
        result: std::result::Result<UploadedFile, ArchiveError>,
    ) -> Result<ChannelMessage> {
        let stored = result.map_err(|e| {
            warn!(file = %upload.name, error = %e, "File upload failed");
            SessionError::Archive(e)
        })?;

        let message = ChannelMessage::file(self.local_id.as_str(), &upload, &stored);
        let recipients = self.peers.active_participants();
        let accepted = self.peers.channels_mut().broadcast(&recipients, &message).await;
        info!(file = %upload.name, url = %stored.url, recipients = accepted, "File shared");
        self.record(&message);
        Ok(message)
    }

    /// Returns true once the session has ended
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        trace!("Session command {}", command.name());
        match command {
            SessionCommand::ToggleVideo { reply } => {
                let _ = reply.send(self.capture.toggle_video().map_err(SessionError::from));
            }
            SessionCommand::ToggleAudio { reply } => {
                let _ = reply.send(self.capture.toggle_audio().map_err(SessionError::from));
            }
            SessionCommand::ShareScreen { reply } => {
                let _ = reply.send(self.share_screen().await);
            }
            SessionCommand::StopScreenShare { reply } => {
                let _ = reply.send(self.stop_screen_share().await);
            }
            SessionCommand::ApplyQualityProfile { profile, reply } => {
                let result = self.capture.apply_quality_profile(profile).await;
                if result.is_ok() {
                    self.adapter.set_current_profile(profile);
                }
                let _ = reply.send(result.map_err(SessionError::from));
            }
            SessionCommand::SendChat { content, reply } => {
                let message = ChannelMessage::text(self.local_id.as_str(), content);
                let recipients = self.peers.active_participants();
                let accepted = self.peers.channels_mut().broadcast(&recipients, &message).await;
                debug!("Chat message accepted for {} of {} participants", accepted, recipients.len());
                self.record(&message);
                let _ = reply.send(Ok(message));
            }
            SessionCommand::SendMessageTo { participant, content, reply } => {
                let _ = reply.send(self.send_message_to(participant, content).await);
            }
            SessionCommand::ShareFile { upload, reply } => self.share_file(upload, reply),
            SessionCommand::ReconnectSignaling { reply } => {
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    let result = transport.reconnect().await.map_err(SessionError::from);
                    let _ = reply.send(result);
                });
            }
            SessionCommand::Participants { reply } => {
                let _ = reply.send(self.peers.participants());
            }
            SessionCommand::LocalStream { reply } => {
                let _ = reply.send(self.capture.local_stream());
            }
            SessionCommand::CurrentQuality { reply } => {
                let _ = reply.send(QualitySnapshot {
                    level: self.monitor.current_level(),
                    stats: self.monitor.last_stats(),
                    trend: self.monitor.trend(),
                    profile: self.capture.current_profile(),
                });
            }
            SessionCommand::EndCall { reply } => {
                let _ = reply.send(self.end_call().await);
                return true;
            }
        }
        false
    }

    async fn share_screen(&mut self) -> Result<bool> {
        if self.capture.is_screen_sharing() {
            return Ok(true);
        }
        if !self.capture.share_screen().await? {
            return Ok(false);
        }
        if let Some(track) = self.capture.outgoing_video_track() {
            self.peers.replace_video_track(track);
        }
        Ok(true)
    }

    async fn stop_screen_share(&mut self) -> Result<bool> {
        if !self.capture.stop_screen_share().await? {
            return Ok(false);
        }
        if let Some(camera) = self.capture.outgoing_video_track() {
            self.peers.replace_video_track(camera);
        }
        Ok(true)
    }

    async fn send_message_to(&mut self, participant: ParticipantId, content: String) -> Result<Delivery> {
        if !self.peers.contains(&participant) {
            return Err(SessionError::ParticipantNotFound { participant_id: participant.to_string() });
        }
        let message = ChannelMessage::text(self.local_id.as_str(), content);
        let delivery = self.peers.channels_mut().send(&participant, &message).await?;
        self.record(&message);
        Ok(delivery)
    }

    fn share_file(&self, upload: FileUpload, reply: Reply<Result<ChannelMessage>>) {
        let archive = self.archive.clone();
        let inbound = self.inbound_tx.clone();
        debug!(file = %upload.name, size = upload.size(), "Uploading shared file");
        tokio::spawn(async move {
            let result = archive.upload_file(&upload).await;
            let _ = inbound.send(InboundEvent::FileUploaded { upload, result, reply }).await;
        });
    }

    fn summary(&self) -> SessionSummary {
        let participants = std::iter::once(&self.local_id)
            .chain(self.peers.seen_participants().iter())
            .map(ToString::to_string)
            .collect();

        SessionSummary {
            id: self.session_id.to_string(),
            participants,
            start_time: self.started_at,
            end_time: Utc::now(),
            messages: self.messages.clone(),
            attachment_urls: self.attachment_urls.clone(),
        }
    }

    async fn end_call(&mut self) -> Result<SessionSummary> {
        info!(session = %self.session_id, "Ending consultation");

        if let Some(sampling) = self.sampling.take() {
            sampling.abort();
        }
        let links = self.peers.close_all().await;
        let tracks = self.capture.release().await;
        if let Err(e) = self.transport.close("consultation ended").await {
            debug!("Signaling close reported: {}", e);
        }

        self.state.send_replace(SessionState::Ended);
        self.connected.send_replace(false);
        self.emit(SessionEvent::StateChanged { state: SessionState::Ended });
        info!(
            session = %self.session_id,
            links,
            tracks,
            messages = self.messages.len(),
            "Consultation ended"
        );

        let summary = self.summary();
        if let Err(e) = self.archive.save_session(&summary).await {
            error!(session = %self.session_id, error = %e, "Failed to archive consultation");
            return Err(SessionError::Archive(e));
        }
        Ok(summary)
    }
}
