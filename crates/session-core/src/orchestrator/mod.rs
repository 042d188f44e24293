//! Consultation session orchestration
//!
//! A session is one actor task that owns all per-session state: the peer
//! manager, data channels, capture controller, quality monitor and message
//! log. [`SessionOrchestrator`] is a cheap, cloneable handle that talks to the
//! actor over a command queue; state and connectivity are published through
//! `watch` channels and notifications through a `broadcast` channel.
//!
//! Sessions are created with [`SessionBuilder`], which injects the platform
//! pieces (media devices, peer links, signaling socket, archive) and runs the
//! initialization sequence:
//!
//! 1. resolve the ICE configuration (public STUN on failure)
//! 2. acquire camera and microphone (failure is fatal)
//! 3. connect signaling (failure is reported as a warning)
//! 4. enter `Active` and start the actor

mod actor;
pub(crate) mod commands;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{error, info, warn};

use telecare_media_core::{
    AdaptationConfig, ConnectionStats, LocalStream, MediaCaptureController, MediaSource, QualityAdapter,
    QualityLevel, QualityMonitor, QualityTrend, VideoProfile,
};
use telecare_signaling::{SignalingSocket, SignalingTransport, WebSocketSocket};

use crate::archive::{FileUpload, SessionArchive, SessionSummary};
use crate::channel::{ChannelMessage, DataChannelProtocol, Delivery};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{InboundEvent, SessionEvent};
use crate::ice::{resolve_ice_configuration, HttpIceConfigProvider, IceConfigProvider};
use crate::peer::{PeerConnectionManager, PeerLinkFactory, PeerManagerSetup};
use crate::types::{ParticipantId, ParticipantInfo, ParticipantRole, SessionId, SessionState};

use actor::{SessionActor, SessionContext};
use commands::{Reply, SessionCommand};

/// Current network quality as seen by the session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySnapshot {
    /// `None` until the first sample
    pub level: Option<QualityLevel>,
    pub stats: Option<ConnectionStats>,
    pub trend: QualityTrend,
    pub profile: VideoProfile,
}

/// Builder for a consultation session
pub struct SessionBuilder {
    session_id: SessionId,
    local_id: ParticipantId,
    role: Option<ParticipantRole>,
    config: SessionConfig,
    media_source: Option<Arc<dyn MediaSource>>,
    peer_factory: Option<Arc<dyn PeerLinkFactory>>,
    signaling_socket: Option<Arc<dyn SignalingSocket>>,
    archive: Option<Arc<dyn SessionArchive>>,
    ice_provider: Option<Arc<dyn IceConfigProvider>>,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl SessionBuilder {
    pub fn new(session_id: impl Into<SessionId>, local_id: impl Into<ParticipantId>) -> Self {
        Self {
            session_id: session_id.into(),
            local_id: local_id.into(),
            role: None,
            config: SessionConfig::default(),
            media_source: None,
            peer_factory: None,
            signaling_socket: None,
            archive: None,
            ice_provider: None,
            events: None,
        }
    }

    /// Role announced in the `user-joined` frame
    pub fn role(mut self, role: ParticipantRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    pub fn peer_factory(mut self, factory: Arc<dyn PeerLinkFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    /// Socket used for signaling; defaults to a WebSocket on `signaling_url`
    pub fn signaling_socket(mut self, socket: Arc<dyn SignalingSocket>) -> Self {
        self.signaling_socket = Some(socket);
        self
    }

    pub fn archive(mut self, archive: Arc<dyn SessionArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// ICE configuration source; defaults to `ice_config_url`, then public STUN
    pub fn ice_provider(mut self, provider: Arc<dyn IceConfigProvider>) -> Self {
        self.ice_provider = Some(provider);
        self
    }

    /// Subscribe before `build` to observe events raised during initialization
    pub fn subscribe(&mut self) -> broadcast::Receiver<SessionEvent> {
        let capacity = self.config.event_capacity.max(1);
        self.events.get_or_insert_with(|| broadcast::channel(capacity).0).subscribe()
    }

    /// Initialize the session and start its task
    pub async fn build(mut self) -> Result<SessionOrchestrator> {
        self.config.validate()?;

        let media_source = self
            .media_source
            .take()
            .ok_or_else(|| SessionError::Config("a media source is required".into()))?;
        let factory = self
            .peer_factory
            .take()
            .ok_or_else(|| SessionError::Config("a peer link factory is required".into()))?;
        let archive = self
            .archive
            .take()
            .ok_or_else(|| SessionError::Config("a session archive is required".into()))?;
        let socket: Arc<dyn SignalingSocket> = match (self.signaling_socket.take(), &self.config.signaling_url) {
            (Some(socket), _) => socket,
            (None, Some(url)) => Arc::new(WebSocketSocket::new(url)?),
            (None, None) => {
                return Err(SessionError::Config("a signaling socket or signaling_url is required".into()))
            }
        };

        let capacity = self.config.event_capacity;
        let events = self.events.take().unwrap_or_else(|| broadcast::channel(capacity).0);
        let (state_tx, state_rx) = watch::channel(SessionState::Initializing);
        let (connected_tx, connected_rx) = watch::channel(false);

        info!(session = %self.session_id, participant = %self.local_id, "Initializing consultation session");

        let provider = match self.ice_provider.take() {
            Some(provider) => Some(provider),
            None => match &self.config.ice_config_url {
                Some(url) => match HttpIceConfigProvider::new(url.clone(), self.config.ice_config_timeout) {
                    Ok(provider) => Some(Arc::new(provider) as Arc<dyn IceConfigProvider>),
                    Err(e) => {
                        warn!("ICE config endpoint unusable: {}", e);
                        None
                    }
                },
                None => None,
            },
        };
        let ice = resolve_ice_configuration(provider.as_deref()).await;

        let mut capture = MediaCaptureController::new(media_source);
        let stream = match capture.acquire(self.config.initial_profile).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(session = %self.session_id, error = %e, "Local media acquisition failed");
                return Err(SessionError::MediaAcquisition(e));
            }
        };

        let (transport, transport_events) = SignalingTransport::with_capacity(socket, capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let mut peers = PeerConnectionManager::new(PeerManagerSetup {
            session_id: self.session_id.clone(),
            local_id: self.local_id.clone(),
            factory,
            ice,
            signaling: transport.clone(),
            inbound: inbound_tx.clone(),
            events: events.clone(),
            negotiation_timeout: self.config.negotiation_timeout,
            channels: DataChannelProtocol::new(
                self.config.data_channel_label.clone(),
                self.config.pending_message_limit,
            ),
        });
        peers.set_local_tracks(stream.audio.clone(), capture.outgoing_video_track());

        let role = self.role.map(|role| role.as_str());
        if let Err(e) = transport
            .connect_with_role(self.session_id.as_str(), self.local_id.as_str(), role)
            .await
        {
            warn!(session = %self.session_id, error = %e, "Signaling unavailable, continuing without it");
            let _ = events.send(SessionEvent::Warning { message: format!("Signaling unavailable: {}", e) });
        }

        let adapter = QualityAdapter::new(
            capture.current_profile(),
            AdaptationConfig { enabled: self.config.adaptive_quality, ..Default::default() },
        );
        let monitor = QualityMonitor::new(self.config.quality_sample_interval);

        state_tx.send_replace(SessionState::Active);
        let _ = events.send(SessionEvent::StateChanged { state: SessionState::Active });
        info!(session = %self.session_id, "Consultation session active");

        let context = SessionContext {
            session_id: self.session_id.clone(),
            local_id: self.local_id.clone(),
            transport,
            capture,
            peers,
            monitor,
            adapter,
            archive,
            inbound_tx: inbound_tx.clone(),
            events: events.clone(),
            state: state_tx,
            connected: connected_tx,
            messages: Vec::new(),
            attachment_urls: Vec::new(),
            started_at: chrono::Utc::now(),
            sampling: None,
        };
        tokio::spawn(SessionActor::new(context, inbound_rx, transport_events).run());

        Ok(SessionOrchestrator {
            session_id: self.session_id,
            local_id: self.local_id,
            commands: inbound_tx,
            events,
            state: state_rx,
            connected: connected_rx,
        })
    }
}

/// Handle to a running consultation session
#[derive(Clone)]
pub struct SessionOrchestrator {
    session_id: SessionId,
    local_id: ParticipantId,
    commands: mpsc::Sender<InboundEvent>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    connected: watch::Receiver<bool>,
}

impl SessionOrchestrator {
    pub fn builder(session_id: impl Into<SessionId>, local_id: impl Into<ParticipantId>) -> SessionBuilder {
        SessionBuilder::new(session_id, local_id)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Whether at least one peer link is connected
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(InboundEvent::Command(command(reply)))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Mute or unmute the camera; returns whether video is now enabled
    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleVideo { reply }).await?
    }

    /// Mute or unmute the microphone; returns whether audio is now enabled
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleAudio { reply }).await?
    }

    /// Send the screen instead of the camera on every link.
    ///
    /// Returns `false` if the user declined to share.
    pub async fn share_screen(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ShareScreen { reply }).await?
    }

    /// Go back to sending the camera; returns `false` if not sharing
    pub async fn stop_screen_share(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::StopScreenShare { reply }).await?
    }

    pub async fn apply_quality_profile(&self, profile: VideoProfile) -> Result<()> {
        self.request(|reply| SessionCommand::ApplyQualityProfile { profile, reply }).await?
    }

    /// Send a chat message to every participant
    pub async fn send_chat(&self, content: impl Into<String>) -> Result<ChannelMessage> {
        let content = content.into();
        self.request(|reply| SessionCommand::SendChat { content, reply }).await?
    }

    pub async fn send_message_to(
        &self,
        participant: impl Into<ParticipantId>,
        content: impl Into<String>,
    ) -> Result<Delivery> {
        let participant = participant.into();
        let content = content.into();
        self.request(|reply| SessionCommand::SendMessageTo { participant, content, reply })
            .await?
    }

    /// Upload a file to the archive and announce it to every participant
    pub async fn share_file(&self, upload: FileUpload) -> Result<ChannelMessage> {
        self.request(|reply| SessionCommand::ShareFile { upload, reply }).await?
    }

    /// Re-open the signaling connection after a disconnect
    pub async fn reconnect_signaling(&self) -> Result<()> {
        self.request(|reply| SessionCommand::ReconnectSignaling { reply }).await?
    }

    pub async fn participants(&self) -> Result<Vec<ParticipantInfo>> {
        self.request(|reply| SessionCommand::Participants { reply }).await
    }

    pub async fn local_stream(&self) -> Result<Option<LocalStream>> {
        self.request(|reply| SessionCommand::LocalStream { reply }).await
    }

    pub async fn current_quality(&self) -> Result<QualitySnapshot> {
        self.request(|reply| SessionCommand::CurrentQuality { reply }).await
    }

    /// End the consultation and archive its summary.
    ///
    /// Local cleanup always completes; an archive failure is returned
    /// afterwards. Ending twice fails with `InvalidState`.
    pub async fn end_call(&self) -> Result<SessionSummary> {
        if self.state().is_ended() {
            return Err(SessionError::invalid_state(SessionState::Active, SessionState::Ended));
        }
        match self.request(|reply| SessionCommand::EndCall { reply }).await {
            Err(SessionError::SessionClosed) if self.state().is_ended() => {
                Err(SessionError::invalid_state(SessionState::Active, SessionState::Ended))
            }
            other => other?,
        }
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("session_id", &self.session_id)
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .finish()
    }
}
