//! Test doubles for consultation sessions
//!
//! The fake socket plays the signaling server: tests inject frames from remote
//! participants and inspect what the session sent. Fake links connect once
//! they have a remote description and at least one remote candidate.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use telecare_media_core::{
    ConnectionStats, Error as MediaError, LocalStream, LocalTrack, MediaConstraints, MediaSource, StatsSource,
    TrackKind, TrackSource, VideoConstraints,
};
use telecare_session_core::{
    ArchiveError, DataChannelLink, FileUpload, IceConfiguration, LinkError, LinkEvent, LinkEventSender,
    LinkState, ParticipantId, PeerLink, PeerLinkFactory, SessionArchive, SessionBuilder, SessionConfig,
    SessionEvent, SessionOrchestrator, SessionSummary, UploadedFile,
};
use telecare_signaling::{
    IceCandidate, SessionDescription, SignalKind, SignalingMessage, SignalingSocket, SocketEvent,
};

pub const SESSION: &str = "consult-1";

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("telecare_session_core=debug,telecare_signaling=debug")
        .with_test_writer()
        .try_init();
}

// Media

#[derive(Debug, Default)]
pub struct FakeMedia {
    pub user_media_calls: AtomicUsize,
    pub deny_camera: AtomicBool,
    pub decline_display: AtomicBool,
    pub applied: Mutex<Vec<VideoConstraints>>,
    pub stopped: Mutex<Vec<TrackSource>>,
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire_user_media(&self, constraints: &MediaConstraints) -> telecare_media_core::Result<LocalStream> {
        self.user_media_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(MediaError::permission_denied("camera"));
        }
        let audio = constraints.audio.then(|| LocalTrack::new(TrackSource::Microphone, "Headset Microphone"));
        let video = constraints.video.map(|_| LocalTrack::new(TrackSource::Camera, "FaceTime HD Camera"));
        Ok(LocalStream::new(audio, video))
    }

    async fn acquire_display(&self) -> telecare_media_core::Result<LocalTrack> {
        if self.decline_display.load(Ordering::SeqCst) {
            return Err(MediaError::permission_denied("display"));
        }
        Ok(LocalTrack::new(TrackSource::Screen, "Entire Screen"))
    }

    async fn apply_constraints(&self, _track: &LocalTrack, constraints: &VideoConstraints) -> telecare_media_core::Result<()> {
        self.applied.lock().unwrap().push(*constraints);
        Ok(())
    }

    async fn stop_track(&self, track: &LocalTrack) -> telecare_media_core::Result<()> {
        self.stopped.lock().unwrap().push(track.source());
        Ok(())
    }
}

// Signaling

#[derive(Debug, Default)]
pub struct FakeSocket {
    pub sent: Mutex<Vec<String>>,
    pub closes: Mutex<Vec<(u16, String)>>,
    server: Mutex<Option<mpsc::Sender<SocketEvent>>>,
    pub opens: AtomicUsize,
    open: AtomicBool,
    pub fail_open: AtomicBool,
}

impl FakeSocket {
    pub fn sent_messages(&self) -> Vec<SignalingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| SignalingMessage::decode(text).expect("session sent an invalid frame"))
            .collect()
    }

    pub fn sent_to(&self, kind: SignalKind, to: &str) -> Vec<SignalingMessage> {
        self.sent_messages()
            .into_iter()
            .filter(|m| m.kind == kind && m.to.as_deref() == Some(to))
            .collect()
    }

    pub fn count(&self, kind: SignalKind) -> usize {
        self.sent_messages().iter().filter(|m| m.kind == kind).count()
    }

    pub async fn inject(&self, message: SignalingMessage) {
        self.inject_raw(message.encode().unwrap()).await;
    }

    pub async fn inject_raw(&self, text: String) {
        let server = self.server.lock().unwrap().clone().expect("socket not open");
        server.send(SocketEvent::Text(text)).await.expect("transport reader gone");
    }

    /// The connection drops without a close handshake
    pub async fn drop_connection(&self) {
        let server = self.server.lock().unwrap().take().expect("socket not open");
        self.open.store(false, Ordering::SeqCst);
        let _ = server
            .send(SocketEvent::Closed { code: 1006, reason: "connection reset".into(), clean: false })
            .await;
    }
}

#[async_trait]
impl SignalingSocket for FakeSocket {
    async fn open(&self, _session_id: &str, _participant_id: &str) -> telecare_signaling::Result<mpsc::Receiver<SocketEvent>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(telecare_signaling::Error::ConnectFailed("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.server.lock().unwrap() = Some(tx);
        self.open.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send_text(&self, text: String) -> telecare_signaling::Result<()> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> telecare_signaling::Result<()> {
        self.closes.lock().unwrap().push((code, reason.to_string()));
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// Peer links

#[derive(Debug)]
pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    pub sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new(label: &str) -> Self {
        Self { label: label.to_string(), open: AtomicBool::new(true), sent: Mutex::new(Vec::new()) }
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataChannelLink for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeLink {
    pub participant: ParticipantId,
    events: LinkEventSender,
    pub offers: AtomicUsize,
    pub answers: AtomicUsize,
    remote_set: AtomicBool,
    connected: AtomicBool,
    pub closed: AtomicBool,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub tracks: Mutex<Vec<LocalTrack>>,
    pub replaced: Mutex<Vec<(TrackKind, LocalTrack)>>,
    pub channel: Mutex<Option<Arc<FakeChannel>>>,
    pub stats: Mutex<ConnectionStats>,
    track_delay: Option<Duration>,
}

impl FakeLink {
    fn new(participant: ParticipantId, events: LinkEventSender, track_delay: Option<Duration>) -> Self {
        Self {
            participant,
            events,
            offers: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            remote_set: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            stats: Mutex::new(ConnectionStats::new(1500.0, 0.0, 40.0, 5.0)),
            track_delay,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().unwrap().clone().expect("link has no data channel")
    }

    pub fn set_stats(&self, stats: ConnectionStats) {
        *self.stats.lock().unwrap() = stats;
    }

    /// Deliver a platform callback as if it came from this link
    pub async fn emit(&self, event: LinkEvent) {
        assert!(self.events.emit(event).await, "session is gone");
    }

    async fn maybe_connect(&self) {
        let ready = self.remote_set.load(Ordering::SeqCst) && !self.candidates.lock().unwrap().is_empty();
        if ready && !self.connected.swap(true, Ordering::SeqCst) {
            self.events.emit(LinkEvent::StateChanged(LinkState::Connected)).await;
        }
    }
}

#[async_trait]
impl StatsSource for FakeLink {
    async fn sample_stats(&self) -> telecare_media_core::Result<ConnectionStats> {
        Ok(*self.stats.lock().unwrap())
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(format!("v=0 offer {} to {}", n, self.participant)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, LinkError> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("v=0 answer to {}", self.participant)))
    }

    async fn set_local_description(&self, _description: &SessionDescription) -> Result<(), LinkError> {
        let candidate = IceCandidate::new(format!("candidate:1 1 udp 2122260223 10.0.0.1 5000{} typ host", self.events.link_id()))
            .with_mid("0", 0);
        self.events.emit(LinkEvent::IceCandidate(candidate)).await;
        Ok(())
    }

    async fn set_remote_description(&self, _description: &SessionDescription) -> Result<(), LinkError> {
        self.remote_set.store(true, Ordering::SeqCst);
        self.maybe_connect().await;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), LinkError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(LinkError::Ice("remote description not set".into()));
        }
        self.candidates.lock().unwrap().push(candidate.clone());
        self.maybe_connect().await;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), LinkError> {
        if let Some(delay) = self.track_delay {
            tokio::time::sleep(delay).await;
        }
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<(), LinkError> {
        self.replaced.lock().unwrap().push((kind, track.clone()));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelLink>, LinkError> {
        let channel = Arc::new(FakeChannel::new(label));
        *self.channel.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(channel) = self.channel.lock().unwrap().clone() {
            channel.open.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeLinkFactory {
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub fail_create: AtomicBool,
    track_delay: Mutex<Option<Duration>>,
}

impl FakeLinkFactory {
    /// Links created from now on stall in `add_track` for `delay`
    pub fn slow_setup(&self, delay: Option<Duration>) {
        *self.track_delay.lock().unwrap() = delay;
    }

    /// Wait until `count` links have been created
    pub async fn created(self: &Arc<Self>, count: usize) {
        let links = self.clone();
        eventually(move || {
            let links = links.clone();
            async move { links.count() >= count }
        })
        .await;
    }

    pub fn links_for(&self, participant: &str) -> Vec<Arc<FakeLink>> {
        self.links
            .lock()
            .unwrap()
            .iter()
            .filter(|link| link.participant.as_str() == participant)
            .cloned()
            .collect()
    }

    pub fn latest(&self, participant: &str) -> Arc<FakeLink> {
        self.links_for(participant).pop().expect("no link for participant")
    }

    pub fn count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerLinkFactory for FakeLinkFactory {
    async fn create_link(
        &self,
        participant: &ParticipantId,
        _ice: &IceConfiguration,
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>, LinkError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(LinkError::Sdp("peer connection unavailable".into()));
        }
        let delay = *self.track_delay.lock().unwrap();
        let link = Arc::new(FakeLink::new(participant.clone(), events, delay));
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

// Archive

#[derive(Debug, Default)]
pub struct FakeArchive {
    pub saved: Mutex<Vec<SessionSummary>>,
    pub uploads: Mutex<Vec<FileUpload>>,
    pub fail_save: AtomicBool,
}

#[async_trait]
impl SessionArchive for FakeArchive {
    async fn save_session(&self, summary: &SessionSummary) -> Result<(), ArchiveError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("archive offline".into()));
        }
        self.saved.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn upload_file(&self, upload: &FileUpload) -> Result<UploadedFile, ArchiveError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(upload.clone());
        let key = format!("{}/{}-{}", SESSION, uploads.len(), upload.name);
        Ok(UploadedFile { url: format!("https://files.example.org/{}", key), key })
    }
}

// Harness

pub struct Harness {
    pub session: SessionOrchestrator,
    pub events: broadcast::Receiver<SessionEvent>,
    pub media: Arc<FakeMedia>,
    pub socket: Arc<FakeSocket>,
    pub links: Arc<FakeLinkFactory>,
    pub archive: Arc<FakeArchive>,
}

pub struct HarnessBuilder {
    local_id: String,
    config: SessionConfig,
    media: Arc<FakeMedia>,
    socket: Arc<FakeSocket>,
    links: Arc<FakeLinkFactory>,
    archive: Arc<FakeArchive>,
}

impl HarnessBuilder {
    pub fn new(local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            config: SessionConfig::default(),
            media: Arc::new(FakeMedia::default()),
            socket: Arc::new(FakeSocket::default()),
            links: Arc::new(FakeLinkFactory::default()),
            archive: Arc::new(FakeArchive::default()),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn media(&self) -> Arc<FakeMedia> {
        self.media.clone()
    }

    pub fn socket(&self) -> Arc<FakeSocket> {
        self.socket.clone()
    }

    pub fn links(&self) -> Arc<FakeLinkFactory> {
        self.links.clone()
    }

    pub fn builder(&self) -> SessionBuilder {
        SessionBuilder::new(SESSION, self.local_id.as_str())
            .config(self.config.clone())
            .media_source(self.media.clone())
            .peer_factory(self.links.clone())
            .signaling_socket(self.socket.clone())
            .archive(self.archive.clone())
    }

    pub async fn start(self) -> Harness {
        init_logging();
        let mut builder = self.builder();
        let events = builder.subscribe();
        let session = builder.build().await.expect("Failed to start session");
        Harness {
            session,
            events,
            media: self.media,
            socket: self.socket,
            links: self.links,
            archive: self.archive,
        }
    }
}

pub async fn start(local_id: &str) -> Harness {
    HarnessBuilder::new(local_id).start().await
}

// Long enough for paused-clock tests that wait out the negotiation timeout
const WAIT: Duration = Duration::from_secs(60);

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event stream ended: {}", e),
            }
        }
    })
    .await
    .expect("Timed out waiting for session event")
}

/// Poll `check` until it holds
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

pub fn joined(from: &str) -> SignalingMessage {
    SignalingMessage::user_joined(SESSION, from, Some("patient"))
}

pub fn answer(from: &str, to: &str) -> SignalingMessage {
    SignalingMessage::answer(SESSION, from, to, &SessionDescription::answer(format!("v=0 answer from {}", from)))
        .unwrap()
}

pub fn offer(from: &str, to: &str) -> SignalingMessage {
    SignalingMessage::offer(SESSION, from, to, &SessionDescription::offer(format!("v=0 offer from {}", from)))
        .unwrap()
}

pub fn candidate(from: &str, to: &str, n: u32) -> SignalingMessage {
    let candidate = IceCandidate::new(format!("candidate:{} 1 udp 2122260223 192.168.1.{} 6000 typ host", n, n))
        .with_mid("0", 0);
    SignalingMessage::ice_candidate(SESSION, from, to, &candidate).unwrap()
}

impl Harness {
    pub async fn wait_for<F>(&mut self, pred: F) -> SessionEvent
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        wait_for(&mut self.events, pred).await
    }

    /// Wait until the session has sent `count` frames of `kind` to `to`
    pub async fn sent(&self, kind: SignalKind, to: &str, count: usize) {
        let socket = self.socket.clone();
        let to = to.to_string();
        eventually(move || {
            let socket = socket.clone();
            let to = to.clone();
            async move { socket.sent_to(kind, &to).len() >= count }
        })
        .await;
    }

    /// Drive a full negotiation with `remote` joining after us
    pub async fn connect_peer(&mut self, remote: &str) -> Arc<FakeLink> {
        let local = self.session.local_id().to_string();
        let offers_before = self.socket.sent_to(SignalKind::Offer, remote).len();

        self.socket.inject(joined(remote)).await;
        self.sent(SignalKind::Offer, remote, offers_before + 1).await;
        self.socket.inject(answer(remote, &local)).await;
        self.socket.inject(candidate(remote, &local, 7)).await;

        let remote_id = ParticipantId::from(remote);
        self.wait_for(|e| matches!(e, SessionEvent::ParticipantConnected { participant_id } if *participant_id == remote_id))
            .await;
        self.links.latest(remote)
    }
}
