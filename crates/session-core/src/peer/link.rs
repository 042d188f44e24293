//! Platform peer connection abstraction
//!
//! A [`PeerLink`] wraps one platform peer connection. Its callbacks
//! (candidates, connection state, remote tracks, data channel activity) are
//! reported through the [`LinkEventSender`] handed to the factory, which tags
//! every event with the participant and link generation it belongs to.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use telecare_media_core::{LocalTrack, RemoteTrack, StatsSource, TrackKind};
use telecare_signaling::{IceCandidate, SessionDescription};

use crate::events::InboundEvent;
use crate::ice::IceConfiguration;
use crate::types::ParticipantId;

/// Generation number of a participant's link; replaced links get a new one
pub type LinkId = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("SDP error: {0}")]
    Sdp(String),

    #[error("ICE error: {0}")]
    Ice(String),

    #[error("Track error: {0}")]
    Track(String),

    #[error("Data channel error: {0}")]
    Channel(String),

    #[error("Peer link closed")]
    Closed,
}

/// Connection state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States after which the link cannot carry media again
    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Failed | LinkState::Closed)
    }
}

/// Callback from a peer link or its data channel
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A local candidate was gathered
    IceCandidate(IceCandidate),
    StateChanged(LinkState),
    /// The remote side added a media track
    TrackAdded(RemoteTrack),
    /// The remote side opened a data channel
    DataChannel(Arc<dyn DataChannelLink>),
    ChannelOpen,
    ChannelMessage(String),
    ChannelClosed,
}

/// Reliable, ordered message channel carried by a peer link
#[async_trait]
pub trait DataChannelLink: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), LinkError>;

    async fn close(&self);
}

/// One platform peer connection.
///
/// `sample_stats` (from [`StatsSource`]) reports the link's transport stats.
#[async_trait]
pub trait PeerLink: StatsSource + fmt::Debug {
    async fn create_offer(&self) -> Result<SessionDescription, LinkError>;

    async fn create_answer(&self) -> Result<SessionDescription, LinkError>;

    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), LinkError>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<(), LinkError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), LinkError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<(), LinkError>;

    /// Swap the track sent on the sender of `kind` without renegotiating
    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<(), LinkError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannelLink>, LinkError>;

    /// Idempotent; the session and a cancelled worker may both close a link
    async fn close(&self);
}

/// Creates peer links for participants
#[async_trait]
pub trait PeerLinkFactory: Send + Sync + fmt::Debug {
    async fn create_link(
        &self,
        participant: &ParticipantId,
        ice: &IceConfiguration,
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>, LinkError>;
}

/// Reports link callbacks to the owning session
#[derive(Clone)]
pub struct LinkEventSender {
    participant: ParticipantId,
    link_id: LinkId,
    tx: mpsc::Sender<InboundEvent>,
}

impl LinkEventSender {
    pub(crate) fn new(participant: ParticipantId, link_id: LinkId, tx: mpsc::Sender<InboundEvent>) -> Self {
        Self { participant, link_id, tx }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    /// Deliver an event; returns false once the session is gone
    pub async fn emit(&self, event: LinkEvent) -> bool {
        trace!("Link event from {}#{}: {:?}", self.participant, self.link_id, event);
        self.tx
            .send(InboundEvent::Link {
                participant: self.participant.clone(),
                link_id: self.link_id,
                event,
            })
            .await
            .is_ok()
    }
}

impl fmt::Debug for LinkEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEventSender")
            .field("participant", &self.participant)
            .field("link_id", &self.link_id)
            .finish()
    }
}
