//! Session events
//!
//! [`SessionEvent`] is broadcast to the application (UI, recording, audit).
//! [`InboundEvent`] is the single queue the session task consumes: link
//! callbacks, worker results, timers and API commands all arrive through it.

use tokio::sync::oneshot;

use telecare_media_core::{ConnectionStats, QualityLevel, QualityTrend, RemoteTrack, VideoProfile};

use crate::archive::{ArchiveError, FileUpload, UploadedFile};
use crate::channel::ChannelMessage;
use crate::error::Result;
use crate::orchestrator::commands::SessionCommand;
use crate::peer::{LinkEvent, LinkId, PeerOutcome};
use crate::types::{ParticipantId, ParticipantRole, SessionState};

/// Notification for the application
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        state: SessionState,
    },
    ParticipantJoined {
        participant_id: ParticipantId,
        role: ParticipantRole,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    ParticipantConnected {
        participant_id: ParticipantId,
    },
    /// The participant's link failed or timed out; its tile should show a placeholder
    PeerFailed {
        participant_id: ParticipantId,
        reason: String,
    },
    RemoteTrackAdded {
        participant_id: ParticipantId,
        track: RemoteTrack,
    },
    ChatReceived {
        from: ParticipantId,
        message: ChannelMessage,
    },
    FileShared {
        from: ParticipantId,
        message: ChannelMessage,
    },
    QualityChanged {
        level: QualityLevel,
        stats: ConnectionStats,
        profile: VideoProfile,
        trend: QualityTrend,
    },
    SignalingConnected,
    SignalingDisconnected {
        reason: String,
    },
    /// Non-fatal problem worth showing to the user
    Warning {
        message: String,
    },
}

/// Work item for the session task
pub(crate) enum InboundEvent {
    Link {
        participant: ParticipantId,
        link_id: LinkId,
        event: LinkEvent,
    },
    Peer {
        participant: ParticipantId,
        link_id: LinkId,
        outcome: PeerOutcome,
    },
    NegotiationTimeout {
        participant: ParticipantId,
        link_id: LinkId,
    },
    StatsSampled(ConnectionStats),
    FileUploaded {
        upload: FileUpload,
        result: std::result::Result<UploadedFile, ArchiveError>,
        reply: oneshot::Sender<Result<ChannelMessage>>,
    },
    Command(SessionCommand),
}
