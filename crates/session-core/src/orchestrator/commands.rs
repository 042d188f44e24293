use tokio::sync::oneshot;

use telecare_media_core::{LocalStream, VideoProfile};

use crate::archive::{FileUpload, SessionSummary};
use crate::channel::{ChannelMessage, Delivery};
use crate::error::Result;
use crate::orchestrator::QualitySnapshot;
use crate::types::{ParticipantId, ParticipantInfo};

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Request from a [`SessionOrchestrator`](super::SessionOrchestrator) handle
#[derive(Debug)]
pub(crate) enum SessionCommand {
    ToggleVideo { reply: Reply<Result<bool>> },
    ToggleAudio { reply: Reply<Result<bool>> },
    ShareScreen { reply: Reply<Result<bool>> },
    StopScreenShare { reply: Reply<Result<bool>> },
    ApplyQualityProfile { profile: VideoProfile, reply: Reply<Result<()>> },
    SendChat { content: String, reply: Reply<Result<ChannelMessage>> },
    SendMessageTo { participant: ParticipantId, content: String, reply: Reply<Result<Delivery>> },
    ShareFile { upload: FileUpload, reply: Reply<Result<ChannelMessage>> },
    ReconnectSignaling { reply: Reply<Result<()>> },
    Participants { reply: Reply<Vec<ParticipantInfo>> },
    LocalStream { reply: Reply<Option<LocalStream>> },
    CurrentQuality { reply: Reply<QualitySnapshot> },
    EndCall { reply: Reply<Result<SessionSummary>> },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::ToggleVideo { .. } => "toggle_video",
            SessionCommand::ToggleAudio { .. } => "toggle_audio",
            SessionCommand::ShareScreen { .. } => "share_screen",
            SessionCommand::StopScreenShare { .. } => "stop_screen_share",
            SessionCommand::ApplyQualityProfile { .. } => "apply_quality_profile",
            SessionCommand::SendChat { .. } => "send_chat",
            SessionCommand::SendMessageTo { .. } => "send_message_to",
            SessionCommand::ShareFile { .. } => "share_file",
            SessionCommand::ReconnectSignaling { .. } => "reconnect_signaling",
            SessionCommand::Participants { .. } => "participants",
            SessionCommand::LocalStream { .. } => "local_stream",
            SessionCommand::CurrentQuality { .. } => "current_quality",
            SessionCommand::EndCall { .. } => "end_call",
        }
    }
}
