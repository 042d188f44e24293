//! Error types for consultation sessions

use thiserror::Error;

use telecare_media_core::Error as MediaError;
use telecare_signaling::Error as SignalingError;

use crate::archive::ArchiveError;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by a consultation session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Signaling connect or send failed; the session keeps running
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Camera or microphone could not be opened; fatal during init
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(MediaError),

    /// A capture operation on already acquired media failed
    #[error("Media error: {0}")]
    Media(MediaError),

    /// Offer/answer exchange with one participant failed
    #[error("Negotiation with {participant_id} failed: {reason}")]
    Negotiation { participant_id: String, reason: String },

    /// Both sides offered at once; resolved by the id tie-break
    #[error("Glare with {participant_id}: remote offer ignored")]
    GlareConflict { participant_id: String },

    /// The archive rejected a summary or upload
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// ICE server configuration could not be fetched
    #[error("ICE configuration error: {0}")]
    IceConfig(String),

    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Participant not found: {participant_id}")]
    ParticipantNotFound { participant_id: String },

    /// The participant's outgoing message queue is full
    #[error("Data channel to {participant_id} unavailable")]
    ChannelUnavailable { participant_id: String },

    /// Encoding a data channel message failed
    #[error("Data channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The session task is gone
    #[error("Session closed")]
    SessionClosed,
}

impl From<MediaError> for SessionError {
    fn from(error: MediaError) -> Self {
        if error.is_acquisition_error() {
            SessionError::MediaAcquisition(error)
        } else {
            SessionError::Media(error)
        }
    }
}

impl SessionError {
    /// Whether the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::MediaAcquisition(_))
    }

    /// Whether retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Signaling(_)
            | SessionError::Negotiation { .. }
            | SessionError::GlareConflict { .. }
            | SessionError::Archive(_)
            | SessionError::IceConfig(_)
            | SessionError::ChannelUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            SessionError::Signaling(_) => "signaling",
            SessionError::MediaAcquisition(_) | SessionError::Media(_) => "media",
            SessionError::Negotiation { .. } | SessionError::GlareConflict { .. } => "negotiation",
            SessionError::Archive(_) => "archive",
            SessionError::IceConfig(_) | SessionError::Config(_) => "configuration",
            SessionError::ChannelUnavailable { .. } | SessionError::Channel(_) => "data_channel",
            SessionError::InvalidState { .. } | SessionError::SessionClosed => "session",
            SessionError::ParticipantNotFound { .. } => "participant",
        }
    }

    pub fn negotiation(participant_id: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        SessionError::Negotiation {
            participant_id: participant_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        SessionError::InvalidState {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_errors_split_by_kind() {
        let denied: SessionError = MediaError::permission_denied("camera").into();
        assert!(matches!(denied, SessionError::MediaAcquisition(_)));
        assert!(denied.is_fatal());

        let constraints: SessionError = MediaError::Constraints("overconstrained".into()).into();
        assert!(matches!(constraints, SessionError::Media(_)));
        assert!(!constraints.is_fatal());
    }

    #[test]
    fn test_categories() {
        assert_eq!(SessionError::negotiation("bob", "sdp").category(), "negotiation");
        assert_eq!(SessionError::Signaling(SignalingError::NotConnected).category(), "signaling");
        assert!(SessionError::GlareConflict { participant_id: "bob".into() }.is_recoverable());
        assert!(!SessionError::SessionClosed.is_recoverable());
    }
}
