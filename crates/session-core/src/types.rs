//! Identifiers and snapshots shared across the session

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use telecare_media_core::RemoteTrack;

use crate::peer::SignalingPhase;

/// Identifier of a participant as used on the signaling wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of a consultation session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Role a participant announced when joining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Doctor,
    Patient,
    Observer,
    #[default]
    Unknown,
}

impl ParticipantRole {
    /// Parse the optional `role` of a join announcement
    pub fn from_wire(role: Option<&str>) -> Self {
        match role.map(str::to_ascii_lowercase).as_deref() {
            Some("doctor") => ParticipantRole::Doctor,
            Some("patient") => ParticipantRole::Patient,
            Some("observer") => ParticipantRole::Observer,
            _ => ParticipantRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Doctor => "doctor",
            ParticipantRole::Patient => "patient",
            ParticipantRole::Observer => "observer",
            ParticipantRole::Unknown => "unknown",
        }
    }
}

/// Lifecycle of a consultation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Fetching ICE config, opening devices and connecting signaling
    Initializing,
    /// Local media is ready
    Active,
    /// Torn down; terminal
    Ended,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SessionState::Ended)
    }
}

/// Snapshot of one remote participant
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub participant_id: ParticipantId,
    pub role: ParticipantRole,
    pub phase: SignalingPhase,
    pub connected: bool,
    pub joined_at: DateTime<Utc>,
    pub remote_tracks: Vec<RemoteTrack>,
}
