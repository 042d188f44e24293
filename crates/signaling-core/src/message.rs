//! Signaling wire format
//!
//! Every frame is a JSON object `{ type, from?, to?, sessionId, data? }`.
//! `user-joined` and `user-left` are broadcast to the whole session, while
//! `offer`, `answer` and `ice-candidate` are addressed to one participant and
//! must carry `to`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};

/// Kind of a signaling frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// A participant announced itself in the session
    UserJoined,
    /// A participant left the session
    UserLeft,
    /// SDP offer for a peer link
    Offer,
    /// SDP answer for a peer link
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
}

impl SignalKind {
    /// Whether frames of this kind must name a recipient
    pub fn is_directed(&self) -> bool {
        matches!(self, SignalKind::Offer | SignalKind::Answer | SignalKind::IceCandidate)
    }

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::UserJoined => "user-joined",
            SignalKind::UserLeft => "user-left",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice-candidate",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SDP type carried inside offer/answer payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// ICE candidate in the browser `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, sdp_mid: impl Into<String>, m_line_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_m_line_index = Some(m_line_index);
        self
    }
}

/// Optional payload of a `user-joined` frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// One signaling frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SignalingMessage {
    fn build(kind: SignalKind, session_id: &str, from: &str, to: Option<&str>) -> Self {
        Self {
            kind,
            from: Some(from.to_string()),
            to: to.map(str::to_string),
            session_id: session_id.to_string(),
            data: None,
        }
    }

    fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.data = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Announcement sent when a participant's transport opens
    pub fn user_joined(session_id: &str, from: &str, role: Option<&str>) -> Self {
        let mut msg = Self::build(SignalKind::UserJoined, session_id, from, None);
        if let Some(role) = role {
            msg.data = Some(serde_json::json!({ "role": role }));
        }
        msg
    }

    pub fn user_left(session_id: &str, from: &str) -> Self {
        Self::build(SignalKind::UserLeft, session_id, from, None)
    }

    pub fn offer(session_id: &str, from: &str, to: &str, sdp: &SessionDescription) -> Result<Self> {
        Self::build(SignalKind::Offer, session_id, from, Some(to)).with_payload(sdp)
    }

    pub fn answer(session_id: &str, from: &str, to: &str, sdp: &SessionDescription) -> Result<Self> {
        Self::build(SignalKind::Answer, session_id, from, Some(to)).with_payload(sdp)
    }

    pub fn ice_candidate(session_id: &str, from: &str, to: &str, candidate: &IceCandidate) -> Result<Self> {
        Self::build(SignalKind::IceCandidate, session_id, from, Some(to)).with_payload(candidate)
    }

    /// Check the structural rules of the protocol
    pub fn validate(&self) -> Result<()> {
        if self.session_id.is_empty() {
            return Err(Error::Protocol(format!("{} frame without sessionId", self.kind)));
        }
        if self.kind.is_directed() && self.to.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Protocol(format!("{} frame without recipient", self.kind)));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate one inbound frame
    pub fn decode(text: &str) -> Result<Self> {
        let msg: SignalingMessage = serde_json::from_str(text)?;
        msg.validate()?;
        Ok(msg)
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| Error::Protocol(format!("{} frame without data", self.kind)))?;
        Ok(serde_json::from_value(data)?)
    }

    /// SDP carried by an offer or answer frame
    pub fn session_description(&self) -> Result<SessionDescription> {
        match self.kind {
            SignalKind::Offer | SignalKind::Answer => self.payload(),
            other => Err(Error::Protocol(format!("{} frame carries no session description", other))),
        }
    }

    /// Candidate carried by an ice-candidate frame
    pub fn candidate(&self) -> Result<IceCandidate> {
        match self.kind {
            SignalKind::IceCandidate => self.payload(),
            other => Err(Error::Protocol(format!("{} frame carries no ICE candidate", other))),
        }
    }

    /// Role announced in a user-joined frame, if any
    pub fn join_info(&self) -> JoinInfo {
        match (&self.kind, &self.data) {
            (SignalKind::UserJoined, Some(data)) => {
                serde_json::from_value(data.clone()).unwrap_or_default()
            }
            _ => JoinInfo::default(),
        }
    }

    /// Broadcast frames reach everyone; directed frames only their recipient
    pub fn is_addressed_to(&self, participant_id: &str) -> bool {
        match &self.to {
            None => !self.kind.is_directed(),
            Some(to) => to == participant_id,
        }
    }
}
