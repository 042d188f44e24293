use serde::Serialize;

use telecare_signaling::IceCandidate;

/// Offer/answer progress with one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingPhase {
    Idle,
    /// We sent an offer and wait for the answer
    OfferSent,
    /// We are applying a remote offer
    OfferReceived,
    /// We sent our answer
    Answered,
    Connected,
    Closed,
}

impl SignalingPhase {
    /// Whether a negotiation is in flight
    pub fn is_negotiating(&self) -> bool {
        matches!(self, SignalingPhase::OfferSent | SignalingPhase::OfferReceived | SignalingPhase::Answered)
    }
}

/// Negotiation state kept per participant
#[derive(Debug, Clone)]
pub struct PeerConnectionState {
    pub phase: SignalingPhase,
    /// Remote candidates waiting for the remote description
    pub ice_candidates_queued: Vec<IceCandidate>,
    pub has_local_offer: bool,
    pub remote_description_set: bool,
}

impl PeerConnectionState {
    pub fn new() -> Self {
        Self {
            phase: SignalingPhase::Idle,
            ice_candidates_queued: Vec::new(),
            has_local_offer: false,
            remote_description_set: false,
        }
    }

    /// Queue a remote candidate, or hand it back if it can be applied now
    pub fn accept_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.ice_candidates_queued.push(candidate);
            None
        }
    }

    /// Mark the remote description applied and take the queued candidates
    pub fn remote_description_applied(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.ice_candidates_queued)
    }
}

impl Default for PeerConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
