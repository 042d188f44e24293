//! Peer connections to the other participants of a consultation

pub mod link;
pub mod manager;
pub mod state;
pub(crate) mod worker;

pub use link::{DataChannelLink, LinkError, LinkEvent, LinkEventSender, LinkId, LinkState, PeerLink, PeerLinkFactory};
pub use manager::{keeps_local_offer, PeerConnectionManager};
pub use state::{PeerConnectionState, SignalingPhase};

pub(crate) use manager::PeerManagerSetup;
pub(crate) use worker::PeerOutcome;
