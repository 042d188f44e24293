//! Consultation session orchestration for telecare
//!
//! This crate ties signaling, local media and peer links together into one
//! multi-party consultation:
//!
//! - [`orchestrator`]: the session lifecycle (`Initializing → Active → Ended`)
//!   and the public [`SessionOrchestrator`] handle
//! - [`peer`]: offer/answer negotiation, ICE candidate handling and glare
//!   resolution per participant
//! - [`channel`]: chat and file notices over per-peer data channels
//! - [`ice`]: ICE server configuration with a public STUN fallback
//! - [`archive`]: the contract of the session archive service
//!
//! Platform specifics (devices, peer connections, sockets, storage) are
//! injected through traits, so a session runs the same against a browser
//! bridge, a native WebRTC stack or test doubles.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use telecare_session_core::{SessionBuilder, SessionConfig, ParticipantRole};
//! # use telecare_session_core::{archive::SessionArchive, peer::PeerLinkFactory};
//! # use telecare_media_core::MediaSource;
//! # async fn run(
//! #     devices: Arc<dyn MediaSource>,
//! #     links: Arc<dyn PeerLinkFactory>,
//! #     archive: Arc<dyn SessionArchive>,
//! # ) -> telecare_session_core::Result<()> {
//! let config = SessionConfig::new()
//!     .with_signaling_url("wss://signal.example.org/ws")
//!     .with_ice_config_url("https://api.example.org/ice");
//!
//! let session = SessionBuilder::new("consult-42", "dr-lee")
//!     .role(ParticipantRole::Doctor)
//!     .config(config)
//!     .media_source(devices)
//!     .peer_factory(links)
//!     .archive(archive)
//!     .build()
//!     .await?;
//!
//! session.send_chat("Good morning").await?;
//! let summary = session.end_call().await?;
//! println!("{} messages archived", summary.messages.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod ice;
pub mod orchestrator;
pub mod peer;
pub mod types;

pub use archive::{ArchiveError, FileUpload, SessionArchive, SessionSummary, UploadedFile};
pub use channel::{ChannelMessage, DataChannelProtocol, Delivery, FileNotice, TextMessage};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use events::SessionEvent;
pub use ice::{
    resolve_ice_configuration, HttpIceConfigProvider, IceConfigProvider, IceConfiguration, IceServer,
    StaticIceConfigProvider,
};
pub use orchestrator::{QualitySnapshot, SessionBuilder, SessionOrchestrator};
pub use peer::{
    DataChannelLink, LinkError, LinkEvent, LinkEventSender, LinkState, PeerConnectionManager, PeerLink,
    PeerLinkFactory, SignalingPhase,
};
pub use types::{ParticipantId, ParticipantInfo, ParticipantRole, SessionId, SessionState};
