//! Local media and network quality for telecare consultations
//!
//! - [`capture`]: camera, microphone and screen capture control
//! - [`quality`]: connection statistics, classification and profile adaptation
//!
//! Device access goes through the [`MediaSource`] trait so the same controller
//! runs against a platform backend or a test double.

pub mod capture;
pub mod error;
pub mod profile;
pub mod quality;
pub mod source;
pub mod stream;
pub mod track;

pub use capture::MediaCaptureController;
pub use error::{Error, Result};
pub use profile::{MediaConstraints, VideoConstraints, VideoProfile};
pub use quality::{
    classify, AdaptationAction, AdaptationConfig, ConnectionStats, QualityAdapter, QualityChange,
    QualityLevel, QualityMonitor, QualityTrend, StatsSource,
};
pub use source::MediaSource;
pub use stream::LocalStream;
pub use track::{LocalTrack, RemoteTrack, TrackId, TrackKind, TrackSource};
