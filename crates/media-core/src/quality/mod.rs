//! Network quality monitoring
//!
//! This module samples transport statistics from every peer link, reduces them
//! to a [`QualityLevel`], and maps level changes to a capture
//! [`VideoProfile`](crate::profile::VideoProfile).

// Statistics and history
pub mod metrics;
pub use metrics::{ConnectionStats, QualityTrend, StatsHistory};

// Classification
pub mod estimation;
pub use estimation::{classify, LevelThreshold, QualityEstimator, QualityLevel};

// Profile adaptation
pub mod adaptation;
pub use adaptation::{AdaptationAction, AdaptationConfig, QualityAdapter};

// Periodic sampling
pub mod monitor;
pub use monitor::{QualityChange, QualityMonitor, StatsSource, DEFAULT_SAMPLE_INTERVAL};
