use serde::{Deserialize, Serialize};
use std::fmt;

use crate::quality::metrics::ConnectionStats;

/// Quality level categorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    /// No usable bandwidth
    Disconnected,
    /// Below the good thresholds
    Poor,
    /// At least 500 kbps, at most 5% loss and 200 ms RTT
    Good,
    /// At least 1000 kbps, at most 1% loss and 100 ms RTT
    Excellent,
}

impl QualityLevel {
    /// Numeric rank, higher is better
    pub fn rank(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Poor => 1,
            Self::Good => 2,
            Self::Excellent => 3,
        }
    }

    /// Get a description of the quality level
    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent connection",
            Self::Good => "Good connection",
            Self::Poor => "Poor connection, video quality reduced",
            Self::Disconnected => "Connection lost",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Minimums a sample must meet to reach a level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelThreshold {
    pub min_bandwidth_kbps: f64,
    pub max_packet_loss_rate: f64,
    pub max_round_trip_time_ms: f64,
}

impl LevelThreshold {
    fn admits(&self, stats: &ConnectionStats) -> bool {
        stats.bandwidth_kbps >= self.min_bandwidth_kbps
            && stats.packet_loss_rate <= self.max_packet_loss_rate
            && stats.round_trip_time_ms <= self.max_round_trip_time_ms
    }
}

/// Classifier from connection statistics to [`QualityLevel`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityEstimator {
    pub excellent: LevelThreshold,
    pub good: LevelThreshold,
}

impl Default for QualityEstimator {
    fn default() -> Self {
        Self {
            excellent: LevelThreshold {
                min_bandwidth_kbps: 1000.0,
                max_packet_loss_rate: 0.01,
                max_round_trip_time_ms: 100.0,
            },
            good: LevelThreshold {
                min_bandwidth_kbps: 500.0,
                max_packet_loss_rate: 0.05,
                max_round_trip_time_ms: 200.0,
            },
        }
    }
}

impl QualityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one sample. Zero, negative or NaN bandwidth is `Disconnected`.
    pub fn classify(&self, stats: &ConnectionStats) -> QualityLevel {
        if !(stats.bandwidth_kbps > 0.0) {
            QualityLevel::Disconnected
        } else if self.excellent.admits(stats) {
            QualityLevel::Excellent
        } else if self.good.admits(stats) {
            QualityLevel::Good
        } else {
            QualityLevel::Poor
        }
    }
}

/// Classify with the default thresholds
pub fn classify(stats: &ConnectionStats) -> QualityLevel {
    QualityEstimator::default().classify(stats)
}
