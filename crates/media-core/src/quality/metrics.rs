//! Connection statistics and their short-term history

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::quality::estimation::QualityLevel;

/// Default number of samples kept for trend reporting
pub const DEFAULT_HISTORY_LEN: usize = 20;

/// Transport statistics for one sampling tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Available outgoing bandwidth in kbps
    pub bandwidth_kbps: f64,
    /// Packet loss as a fraction (0.0-1.0)
    pub packet_loss_rate: f64,
    /// Round-trip time in milliseconds
    pub round_trip_time_ms: f64,
    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,
}

impl ConnectionStats {
    pub fn new(bandwidth_kbps: f64, packet_loss_rate: f64, round_trip_time_ms: f64, jitter_ms: f64) -> Self {
        Self { bandwidth_kbps, packet_loss_rate, round_trip_time_ms, jitter_ms }
    }

    /// Combine two observations keeping the worse value of each field
    pub fn worse_of(self, other: ConnectionStats) -> ConnectionStats {
        ConnectionStats {
            bandwidth_kbps: self.bandwidth_kbps.min(other.bandwidth_kbps),
            packet_loss_rate: self.packet_loss_rate.max(other.packet_loss_rate),
            round_trip_time_ms: self.round_trip_time_ms.max(other.round_trip_time_ms),
            jitter_ms: self.jitter_ms.max(other.jitter_ms),
        }
    }

    /// Reduce per-link observations to one; no links yields all zeros
    pub fn aggregate<I>(samples: I) -> ConnectionStats
    where
        I: IntoIterator<Item = ConnectionStats>,
    {
        samples
            .into_iter()
            .reduce(ConnectionStats::worse_of)
            .unwrap_or_default()
    }
}

/// Quality trend indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTrend {
    Improving,
    Stable,
    Degrading,
}

/// Bounded history of classified samples
#[derive(Debug, Clone)]
pub struct StatsHistory {
    samples: VecDeque<(ConnectionStats, QualityLevel)>,
    capacity: usize,
}

impl StatsHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, stats: ConnectionStats, level: QualityLevel) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((stats, level));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn latest(&self) -> Option<&(ConnectionStats, QualityLevel)> {
        self.samples.back()
    }

    /// Compare the latest level with the average of the three before it
    pub fn trend(&self) -> QualityTrend {
        if self.samples.len() < 4 {
            return QualityTrend::Stable;
        }

        let mut iter = self.samples.iter().rev();
        let latest = match iter.next() {
            Some((_, level)) => level.rank() as f64,
            None => return QualityTrend::Stable,
        };
        let previous: Vec<f64> = iter.take(3).map(|(_, level)| level.rank() as f64).collect();
        let avg = previous.iter().sum::<f64>() / previous.len() as f64;

        // Half a level of difference
        let threshold = 0.5;

        if latest > avg + threshold {
            QualityTrend::Improving
        } else if latest < avg - threshold {
            QualityTrend::Degrading
        } else {
            QualityTrend::Stable
        }
    }
}

impl Default for StatsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}
