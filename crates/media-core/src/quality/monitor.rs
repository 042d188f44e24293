use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::quality::estimation::{QualityEstimator, QualityLevel};
use crate::quality::metrics::{ConnectionStats, QualityTrend, StatsHistory};

/// Default time between samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Anything that can report transport statistics
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn sample_stats(&self) -> Result<ConnectionStats>;
}

/// Emitted when the classified level differs from the previous sample
#[derive(Debug, Clone, PartialEq)]
pub struct QualityChange {
    /// `None` for the first sample of a session
    pub previous: Option<QualityLevel>,
    pub level: QualityLevel,
    pub stats: ConnectionStats,
    pub trend: QualityTrend,
}

/// Level-triggered quality monitor
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    interval: Duration,
    estimator: QualityEstimator,
    current: Option<QualityLevel>,
    history: StatsHistory,
}

impl QualityMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            estimator: QualityEstimator::default(),
            current: None,
            history: StatsHistory::default(),
        }
    }

    /// Sample every source concurrently and keep the worst value per field.
    ///
    /// Sources that fail are skipped; with no usable source the result is all
    /// zeros, which classifies as `Disconnected`.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use telecare_media_core::{classify, QualityLevel, QualityMonitor, StatsSource};
    ///
    /// # tokio_test::block_on(async {
    /// let links: Vec<Arc<dyn StatsSource>> = Vec::new();
    /// let stats = QualityMonitor::sample(links.as_slice()).await;
    /// assert_eq!(classify(&stats), QualityLevel::Disconnected);
    /// # })
    /// ```
    pub async fn sample<S>(sources: &[Arc<S>]) -> ConnectionStats
    where
        S: StatsSource + ?Sized,
    {
        let results = join_all(sources.iter().map(|source| source.sample_stats())).await;

        let samples = results.into_iter().filter_map(|result| match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Skipping link in quality sample: {}", e);
                None
            }
        });
        ConnectionStats::aggregate(samples)
    }

    pub fn classify(&self, stats: &ConnectionStats) -> QualityLevel {
        self.estimator.classify(stats)
    }

    /// Record a sample; returns a change when the level differs from the last one
    pub fn observe(&mut self, stats: ConnectionStats) -> Option<QualityChange> {
        let level = self.classify(&stats);
        self.history.push(stats, level);

        debug!(
            level = %level,
            bandwidth_kbps = stats.bandwidth_kbps,
            packet_loss = stats.packet_loss_rate,
            rtt_ms = stats.round_trip_time_ms,
            "Quality sample"
        );

        if self.current == Some(level) {
            return None;
        }

        let previous = self.current.replace(level);
        info!("Connection quality {:?} -> {}", previous, level);
        Some(QualityChange { previous, level, stats, trend: self.history.trend() })
    }

    pub fn current_level(&self) -> Option<QualityLevel> {
        self.current
    }

    pub fn last_stats(&self) -> Option<ConnectionStats> {
        self.history.latest().map(|(stats, _)| *stats)
    }

    pub fn trend(&self) -> QualityTrend {
        self.history.trend()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }
}
