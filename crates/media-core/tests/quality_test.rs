use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use telecare_media_core::quality::QualityMonitor;
use telecare_media_core::{classify, ConnectionStats, Error, QualityLevel, Result, StatsSource};

struct FixedStats(Result<ConnectionStats>);

#[async_trait]
impl StatsSource for FixedStats {
    async fn sample_stats(&self) -> Result<ConnectionStats> {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_sample_reduces_to_worst_link() {
    let sources: Vec<Arc<FixedStats>> = vec![
        Arc::new(FixedStats(Ok(ConnectionStats::new(2000.0, 0.001, 30.0, 3.0)))),
        Arc::new(FixedStats(Ok(ConnectionStats::new(600.0, 0.02, 120.0, 8.0)))),
        Arc::new(FixedStats(Err(Error::Stats("link closed".into())))),
    ];

    let stats = QualityMonitor::sample(&sources).await;
    assert_eq!(stats, ConnectionStats::new(600.0, 0.02, 120.0, 8.0));
    assert_eq!(classify(&stats), QualityLevel::Good);
}

#[tokio::test]
async fn test_sample_without_links_is_disconnected() {
    let sources: Vec<Arc<FixedStats>> = Vec::new();
    let stats = QualityMonitor::sample(&sources).await;
    assert_eq!(classify(&stats), QualityLevel::Disconnected);
}

#[test]
fn test_observe_is_level_triggered() {
    let mut monitor = QualityMonitor::default();
    let poor = ConnectionStats::new(50.0, 0.2, 400.0, 30.0);
    let excellent = ConnectionStats::new(1200.0, 0.005, 50.0, 2.0);

    let first = monitor.observe(poor).expect("first sample always reports");
    assert_eq!(first.previous, None);
    assert_eq!(first.level, QualityLevel::Poor);

    assert!(monitor.observe(ConnectionStats::new(80.0, 0.1, 300.0, 20.0)).is_none());

    let change = monitor.observe(excellent).expect("level changed");
    assert_eq!(change.previous, Some(QualityLevel::Poor));
    assert_eq!(change.level, QualityLevel::Excellent);
    assert_eq!(monitor.current_level(), Some(QualityLevel::Excellent));
    assert_eq!(monitor.last_stats(), Some(excellent));
}

proptest! {
    #[test]
    fn classify_is_deterministic(
        bw in 0.0f64..5000.0,
        loss in 0.0f64..1.0,
        rtt in 0.0f64..1000.0,
        jitter in 0.0f64..200.0,
    ) {
        let stats = ConnectionStats::new(bw, loss, rtt, jitter);
        prop_assert_eq!(classify(&stats), classify(&stats));
    }

    #[test]
    fn more_bandwidth_never_lowers_level(
        bw in 1.0f64..5000.0,
        extra in 0.0f64..5000.0,
        loss in 0.0f64..0.2,
        rtt in 0.0f64..500.0,
    ) {
        let base = classify(&ConnectionStats::new(bw, loss, rtt, 0.0));
        let better = classify(&ConnectionStats::new(bw + extra, loss, rtt, 0.0));
        prop_assert!(better >= base);
    }

    #[test]
    fn jitter_does_not_affect_level(
        bw in 0.0f64..5000.0,
        loss in 0.0f64..0.2,
        rtt in 0.0f64..500.0,
        jitter in 0.0f64..500.0,
    ) {
        prop_assert_eq!(
            classify(&ConnectionStats::new(bw, loss, rtt, 0.0)),
            classify(&ConnectionStats::new(bw, loss, rtt, jitter))
        );
    }
}
