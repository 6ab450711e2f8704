//! Round-trip latency of model inference calls, kept as an HDR histogram in
//! microseconds and reported in milliseconds.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;

/// Longest call the histogram resolves (10 minutes, in microseconds). Slower
/// calls are clamped to it.
const MAX_TRACKED_US: u64 = 600_000_000;

pub struct LatencyStats {
    histogram: Mutex<Histogram<u64>>,
}

/// Point-in-time view served by `/stats/latency`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, MAX_TRACKED_US, 3).expect("valid histogram bounds");
        Self {
            histogram: Mutex::new(histogram),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        if let Ok(mut h) = self.histogram.lock() {
            h.saturating_record(us.clamp(1, MAX_TRACKED_US));
        }
    }

    /// Awaits `fut` and records how long it took.
    pub async fn time<F: Future>(&self, fut: F) -> F::Output {
        let started = Instant::now();
        let out = fut.await;
        self.record(started.elapsed());
        out
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.histogram.lock() else {
            return LatencySnapshot::default();
        };
        if h.len() == 0 {
            return LatencySnapshot::default();
        }
        let ms = |us: u64| Some(us as f64 / 1_000.0);
        LatencySnapshot {
            samples: h.len(),
            p50_ms: ms(h.value_at_quantile(0.5)),
            p95_ms: ms(h.value_at_quantile(0.95)),
            p99_ms: ms(h.value_at_quantile(0.99)),
            max_ms: ms(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot() {
        let stats = LatencyStats::new();
        assert_eq!(stats.snapshot(), LatencySnapshot::default());
    }

    #[test]
    fn percentiles_follow_samples() {
        let stats = LatencyStats::new();
        for ms in 1..=100u64 {
            stats.record(Duration::from_millis(ms));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.samples, 100);
        let p50 = snap.p50_ms.unwrap();
        assert!((49.0..=51.0).contains(&p50), "p50 was {p50}");
        assert!(snap.p99_ms.unwrap() >= 98.0);
        assert!(snap.max_ms.unwrap() >= 99.9);
    }

    #[test]
    fn absurd_durations_are_clamped() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_secs(3_600));
        let max = stats.snapshot().max_ms.unwrap();
        assert!(max >= 599_000.0 && max <= 601_000.0, "max was {max}");
    }

    #[tokio::test(start_paused = true)]
    async fn time_records_awaited_duration() {
        let stats = LatencyStats::new();
        let out = stats
            .time(async {
                tokio::time::sleep(Duration::from_millis(40)).await;
                7
            })
            .await;
        assert_eq!(out, 7);
        assert_eq!(stats.snapshot().samples, 1);
    }
}
