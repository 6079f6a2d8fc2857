//! Owned, atomics-backed counters exposed through a `snapshot()` method —
//! no process-wide statics, per the design notes on metrics aggregation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    segments_routed: AtomicU64,
    segments_dropped: AtomicU64,
    segments_processed: AtomicU64,
    segments_failed: AtomicU64,
    speakers_evicted: AtomicU64,
    retries_attempted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub segments_routed: u64,
    pub segments_dropped: u64,
    pub segments_processed: u64,
    pub segments_failed: u64,
    pub speakers_evicted: u64,
    pub retries_attempted: u64,
}

impl Metrics {
    pub fn record_routed(&self) {
        self.segments_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.segments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.segments_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.segments_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.speakers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            segments_routed: self.segments_routed.load(Ordering::Relaxed),
            segments_dropped: self.segments_dropped.load(Ordering::Relaxed),
            segments_processed: self.segments_processed.load(Ordering::Relaxed),
            segments_failed: self.segments_failed.load(Ordering::Relaxed),
            speakers_evicted: self.speakers_evicted.load(Ordering::Relaxed),
            retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let m = Metrics::default();
        m.record_routed();
        m.record_routed();
        m.record_dropped();
        let snap = m.snapshot();
        assert_eq!(snap.segments_routed, 2);
        assert_eq!(snap.segments_dropped, 1);
        assert_eq!(snap.segments_processed, 0);
    }
}
