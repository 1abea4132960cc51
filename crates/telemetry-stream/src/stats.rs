// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters updated by the delivery coordinator.
#[derive(Debug)]
pub struct PipelineStats {
    /// Records pulled from the transport.
    pub records_received: AtomicU64,

    /// Records acknowledged after processing (manual-commit mode).
    pub records_committed: AtomicU64,

    /// Records that produced no measurement.
    pub records_skipped: AtomicU64,

    /// Measurements handed to the processing strategy.
    pub measurements_projected: AtomicU64,

    /// Transient transport errors recovered on the same subscription.
    pub transient_errors: AtomicU64,

    /// Full subscription restarts.
    pub restarts: AtomicU64,

    /// Pipeline start time.
    pub created: Instant,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_committed: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            measurements_projected: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_received(&self, measurements: u64) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
        if measurements == 0 {
            self.records_skipped.fetch_add(1, Ordering::Relaxed);
        } else {
            self.measurements_projected
                .fetch_add(measurements, Ordering::Relaxed);
        }
    }

    pub fn record_committed(&self) {
        self.records_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient_error(&self) {
        self.transient_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_committed: self.records_committed.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            measurements_projected: self.measurements_projected.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pipeline statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub records_received: u64,
    pub records_committed: u64,
    pub records_skipped: u64,
    pub measurements_projected: u64,
    pub transient_errors: u64,
    pub restarts: u64,
    pub uptime_secs: u64,
}

impl PipelineStatsSnapshot {
    /// Calculate records per second.
    pub fn records_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.records_received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_stats_counters() {
        let stats = PipelineStats::new();

        stats.record_received(2);
        stats.record_received(0);
        stats.record_committed();
        stats.record_transient_error();
        stats.record_restart();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.records_received, 2);
        assert_eq!(snapshot.records_skipped, 1);
        assert_eq!(snapshot.measurements_projected, 2);
        assert_eq!(snapshot.records_committed, 1);
        assert_eq!(snapshot.transient_errors, 1);
        assert_eq!(snapshot.restarts, 1);
    }

    #[test]
    fn test_records_per_second_zero_uptime() {
        let snapshot = PipelineStats::new().snapshot();
        assert_eq!(snapshot.records_per_second(), 0.0);
    }
}
