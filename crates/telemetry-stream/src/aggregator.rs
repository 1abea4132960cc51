// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tumbling-window aggregation.
//!
//! Every [`AggregationKey`] owns one bucket accumulating the sum, count and
//! minimum decimal scale of its numeric samples. A window closes when:
//!
//! - a sample for the same key arrives with
//!   `timestamp >= window_start + window` (data-driven close), or
//! - the periodic sweep finds the window expired against the wall clock, or
//! - the aggregator shuts down (every pending bucket is drained).
//!
//! A closed window emits one measurement whose value is the average rounded
//! half away from zero to the bucket's minimum scale.
//!
//! Buckets are locked individually, so different keys never contend, and
//! the emission always happens after the bucket lock is released. Buckets
//! are never evicted; the map grows with the number of distinct keys.

use crate::error::{PipelineError, SinkError};
use crate::measurement::{numeric_sample, scaled_number, AggregationKey, Measurement, NumericSample};
use crate::output::OutputSink;
use crate::periodic::PeriodicTask;
use crate::strategy::ProcessingStrategy;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Running state of one key's current window.
#[derive(Debug, Default)]
struct Bucket {
    sum: f64,
    count: u64,
    min_scale: Option<u32>,
    window_start: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Bucket {
    fn fold(&mut self, sample: NumericSample, timestamp: DateTime<Utc>) {
        if self.count == 0 {
            self.window_start = Some(timestamp);
        }
        self.sum += sample.value;
        self.count += 1;
        self.min_scale = Some(match self.min_scale {
            Some(scale) => scale.min(sample.scale),
            None => sample.scale,
        });
        self.last_timestamp = Some(timestamp);
    }

    fn expired(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        if self.count == 0 {
            return false;
        }
        self.window_start
            .and_then(|start| start.checked_add_signed(window))
            .is_some_and(|end| now >= end)
    }

    /// Swap the window out, leaving a fresh bucket behind.
    fn take(&mut self) -> Option<ClosedWindow> {
        if self.count == 0 {
            return None;
        }
        let bucket = std::mem::take(self);
        Some(ClosedWindow {
            sum: bucket.sum,
            count: bucket.count,
            min_scale: bucket.min_scale,
            last_timestamp: bucket.last_timestamp,
        })
    }
}

/// Captured state of a window that has just closed.
#[derive(Debug)]
struct ClosedWindow {
    sum: f64,
    count: u64,
    min_scale: Option<u32>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ClosedWindow {
    fn into_measurement(self, key: &AggregationKey) -> Measurement {
        let average = self.sum / self.count as f64;
        Measurement::new(
            key.source_id.clone(),
            key.node_name.clone(),
            key.measurement_type.clone(),
            self.last_timestamp.unwrap_or_else(Utc::now),
            scaled_number(average, self.min_scale),
        )
    }
}

struct AggregatorState {
    buckets: DashMap<AggregationKey, Arc<Mutex<Bucket>>>,
    window: TimeDelta,
    output: Arc<dyn OutputSink>,
}

impl AggregatorState {
    async fn emit(&self, key: &AggregationKey, closed: ClosedWindow) -> Result<(), SinkError> {
        let count = closed.count;
        let measurement = closed.into_measurement(key);
        tracing::debug!(
            key = %key,
            samples = count,
            value = %measurement.value,
            "Window closed"
        );
        self.output.send(std::slice::from_ref(&measurement)).await
    }

    /// Emit, logging failures. A failed window is not re-queued.
    async fn emit_logged(&self, key: &AggregationKey, closed: ClosedWindow) {
        if let Err(err) = self.emit(key, closed).await {
            tracing::warn!(key = %key, "Failed to emit aggregated window: {}", err);
        }
    }

    /// Close every bucket selected by `select`, emitting outside the locks.
    async fn close_where<F>(&self, select: F) -> usize
    where
        F: Fn(&Bucket) -> bool,
    {
        let closed: Vec<(AggregationKey, ClosedWindow)> = self
            .buckets
            .iter()
            .filter_map(|entry| {
                let mut bucket = entry.value().lock();
                if !select(&bucket) {
                    return None;
                }
                bucket.take().map(|window| (entry.key().clone(), window))
            })
            .collect();

        let count = closed.len();
        for (key, window) in closed {
            self.emit_logged(&key, window).await;
        }
        count
    }
}

/// Per-key tumbling-window averaging strategy.
pub struct Aggregator {
    state: Arc<AggregatorState>,
    sweeper: PeriodicTask,
    closed: AtomicBool,
}

impl Aggregator {
    /// Create an aggregator emitting closed windows to `output`.
    ///
    /// The sweep runs once per `window` and is started by the first
    /// processed measurement.
    pub fn new(output: Arc<dyn OutputSink>, window: Duration) -> Self {
        Self {
            state: Arc::new(AggregatorState {
                buckets: DashMap::new(),
                window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
                output,
            }),
            sweeper: PeriodicTask::new("aggregation sweep", window),
            closed: AtomicBool::new(false),
        }
    }

    /// Fold one measurement into its key's window.
    ///
    /// Non-numeric values are skipped and never close a window. When the
    /// sample's timestamp lies past the current window, the prior window
    /// is closed and emitted before the sample starts a new one.
    pub async fn add(
        &self,
        measurement: &Measurement,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed("aggregator".to_string()));
        }

        let Some(sample) = numeric_sample(&measurement.value) else {
            tracing::debug!(
                source_id = %measurement.source_id,
                measurement_type = %measurement.measurement_type,
                "Skipping non-numeric sample"
            );
            return Ok(());
        };

        self.ensure_sweeper(cancel);

        let key = measurement.aggregation_key();
        let bucket = Arc::clone(self.state.buckets.entry(key.clone()).or_default().value());

        let closed = {
            let mut bucket = bucket.lock();
            let closed = if bucket.expired(measurement.timestamp, self.state.window) {
                bucket.take()
            } else {
                None
            };
            bucket.fold(sample, measurement.timestamp);
            closed
        };

        if let Some(window) = closed {
            self.state.emit_logged(&key, window).await;
        }
        Ok(())
    }

    /// Close and emit every window expired relative to `now`.
    ///
    /// Returns the number of windows emitted.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let window = self.state.window;
        self.state
            .close_where(|bucket| bucket.expired(now, window))
            .await
    }

    /// Number of keys seen so far.
    pub fn bucket_count(&self) -> usize {
        self.state.buckets.len()
    }

    /// Stop the sweep and drain every pending window. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.sweeper.stop().await;

        let drained = self.state.close_where(|_| true).await;
        if drained > 0 {
            tracing::debug!("Drained {} pending windows", drained);
        }
    }

    fn ensure_sweeper(&self, cancel: &CancellationToken) {
        let state = Arc::clone(&self.state);
        self.sweeper.start_once(cancel, move || {
            let state = Arc::clone(&state);
            async move {
                let now = Utc::now();
                let window = state.window;
                let swept = state.close_where(|bucket| bucket.expired(now, window)).await;
                if swept > 0 {
                    tracing::debug!("Sweep closed {} expired windows", swept);
                }
            }
        });
    }
}

#[async_trait]
impl ProcessingStrategy for Aggregator {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn process(
        &self,
        measurement: Measurement,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.add(&measurement, cancel).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        Aggregator::shutdown(self).await;
    }
}
