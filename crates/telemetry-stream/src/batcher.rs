// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batching buffer for measurements.
//!
//! Accumulates measurements and flushes them downstream either when the
//! batch is full or when the configured time interval has elapsed.
//!
//! The buffer lock is held only to append or to swap the contents out;
//! the downstream send always happens after the lock is released. Flushes
//! themselves are serialized by a separate async lock, so size-triggered,
//! timer and manual flushes reach downstream one at a time in buffer order.
//! A batch whose send fails is put back at the front of the buffer so the
//! next flush retries it ahead of anything that arrived meanwhile.

use crate::config::BatchingConfig;
use crate::error::{PipelineError, SinkError};
use crate::measurement::Measurement;
use crate::output::OutputSink;
use crate::periodic::PeriodicTask;
use crate::strategy::ProcessingStrategy;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct BatchBuffer {
    pending: Mutex<VecDeque<Measurement>>,
    flushing: tokio::sync::Mutex<()>,
    downstream: Arc<dyn OutputSink>,
    max_size: usize,
}

impl BatchBuffer {
    /// Append one measurement. Returns true when the buffer is full.
    fn push(&self, measurement: Measurement) -> bool {
        let mut pending = self.pending.lock();
        pending.push_back(measurement);
        pending.len() >= self.max_size
    }

    /// Append a whole batch. Returns true when the buffer is full.
    fn extend(&self, batch: &[Measurement]) -> bool {
        let mut pending = self.pending.lock();
        pending.extend(batch.iter().cloned());
        pending.len() >= self.max_size
    }

    /// Swap the buffer out and send it downstream.
    ///
    /// Returns the number of measurements delivered.
    async fn flush(&self) -> Result<usize, SinkError> {
        let _flushing = self.flushing.lock().await;

        let batch: Vec<Measurement> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(0);
            }
            pending.drain(..).collect()
        };

        match self.downstream.send(&batch).await {
            Ok(()) => Ok(batch.len()),
            Err(err) => {
                tracing::warn!(
                    sink = self.downstream.name(),
                    batch_size = batch.len(),
                    "Flush failed, batch kept for retry: {}",
                    err
                );
                let mut pending = self.pending.lock();
                for measurement in batch.into_iter().rev() {
                    pending.push_front(measurement);
                }
                Err(err)
            }
        }
    }
}

/// Size- and time-triggered measurement batcher.
///
/// Measurements are accumulated until either:
/// - The buffer reaches `max_batch_size` (flushed within the adding call)
/// - The periodic timer fires (every `flush_interval`)
pub struct Batcher {
    buffer: Arc<BatchBuffer>,
    timer: PeriodicTask,
    closed: AtomicBool,
}

impl Batcher {
    /// Create a batcher in front of `downstream`.
    ///
    /// # Arguments
    /// - `max_batch_size` - Number of measurements that triggers a flush
    /// - `flush_interval` - Period of the background flush
    pub fn new(
        downstream: Arc<dyn OutputSink>,
        max_batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            buffer: Arc::new(BatchBuffer {
                pending: Mutex::new(VecDeque::with_capacity(max_batch_size)),
                flushing: tokio::sync::Mutex::new(()),
                downstream,
                max_size: max_batch_size.max(1),
            }),
            timer: PeriodicTask::new("batch flush", flush_interval),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(downstream: Arc<dyn OutputSink>, config: &BatchingConfig) -> Self {
        Self::new(downstream, config.max_batch_size, config.flush_interval())
    }

    /// Add a measurement, flushing immediately if the batch is full.
    ///
    /// The periodic flush task is started on first use and stops with
    /// `cancel`. A failed size-triggered flush is not an error for the
    /// caller; the batch stays buffered for the next attempt.
    pub async fn add(
        &self,
        measurement: Measurement,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed(format!(
                "batcher({})",
                self.buffer.downstream.name()
            )));
        }

        self.ensure_timer(cancel);

        if self.buffer.push(measurement) {
            // failures are logged and retained by flush
            let _ = self.buffer.flush().await;
        }
        Ok(())
    }

    /// Add a whole batch, flushing once afterwards if the buffer is full.
    ///
    /// The batch is never split: a flush may carry more than
    /// `max_batch_size` measurements when retained ones are ahead of it.
    pub async fn add_batch(
        &self,
        batch: &[Measurement],
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed(format!(
                "batcher({})",
                self.buffer.downstream.name()
            )));
        }

        self.ensure_timer(cancel);

        if self.buffer.extend(batch) {
            self.buffer.flush().await?;
        }
        Ok(())
    }

    /// Flush buffered measurements now.
    pub async fn flush(&self) -> Result<usize, SinkError> {
        self.buffer.flush().await
    }

    /// Stop the timer and make a final flush attempt.
    ///
    /// Idempotent. Errors from the final flush are logged, not returned.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.timer.stop().await;

        match self.buffer.flush().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Final flush delivered {} measurements", n),
            Err(err) => tracing::warn!(
                "Final flush failed, {} measurements left unflushed at shutdown: {}",
                self.len(),
                err
            ),
        }
    }

    /// Get the current number of buffered measurements.
    pub fn len(&self) -> usize {
        self.buffer.pending.lock().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.pending.lock().is_empty()
    }

    pub fn downstream(&self) -> &Arc<dyn OutputSink> {
        &self.buffer.downstream
    }

    fn ensure_timer(&self, cancel: &CancellationToken) {
        let buffer = Arc::clone(&self.buffer);
        self.timer.start_once(cancel, move || {
            let buffer = Arc::clone(&buffer);
            async move {
                // failures are logged and retained by flush
                let _ = buffer.flush().await;
            }
        });
    }
}

#[async_trait]
impl ProcessingStrategy for Batcher {
    fn name(&self) -> &'static str {
        "batcher"
    }

    async fn process(
        &self,
        measurement: Measurement,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.add(measurement, cancel).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        Batcher::shutdown(self).await;
    }
}
