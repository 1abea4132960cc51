// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batching output decorator.

use super::OutputSink;
use crate::batcher::Batcher;
use crate::config::BatchingConfig;
use crate::error::SinkError;
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Buffers measurements in front of another sink.
///
/// Same semantics as the passthrough [`Batcher`], placed after
/// aggregation so that closed windows are delivered in batches.
///
/// Built with [`BatchingSink::retrying`] it only retains what `inner`
/// failed to accept: incoming batches pass straight through while `inner`
/// is healthy, and a rejected batch is resent ahead of the next one.
pub struct BatchingSink {
    batcher: Batcher,
    cancel: CancellationToken,
    name: &'static str,
    whole_batches: bool,
}

impl BatchingSink {
    /// Wrap `inner`; the flush timer stops with `cancel`.
    pub fn new(
        inner: Arc<dyn OutputSink>,
        config: &BatchingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            batcher: Batcher::from_config(inner, config),
            cancel,
            name: "batching",
            whole_batches: false,
        }
    }

    /// Wrap `inner` so that batches it rejects are kept and retried.
    ///
    /// Retries happen on the next send and every `config` flush interval.
    pub fn retrying(
        inner: Arc<dyn OutputSink>,
        config: &BatchingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            batcher: Batcher::new(inner, 1, config.flush_interval()),
            cancel,
            name: "retrying",
            whole_batches: true,
        }
    }

    /// Number of measurements waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.batcher.len()
    }
}

#[async_trait]
impl OutputSink for BatchingSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError> {
        if self.whole_batches {
            return self.batcher.add_batch(batch, &self.cancel).await;
        }
        for measurement in batch {
            self.batcher.add(measurement.clone(), &self.cancel).await?;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.batcher.shutdown().await;
        self.batcher.downstream().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingSink;
    use chrono::Utc;
    use serde_json::json;

    fn config(max_batch_size: usize) -> BatchingConfig {
        BatchingConfig {
            enabled: true,
            max_batch_size,
            flush_interval_secs: 60,
        }
    }

    fn measurement(i: i64) -> Measurement {
        Measurement::new("src", Some("node".into()), "t", Utc::now(), json!(i))
    }

    #[tokio::test]
    async fn test_batching_sink_groups_batches() {
        let inner = Arc::new(RecordingSink::new());
        let sink = BatchingSink::new(inner.clone(), &config(3), CancellationToken::new());

        sink.send(&[measurement(1)]).await.expect("send");
        sink.send(&[measurement(2), measurement(3), measurement(4)])
            .await
            .expect("send");

        assert_eq!(inner.batches().len(), 1);
        assert_eq!(inner.batches()[0].len(), 3);
        assert_eq!(sink.pending(), 1);

        sink.shutdown().await;
        assert_eq!(inner.batches().len(), 2);
        assert_eq!(inner.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_retrying_sink_resends_rejected_batch_first() {
        let inner = Arc::new(RecordingSink::new());
        let sink = BatchingSink::retrying(inner.clone(), &config(100), CancellationToken::new());
        assert_eq!(sink.name(), "retrying");

        sink.send(&[measurement(1), measurement(2)]).await.expect("send");
        assert_eq!(inner.batches().len(), 1);
        assert_eq!(sink.pending(), 0);

        inner.set_failing(true);
        assert!(sink.send(&[measurement(3), measurement(4)]).await.is_err());
        assert_eq!(sink.pending(), 2);

        inner.set_failing(false);
        sink.send(&[measurement(5)]).await.expect("send");

        let batches = inner.batches();
        assert_eq!(batches.len(), 2);
        let values: Vec<i64> = batches[1].iter().filter_map(|m| m.value.as_i64()).collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(sink.pending(), 0);

        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_retrying_sink_final_flush_on_shutdown() {
        let inner = Arc::new(RecordingSink::new());
        let sink = BatchingSink::retrying(inner.clone(), &config(100), CancellationToken::new());

        inner.set_failing(true);
        assert!(sink.send(&[measurement(1)]).await.is_err());

        inner.set_failing(false);
        sink.shutdown().await;
        assert_eq!(inner.measurements().len(), 1);
        assert_eq!(inner.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_batching_sink_rejects_after_shutdown() {
        let inner = Arc::new(RecordingSink::new());
        let sink = BatchingSink::new(inner, &config(10), CancellationToken::new());

        sink.shutdown().await;
        let result = sink.send(&[measurement(1)]).await;
        assert!(matches!(result, Err(SinkError::Closed(_))));
    }
}
