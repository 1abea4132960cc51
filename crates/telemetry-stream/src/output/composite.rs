// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out to an ordered set of sinks.

use super::OutputSink;
use crate::error::SinkError;
use crate::measurement::Measurement;
use async_trait::async_trait;
use std::sync::Arc;

/// Sends every batch to each sink in order.
///
/// A failing sink is logged with its name and skipped; the composite
/// itself never reports a partial failure.
pub struct CompositeSink {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl OutputSink for CompositeSink {
    fn name(&self) -> &str {
        "composite"
    }

    async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError> {
        for sink in &self.sinks {
            if let Err(err) = sink.send(batch).await {
                tracing::warn!(
                    sink = sink.name(),
                    batch_size = batch.len(),
                    "Sink failed, continuing with remaining sinks: {}",
                    err
                );
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        for sink in &self.sinks {
            sink.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingSink;
    use chrono::Utc;
    use serde_json::json;

    fn measurement(i: i64) -> Measurement {
        Measurement::new("src", Some("node".into()), "t", Utc::now(), json!(i))
    }

    #[tokio::test]
    async fn test_composite_isolates_failing_sink() {
        let failing = Arc::new(RecordingSink::new());
        failing.set_failing(true);
        let healthy = Arc::new(RecordingSink::new());

        let composite = CompositeSink::new(vec![failing.clone(), healthy.clone()]);

        for i in 0..5 {
            composite.send(&[measurement(i)]).await.expect("composite never fails");
        }

        assert!(failing.batches().is_empty());
        assert_eq!(healthy.batches().len(), 5);
        assert_eq!(healthy.measurements()[4].value, json!(4));
    }

    #[tokio::test]
    async fn test_composite_same_batch_to_every_sink() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let composite = CompositeSink::new(vec![a.clone(), b.clone()]);

        composite
            .send(&[measurement(1), measurement(2)])
            .await
            .expect("send");

        assert_eq!(a.batches(), b.batches());
        assert_eq!(a.batches()[0].len(), 2);
        assert_eq!(composite.len(), 2);
    }

    #[tokio::test]
    async fn test_composite_shutdown_reaches_all_sinks() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let composite = CompositeSink::new(vec![a.clone(), b.clone()]);

        composite.shutdown().await;
        assert_eq!(a.shutdowns(), 1);
        assert_eq!(b.shutdowns(), 1);
    }
}
