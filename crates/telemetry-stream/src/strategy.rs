// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Processing strategies.
//!
//! Exactly one strategy sits between the projector and the output:
//!
//! | mode          | batching | strategy         | output                |
//! |---------------|----------|------------------|-----------------------|
//! | `passthrough` | off      | [`Passthrough`]  | composite             |
//! | `passthrough` | on       | [`Batcher`]      | composite             |
//! | `aggregation` | off      | [`Aggregator`]   | composite             |
//! | `aggregation` | on       | [`Aggregator`]   | batching -> composite |

use crate::aggregator::Aggregator;
use crate::batcher::Batcher;
use crate::config::{PipelineConfig, ProcessingMode};
use crate::error::PipelineError;
use crate::measurement::Measurement;
use crate::output::OutputSink;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A stage turning measurements into output batches.
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    /// Strategy name used in logs.
    fn name(&self) -> &'static str;

    /// Process one measurement.
    ///
    /// `cancel` bounds any background work the strategy starts lazily.
    async fn process(
        &self,
        measurement: Measurement,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError>;

    /// Drain buffered state downstream. Idempotent.
    async fn shutdown(&self);
}

/// Forwards every measurement as a singleton batch.
pub struct Passthrough {
    output: Arc<dyn OutputSink>,
}

impl Passthrough {
    pub fn new(output: Arc<dyn OutputSink>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl ProcessingStrategy for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn process(
        &self,
        measurement: Measurement,
        _cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        self.output.send(std::slice::from_ref(&measurement)).await?;
        Ok(())
    }

    async fn shutdown(&self) {}
}

/// Select the strategy for the configured processing mode.
pub fn build_strategy(
    config: &PipelineConfig,
    output: Arc<dyn OutputSink>,
) -> Arc<dyn ProcessingStrategy> {
    match config.processing.mode {
        ProcessingMode::Aggregation => {
            Arc::new(Aggregator::new(output, config.processing.window()))
        }
        ProcessingMode::Passthrough if config.batching.enabled => {
            Arc::new(Batcher::from_config(output, &config.batching))
        }
        ProcessingMode::Passthrough => Arc::new(Passthrough::new(output)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::RecordingSink;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_passthrough_sends_singleton_batches() {
        let sink = Arc::new(RecordingSink::new());
        let strategy = Passthrough::new(sink.clone());
        let cancel = CancellationToken::new();

        for i in 0..3 {
            let m = Measurement::new("src", None, "t", Utc::now(), json!(i));
            strategy.process(m, &cancel).await.expect("process");
        }

        let batches = sink.batches();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[tokio::test]
    async fn test_passthrough_reports_sink_failure() {
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        let strategy = Passthrough::new(sink);

        let m = Measurement::new("src", None, "t", Utc::now(), json!(1));
        let result = strategy.process(m, &CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::Sink(_))));
    }

    #[test]
    fn test_build_strategy_by_mode() {
        let sink: Arc<dyn OutputSink> = Arc::new(RecordingSink::new());
        let mut config = PipelineConfig::default();
        assert_eq!(build_strategy(&config, sink.clone()).name(), "passthrough");

        config.batching.enabled = true;
        assert_eq!(build_strategy(&config, sink.clone()).name(), "batcher");

        config.processing.mode = ProcessingMode::Aggregation;
        assert_eq!(build_strategy(&config, sink).name(), "aggregator");
    }
}
