// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline assembly.
//!
//! Wires configuration into projector, strategy and output, runs the
//! delivery coordinator and drains everything on the way out.

use crate::config::{ConfigError, PipelineConfig};
use crate::coordinator::{CoordinatorState, DeliveryCoordinator};
use crate::output::{build_output, OutputSink};
use crate::parser::Projector;
use crate::stats::{PipelineStats, PipelineStatsSnapshot};
use crate::strategy::{build_strategy, ProcessingStrategy};
use crate::transport::{ConsumerTransport, RemoteTransport};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A configured telemetry pipeline.
pub struct Pipeline {
    name: String,
    coordinator: DeliveryCoordinator,
    strategy: Arc<dyn ProcessingStrategy>,
    output: Arc<dyn OutputSink>,
    stats: Arc<PipelineStats>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline from a validated configuration.
    ///
    /// `remote` must be provided when the output action sends.
    pub fn new(
        config: &PipelineConfig,
        remote: Option<Arc<dyn RemoteTransport>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let output = build_output(config, remote, &cancel)?;
        let strategy = build_strategy(config, Arc::clone(&output));
        let stats = Arc::new(PipelineStats::new());
        let coordinator = DeliveryCoordinator::new(
            Projector::new(config.interests.clone()),
            Arc::clone(&strategy),
            config.delivery.clone(),
            Arc::clone(&stats),
        );

        tracing::info!(
            pipeline = %config.name,
            strategy = strategy.name(),
            output = output.name(),
            interests = config.interests.len(),
            "Pipeline built"
        );

        Ok(Self {
            name: config.name.clone(),
            coordinator,
            strategy,
            output,
            stats,
            cancel,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.coordinator.subscribe_state()
    }

    /// Consume from `transport` until `cancel` fires or the stream ends,
    /// then drain the strategy and the output.
    ///
    /// Pending batches and open windows are flushed once the delivery loop
    /// has stopped; a pipeline is not restartable after `run` returns.
    pub async fn run<T>(
        &self,
        transport: &mut T,
        cancel: &CancellationToken,
    ) -> PipelineStatsSnapshot
    where
        T: ConsumerTransport + ?Sized,
    {
        tracing::info!(pipeline = %self.name, "Pipeline running");
        self.coordinator.run(transport, cancel).await;

        tracing::debug!(pipeline = %self.name, "Draining buffered state");
        self.strategy.shutdown().await;
        self.output.shutdown().await;
        self.cancel.cancel();

        let snapshot = self.stats.snapshot();
        tracing::info!(
            pipeline = %self.name,
            records = snapshot.records_received,
            measurements = snapshot.measurements_projected,
            restarts = snapshot.restarts,
            "Pipeline stopped"
        );
        snapshot
    }
}
