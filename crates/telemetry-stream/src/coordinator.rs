// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery coordinator.
//!
//! Drives a [`ConsumerTransport`] through its subscription lifecycle and
//! feeds each record through the projector and the processing strategy.
//!
//! ```text
//! Starting -> Subscribed -> Consuming <-> BackoffWait
//!    ^                          |
//!    +------ (fatal error) -----+-----> Shutdown
//! ```
//!
//! In manual-commit mode a record is acknowledged only after every
//! measurement it produced has been processed, which gives at-least-once
//! delivery: a crash between processing and commit replays the record.
//! Auto-commit transports acknowledge on their own schedule and are
//! therefore at-most-once per commit interval.

use crate::config::DeliveryConfig;
use crate::error::{PipelineError, TransportError};
use crate::parser::Projector;
use crate::stats::PipelineStats;
use crate::strategy::ProcessingStrategy;
use crate::transport::{ConsumerTransport, RawRecord};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Starting,
    Subscribed,
    Consuming,
    BackoffWait,
    /// Terminal.
    Shutdown,
}

impl CoordinatorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Starting => "starting",
            CoordinatorState::Subscribed => "subscribed",
            CoordinatorState::Consuming => "consuming",
            CoordinatorState::BackoffWait => "backoff_wait",
            CoordinatorState::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a consuming session ended.
enum SessionEnd {
    Cancelled,
    EndOfStream,
    Restart(PipelineError),
}

/// Record delivery loop with backoff and subscription restart.
pub struct DeliveryCoordinator {
    projector: Projector,
    strategy: Arc<dyn ProcessingStrategy>,
    config: DeliveryConfig,
    stats: Arc<PipelineStats>,
    state: watch::Sender<CoordinatorState>,
}

impl DeliveryCoordinator {
    pub fn new(
        projector: Projector,
        strategy: Arc<dyn ProcessingStrategy>,
        config: DeliveryConfig,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Starting);
        Self {
            projector,
            strategy,
            config,
            stats,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Run until `cancel` fires or the transport reports end of stream.
    ///
    /// Never returns an error: transient failures back off on the same
    /// subscription, fatal failures and processing errors rebuild it.
    /// The record being processed when `cancel` fires is finished first.
    pub async fn run<T>(&self, transport: &mut T, cancel: &CancellationToken)
    where
        T: ConsumerTransport + ?Sized,
    {
        while !cancel.is_cancelled() {
            self.set_state(CoordinatorState::Starting);

            if let Err(err) = transport.subscribe().await {
                tracing::error!("Subscribe failed: {}", err);
                self.stats.record_restart();
                if !self.backoff(cancel).await {
                    break;
                }
                continue;
            }
            self.set_state(CoordinatorState::Subscribed);

            match self.consume(transport, cancel).await {
                SessionEnd::Cancelled => {
                    tracing::info!("Delivery cancelled");
                    transport.unsubscribe().await;
                    break;
                }
                SessionEnd::EndOfStream => {
                    tracing::info!("End of stream reached");
                    transport.unsubscribe().await;
                    break;
                }
                SessionEnd::Restart(err) => {
                    tracing::error!("Restarting subscription after error: {}", err);
                    transport.unsubscribe().await;
                    self.stats.record_restart();
                    if !self.backoff(cancel).await {
                        break;
                    }
                }
            }
        }

        self.set_state(CoordinatorState::Shutdown);
    }

    async fn consume<T>(&self, transport: &mut T, cancel: &CancellationToken) -> SessionEnd
    where
        T: ConsumerTransport + ?Sized,
    {
        loop {
            self.set_state(CoordinatorState::Consuming);

            let record = match transport.receive(cancel).await {
                Ok(Some(record)) => record,
                Ok(None) if cancel.is_cancelled() => return SessionEnd::Cancelled,
                Ok(None) => return SessionEnd::EndOfStream,
                Err(err) if err.is_fatal() => return SessionEnd::Restart(err.into()),
                Err(err) => {
                    if !self.transient(err, cancel).await {
                        return SessionEnd::Cancelled;
                    }
                    continue;
                }
            };

            if let Err(err) = self.handle_record(&record, cancel).await {
                return SessionEnd::Restart(err);
            }

            if transport.manual_commit() {
                match transport.commit(&record.position).await {
                    Ok(()) => self.stats.record_committed(),
                    Err(err) if err.is_fatal() => return SessionEnd::Restart(err.into()),
                    Err(err) => {
                        if !self.transient(err, cancel).await {
                            return SessionEnd::Cancelled;
                        }
                    }
                }
            }
        }
    }

    /// Project one record and process every resulting measurement.
    async fn handle_record(
        &self,
        record: &RawRecord,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut projected = 0u64;
        let projection = self
            .projector
            .project(&record.payload, record.key.as_deref());

        for measurement in projection {
            projected += 1;
            if let Err(err) = self.strategy.process(measurement, cancel).await {
                self.stats.record_received(projected);
                return Err(err);
            }
        }

        self.stats.record_received(projected);
        tracing::trace!(
            topic = %record.position.topic,
            offset = record.position.offset,
            measurements = projected,
            "Record processed"
        );
        Ok(())
    }

    /// Log a transient error and wait out the backoff.
    async fn transient(&self, err: TransportError, cancel: &CancellationToken) -> bool {
        tracing::warn!("Transient transport error, backing off: {}", err);
        self.stats.record_transient_error();
        self.set_state(CoordinatorState::BackoffWait);
        self.backoff(cancel).await
    }

    /// Sleep for the configured backoff. Returns false if cancelled.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.backoff()) => true,
        }
    }

    fn set_state(&self, next: CoordinatorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Coordinator state");
        }
    }
}
