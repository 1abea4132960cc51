// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output composition.
//!
//! ```text
//! batch --> [BatchingSink] --> CompositeSink --+--> LogSink
//!                                              +--> [retrying] --> RemoteSink --> RemoteTransport
//! ```
//!
//! The composite isolates sink failures: one failing sink never prevents
//! delivery to the others. With batching enabled the remote sink is wrapped
//! in a retrying [`BatchingSink`], so a batch the remote rejects stays
//! queued for that sink alone instead of being dropped by the composite.

pub mod batching;
pub mod composite;
pub mod log;
pub mod remote;

pub use batching::BatchingSink;
pub use composite::CompositeSink;
pub use log::LogSink;
pub use remote::RemoteSink;

use crate::config::{ConfigError, PipelineConfig, ProcessingMode};
use crate::error::SinkError;
use crate::measurement::Measurement;
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An output destination accepting batches of measurements.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Sink name used in logs.
    fn name(&self) -> &str;

    /// Deliver one batch.
    async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError>;

    /// Flush anything held back and release resources.
    async fn shutdown(&self) {}
}

/// Build the output chain described by the configuration.
///
/// `remote` is required when the output action sends. Batching wraps the
/// composite only in aggregation mode; in passthrough mode the batcher is
/// the processing strategy instead. Either way the remote sink retains
/// rejected batches while batching is enabled.
pub fn build_output(
    config: &PipelineConfig,
    remote: Option<Arc<dyn RemoteTransport>>,
    cancel: &CancellationToken,
) -> Result<Arc<dyn OutputSink>, ConfigError> {
    let mut sinks: Vec<Arc<dyn OutputSink>> = Vec::new();

    if config.output.action.logs() {
        sinks.push(Arc::new(LogSink::new(config.output.log_payloads)));
    }

    if config.output.action.sends() {
        let transport = remote.ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Output action {:?} requires a remote transport",
                config.output.action
            ))
        })?;
        let remote: Arc<dyn OutputSink> = Arc::new(RemoteSink::new(transport));
        if config.batching.enabled {
            sinks.push(Arc::new(BatchingSink::retrying(
                remote,
                &config.batching,
                cancel.clone(),
            )));
        } else {
            sinks.push(remote);
        }
    }

    let composite: Arc<dyn OutputSink> = Arc::new(CompositeSink::new(sinks));

    if config.batching.enabled && config.processing.mode == ProcessingMode::Aggregation {
        return Ok(Arc::new(BatchingSink::new(
            composite,
            &config.batching,
            cancel.clone(),
        )));
    }

    Ok(composite)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording and failing sinks shared by unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records every batch it receives.
    #[derive(Default)]
    pub struct RecordingSink {
        batches: Mutex<Vec<Vec<Measurement>>>,
        fail: AtomicBool,
        shutdowns: AtomicUsize,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn batches(&self) -> Vec<Vec<Measurement>> {
            self.batches.lock().clone()
        }

        pub fn measurements(&self) -> Vec<Measurement> {
            self.batches.lock().iter().flatten().cloned().collect()
        }

        pub fn shutdowns(&self) -> usize {
            self.shutdowns.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OutputSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Closed("recording".into()));
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OutputAction, RemoteConfig};

    #[test]
    fn test_build_output_requires_remote_transport() {
        let mut config = PipelineConfig::default();
        config.output.action = OutputAction::LogAndSend;
        config.output.remote = Some(RemoteConfig::new("127.0.0.1:9400"));

        let result = build_output(&config, None, &CancellationToken::new());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_build_output_log_only() {
        let config = PipelineConfig::default();
        let output = build_output(&config, None, &CancellationToken::new()).expect("build");
        assert_eq!(output.name(), "composite");
    }

    #[test]
    fn test_build_output_batches_after_aggregation() {
        let mut config = PipelineConfig::default();
        config.processing.mode = ProcessingMode::Aggregation;
        config.batching.enabled = true;

        let output = build_output(&config, None, &CancellationToken::new()).expect("build");
        assert_eq!(output.name(), "batching");

        config.processing.mode = ProcessingMode::Passthrough;
        let output = build_output(&config, None, &CancellationToken::new()).expect("build");
        assert_eq!(output.name(), "composite");
    }
}
