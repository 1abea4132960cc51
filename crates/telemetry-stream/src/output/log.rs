// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured log sink.

use super::OutputSink;
use crate::error::SinkError;
use crate::measurement::Measurement;
use async_trait::async_trait;

/// Emits each measurement as a structured `tracing` event.
///
/// Never fails: formatting problems are logged as warnings.
pub struct LogSink {
    log_payloads: bool,
}

impl LogSink {
    /// `log_payloads` additionally logs the serialized batch.
    pub fn new(log_payloads: bool) -> Self {
        Self { log_payloads }
    }
}

#[async_trait]
impl OutputSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError> {
        for m in batch {
            match serde_json::to_string(&m.value) {
                Ok(value) => tracing::info!(
                    source_id = %m.source_id,
                    node_name = m.node_name.as_deref().unwrap_or("-"),
                    measurement_type = %m.measurement_type,
                    timestamp = %m.timestamp.to_rfc3339(),
                    value = %value,
                    "measurement"
                ),
                Err(err) => tracing::warn!(
                    source_id = %m.source_id,
                    measurement_type = %m.measurement_type,
                    "Failed to format measurement: {}",
                    err
                ),
            }
        }

        if self.log_payloads {
            match serde_json::to_string(batch) {
                Ok(payload) => tracing::info!(batch_size = batch.len(), payload = %payload, "batch"),
                Err(err) => tracing::warn!("Failed to serialize batch for logging: {}", err),
            }
        }

        Ok(())
    }
}
