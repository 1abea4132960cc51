// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the pipeline.

use thiserror::Error;

pub use crate::config::ConfigError;

/// Errors raised by the consumer or remote transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Recoverable on the same subscription after a backoff.
    #[error("Transient transport error: {0}")]
    Transient(String),

    /// Requires tearing down and rebuilding the subscription.
    #[error("Fatal transport error: {0}")]
    Fatal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error requires a full subscription restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// Errors raised by an output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Remote transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sink '{0}' is closed")]
    Closed(String),
}

/// Top-level pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
