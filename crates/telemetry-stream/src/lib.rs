// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry streaming pipeline
//!
//! Consumes raw telemetry records, projects them into typed measurements
//! according to configured interest rules, optionally aggregates or batches
//! them, and fans the result out to logging and remote sinks.
//!
//! ```text
//! ConsumerTransport --> DeliveryCoordinator --> Projector
//!                                                  |
//!                          Passthrough | Batcher | Aggregator
//!                                                  |
//!                        [BatchingSink] --> CompositeSink --> LogSink, RemoteSink
//! ```
//!
//! # Features
//!
//! - **Interest projection**: select source/node pairs and pick single fields
//! - **Tumbling windows**: per-key averages with scale-aware rounding
//! - **Batching**: size- and time-triggered, failed batches retried in order
//! - **Fan-out**: one failing sink never blocks the others
//! - **At-least-once delivery**: records committed only after processing
//!
//! # Quick Start
//!
//! ```bash
//! # Print projected measurements from a file of JSON lines
//! telemetry-stream --config pipeline.toml --input records.jsonl
//!
//! # Generate an example configuration
//! telemetry-stream gen-config --output pipeline.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "plant-floor"
//!
//! [[interests]]
//! source = "src1"
//! node_name = "nodeA"
//! measurement_key = "temperature"
//!
//! [processing]
//! mode = "aggregation"
//! window_secs = 60
//!
//! [output]
//! action = "log_and_send"
//!
//! [output.remote]
//! endpoint = "127.0.0.1:9400"
//! ```

pub mod aggregator;
pub mod batcher;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod measurement;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod stats;
pub mod strategy;
pub mod transport;

mod periodic;

pub use aggregator::Aggregator;
pub use batcher::Batcher;
pub use config::{InterestRule, OutputAction, PipelineConfig, ProcessingMode};
pub use coordinator::{CoordinatorState, DeliveryCoordinator};
pub use error::{ConfigError, PipelineError, SinkError, TransportError};
pub use measurement::{AggregationKey, Measurement};
pub use output::{BatchingSink, CompositeSink, LogSink, OutputSink, RemoteSink};
pub use parser::{Projection, Projector};
pub use pipeline::Pipeline;
pub use stats::{PipelineStats, PipelineStatsSnapshot};
pub use strategy::{Passthrough, ProcessingStrategy};
pub use transport::{
    ConsumerTransport, LineConsumer, RawRecord, RecordPosition, RemoteTransport,
    TcpRemoteTransport,
};
