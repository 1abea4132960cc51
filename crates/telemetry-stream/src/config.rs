// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline configuration.
//!
//! Supports both programmatic and TOML file-based configuration. The core
//! consumes these structs as immutable values once the pipeline is built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name (for identification in logs).
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Interest rules selecting which records become measurements.
    #[serde(default)]
    pub interests: Vec<InterestRule>,

    /// Processing strategy selection.
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Size/time batching.
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Output sinks.
    #[serde(default)]
    pub output: OutputConfig,

    /// Consumer delivery semantics.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_pipeline_name() -> String {
    "telemetry-stream".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_batch_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            log_level: default_log_level(),
            interests: Vec::new(),
            processing: ProcessingConfig::default(),
            batching: BatchingConfig::default(),
            output: OutputConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Add an interest rule.
    pub fn add_interest(&mut self, rule: InterestRule) {
        self.interests.push(rule);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, rule) in self.interests.iter().enumerate() {
            if rule.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Interest {} has empty source",
                    i
                )));
            }
            if rule.node_name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Interest {} has empty node_name",
                    i
                )));
            }
        }

        if self.processing.mode == ProcessingMode::Aggregation && self.processing.window_secs == 0
        {
            return Err(ConfigError::Invalid(
                "Aggregation window must be at least 1 second".into(),
            ));
        }

        if self.batching.enabled {
            if self.batching.max_batch_size == 0 {
                return Err(ConfigError::Invalid(
                    "Batching max_batch_size must be greater than 0".into(),
                ));
            }
            if self.batching.flush_interval_secs == 0 {
                return Err(ConfigError::Invalid(
                    "Batching flush_interval_secs must be greater than 0".into(),
                ));
            }
        }

        if self.output.action.sends() {
            match &self.output.remote {
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "Output action {:?} requires an [output.remote] section",
                        self.output.action
                    )))
                }
                Some(remote) if remote.endpoint.trim().is_empty() => {
                    return Err(ConfigError::Invalid("Remote endpoint is empty".into()))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Filter and projection rule for incoming records.
///
/// `source` and `node_name` match case-insensitively. When
/// `measurement_key` is absent the whole record value is projected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestRule {
    pub source: String,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_key: Option<String>,
}

impl InterestRule {
    /// Rule projecting the whole value of a source/node pair.
    pub fn new(source: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            node_name: node_name.into(),
            measurement_key: None,
        }
    }

    /// Project a single field of the value instead.
    pub fn key(mut self, measurement_key: impl Into<String>) -> Self {
        self.measurement_key = Some(measurement_key.into());
        self
    }

    /// The measurement key, treating an empty string as absent.
    pub fn measurement_key(&self) -> Option<&str> {
        self.measurement_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Processing mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    Passthrough,
    Aggregation,
}

/// Processing strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub mode: ProcessingMode,

    /// Tumbling window length for aggregation (seconds).
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Passthrough,
            window_secs: default_window_secs(),
        }
    }
}

impl ProcessingConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Batching configuration.
///
/// In passthrough mode the batcher is the processing strategy; in
/// aggregation mode it decorates the output instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_batch_size: default_max_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Which sinks receive output batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputAction {
    #[default]
    LogOnly,
    SendOnly,
    LogAndSend,
}

impl OutputAction {
    pub fn logs(self) -> bool {
        matches!(self, OutputAction::LogOnly | OutputAction::LogAndSend)
    }

    pub fn sends(self) -> bool {
        matches!(self, OutputAction::SendOnly | OutputAction::LogAndSend)
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub action: OutputAction,

    /// Also log the fully serialized batch.
    #[serde(default)]
    pub log_payloads: bool,

    /// Remote delivery endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

/// Remote sink transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// `host:port` of the collector.
    pub endpoint: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RemoteConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Delivery coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Acknowledge each record only after it has been processed.
    #[serde(default = "default_true")]
    pub manual_commit: bool,

    /// Delay applied after transport errors (milliseconds).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Statistics reporting interval (seconds, 0 to disable).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            manual_commit: true,
            backoff_ms: default_backoff_ms(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl DeliveryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
