// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end pipeline tests over an in-memory line consumer.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry_stream::config::RemoteConfig;
use telemetry_stream::{
    CoordinatorState, InterestRule, LineConsumer, OutputAction, Pipeline, PipelineConfig,
    ProcessingMode, RemoteTransport, TransportError,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MemoryRemote {
    payloads: Mutex<Vec<String>>,
    fail: AtomicBool,
    failures_left: AtomicUsize,
}

impl MemoryRemote {
    fn payloads(&self) -> Vec<Value> {
        self.payloads
            .lock()
            .iter()
            .map(|p| serde_json::from_str(p).expect("payload is json"))
            .collect()
    }

    fn raw(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    /// Every delivered measurement value, flattening array payloads.
    fn values(&self) -> Vec<Value> {
        self.payloads()
            .into_iter()
            .flat_map(|p| match p {
                Value::Array(items) => items,
                single => vec![single],
            })
            .map(|m| m["value"].clone())
            .collect()
    }
}

#[async_trait]
impl RemoteTransport for MemoryRemote {
    fn endpoint(&self) -> &str {
        "memory"
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Transient("remote down".into()));
        }
        let failing_once = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing_once {
            return Err(TransportError::Transient("remote hiccup".into()));
        }
        let text =
            String::from_utf8(payload).map_err(|e| TransportError::Fatal(e.to_string()))?;
        self.payloads.lock().push(text);
        Ok(())
    }
}

fn sending_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.add_interest(InterestRule::new("src1", "nodeA").key("temperature"));
    config.output.action = OutputAction::SendOnly;
    config.output.remote = Some(RemoteConfig::new("memory:0"));
    config
}

fn record(node: &str, ts: &str, temperature: &str) -> String {
    format!(
        r#"{{"source":"src1","nodeName":"{}","timestamp_iso":"{}","value":{{"temperature":{},"humidity":50}}}}"#,
        node, ts, temperature
    )
}

async fn run(config: &PipelineConfig, remote: Arc<MemoryRemote>, lines: &[String]) -> Pipeline {
    let input = lines.join("\n");
    let remote: Arc<dyn RemoteTransport> = remote;
    let pipeline = Pipeline::new(config, Some(remote)).expect("pipeline");
    let mut consumer = LineConsumer::new("test", input.as_bytes(), true);
    pipeline.run(&mut consumer, &CancellationToken::new()).await;
    pipeline
}

#[tokio::test]
async fn test_passthrough_sends_each_matching_measurement() {
    let remote = Arc::new(MemoryRemote::default());
    let lines = vec![
        record("nodeA", "2024-01-01T00:00:00Z", "12.34"),
        "{not json".to_string(),
        record("nodeB", "2024-01-01T00:00:01Z", "1"),
        record("NODEA", "2024-01-01T00:00:02Z", "13.5"),
    ];

    let pipeline = run(&sending_config(), remote.clone(), &lines).await;

    let payloads = remote.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0]["measurementType"], "temperature");
    assert_eq!(payloads[0]["sourceId"], "src1");
    assert!(remote.raw()[0].contains("\"value\":12.34"));

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.records_received, 4);
    assert_eq!(stats.records_skipped, 2);
    assert_eq!(stats.records_committed, 4);
    assert_eq!(pipeline.state(), CoordinatorState::Shutdown);
}

#[tokio::test]
async fn test_multiple_rules_project_independent_measurements() {
    let remote = Arc::new(MemoryRemote::default());
    let mut config = sending_config();
    config.add_interest(InterestRule::new("src1", "nodeA").key("humidity"));
    config.add_interest(InterestRule::new("src1", "nodeA").key("pressure"));

    let lines = vec![record("nodeA", "2024-01-01T00:00:00Z", "20")];
    run(&config, remote.clone(), &lines).await;

    let types: Vec<String> = remote
        .payloads()
        .iter()
        .filter_map(|p| p["measurementType"].as_str().map(str::to_string))
        .collect();
    assert_eq!(types, vec!["temperature", "humidity"]);
}

#[tokio::test]
async fn test_passthrough_batching_flushes_full_batches_and_remainder() {
    let remote = Arc::new(MemoryRemote::default());
    let mut config = sending_config();
    config.batching.enabled = true;
    config.batching.max_batch_size = 2;

    let lines: Vec<String> = (0..3)
        .map(|i| record("nodeA", &format!("2024-01-01T00:00:0{}Z", i), &i.to_string()))
        .collect();
    run(&config, remote.clone(), &lines).await;

    let payloads = remote.payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].as_array().map(Vec::len), Some(2));
    assert!(payloads[1].is_object());
    assert_eq!(payloads[1]["value"], 2);
}

#[tokio::test]
async fn test_aggregation_emits_rounded_window_averages() {
    let remote = Arc::new(MemoryRemote::default());
    let mut config = sending_config();
    config.processing.mode = ProcessingMode::Aggregation;
    config.processing.window_secs = 60;

    let lines = vec![
        record("nodeA", "2024-01-01T00:00:00Z", "1.2"),
        record("nodeA", "2024-01-01T00:00:10Z", "1.26"),
        record("nodeA", "2024-01-01T00:01:10Z", "5"),
    ];
    run(&config, remote.clone(), &lines).await;

    let raw = remote.raw();
    assert_eq!(raw.len(), 2);
    assert!(raw[0].contains("\"value\":1.2,") || raw[0].ends_with("\"value\":1.2}"));

    let payloads = remote.payloads();
    assert_eq!(payloads[0]["timestamp"], "2024-01-01T00:00:10Z");
    assert_eq!(payloads[0]["nodeName"], "nodeA");
    assert_eq!(payloads[1]["value"], 5);
}

#[tokio::test]
async fn test_aggregation_then_batching_delivers_windows_together() {
    let remote = Arc::new(MemoryRemote::default());
    let mut config = sending_config();
    config.processing.mode = ProcessingMode::Aggregation;
    config.batching.enabled = true;
    config.batching.max_batch_size = 10;

    let lines = vec![
        record("nodeA", "2024-01-01T00:00:00Z", "2"),
        record("nodeA", "2024-01-01T00:02:00Z", "4"),
    ];
    run(&config, remote.clone(), &lines).await;

    let payloads = remote.payloads();
    assert_eq!(payloads.len(), 1);
    let batch = payloads[0].as_array().expect("array batch");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["value"], 2);
    assert_eq!(batch[1]["value"], 4);
}

#[tokio::test]
async fn test_failing_remote_does_not_stop_logging_or_commits() {
    let remote = Arc::new(MemoryRemote::default());
    remote.fail.store(true, Ordering::SeqCst);
    let mut config = sending_config();
    config.output.action = OutputAction::LogAndSend;

    let lines = vec![
        record("nodeA", "2024-01-01T00:00:00Z", "1"),
        record("nodeA", "2024-01-01T00:00:01Z", "2"),
    ];
    let pipeline = run(&config, remote.clone(), &lines).await;

    assert!(remote.raw().is_empty());
    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.records_committed, 2);
    assert_eq!(stats.restarts, 0);
}

#[tokio::test]
async fn test_rejected_batch_is_resent_after_remote_recovers() {
    let remote = Arc::new(MemoryRemote::default());
    remote.failures_left.store(1, Ordering::SeqCst);
    let mut config = sending_config();
    config.batching.enabled = true;
    config.batching.max_batch_size = 2;

    let lines: Vec<String> = (1..=4)
        .map(|i| record("nodeA", &format!("2024-01-01T00:00:0{}Z", i), &i.to_string()))
        .collect();
    let pipeline = run(&config, remote.clone(), &lines).await;

    assert_eq!(remote.values(), vec![1, 2, 3, 4]);
    assert_eq!(pipeline.stats().snapshot().records_committed, 4);
}

#[tokio::test]
async fn test_rejected_window_batch_is_resent_on_shutdown() {
    let remote = Arc::new(MemoryRemote::default());
    remote.failures_left.store(1, Ordering::SeqCst);
    let mut config = sending_config();
    config.processing.mode = ProcessingMode::Aggregation;
    config.batching.enabled = true;
    config.batching.max_batch_size = 1;

    let lines = vec![
        record("nodeA", "2024-01-01T00:00:00Z", "2"),
        record("nodeA", "2024-01-01T00:02:00Z", "4"),
    ];
    run(&config, remote.clone(), &lines).await;

    assert_eq!(remote.values(), vec![2, 4]);
}

#[tokio::test]
async fn test_send_without_remote_is_rejected() {
    let config = sending_config();
    assert!(Pipeline::new(&config, None).is_err());
}
