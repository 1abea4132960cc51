// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote delivery sink.

use super::OutputSink;
use crate::error::SinkError;
use crate::measurement::Measurement;
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use std::sync::Arc;

/// Serializes batches and hands them to a [`RemoteTransport`].
///
/// Transport failures propagate to the caller.
pub struct RemoteSink {
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteSink {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }
}

/// Serialize a batch for the wire.
///
/// A single measurement becomes one JSON object, several become a JSON
/// array. Empty batches produce nothing.
pub fn serialize_batch(batch: &[Measurement]) -> Result<Option<Vec<u8>>, serde_json::Error> {
    match batch {
        [] => Ok(None),
        [single] => serde_json::to_vec(single).map(Some),
        many => serde_json::to_vec(many).map(Some),
    }
}

#[async_trait]
impl OutputSink for RemoteSink {
    fn name(&self) -> &str {
        "remote"
    }

    async fn send(&self, batch: &[Measurement]) -> Result<(), SinkError> {
        let Some(payload) = serialize_batch(batch)? else {
            return Ok(());
        };

        tracing::debug!(
            endpoint = self.transport.endpoint(),
            batch_size = batch.len(),
            bytes = payload.len(),
            "Sending batch"
        );
        self.transport.send(payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct MemoryTransport {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteTransport for MemoryTransport {
        fn endpoint(&self) -> &str {
            "memory"
        }

        async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Transient("connection refused".into()));
            }
            self.payloads.lock().push(payload);
            Ok(())
        }
    }

    fn measurement(v: Value) -> Measurement {
        Measurement::new("src", Some("node".into()), "temp", Utc::now(), v)
    }

    #[tokio::test]
    async fn test_remote_single_is_object_many_is_array() {
        let transport = Arc::new(MemoryTransport::default());
        let sink = RemoteSink::new(transport.clone());

        sink.send(&[measurement(json!(1))]).await.expect("send one");
        sink.send(&[measurement(json!(1)), measurement(json!(2))])
            .await
            .expect("send two");
        sink.send(&[]).await.expect("send none");

        let payloads = transport.payloads.lock();
        assert_eq!(payloads.len(), 2);

        let first: Value = serde_json::from_slice(&payloads[0]).expect("json");
        assert!(first.is_object());
        assert_eq!(first["measurementType"], json!("temp"));

        let second: Value = serde_json::from_slice(&payloads[1]).expect("json");
        assert_eq!(second.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_remote_propagates_transport_failure() {
        let transport = Arc::new(MemoryTransport {
            fail: true,
            ..Default::default()
        });
        let sink = RemoteSink::new(transport);

        let result = sink.send(&[measurement(json!(1))]).await;
        assert!(matches!(result, Err(SinkError::Transport(_))));
    }

    #[test]
    fn test_serialize_batch_keeps_literal_text() {
        let value: Value = serde_json::from_str("1.50").expect("parse");
        let payload = serialize_batch(&[measurement(value)])
            .expect("serialize")
            .expect("payload");
        let text = String::from_utf8(payload).expect("utf8");
        assert!(text.contains("\"value\":1.50"));
    }
}
