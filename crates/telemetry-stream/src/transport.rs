// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport interfaces and the reference implementations used by the CLI.
//!
//! - [`ConsumerTransport`]: source of raw records with subscribe/receive/commit
//!   lifecycle. [`LineConsumer`] reads newline-delimited records from any
//!   async reader (stdin, a file).
//! - [`RemoteTransport`]: destination for serialized batches.
//!   [`TcpRemoteTransport`] writes one newline-terminated payload per batch
//!   over a lazily established TCP connection.

use crate::config::RemoteConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, Split};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Position of a record within its stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
}

/// One record as delivered by a consumer transport.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub payload: Vec<u8>,
    /// Routing key, used as the node name hint by the projector.
    pub key: Option<String>,
    pub position: RecordPosition,
}

/// Source of raw records.
#[async_trait]
pub trait ConsumerTransport: Send {
    /// Start (or restart) the subscription.
    async fn subscribe(&mut self) -> Result<(), TransportError>;

    /// Wait for the next record.
    ///
    /// Returns `Ok(None)` once the stream is exhausted or `cancel` fires.
    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>, TransportError>;

    /// Acknowledge a processed record. Only called in manual-commit mode.
    async fn commit(&mut self, position: &RecordPosition) -> Result<(), TransportError>;

    /// Tear the subscription down.
    async fn unsubscribe(&mut self);

    /// Whether records must be acknowledged explicitly after processing.
    fn manual_commit(&self) -> bool;
}

/// Destination for serialized batches.
///
/// One call carries one batch; the payload is opaque to the transport.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Newline-delimited record consumer.
///
/// The offset of a record is its zero-based line number. In auto-commit
/// mode every delivered record counts as committed immediately.
pub struct LineConsumer<R> {
    topic: String,
    lines: Split<R>,
    next_offset: u64,
    committed: Option<u64>,
    manual_commit: bool,
    subscribed: bool,
}

impl<R> LineConsumer<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(topic: impl Into<String>, reader: R, manual_commit: bool) -> Self {
        Self {
            topic: topic.into(),
            lines: reader.split(b'\n'),
            next_offset: 0,
            committed: None,
            manual_commit,
            subscribed: false,
        }
    }

    /// Highest committed offset, if any record was committed.
    pub fn committed_offset(&self) -> Option<u64> {
        self.committed
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl<R> ConsumerTransport for LineConsumer<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn subscribe(&mut self) -> Result<(), TransportError> {
        self.subscribed = true;
        tracing::debug!(topic = %self.topic, offset = self.next_offset, "Subscribed");
        Ok(())
    }

    async fn receive(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawRecord>, TransportError> {
        if !self.subscribed {
            return Err(TransportError::Fatal(format!(
                "Not subscribed to '{}'",
                self.topic
            )));
        }

        let segment = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            segment = self.lines.next_segment() => segment?,
        };

        let Some(mut payload) = segment else {
            return Ok(None);
        };
        if payload.last() == Some(&b'\r') {
            payload.pop();
        }

        let offset = self.next_offset;
        self.next_offset += 1;
        if !self.manual_commit {
            self.committed = Some(offset);
        }

        Ok(Some(RawRecord {
            payload,
            key: None,
            position: RecordPosition {
                topic: self.topic.clone(),
                partition: 0,
                offset,
            },
        }))
    }

    async fn commit(&mut self, position: &RecordPosition) -> Result<(), TransportError> {
        if position.topic != self.topic {
            return Err(TransportError::Transient(format!(
                "Commit for unknown topic '{}'",
                position.topic
            )));
        }
        if self.committed.map_or(true, |c| position.offset > c) {
            self.committed = Some(position.offset);
        }
        Ok(())
    }

    async fn unsubscribe(&mut self) {
        self.subscribed = false;
        tracing::debug!(topic = %self.topic, committed = ?self.committed, "Unsubscribed");
    }

    fn manual_commit(&self) -> bool {
        self.manual_commit
    }
}

/// Newline-framed TCP delivery of serialized batches.
///
/// Connects on first send. A failed write drops the connection; the next
/// send reconnects.
pub struct TcpRemoteTransport {
    endpoint: String,
    connect_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpRemoteTransport {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            stream: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.endpoint.clone(), config.connect_timeout())
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let stream =
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
                .await
                .map_err(|_| {
                    TransportError::Transient(format!(
                        "Connect to {} timed out after {:?}",
                        self.endpoint, self.connect_timeout
                    ))
                })?
                .map_err(|e| {
                    TransportError::Transient(format!("Connect to {} failed: {}", self.endpoint, e))
                })?;

        stream.set_nodelay(true)?;
        tracing::info!(endpoint = %self.endpoint, "Connected to remote endpoint");
        Ok(stream)
    }
}

async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> std::io::Result<()> {
    stream.write_all(payload).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

#[async_trait]
impl RemoteTransport for TcpRemoteTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Transient(format!(
                "No connection to {}",
                self.endpoint
            )));
        };

        let written = write_frame(stream, &payload).await;
        if let Err(err) = written {
            *guard = None;
            tracing::warn!(endpoint = %self.endpoint, "Write failed, connection dropped: {}", err);
            return Err(TransportError::Io(err));
        }
        Ok(())
    }
}
