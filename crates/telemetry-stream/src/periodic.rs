// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lazily started periodic background task.
//!
//! Used by the batcher (time-based flush) and the aggregator (window
//! sweep). The task is spawned on first use only, so a component that is
//! never fed never owns a timer.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

struct Running {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

#[derive(Default)]
struct Slot {
    running: Option<Running>,
    stopped: bool,
}

/// Start-once, stop-once periodic task.
pub(crate) struct PeriodicTask {
    name: &'static str,
    period: Duration,
    slot: Mutex<Slot>,
}

impl PeriodicTask {
    pub(crate) fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Spawn the task unless it is already running or has been stopped.
    ///
    /// The task exits when either `parent` or [`PeriodicTask::stop`]
    /// cancels it. Must be called from within a tokio runtime.
    pub(crate) fn start_once<F, Fut>(&self, parent: &CancellationToken, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.slot.lock();
        if slot.running.is_some() || slot.stopped {
            return;
        }

        let stop = parent.child_token();
        let token = stop.clone();
        // tokio intervals reject a zero period
        let period = self.period.max(Duration::from_millis(1));
        let name = self.name;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => tick().await,
                }
            }

            tracing::debug!("{} task stopped", name);
        });

        tracing::debug!("{} task started (period {:?})", name, period);
        slot.running = Some(Running { handle, stop });
    }

    /// Stop the task and wait for it to exit. Later starts are no-ops.
    pub(crate) async fn stop(&self) {
        let running = {
            let mut slot = self.slot.lock();
            slot.stopped = true;
            slot.running.take()
        };

        if let Some(running) = running {
            running.stop.cancel();
            if let Err(err) = running.handle.await {
                tracing::warn!("{} task ended abnormally: {}", self.name, err);
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.slot.lock().running.is_some()
    }
}
