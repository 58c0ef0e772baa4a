//! Write-back queue with two independent lanes.
//!
//! The snapshot lane feeds bulk upserts; the statement lane feeds raw
//! statements such as market-close directives. Each lane is drained by one
//! dedicated loop. A failed flush discards its batch (at-most-once) so one
//! bad batch never blocks the ones behind it.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::WriteBackConfig;
use crate::data::types::MarketSnapshot;
use crate::persistence::store::MarketStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteBackStats {
    pub snapshot_depth: usize,
    pub statement_depth: usize,
    pub flushed_snapshots: u64,
    pub flushed_statements: u64,
    pub failed_batches: u64,
    /// Items lost to failed flushes
    pub discarded: u64,
}

pub struct WriteBackQueue {
    store: Arc<dyn MarketStore>,
    snapshots: Mutex<VecDeque<Arc<MarketSnapshot>>>,
    statements: Mutex<VecDeque<String>>,
    batch_size: usize,
    poll_interval: Duration,
    error_backoff: Duration,
    flushed_snapshots: AtomicU64,
    flushed_statements: AtomicU64,
    failed_batches: AtomicU64,
    discarded: AtomicU64,
}

impl WriteBackQueue {
    pub fn new(store: Arc<dyn MarketStore>, config: &WriteBackConfig) -> Self {
        Self {
            store,
            snapshots: Mutex::new(VecDeque::new()),
            statements: Mutex::new(VecDeque::new()),
            batch_size: config.batch_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
            flushed_snapshots: AtomicU64::new(0),
            flushed_statements: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    pub fn enqueue_update(&self, snapshot: Arc<MarketSnapshot>) {
        self.snapshots.lock().push_back(snapshot);
    }

    pub fn enqueue_statement(&self, statement: String) {
        self.statements.lock().push_back(statement);
    }

    /// Queue a directive that suspends the market in storage.
    pub fn enqueue_close(&self, market_id: u32) {
        let statement = self.store.close_statement(market_id);
        self.enqueue_statement(statement);
    }

    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn statement_depth(&self) -> usize {
        self.statements.lock().len()
    }

    pub fn stats(&self) -> WriteBackStats {
        WriteBackStats {
            snapshot_depth: self.snapshot_depth(),
            statement_depth: self.statement_depth(),
            flushed_snapshots: self.flushed_snapshots.load(Ordering::Relaxed),
            flushed_statements: self.flushed_statements.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// Drain the snapshot lane into bulk upserts until cancelled.
    pub async fn run_snapshot_lane(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Snapshot lane started");

        while !cancel.is_cancelled() {
            let batch = self.take_snapshots();
            if batch.is_empty() {
                if pause(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }

            let count = batch.len();
            let started = Instant::now();
            match self.store.bulk_upsert(&batch).await {
                Ok(()) => {
                    self.flushed_snapshots.fetch_add(count as u64, Ordering::Relaxed);
                    debug!(count, elapsed_ms = started.elapsed().as_millis() as u64, "Snapshot batch flushed");
                }
                Err(e) => {
                    self.record_failure(count);
                    error!(count, error = %e, "Snapshot batch flush failed, batch discarded");
                    if pause(self.error_backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!(remaining = self.snapshot_depth(), "Snapshot lane stopped");
    }

    /// Accumulate statements until a full batch is buffered or the lane runs
    /// dry, then execute them together. Runs until cancelled.
    pub async fn run_statement_lane(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Statement lane started");
        let mut pending: Vec<String> = Vec::with_capacity(self.batch_size);

        while !cancel.is_cancelled() {
            {
                let mut lane = self.statements.lock();
                while pending.len() < self.batch_size {
                    match lane.pop_front() {
                        Some(statement) => pending.push(statement),
                        None => break,
                    }
                }
            }

            // Either a full batch or whatever was left when the lane ran dry
            if pending.is_empty() {
                if pause(self.poll_interval, &cancel).await {
                    break;
                }
                continue;
            }

            let count = pending.len();
            let started = Instant::now();
            match self.store.execute(&pending).await {
                Ok(()) => {
                    self.flushed_statements.fetch_add(count as u64, Ordering::Relaxed);
                    debug!(count, elapsed_ms = started.elapsed().as_millis() as u64, "Statement batch executed");
                    pending.clear();
                }
                Err(e) => {
                    pending.clear();
                    self.record_failure(count);
                    error!(count, error = %e, "Statement batch failed, batch discarded");
                    if pause(self.error_backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!(
            remaining = self.statement_depth() + pending.len(),
            "Statement lane stopped"
        );
    }

    fn take_snapshots(&self) -> Vec<Arc<MarketSnapshot>> {
        let mut lane = self.snapshots.lock();
        let take = lane.len().min(self.batch_size);
        lane.drain(..take).collect()
    }

    fn record_failure(&self, count: usize) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Sleep for `period`. Returns `true` if cancellation arrived first.
async fn pause(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(period) => false,
    }
}
