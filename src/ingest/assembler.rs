use async_trait::async_trait;
use futures::FutureExt;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::IntakeConfig;
use crate::ingest::channel::IntakeChannel;

/// Consumer of assembled batches.
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    type Outcome: Debug + Send;

    async fn handle_batch(&self, batch: Vec<T>) -> anyhow::Result<Self::Outcome>;
}

#[derive(Debug, Default)]
pub struct AssemblerCounters {
    total_processed: AtomicU64,
    total_batches: AtomicU64,
}

impl AssemblerCounters {
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::Relaxed)
    }

    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }
}

/// Pulls from one intake channel and hands time/size bounded batches to a
/// handler. A non-empty batch is always flushed at the end of a wait cycle,
/// so latency is bounded by the timeout rather than by batch fill.
pub struct BatchAssembler<T, H> {
    channel: Arc<IntakeChannel<T>>,
    handler: Arc<H>,
    batch_size: usize,
    batch_timeout: Duration,
    stats_interval: Duration,
    counters: Arc<AssemblerCounters>,
}

impl<T, H> BatchAssembler<T, H>
where
    T: Send + 'static,
    H: BatchHandler<T> + 'static,
{
    pub fn new(channel: Arc<IntakeChannel<T>>, handler: Arc<H>, config: &IntakeConfig) -> Self {
        Self {
            channel,
            handler,
            batch_size: config.batch_size.max(1),
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            stats_interval: Duration::from_secs(config.stats_interval_secs),
            counters: Arc::new(AssemblerCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<AssemblerCounters> {
        Arc::clone(&self.counters)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            channel = self.channel.name(),
            batch_size = self.batch_size,
            timeout_ms = self.batch_timeout.as_millis() as u64,
            "Batch assembler started"
        );

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut last_stats = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                waited = tokio::time::timeout(self.batch_timeout, self.channel.wait_to_read()) => {
                    // Closed and fully drained
                    if let Ok(false) = waited {
                        break;
                    }
                }
            }

            self.collect(&mut batch);
            if !batch.is_empty() {
                let ready = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.process(ready).await;
            }

            if last_stats.elapsed() >= self.stats_interval {
                last_stats = Instant::now();
                self.log_stats();
            }
        }

        let drained = self.drain_remaining().await;

        info!(
            channel = self.channel.name(),
            drained,
            total_processed = self.counters.total_processed(),
            total_batches = self.counters.total_batches(),
            "Batch assembler stopped"
        );
    }

    fn collect(&self, batch: &mut Vec<T>) {
        while batch.len() < self.batch_size {
            match self.channel.try_read() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
    }

    /// Errors and panics inside the handler are logged; the batch is lost
    /// and the loop keeps going.
    async fn process(&self, batch: Vec<T>) {
        let count = batch.len();

        match AssertUnwindSafe(self.handler.handle_batch(batch))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => {
                self.counters
                    .total_processed
                    .fetch_add(count as u64, Ordering::Relaxed);
                self.counters.total_batches.fetch_add(1, Ordering::Relaxed);
                debug!(channel = self.channel.name(), count, ?outcome, "Batch processed");
            }
            Ok(Err(e)) => {
                error!(channel = self.channel.name(), count, error = %e, "Batch processing failed");
            }
            Err(_) => {
                error!(channel = self.channel.name(), count, "Batch handler panicked, batch lost");
            }
        }
    }

    async fn drain_remaining(&self) -> usize {
        let mut drained = 0;
        loop {
            let mut batch = Vec::with_capacity(self.batch_size);
            self.collect(&mut batch);
            if batch.is_empty() {
                return drained;
            }
            drained += batch.len();
            self.process(batch).await;
        }
    }

    fn log_stats(&self) {
        let stats = self.channel.stats();
        info!(
            channel = self.channel.name(),
            total_processed = self.counters.total_processed(),
            total_batches = self.counters.total_batches(),
            depth = stats.current_depth,
            written = stats.total_written,
            read = stats.total_read,
            dropped = stats.total_dropped,
            "Batch assembler stats"
        );
    }
}
