use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::cache::SnapshotCache;
use crate::data::types::Quote;
use crate::ingest::assembler::BatchAssembler;
use crate::ingest::channel::IntakeChannel;
use crate::monitoring::logger::{run_reporter, CsvLogger};
use crate::monitoring::stats::{PipelineProbe, PipelineStats};
use crate::persistence::store::{EventResolver, MarketStore};
use crate::persistence::writeback::WriteBackQueue;
use crate::reconcile::clock::{Clock, SystemClock};
use crate::reconcile::handler::ReconciliationHandler;
use crate::reconcile::types::BatchReport;

/// Running ingestion pipeline: one intake channel and its assembler, the
/// shared snapshot cache, and the two write-back lanes.
///
/// Every background task is spawned on one `TaskTracker`, so `shutdown`
/// can wait for all of them deterministically.
pub struct OddsPipeline {
    channel: Arc<IntakeChannel<Quote>>,
    cache: Arc<SnapshotCache>,
    queue: Arc<WriteBackQueue>,
    handler: Arc<ReconciliationHandler>,
    probe: PipelineProbe,
    tracker: TaskTracker,
    assembler: JoinHandle<()>,
    intake_cancel: CancellationToken,
    writeback_cancel: CancellationToken,
}

impl OddsPipeline {
    /// Spawn the pipeline on the current runtime.
    pub fn start(
        config: &Config,
        store: Arc<dyn MarketStore>,
        resolver: Arc<dyn EventResolver>,
    ) -> Result<Self> {
        Self::start_with_clock(config, store, resolver, Arc::new(SystemClock::new()))
    }

    pub fn start_with_clock(
        config: &Config,
        store: Arc<dyn MarketStore>,
        resolver: Arc<dyn EventResolver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let clock_name = clock.name().to_string();
        let csv = if config.monitoring.csv_logging {
            Some(CsvLogger::new(config.monitoring.csv_log_path.clone())?)
        } else {
            None
        };

        let channel = Arc::new(IntakeChannel::new("odds", config.intake.capacity));
        let cache = Arc::new(SnapshotCache::new());
        let queue = Arc::new(WriteBackQueue::new(Arc::clone(&store), &config.writeback));
        let handler = Arc::new(ReconciliationHandler::new(
            resolver,
            store,
            Arc::clone(&cache),
            Arc::clone(&queue),
            clock,
            &config.reconcile,
        ));

        let assembler = BatchAssembler::new(Arc::clone(&channel), Arc::clone(&handler), &config.intake);
        let probe = PipelineProbe::new(
            Arc::clone(&channel),
            Arc::clone(&cache),
            Arc::clone(&queue),
            assembler.counters(),
        );

        let tracker = TaskTracker::new();
        let intake_cancel = CancellationToken::new();
        let writeback_cancel = CancellationToken::new();

        let assembler = tracker.spawn(assembler.run(intake_cancel.clone()));
        tracker.spawn(Arc::clone(&queue).run_snapshot_lane(writeback_cancel.clone()));
        tracker.spawn(Arc::clone(&queue).run_statement_lane(writeback_cancel.clone()));
        tracker.spawn(run_reporter(
            probe.clone(),
            csv,
            Duration::from_secs(config.monitoring.stats_interval_secs.max(1)),
            writeback_cancel.clone(),
        ));

        info!(
            capacity = channel.capacity(),
            batch_size = config.intake.batch_size,
            writeback_batch = config.writeback.batch_size,
            refresh_secs = config.reconcile.refresh_interval_secs,
            clock = %clock_name,
            "Odds pipeline started"
        );

        Ok(Self {
            channel,
            cache,
            queue,
            handler,
            probe,
            tracker,
            assembler,
            intake_cancel,
            writeback_cancel,
        })
    }

    /// Hand a quote to the intake channel. Never blocks; only refused once
    /// the pipeline is shutting down.
    pub fn submit_quote(&self, quote: Quote) -> bool {
        self.channel.try_write(quote)
    }

    /// Reconcile a batch directly, bypassing the intake channel.
    pub async fn reconcile_batch(&self, quotes: Vec<Quote>) -> BatchReport {
        self.handler.reconcile_batch(quotes).await
    }

    /// Queue a suspend directive for a market in storage.
    pub fn close_market(&self, market_id: u32) {
        self.queue.enqueue_close(market_id);
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn write_back(&self) -> &Arc<WriteBackQueue> {
        &self.queue
    }

    pub fn probe(&self) -> PipelineProbe {
        self.probe.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.probe.snapshot()
    }

    /// Stop intake first so the assembler drains what is already buffered,
    /// then stop the write-back lanes and wait for every task.
    pub async fn shutdown(self) {
        info!(depth = self.channel.len(), "Shutting down odds pipeline");

        self.channel.close();
        self.intake_cancel.cancel();
        if let Err(e) = self.assembler.await {
            warn!(error = %e, "Batch assembler task failed");
        }

        self.writeback_cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let stats = self.probe.snapshot();
        info!(
            processed = stats.total_processed,
            dropped = stats.channel.total_dropped,
            unflushed_snapshots = stats.writeback.snapshot_depth,
            unflushed_statements = stats.writeback.statement_depth,
            "Odds pipeline stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{HalfType, MarketKind};
    use crate::persistence::sqlite::SqliteMarketStore;
    use crate::persistence::store::testing::{MapResolver, RecordingStore};
    use crate::reconcile::types::ProcessResult;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn config() -> Config {
        let mut config = Config::default();
        config.intake.capacity = 1_000;
        config.intake.batch_timeout_ms = 5;
        config.writeback.poll_interval_ms = 1;
        config
    }

    fn over_under(match_id: &str, line: Decimal, over: Decimal) -> Quote {
        Quote {
            source_match_id: match_id.to_string(),
            kind: MarketKind::OverUnder,
            half: HalfType::FirstHalf,
            line: Some(line),
            odds1: over,
            odds2: dec!(0.85),
            odds3: None,
            suspended: false,
            source_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_submitted_quotes_reach_cache_and_store() {
        let store = Arc::new(RecordingStore::default());
        let resolver = Arc::new(MapResolver::default());
        resolver.register("gs-7", 7);
        let pipeline = OddsPipeline::start(&config(), store.clone(), resolver).unwrap();

        assert!(pipeline.submit_quote(over_under("gs-7", dec!(2.5), dec!(0.95))));
        assert!(pipeline.submit_quote(over_under("gs-7", dec!(3.0), dec!(0.95))));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(pipeline.cache().len(), 2);
        assert_eq!(store.insert_count(), 2);

        assert!(pipeline.submit_quote(over_under("gs-7", dec!(2.5), dec!(0.90))));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let upserted = store.upserted();
        assert_eq!(upserted.len(), 1);
        assert_eq!(upserted[0].over_odds, dec!(0.90));

        let stats = pipeline.stats();
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.channel.total_read, 3);
        assert_eq!(stats.writeback.flushed_snapshots, 1);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_buffered_quotes() {
        let store = Arc::new(RecordingStore::default());
        let resolver = Arc::new(MapResolver::default());
        resolver.register("gs-8", 8);
        let mut cfg = config();
        cfg.intake.batch_size = 10;
        let pipeline = OddsPipeline::start(&cfg, store.clone(), resolver).unwrap();
        let probe = pipeline.probe();

        for i in 0..25 {
            pipeline.submit_quote(over_under("gs-8", Decimal::new(i, 1), dec!(0.95)));
        }
        pipeline.shutdown().await;

        let stats = probe.snapshot();
        assert_eq!(stats.total_processed, 25);
        assert_eq!(stats.channel.current_depth, 0);
        assert_eq!(store.insert_count(), 25);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_refused() {
        let store = Arc::new(RecordingStore::default());
        let pipeline =
            OddsPipeline::start(&config(), store, Arc::new(MapResolver::default())).unwrap();
        let channel = Arc::clone(&pipeline.channel);
        pipeline.shutdown().await;

        assert!(channel.is_closed());
        assert!(!channel.try_write(over_under("gs-1", dec!(2.5), dec!(0.95))));
        assert_eq!(channel.stats().total_dropped, 1);
    }

    #[tokio::test]
    async fn test_sqlite_backed_pipeline_round_trip() {
        let store = Arc::new(SqliteMarketStore::in_memory().unwrap());
        store.register_event("gs-42", 42).await.unwrap();
        let pipeline = OddsPipeline::start(&config(), store.clone(), store.clone()).unwrap();

        let report = pipeline
            .reconcile_batch(vec![
                over_under("gs-42", dec!(2.5), dec!(0.95)),
                over_under("gs-unknown", dec!(2.5), dec!(0.95)),
            ])
            .await;
        assert_eq!(report.result(), ProcessResult::Success);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.not_found, 1);
        assert_eq!(store.count_markets().await.unwrap(), 1);

        let id = crate::data::identity::derive_id(42, MarketKind::OverUnder, HalfType::FirstHalf, Some(dec!(2.5)));
        pipeline.close_market(id);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pipeline.write_back().stats().flushed_statements, 1);
        assert_eq!(pipeline.write_back().statement_depth(), 0);

        let stored = store.get_market(id).await.unwrap().unwrap();
        assert_eq!(stored.kind, MarketKind::OverUnder);
        assert_eq!(stored.status, -1);

        pipeline.shutdown().await;
    }
}
