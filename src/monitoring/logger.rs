use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::monitoring::stats::{PipelineProbe, PipelineStats};

pub struct CsvLogger {
    log_path: String,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;

            writeln!(
                file,
                "timestamp,depth,written,read,dropped,cached_markets,snapshot_lane,statement_lane,flushed_snapshots,flushed_statements,failed_batches,discarded"
            )?;
        }

        Ok(Self { log_path })
    }

    /// Append one stats row
    pub fn log_stats(&self, stats: &PipelineStats) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            stats.timestamp.to_rfc3339(),
            stats.channel.current_depth,
            stats.channel.total_written,
            stats.channel.total_read,
            stats.channel.total_dropped,
            stats.cached_markets,
            stats.writeback.snapshot_depth,
            stats.writeback.statement_depth,
            stats.writeback.flushed_snapshots,
            stats.writeback.flushed_statements,
            stats.writeback.failed_batches,
            stats.writeback.discarded,
        )?;

        Ok(())
    }
}

/// Log a stats snapshot every `interval` until cancelled, optionally
/// appending each one to a CSV trail.
pub async fn run_reporter(
    probe: PipelineProbe,
    csv: Option<CsvLogger>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let stats = probe.snapshot();
        info!(
            depth = stats.channel.current_depth,
            dropped = stats.channel.total_dropped,
            cached_markets = stats.cached_markets,
            snapshot_lane = stats.writeback.snapshot_depth,
            statement_lane = stats.writeback.statement_depth,
            failed_batches = stats.writeback.failed_batches,
            "Pipeline stats"
        );

        if let Some(csv) = &csv {
            if let Err(e) = csv.log_stats(&stats) {
                warn!(error = %e, "Failed to append stats row");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteBackConfig;
    use crate::data::cache::SnapshotCache;
    use crate::data::types::Quote;
    use crate::ingest::assembler::AssemblerCounters;
    use crate::ingest::channel::IntakeChannel;
    use crate::persistence::store::testing::RecordingStore;
    use crate::persistence::writeback::WriteBackQueue;
    use std::sync::Arc;

    fn probe() -> PipelineProbe {
        let channel = Arc::new(IntakeChannel::<Quote>::new("odds", 8));
        PipelineProbe::new(
            channel,
            Arc::new(SnapshotCache::new()),
            Arc::new(WriteBackQueue::new(
                Arc::new(RecordingStore::default()),
                &WriteBackConfig::default(),
            )),
            Arc::new(AssemblerCounters::default()),
        )
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv").to_string_lossy().to_string();

        let logger = CsvLogger::new(path.clone()).unwrap();
        logger.log_stats(&probe().snapshot()).unwrap();
        // Reopening an existing file keeps its header and rows
        let logger = CsvLogger::new(path.clone()).unwrap();
        logger.log_stats(&probe().snapshot()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,depth"));
        assert!(lines[1].ends_with(",0,0,0,0,0,0,0,0,0,0,0"));
    }

    #[tokio::test]
    async fn test_reporter_writes_rows_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv").to_string_lossy().to_string();
        let logger = CsvLogger::new(path.clone()).unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reporter(
            probe(),
            Some(logger),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        task.await.unwrap();

        let rows = std::fs::read_to_string(&path).unwrap().lines().count() - 1;
        assert!(rows >= 1);
    }
}
