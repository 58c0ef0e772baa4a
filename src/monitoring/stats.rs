use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::data::cache::SnapshotCache;
use crate::data::types::Quote;
use crate::ingest::assembler::AssemblerCounters;
use crate::ingest::channel::{ChannelStats, IntakeChannel};
use crate::persistence::writeback::{WriteBackQueue, WriteBackStats};

/// Point-in-time view of the pipeline for a status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub timestamp: DateTime<Utc>,
    pub channel: ChannelStats,
    pub cached_markets: usize,
    pub writeback: WriteBackStats,
    pub total_processed: u64,
    pub total_batches: u64,
}

impl PipelineStats {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Read-only handles onto the running pipeline's counters.
#[derive(Clone)]
pub struct PipelineProbe {
    channel: Arc<IntakeChannel<Quote>>,
    cache: Arc<SnapshotCache>,
    queue: Arc<WriteBackQueue>,
    counters: Arc<AssemblerCounters>,
}

impl PipelineProbe {
    pub fn new(
        channel: Arc<IntakeChannel<Quote>>,
        cache: Arc<SnapshotCache>,
        queue: Arc<WriteBackQueue>,
        counters: Arc<AssemblerCounters>,
    ) -> Self {
        Self {
            channel,
            cache,
            queue,
            counters,
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            timestamp: Utc::now(),
            channel: self.channel.stats(),
            cached_markets: self.cache.len(),
            writeback: self.queue.stats(),
            total_processed: self.counters.total_processed(),
            total_batches: self.counters.total_batches(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteBackConfig;
    use crate::persistence::store::testing::RecordingStore;

    #[test]
    fn test_snapshot_serializes_counters() {
        let channel = Arc::new(IntakeChannel::<Quote>::new("odds", 4));
        let probe = PipelineProbe::new(
            Arc::clone(&channel),
            Arc::new(SnapshotCache::new()),
            Arc::new(WriteBackQueue::new(
                Arc::new(RecordingStore::default()),
                &WriteBackConfig::default(),
            )),
            Arc::new(AssemblerCounters::default()),
        );

        let stats = probe.snapshot();
        assert_eq!(stats.channel.capacity, 4);
        assert_eq!(stats.cached_markets, 0);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["channel"]["capacity"], 4);
        assert_eq!(json["writeback"]["snapshot_depth"], 0);
        assert_eq!(json["total_batches"], 0);
    }
}
