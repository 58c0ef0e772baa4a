use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ReconcileConfig;
use crate::data::cache::SnapshotCache;
use crate::data::types::{MarketSnapshot, Quote};
use crate::ingest::assembler::BatchHandler;
use crate::persistence::store::{EventResolver, MarketStore};
use crate::persistence::writeback::WriteBackQueue;
use crate::reconcile::clock::Clock;
use crate::reconcile::types::{BatchReport, ProcessResult, QuoteOutcome};

/// Decides, per quote, whether the cache and storage need to change.
///
/// The cache is never locked across read-decide-write. A snapshot read with
/// `get` is committed back only through `try_insert` or `compare_and_swap`,
/// and a failed commit means a concurrent writer got there first; its value
/// stands and this quote is dropped.
pub struct ReconciliationHandler {
    resolver: Arc<dyn EventResolver>,
    store: Arc<dyn MarketStore>,
    cache: Arc<SnapshotCache>,
    queue: Arc<WriteBackQueue>,
    clock: Arc<dyn Clock>,
    refresh_interval: chrono::Duration,
}

impl ReconciliationHandler {
    pub fn new(
        resolver: Arc<dyn EventResolver>,
        store: Arc<dyn MarketStore>,
        cache: Arc<SnapshotCache>,
        queue: Arc<WriteBackQueue>,
        clock: Arc<dyn Clock>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            cache,
            queue,
            clock,
            refresh_interval: chrono::Duration::seconds(config.refresh_interval_secs as i64),
        }
    }

    /// Resolve each source match once, then reconcile its quotes in order.
    pub async fn reconcile_batch(&self, quotes: Vec<Quote>) -> BatchReport {
        let mut report = BatchReport::default();

        for (source_match_id, group) in group_by_match(quotes) {
            match self.resolver.resolve(&source_match_id).await {
                Ok(Some(event_id)) => {
                    for quote in &group {
                        let outcome = self.reconcile_quote(event_id, quote).await;
                        report.record(outcome);
                    }
                }
                Ok(None) => {
                    report.not_found += group.len();
                    warn!(source_match_id = %source_match_id, count = group.len(), "Event not found, quotes skipped");
                }
                Err(e) => {
                    report.failed += group.len();
                    warn!(source_match_id = %source_match_id, error = %e, "Event resolution failed");
                }
            }
        }

        report
    }

    pub async fn reconcile_quote(&self, event_id: i64, quote: &Quote) -> QuoteOutcome {
        let now = self.clock.now();
        let candidate = MarketSnapshot::from_quote(event_id, quote, true, now);
        let id = candidate.id;

        let existing = match self.cache.get(id) {
            Some(existing) => existing,
            None => return self.insert_new(Arc::new(candidate)).await,
        };

        if candidate.source_time < existing.source_time {
            debug!(
                id,
                source_time = %candidate.source_time,
                cached_time = %existing.source_time,
                "Stale quote rejected"
            );
            return QuoteOutcome::Stale;
        }

        if has_changed(&existing, &candidate) {
            let candidate = Arc::new(candidate);
            if !self.cache.compare_and_swap(id, Arc::clone(&candidate), &existing) {
                debug!(id, "Lost update race, concurrent value kept");
                return QuoteOutcome::LostRace;
            }
            self.queue.enqueue_update(candidate);
            return QuoteOutcome::Updated;
        }

        if now - existing.local_update >= self.refresh_interval {
            let refreshed = Arc::new(candidate.with_dirty(false));
            if !self.cache.compare_and_swap(id, Arc::clone(&refreshed), &existing) {
                debug!(id, "Lost heartbeat race");
                return QuoteOutcome::LostRace;
            }
            self.queue.enqueue_update(refreshed);
            return QuoteOutcome::Heartbeat;
        }

        QuoteOutcome::Unchanged
    }

    /// First sighting of a market: cache it, then write the row before
    /// returning so batched updates never reference a missing row.
    async fn insert_new(&self, snapshot: Arc<MarketSnapshot>) -> QuoteOutcome {
        let id = snapshot.id;
        if !self.cache.try_insert(id, Arc::clone(&snapshot)) {
            debug!(id, "Market inserted concurrently, quote ignored");
            return QuoteOutcome::DuplicateInsert;
        }

        match self.store.insert_snapshot(&snapshot).await {
            Ok(()) => {
                debug!(id, event_id = snapshot.event_id, "New market stored");
                QuoteOutcome::Inserted
            }
            Err(e) => {
                self.cache.remove(id);
                warn!(id, event_id = snapshot.event_id, error = %e, "Initial market write failed, cache entry rolled back");
                QuoteOutcome::InsertFailed
            }
        }
    }
}

/// Family-scoped comparison. A family is only compared when the candidate
/// carries odds for it, so a nonzero to zero transition goes unnoticed.
pub fn has_changed(existing: &MarketSnapshot, candidate: &MarketSnapshot) -> bool {
    if candidate.status != existing.status {
        return true;
    }

    if candidate.home_hdp_odds > Decimal::ZERO
        && (candidate.home_hdp != existing.home_hdp
            || candidate.away_hdp != existing.away_hdp
            || candidate.hdp_side != existing.hdp_side
            || candidate.home_hdp_odds != existing.home_hdp_odds
            || candidate.away_hdp_odds != existing.away_hdp_odds)
    {
        return true;
    }

    if candidate.over_odds > Decimal::ZERO
        && (candidate.ou_line != existing.ou_line
            || candidate.over_odds != existing.over_odds
            || candidate.under_odds != existing.under_odds)
    {
        return true;
    }

    candidate.home_odds > Decimal::ZERO
        && (candidate.home_odds != existing.home_odds
            || candidate.away_odds != existing.away_odds
            || candidate.draw_odds != existing.draw_odds)
}

/// Group quotes by source match, keeping first-seen order of matches and
/// arrival order within each group.
fn group_by_match(quotes: Vec<Quote>) -> Vec<(String, Vec<Quote>)> {
    let mut groups: Vec<(String, Vec<Quote>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for quote in quotes {
        match index.get(&quote.source_match_id) {
            Some(&slot) => groups[slot].1.push(quote),
            None => {
                index.insert(quote.source_match_id.clone(), groups.len());
                groups.push((quote.source_match_id.clone(), vec![quote]));
            }
        }
    }

    groups
}

#[async_trait]
impl BatchHandler<Quote> for ReconciliationHandler {
    type Outcome = BatchReport;

    async fn handle_batch(&self, batch: Vec<Quote>) -> anyhow::Result<BatchReport> {
        let report = self.reconcile_batch(batch).await;

        match report.result() {
            ProcessResult::DatabaseError => {
                warn!(failed = report.failed, "Batch produced no accepted quotes")
            }
            result => debug!(
                ?result,
                accepted = report.accepted,
                not_found = report.not_found,
                failed = report.failed,
                updated = report.updated,
                heartbeats = report.heartbeats,
                "Batch reconciled"
            ),
        }

        Ok(report)
    }
}
