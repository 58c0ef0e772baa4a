use serde::Serialize;

/// What happened to a single quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteOutcome {
    /// New market cached and its row written synchronously
    Inserted,
    /// Another writer cached the market first
    DuplicateInsert,
    /// First write failed; cache entry rolled back
    InsertFailed,
    /// Older than the cached source time
    Stale,
    /// Changed and queued for write-back
    Updated,
    /// Unchanged but due for a refresh write
    Heartbeat,
    /// Cache entry moved under us; concurrent writer's value kept
    LostRace,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessResult {
    Success,
    MatchNotFound,
    DatabaseError,
    Skipped,
}

/// Aggregate counts for one reconciled batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub accepted: usize,
    pub not_found: usize,
    pub failed: usize,

    pub inserted: usize,
    pub updated: usize,
    pub heartbeats: usize,
    pub stale: usize,
    pub lost_races: usize,
    pub duplicates: usize,
    pub unchanged: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: QuoteOutcome) {
        if outcome == QuoteOutcome::InsertFailed {
            self.failed += 1;
            return;
        }

        self.accepted += 1;
        match outcome {
            QuoteOutcome::Inserted => self.inserted += 1,
            QuoteOutcome::DuplicateInsert => self.duplicates += 1,
            QuoteOutcome::Stale => self.stale += 1,
            QuoteOutcome::Updated => self.updated += 1,
            QuoteOutcome::Heartbeat => self.heartbeats += 1,
            QuoteOutcome::LostRace => self.lost_races += 1,
            QuoteOutcome::Unchanged => self.unchanged += 1,
            QuoteOutcome::InsertFailed => {}
        }
    }

    pub fn total(&self) -> usize {
        self.accepted + self.not_found + self.failed
    }

    /// Collapse the counts. Partial success still reports `Success`.
    pub fn result(&self) -> ProcessResult {
        if self.total() == 0 {
            ProcessResult::Skipped
        } else if self.not_found > 0 && self.accepted == 0 {
            ProcessResult::MatchNotFound
        } else if self.failed > 0 && self.accepted == 0 {
            ProcessResult::DatabaseError
        } else {
            ProcessResult::Success
        }
    }
}
