use async_trait::async_trait;
use std::sync::Arc;

use crate::data::types::MarketSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Maps a feed's match id onto the internal event id.
#[async_trait]
pub trait EventResolver: Send + Sync {
    async fn resolve(&self, source_match_id: &str) -> Result<Option<i64>, StoreError>;
}

/// Persistence used by the reconciliation path and the write-back lanes.
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Synchronous first write of a brand new market row.
    async fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError>;

    async fn bulk_upsert(&self, snapshots: &[Arc<MarketSnapshot>]) -> Result<(), StoreError>;

    /// Run free-form statements as one combined operation.
    async fn execute(&self, statements: &[String]) -> Result<(), StoreError>;

    /// Statement that suspends an open market.
    fn close_statement(&self, market_id: u32) -> String;
}

#[cfg(test)]
pub mod testing {
    //! Hand-written collaborators for unit tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct RecordingStore {
        pub inserts: Mutex<Vec<MarketSnapshot>>,
        pub upserts: Mutex<Vec<Vec<MarketSnapshot>>>,
        pub statements: Mutex<Vec<Vec<String>>>,
        pub fail_inserts: AtomicBool,
        /// Number of upcoming bulk upserts that fail
        pub failing_upserts: AtomicUsize,
        pub failing_executes: AtomicUsize,
    }

    impl RecordingStore {
        pub fn insert_count(&self) -> usize {
            self.inserts.lock().len()
        }

        pub fn upserted(&self) -> Vec<MarketSnapshot> {
            self.upserts.lock().concat()
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl MarketStore for RecordingStore {
        async fn insert_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), StoreError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("insert refused".to_string()));
            }
            self.inserts.lock().push(snapshot.clone());
            Ok(())
        }

        async fn bulk_upsert(&self, snapshots: &[Arc<MarketSnapshot>]) -> Result<(), StoreError> {
            if Self::take_failure(&self.failing_upserts) {
                return Err(StoreError::Unavailable("bulk upsert refused".to_string()));
            }
            self.upserts
                .lock()
                .push(snapshots.iter().map(|s| (**s).clone()).collect());
            Ok(())
        }

        async fn execute(&self, statements: &[String]) -> Result<(), StoreError> {
            if Self::take_failure(&self.failing_executes) {
                return Err(StoreError::Unavailable("execute refused".to_string()));
            }
            self.statements.lock().push(statements.to_vec());
            Ok(())
        }

        fn close_statement(&self, market_id: u32) -> String {
            format!("CLOSE {}", market_id)
        }
    }

    #[derive(Default)]
    pub struct MapResolver {
        events: Mutex<HashMap<String, i64>>,
        pub fail: AtomicBool,
    }

    impl MapResolver {
        pub fn register(&self, source_match_id: &str, event_id: i64) {
            self.events.lock().insert(source_match_id.to_string(), event_id);
        }
    }

    #[async_trait]
    impl EventResolver for MapResolver {
        async fn resolve(&self, source_match_id: &str) -> Result<Option<i64>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("resolver down".to_string()));
            }
            Ok(self.events.lock().get(source_match_id).copied())
        }
    }
}
