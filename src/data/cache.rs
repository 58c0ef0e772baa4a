use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use crate::data::types::MarketSnapshot;

/// Authoritative in-memory state of every known market, keyed by identity.
///
/// There is no lock held across a read-decide-write cycle; callers read with
/// `get`, decide, then commit through `try_insert` or `compare_and_swap` and
/// treat a `false` as a lost race.
pub struct SnapshotCache {
    cache: DashMap<u32, Arc<MarketSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<MarketSnapshot>> {
        self.cache.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert only if absent. First writer wins.
    pub fn try_insert(&self, id: u32, snapshot: Arc<MarketSnapshot>) -> bool {
        match self.cache.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
                true
            }
        }
    }

    /// Replace the entry only if it is still the exact snapshot `expected`
    /// the caller read earlier (pointer identity, not value equality).
    pub fn compare_and_swap(
        &self,
        id: u32,
        new: Arc<MarketSnapshot>,
        expected: &Arc<MarketSnapshot>,
    ) -> bool {
        match self.cache.get_mut(&id) {
            Some(mut current) if Arc::ptr_eq(current.value(), expected) => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: u32) -> bool {
        self.cache.remove(&id).is_some()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.cache.clear();
        info!("Snapshot cache cleared");
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{HalfType, MarketKind, Quote};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::Barrier;
    use std::thread;

    fn snapshot(odds: rust_decimal::Decimal) -> Arc<MarketSnapshot> {
        let quote = Quote {
            source_match_id: "gs-9".to_string(),
            kind: MarketKind::Handicap,
            half: HalfType::FullTime,
            line: Some(dec!(0.5)),
            odds1: odds,
            odds2: dec!(0.9),
            odds3: None,
            suspended: false,
            source_time: Utc::now(),
        };
        Arc::new(MarketSnapshot::from_quote(9, &quote, true, Utc::now()))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = SnapshotCache::new();
        let snap = snapshot(dec!(0.95));

        assert!(cache.try_insert(snap.id, Arc::clone(&snap)));
        assert_eq!(cache.get(snap.id).as_deref(), Some(&*snap));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_second_insert_loses() {
        let cache = SnapshotCache::new();
        let first = snapshot(dec!(0.95));
        let second = snapshot(dec!(0.80));

        assert!(cache.try_insert(first.id, Arc::clone(&first)));
        assert!(!cache.try_insert(second.id, second));
        assert_eq!(cache.get(first.id).map(|s| s.home_hdp_odds), Some(dec!(0.95)));
    }

    #[test]
    fn test_concurrent_inserts_have_one_winner() {
        let cache = Arc::new(SnapshotCache::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let snap = snapshot(dec!(0.95));
                    barrier.wait();
                    cache.try_insert(snap.id, snap)
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_compare_and_swap_requires_same_snapshot() {
        let cache = SnapshotCache::new();
        let original = snapshot(dec!(0.95));
        let id = original.id;
        cache.try_insert(id, Arc::clone(&original));

        // A value-equal copy is not the snapshot that was read
        let lookalike = Arc::new((*original).clone());
        assert!(!cache.compare_and_swap(id, snapshot(dec!(0.70)), &lookalike));

        let update = snapshot(dec!(0.88));
        assert!(cache.compare_and_swap(id, Arc::clone(&update), &original));
        assert!(Arc::ptr_eq(&cache.get(id).unwrap(), &update));
    }

    #[test]
    fn test_interleaved_writer_wins_race() {
        let cache = SnapshotCache::new();
        let original = snapshot(dec!(0.95));
        let id = original.id;
        cache.try_insert(id, Arc::clone(&original));

        let read_by_a = cache.get(id).unwrap();
        let read_by_b = cache.get(id).unwrap();

        let from_b = snapshot(dec!(0.90));
        assert!(cache.compare_and_swap(id, Arc::clone(&from_b), &read_by_b));
        assert!(!cache.compare_and_swap(id, snapshot(dec!(0.85)), &read_by_a));

        let stored = cache.get(id).unwrap();
        assert!(Arc::ptr_eq(&stored, &from_b));
        assert_eq!(stored.home_hdp_odds, dec!(0.90));
    }

    #[test]
    fn test_compare_and_swap_on_missing_key() {
        let cache = SnapshotCache::new();
        let snap = snapshot(dec!(0.95));
        assert!(!cache.compare_and_swap(snap.id, Arc::clone(&snap), &snap));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = SnapshotCache::new();
        let snap = snapshot(dec!(0.95));
        cache.try_insert(snap.id, Arc::clone(&snap));

        assert!(cache.remove(snap.id));
        assert!(!cache.remove(snap.id));

        cache.try_insert(snap.id, snap);
        cache.clear();
        assert!(cache.is_empty());
    }
}
