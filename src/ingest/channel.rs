//! Bounded intake queue between feed readers and the batch assembler.
//!
//! Many producers, one consumer. When full, a write evicts the oldest
//! buffered item instead of blocking or rejecting the new one, so a slow
//! consumer loses stale quotes rather than stalling the network readers.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Running counters for the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub total_written: u64,
    pub total_read: u64,
    /// Items evicted by overflow plus writes refused after close
    pub total_dropped: u64,
    pub current_depth: usize,
    pub capacity: usize,
}

pub struct IntakeChannel<T> {
    name: &'static str,
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,
    readable: Notify,
    closed: AtomicBool,
    total_written: AtomicU64,
    total_read: AtomicU64,
    total_dropped: AtomicU64,
}

impl<T> IntakeChannel<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        info!(channel = name, capacity, "Intake channel created (drop-oldest)");

        Self {
            name,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            readable: Notify::new(),
            closed: AtomicBool::new(false),
            total_written: AtomicU64::new(0),
            total_read: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue without blocking. Only fails once the channel is closed;
    /// a full channel drops its oldest item to make room.
    pub fn try_write(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push_back(item);
        }

        self.total_written.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        true
    }

    /// Async flavour of `try_write`. Never waits under drop-oldest.
    pub async fn write_async(&self, item: T) -> bool {
        self.try_write(item)
    }

    pub fn try_read(&self) -> Option<T> {
        let item = self.buffer.lock().pop_front();
        if item.is_some() {
            self.total_read.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Wait for the next item. `None` once the channel is closed and empty.
    pub async fn read_async(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_read() {
                return Some(item);
            }
            if !self.wait_to_read().await {
                return None;
            }
        }
    }

    /// Resolve to `true` when at least one item is buffered, or `false`
    /// when the channel is closed and fully drained.
    pub async fn wait_to_read(&self) -> bool {
        loop {
            let notified = self.readable.notified();
            if !self.is_empty() {
                return true;
            }
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            notified.await;
        }
    }

    /// Stop accepting writes. Buffered items stay readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            total_written: self.total_written.load(Ordering::Relaxed),
            total_read: self.total_read.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            current_depth: self.len(),
            capacity: self.capacity,
        }
    }
}
