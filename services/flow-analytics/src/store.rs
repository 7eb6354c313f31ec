//! Market state store
//!
//! Bounded, ordered buffers of recent ticks, order-book snapshots and tape
//! entries for one symbol, plus a current-value cache.
//!
//! Buffers are fixed-capacity ring buffers: inserting beyond capacity
//! evicts the oldest entry. A periodic sweep additionally purges entries
//! older than the retention window. Reads hand out clones so analytics
//! never observe a buffer mutated mid-read.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;
use types::market::{OrderBookSnapshot, TapeEntry, Tick};
use types::time::millis_to_nanos;

/// Configuration for the market state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub tick_capacity: usize,
    pub book_capacity: usize,
    pub tape_capacity: usize,
    /// Entries older than this are purged by `sweep`.
    pub retention_ms: u64,
    /// Period of the retention sweep.
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tick_capacity: 1_000,
            book_capacity: 100,
            tape_capacity: 1_000,
            retention_ms: 300_000,
            sweep_interval_ms: 30_000,
        }
    }
}

/// Anything stored with an event timestamp.
pub trait Timestamped {
    fn timestamp(&self) -> i64;
}

impl Timestamped for Tick {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for OrderBookSnapshot {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Timestamped for TapeEntry {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Fixed-capacity FIFO buffer.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest if at capacity.
    ///
    /// Returns the number of entries evicted.
    pub fn push(&mut self, entry: T) -> usize {
        if self.capacity == 0 {
            return 1;
        }
        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        self.entries.push_back(entry);
        evicted
    }

    /// The newest `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone + Timestamped> BoundedBuffer<T> {
    /// Drop entries with a timestamp before `cutoff`. Returns the number
    /// removed.
    pub fn purge_before(&mut self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.timestamp() >= cutoff);
        before - self.entries.len()
    }
}

/// Counts of entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub ticks: usize,
    pub books: usize,
    pub tape: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.ticks + self.books + self.tape
    }
}

/// Recent market state for one symbol.
#[derive(Debug)]
pub struct MarketStateStore {
    ticks: BoundedBuffer<Tick>,
    books: BoundedBuffer<OrderBookSnapshot>,
    tape: BoundedBuffer<TapeEntry>,
    /// Last stored tick. Survives the retention sweep.
    current: Option<Tick>,
    retention_nanos: i64,
}

impl MarketStateStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            ticks: BoundedBuffer::new(config.tick_capacity),
            books: BoundedBuffer::new(config.book_capacity),
            tape: BoundedBuffer::new(config.tape_capacity),
            current: None,
            retention_nanos: millis_to_nanos(config.retention_ms),
        }
    }

    pub fn store_tick(&mut self, tick: Tick) {
        self.current = Some(tick.clone());
        self.ticks.push(tick);
    }

    pub fn store_order_book(&mut self, book: OrderBookSnapshot) {
        self.books.push(book);
    }

    pub fn store_tape_entries(&mut self, entries: impl IntoIterator<Item = TapeEntry>) {
        for entry in entries {
            self.tape.push(entry);
        }
    }

    /// Newest `count` ticks, oldest first.
    pub fn recent_ticks(&self, count: usize) -> Vec<Tick> {
        self.ticks.recent(count)
    }

    /// Latest stored order book.
    pub fn order_book(&self) -> Option<OrderBookSnapshot> {
        self.books.latest().cloned()
    }

    /// Newest `count` tape entries, oldest first.
    pub fn recent_tape(&self, count: usize) -> Vec<TapeEntry> {
        self.tape.recent(count)
    }

    /// Last stored tick.
    pub fn current_tick(&self) -> Option<Tick> {
        self.current.clone()
    }

    /// Last buffered tick, borrowed.
    pub fn last_tick(&self) -> Option<&Tick> {
        self.ticks.latest()
    }

    pub fn ticks(&self) -> &BoundedBuffer<Tick> {
        &self.ticks
    }

    pub fn book_history(&self) -> &BoundedBuffer<OrderBookSnapshot> {
        &self.books
    }

    pub fn tape(&self) -> &BoundedBuffer<TapeEntry> {
        &self.tape
    }

    /// Purge entries older than the retention window.
    pub fn sweep(&mut self, now: i64) -> SweepReport {
        let cutoff = now.saturating_sub(self.retention_nanos);
        let report = SweepReport {
            ticks: self.ticks.purge_before(cutoff),
            books: self.books.purge_before(cutoff),
            tape: self.tape.purge_before(cutoff),
        };
        if report.total() > 0 {
            debug!(
                ticks = report.ticks,
                books = report.books,
                tape = report.tape,
                "Retention sweep purged entries"
            );
        }
        report
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
        self.books.clear();
        self.tape.clear();
        self.current = None;
    }
}
