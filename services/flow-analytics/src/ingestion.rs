//! Sequencing and duplicate suppression for feed input
//!
//! Tracks a strictly monotonic sequence watermark per feed and suppresses
//! near-duplicate payloads delivered by redundant feeds.
//!
//! Sequence invariants:
//! - The watermark per feed only advances on a strictly greater sequence
//! - A sequence <= watermark is flagged out-of-order but still processed
//! - A sequence that skips values is flagged as a gap and still processed

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use types::ids::FeedId;
use types::market::{OrderBookSnapshot, Tick};
use types::time::millis_to_nanos;

/// Configuration for sequencing and dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencingConfig {
    /// Two ticks at the same price closer than this are duplicates.
    pub duplicate_window_ms: u64,
    /// Drop an order book identical to the last accepted one within the
    /// duplicate window.
    pub dedup_order_books: bool,
}

impl Default for SequencingConfig {
    fn default() -> Self {
        Self {
            duplicate_window_ms: 100,
            dedup_order_books: true,
        }
    }
}

/// Outcome of checking one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// First sequence seen on this feed.
    First,
    /// Exactly `last + 1`.
    InOrder,
    /// Strictly increasing but skipped `from..=to`.
    Gap { from: u64, to: u64 },
    /// Not greater than the watermark.
    OutOfOrder { last: u64 },
}

impl SequenceCheck {
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, SequenceCheck::OutOfOrder { .. })
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, SequenceCheck::Gap { .. })
    }
}

/// Per-feed sequence watermark tracking.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    /// Last accepted sequence per feed.
    watermarks: BTreeMap<FeedId, u64>,
    /// Total out-of-order sequences seen.
    out_of_order: u64,
    /// Total gaps detected.
    gaps_detected: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a sequence number and advance the watermark if it is strictly
    /// greater than the last accepted one.
    pub fn check(&mut self, feed_id: &FeedId, sequence: u64) -> SequenceCheck {
        let result = match self.watermarks.get(feed_id).copied() {
            None => SequenceCheck::First,
            Some(last) if sequence <= last => SequenceCheck::OutOfOrder { last },
            Some(last) if sequence > last + 1 => SequenceCheck::Gap {
                from: last + 1,
                to: sequence - 1,
            },
            Some(_) => SequenceCheck::InOrder,
        };

        match result {
            SequenceCheck::OutOfOrder { last } => {
                self.out_of_order += 1;
                warn!(
                    feed_id = %feed_id,
                    last_sequence = last,
                    received_sequence = sequence,
                    "Out-of-order sequence, processing anyway"
                );
            }
            SequenceCheck::Gap { from, to } => {
                self.gaps_detected += 1;
                self.watermarks.insert(feed_id.clone(), sequence);
                warn!(
                    feed_id = %feed_id,
                    from,
                    to,
                    gap_size = to - from + 1,
                    "Sequence gap detected"
                );
            }
            SequenceCheck::First | SequenceCheck::InOrder => {
                self.watermarks.insert(feed_id.clone(), sequence);
            }
        }

        result
    }

    /// Check a sequence number, returning true if it is out of order.
    pub fn is_out_of_order(&mut self, feed_id: &FeedId, sequence: u64) -> bool {
        self.check(feed_id, sequence).is_out_of_order()
    }

    /// Last accepted sequence for a feed, if any.
    pub fn watermark(&self, feed_id: &FeedId) -> Option<u64> {
        self.watermarks.get(feed_id).copied()
    }

    pub fn out_of_order(&self) -> u64 {
        self.out_of_order
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    /// Forget all watermarks (new session).
    pub fn reset(&mut self) {
        self.watermarks.clear();
        self.out_of_order = 0;
        self.gaps_detected = 0;
    }
}

/// SHA-256 digest of an order book's level ladder.
pub type BookFingerprint = [u8; 32];

/// Near-duplicate suppression for ticks and order books.
#[derive(Debug)]
pub struct DuplicateFilter {
    window_nanos: i64,
    dedup_books: bool,
    /// Fingerprint and timestamp of the last accepted book.
    last_book: Option<(BookFingerprint, i64)>,
}

impl DuplicateFilter {
    pub fn new(config: &SequencingConfig) -> Self {
        Self {
            window_nanos: millis_to_nanos(config.duplicate_window_ms),
            dedup_books: config.dedup_order_books,
            last_book: None,
        }
    }

    /// A tick is a duplicate if a buffered tick for the same symbol has a
    /// timestamp within the window and an identical price.
    pub fn is_duplicate<'a>(
        &self,
        tick: &Tick,
        buffered: impl DoubleEndedIterator<Item = &'a Tick>,
    ) -> bool {
        let duplicate = buffered.rev().any(|existing| {
            existing.symbol == tick.symbol
                && existing.price == tick.price
                && (existing.timestamp - tick.timestamp).abs() <= self.window_nanos
        });

        if duplicate {
            debug!(
                symbol = %tick.symbol,
                price = %tick.price,
                timestamp = tick.timestamp,
                "Duplicate tick suppressed"
            );
        }
        duplicate
    }

    /// Whether a book repeats the last accepted book inside the window.
    pub fn is_duplicate_book(&self, book: &OrderBookSnapshot) -> bool {
        if !self.dedup_books {
            return false;
        }
        match self.last_book {
            Some((fingerprint, timestamp)) => {
                (book.timestamp - timestamp).abs() <= self.window_nanos
                    && fingerprint == book_fingerprint(book)
            }
            None => false,
        }
    }

    /// Record an accepted book as the dedup reference.
    pub fn remember_book(&mut self, book: &OrderBookSnapshot) {
        if self.dedup_books {
            self.last_book = Some((book_fingerprint(book), book.timestamp));
        }
    }

    pub fn reset(&mut self) {
        self.last_book = None;
    }
}

/// Fingerprint the symbol and level ladder of a book.
///
/// Prices and volumes are normalized so `100.50` and `100.5` hash alike.
pub fn book_fingerprint(book: &OrderBookSnapshot) -> BookFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(book.symbol.as_str().as_bytes());
    for (tag, levels) in [(b'B', &book.bids), (b'A', &book.asks)] {
        hasher.update([tag]);
        for level in levels {
            hasher.update(level.price.normalize().to_string().as_bytes());
            hasher.update(b":");
            hasher.update(level.volume.normalize().to_string().as_bytes());
            hasher.update(b";");
        }
    }
    hasher.finalize().into()
}
