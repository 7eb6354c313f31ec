//! Per-feed quality and latency telemetry
//!
//! Rolling counters (valid, invalid, duplicate, out-of-order, gaps) and
//! latency statistics per feed. The quality score and message rate are
//! recomputed on a periodic tick rather than per message to bound overhead.
//!
//! Quality score:
//! `0.7 * valid/total + 0.3 * max(0, 1 - latency/max_latency)`

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::FeedId;
use types::time::NANOS_PER_SECOND;

/// Weight of the valid-message ratio in the quality score.
const VALIDITY_WEIGHT: f64 = 0.7;
/// Weight of the latency term in the quality score.
const LATENCY_WEIGHT: f64 = 0.3;
/// Smoothing factor of the latency EMA.
const LATENCY_ALPHA: f64 = 0.1;

/// Configuration for feed telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Latency at or above which the latency term contributes nothing.
    pub max_latency_ms: f64,
    /// Period of quality / rate recomputation.
    pub recompute_interval_ms: u64,
    /// Samples kept for latency percentiles.
    pub latency_samples: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 1_000.0,
            recompute_interval_ms: 5_000,
            latency_samples: 1_000,
        }
    }
}

/// Point-in-time quality view of one feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub feed_id: FeedId,
    pub total_messages: u64,
    pub valid_messages: u64,
    pub invalid_messages: u64,
    pub duplicate_messages: u64,
    pub out_of_order_messages: u64,
    pub sequence_gaps: u64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    /// Exponential moving average latency.
    pub average_latency_ms: f64,
    pub latency_p50_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub messages_per_second: f64,
    pub quality_score: f64,
    /// Unix nanoseconds of the last recompute.
    pub last_update: i64,
}

/// Tracks latency samples for percentile calculation.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a latency sample, evicting the oldest when full.
    pub fn record(&mut self, value: f64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Counters and latency state for one feed.
#[derive(Debug, Clone)]
struct FeedTelemetry {
    total: u64,
    valid: u64,
    invalid: u64,
    duplicate: u64,
    out_of_order: u64,
    gaps: u64,
    ema_latency_ms: f64,
    min_latency_ms: Option<f64>,
    max_latency_ms: Option<f64>,
    latencies: LatencyTracker,
    messages_per_second: f64,
    quality_score: f64,
    last_update: i64,
}

impl FeedTelemetry {
    fn new(latency_samples: usize, now: i64) -> Self {
        Self {
            total: 0,
            valid: 0,
            invalid: 0,
            duplicate: 0,
            out_of_order: 0,
            gaps: 0,
            ema_latency_ms: 0.0,
            min_latency_ms: None,
            max_latency_ms: None,
            latencies: LatencyTracker::new(latency_samples),
            messages_per_second: 0.0,
            // No evidence against a fresh feed yet.
            quality_score: 1.0,
            last_update: now,
        }
    }

    fn record_latency(&mut self, ms: f64) {
        let ms = ms.max(0.0);
        self.ema_latency_ms = self.ema_latency_ms * (1.0 - LATENCY_ALPHA) + ms * LATENCY_ALPHA;
        self.min_latency_ms = Some(self.min_latency_ms.map_or(ms, |m| m.min(ms)));
        self.max_latency_ms = Some(self.max_latency_ms.map_or(ms, |m| m.max(ms)));
        self.latencies.record(ms);
    }

    fn recompute(&mut self, max_latency_ms: f64, now: i64) {
        if self.total > 0 {
            let validity = self.valid as f64 / self.total as f64;
            let latency_term = if max_latency_ms > 0.0 {
                (1.0 - self.ema_latency_ms / max_latency_ms).max(0.0)
            } else {
                0.0
            };
            self.quality_score =
                (VALIDITY_WEIGHT * validity + LATENCY_WEIGHT * latency_term).clamp(0.0, 1.0);
        }

        let elapsed_secs = (now - self.last_update) as f64 / NANOS_PER_SECOND as f64;
        if elapsed_secs > 0.0 {
            self.messages_per_second = self.valid as f64 / elapsed_secs;
        }
        self.last_update = now;
    }

    fn snapshot(&self, feed_id: &FeedId) -> QualityMetrics {
        QualityMetrics {
            feed_id: feed_id.clone(),
            total_messages: self.total,
            valid_messages: self.valid,
            invalid_messages: self.invalid,
            duplicate_messages: self.duplicate,
            out_of_order_messages: self.out_of_order,
            sequence_gaps: self.gaps,
            min_latency_ms: self.min_latency_ms,
            max_latency_ms: self.max_latency_ms,
            average_latency_ms: self.ema_latency_ms,
            latency_p50_ms: self.latencies.percentile(50),
            latency_p99_ms: self.latencies.percentile(99),
            messages_per_second: self.messages_per_second,
            quality_score: self.quality_score,
            last_update: self.last_update,
        }
    }
}

/// Result of a periodic recompute for one feed.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityUpdate {
    pub feed_id: FeedId,
    pub quality_score: f64,
    pub average_latency_ms: f64,
}

/// Quality telemetry for all feeds of a pipeline.
///
/// Uses BTreeMap for deterministic iteration.
#[derive(Debug)]
pub struct QualityTelemetry {
    feeds: BTreeMap<FeedId, FeedTelemetry>,
    config: TelemetryConfig,
}

impl QualityTelemetry {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            feeds: BTreeMap::new(),
            config,
        }
    }

    /// Start tracking a feed. No-op if already tracked.
    pub fn track(&mut self, feed_id: &FeedId, now: i64) {
        let samples = self.config.latency_samples;
        self.feeds
            .entry(feed_id.clone())
            .or_insert_with(|| FeedTelemetry::new(samples, now));
    }

    fn feed_mut(&mut self, feed_id: &FeedId) -> Option<&mut FeedTelemetry> {
        self.feeds.get_mut(feed_id)
    }

    pub fn record_valid(&mut self, feed_id: &FeedId) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.total += 1;
            feed.valid += 1;
        }
    }

    pub fn record_invalid(&mut self, feed_id: &FeedId) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.total += 1;
            feed.invalid += 1;
        }
    }

    pub fn record_duplicate(&mut self, feed_id: &FeedId) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.total += 1;
            feed.duplicate += 1;
        }
    }

    /// Out-of-order is a flag on a message already counted elsewhere.
    pub fn record_out_of_order(&mut self, feed_id: &FeedId) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.out_of_order += 1;
        }
    }

    pub fn record_gap(&mut self, feed_id: &FeedId) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.gaps += 1;
        }
    }

    pub fn record_latency(&mut self, feed_id: &FeedId, ms: f64) {
        if let Some(feed) = self.feed_mut(feed_id) {
            feed.record_latency(ms);
        }
    }

    /// Recompute quality scores and message rates for every feed.
    pub fn recompute(&mut self, now: i64) -> Vec<QualityUpdate> {
        let max_latency = self.config.max_latency_ms;
        self.feeds
            .iter_mut()
            .map(|(feed_id, feed)| {
                feed.recompute(max_latency, now);
                debug!(
                    feed_id = %feed_id,
                    quality = feed.quality_score,
                    latency_ms = feed.ema_latency_ms,
                    messages_per_second = feed.messages_per_second,
                    "Feed quality recomputed"
                );
                QualityUpdate {
                    feed_id: feed_id.clone(),
                    quality_score: feed.quality_score,
                    average_latency_ms: feed.ema_latency_ms,
                }
            })
            .collect()
    }

    pub fn snapshot(&self, feed_id: &FeedId) -> Option<QualityMetrics> {
        self.feeds.get(feed_id).map(|feed| feed.snapshot(feed_id))
    }

    /// Snapshots of all tracked feeds, ordered by feed id.
    pub fn snapshots(&self) -> Vec<QualityMetrics> {
        self.feeds
            .iter()
            .map(|(feed_id, feed)| feed.snapshot(feed_id))
            .collect()
    }

    /// Last computed quality score, 0 for untracked feeds.
    pub fn quality_score(&self, feed_id: &FeedId) -> f64 {
        self.feeds.get(feed_id).map_or(0.0, |f| f.quality_score)
    }

    /// Reset every counter. Feeds stay tracked.
    pub fn reset(&mut self, now: i64) {
        let samples = self.config.latency_samples;
        for feed in self.feeds.values_mut() {
            *feed = FeedTelemetry::new(samples, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = NANOS_PER_SECOND;

    fn telemetry() -> (QualityTelemetry, FeedId) {
        let mut t = QualityTelemetry::new(TelemetryConfig::default());
        let feed = FeedId::new("a");
        t.track(&feed, 0);
        (t, feed)
    }

    #[test]
    fn test_counters() {
        let (mut t, feed) = telemetry();
        t.record_valid(&feed);
        t.record_valid(&feed);
        t.record_invalid(&feed);
        t.record_duplicate(&feed);
        t.record_out_of_order(&feed);
        t.record_gap(&feed);

        let m = t.snapshot(&feed).unwrap();
        assert_eq!(m.total_messages, 4);
        assert_eq!(m.valid_messages, 2);
        assert_eq!(m.invalid_messages, 1);
        assert_eq!(m.duplicate_messages, 1);
        assert_eq!(m.out_of_order_messages, 1);
        assert_eq!(m.sequence_gaps, 1);
    }

    #[test]
    fn test_untracked_feed_is_ignored() {
        let (mut t, _) = telemetry();
        let other = FeedId::new("ghost");
        t.record_valid(&other);
        assert!(t.snapshot(&other).is_none());
        assert_eq!(t.quality_score(&other), 0.0);
    }

    #[test]
    fn test_latency_ema_and_extremes() {
        let (mut t, feed) = telemetry();
        t.record_latency(&feed, 100.0);
        t.record_latency(&feed, 200.0);

        let m = t.snapshot(&feed).unwrap();
        // 0 -> 10 -> 29
        assert!((m.average_latency_ms - 29.0).abs() < 1e-9);
        assert_eq!(m.min_latency_ms, Some(100.0));
        assert_eq!(m.max_latency_ms, Some(200.0));
    }

    #[test]
    fn test_negative_latency_clamped() {
        let (mut t, feed) = telemetry();
        t.record_latency(&feed, -5.0);
        let m = t.snapshot(&feed).unwrap();
        assert_eq!(m.min_latency_ms, Some(0.0));
    }

    #[test]
    fn test_quality_score_formula() {
        let (mut t, feed) = telemetry();
        for _ in 0..3 {
            t.record_valid(&feed);
        }
        t.record_invalid(&feed);
        for _ in 0..100 {
            t.record_latency(&feed, 500.0);
        }

        t.recompute(5 * SECOND);
        let m = t.snapshot(&feed).unwrap();
        let expected = 0.7 * 0.75 + 0.3 * (1.0 - m.average_latency_ms / 1_000.0);
        assert!((m.quality_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_quality_latency_term_floors_at_zero() {
        let (mut t, feed) = telemetry();
        t.record_valid(&feed);
        for _ in 0..200 {
            t.record_latency(&feed, 5_000.0);
        }
        t.recompute(SECOND);
        assert!((t.quality_score(&feed) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_feed_keeps_initial_quality() {
        let (mut t, feed) = telemetry();
        t.recompute(SECOND);
        assert_eq!(t.quality_score(&feed), 1.0);
    }

    #[test]
    fn test_messages_per_second() {
        let (mut t, feed) = telemetry();
        for _ in 0..50 {
            t.record_valid(&feed);
        }
        t.recompute(5 * SECOND);
        let m = t.snapshot(&feed).unwrap();
        assert!((m.messages_per_second - 10.0).abs() < 1e-9);
        assert_eq!(m.last_update, 5 * SECOND);
    }

    #[test]
    fn test_reset_clears_counters() {
        let (mut t, feed) = telemetry();
        t.record_valid(&feed);
        t.record_latency(&feed, 10.0);
        t.reset(7);
        let m = t.snapshot(&feed).unwrap();
        assert_eq!(m.total_messages, 0);
        assert_eq!(m.average_latency_ms, 0.0);
        assert_eq!(m.last_update, 7);
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);
        for i in 1..=100 {
            tracker.record(i as f64);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49.0..=51.0).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98.0..=100.0).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);
        tracker.record(10.0);
        tracker.record(20.0);
        tracker.record(30.0);
        tracker.record(40.0); // Should evict 10

        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.percentile(0), Some(20.0));
    }
}
