//! Volume profile builder
//!
//! Accumulates traded volume per price bucket. A bucket key is the tick
//! price rounded to the nearest multiple of the tick size. Each bucket
//! carries a buy/sell split (same 70/30/50 rule as the flow classifier),
//! trade-size statistics, a running VWAP and its share of total observed
//! volume.
//!
//! The table is bounded: a periodic cleanup drops insignificant buckets
//! and caps the table at the most significant `max_buckets`. The cap is
//! also enforced on insert.

use std::collections::BTreeMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::market::Tick;

use crate::order_flow::split_volume;

/// Configuration for the volume profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub tick_size: Decimal,
    /// Buckets below this share of total volume are dropped on cleanup.
    pub min_significance: f64,
    /// Buckets below this volume are dropped on cleanup.
    pub min_volume: Decimal,
    pub max_buckets: usize,
    pub cleanup_interval_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            tick_size: Decimal::new(25, 2),
            min_significance: 0.001,
            min_volume: Decimal::ZERO,
            max_buckets: 200,
            cleanup_interval_ms: 30_000,
        }
    }
}

/// Accumulated volume at one price bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileBucket {
    pub price: Decimal,
    pub volume: Decimal,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub trade_count: u64,
    pub avg_trade_size: Decimal,
    pub min_trade_size: Decimal,
    pub max_trade_size: Decimal,
    pub vwap: Decimal,
    /// Bucket volume / total observed volume.
    pub significance: f64,
}

impl ProfileBucket {
    fn new(price: Decimal, volume: Decimal) -> Self {
        Self {
            price,
            volume: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
            sell_volume: Decimal::ZERO,
            trade_count: 0,
            avg_trade_size: Decimal::ZERO,
            min_trade_size: volume,
            max_trade_size: volume,
            vwap: price,
            significance: 0.0,
        }
    }

    fn record(&mut self, volume: Decimal, buy: Decimal, sell: Decimal) {
        self.trade_count += 1;
        self.volume = self.volume.saturating_add(volume);
        self.buy_volume = self.buy_volume.saturating_add(buy);
        self.sell_volume = self.sell_volume.saturating_add(sell);

        let n = Decimal::from(self.trade_count);
        self.avg_trade_size = self.volume / n;
        self.min_trade_size = self.min_trade_size.min(volume);
        self.max_trade_size = self.max_trade_size.max(volume);
        self.vwap += (self.price - self.vwap) / n;
    }
}

/// Round a price to its bucket key (half away from zero).
pub fn bucket_key(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size <= Decimal::ZERO {
        return price;
    }
    price
        .checked_div(tick_size)
        .and_then(|ticks| {
            ticks
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .checked_mul(tick_size)
        })
        .unwrap_or(price)
}

/// Volume profile for one symbol.
#[derive(Debug)]
pub struct VolumeProfile {
    buckets: BTreeMap<Decimal, ProfileBucket>,
    total_volume: Decimal,
    config: ProfileConfig,
}

impl VolumeProfile {
    pub fn new(config: ProfileConfig) -> Self {
        Self {
            buckets: BTreeMap::new(),
            total_volume: Decimal::ZERO,
            config,
        }
    }

    /// Add a tick's volume to its price bucket.
    pub fn update_profile(&mut self, tick: &Tick) {
        let key = bucket_key(tick.price, self.config.tick_size);
        let (buy, sell) = split_volume(tick.volume, tick.change);

        self.total_volume = self.total_volume.saturating_add(tick.volume);
        self.buckets
            .entry(key)
            .or_insert_with(|| ProfileBucket::new(key, tick.volume))
            .record(tick.volume, buy, sell);

        self.refresh_significance();
        if self.buckets.len() > self.config.max_buckets {
            self.evict_least_significant();
        }
    }

    /// Buckets ordered by ascending price.
    pub fn profile(&self) -> Vec<ProfileBucket> {
        self.buckets.values().cloned().collect()
    }

    pub fn bucket(&self, price: Decimal) -> Option<&ProfileBucket> {
        self.buckets.get(&bucket_key(price, self.config.tick_size))
    }

    /// Bucket with the largest volume. Ties go to the lower price.
    pub fn point_of_control(&self) -> Option<ProfileBucket> {
        self.buckets
            .values()
            .fold(None, |best: Option<&ProfileBucket>, bucket| match best {
                Some(b) if b.volume >= bucket.volume => Some(b),
                _ => Some(bucket),
            })
            .cloned()
    }

    pub fn total_volume(&self) -> Decimal {
        self.total_volume
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop insignificant and low-volume buckets, then cap the table.
    ///
    /// Returns the number of buckets removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.buckets.len();
        let min_significance = self.config.min_significance;
        let min_volume = self.config.min_volume;

        self.refresh_significance();
        self.buckets.retain(|_, bucket| {
            bucket.significance >= min_significance && bucket.volume >= min_volume
        });
        while self.buckets.len() > self.config.max_buckets {
            self.evict_least_significant();
        }

        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Volume profile cleaned up");
        }
        removed
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
        self.total_volume = Decimal::ZERO;
    }

    fn refresh_significance(&mut self) {
        let denominator = self.total_volume.max(Decimal::ONE);
        for bucket in self.buckets.values_mut() {
            bucket.significance = (bucket.volume / denominator).to_f64().unwrap_or(0.0);
        }
    }

    fn evict_least_significant(&mut self) {
        let weakest = self
            .buckets
            .values()
            .min_by(|a, b| a.volume.cmp(&b.volume).then_with(|| a.price.cmp(&b.price)))
            .map(|bucket| bucket.price);
        if let Some(price) = weakest {
            self.buckets.remove(&price);
        }
    }
}
