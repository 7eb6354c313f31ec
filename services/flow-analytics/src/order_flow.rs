//! Order-flow classification
//!
//! Attributes traded volume to buy and sell flow. Ticks carry no aggressor
//! tag, so their volume is split by price direction:
//!
//! | change | buy share |
//! |--------|-----------|
//! | > 0    | 0.7       |
//! | < 0    | 0.3       |
//! | = 0    | 0.5       |
//!
//! Tape entries with a known aggressor go to aggressive or passive flow
//! depending on the venue's large/dominant flags.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use types::market::{AggressorSide, TapeEntry, Tick};

use crate::store::BoundedBuffer;

/// Configuration for the classifier's rolling windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Samples kept in the buy and sell flow windows.
    pub flow_window: usize,
    /// Samples kept in the aggression window.
    pub aggression_window: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            flow_window: 50,
            aggression_window: 50,
        }
    }
}

/// Buy share of a tick's volume given its price change.
pub fn buy_share(change: Decimal) -> Decimal {
    if change > Decimal::ZERO {
        Decimal::new(7, 1)
    } else if change < Decimal::ZERO {
        Decimal::new(3, 1)
    } else {
        Decimal::new(5, 1)
    }
}

/// Split `volume` into `(buy, sell)` by price direction.
pub fn split_volume(volume: Decimal, change: Decimal) -> (Decimal, Decimal) {
    let buy = volume * buy_share(change);
    (buy, volume - buy)
}

/// Cumulative flow for one symbol. Reset only on reinitialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
    pub aggressive_buy_volume: Decimal,
    pub aggressive_sell_volume: Decimal,
    pub passive_buy_volume: Decimal,
    pub passive_sell_volume: Decimal,
    /// Tape entries with a buyer aggressor.
    pub buy_trades: u64,
    /// Tape entries with a seller aggressor.
    pub sell_trades: u64,
    pub net_order_flow: Decimal,
    /// Timestamp of the last classified payload.
    pub last_update: i64,
}

impl FlowMetrics {
    pub fn total_volume(&self) -> Decimal {
        self.total_buy_volume.saturating_add(self.total_sell_volume)
    }

    /// Totals saturate at `Decimal::MAX` instead of overflowing.
    fn add(&mut self, buy: Decimal, sell: Decimal, timestamp: i64) {
        self.total_buy_volume = self.total_buy_volume.saturating_add(buy);
        self.total_sell_volume = self.total_sell_volume.saturating_add(sell);
        self.net_order_flow = self.total_buy_volume.saturating_sub(self.total_sell_volume);
        self.last_update = self.last_update.max(timestamp);
    }
}

/// Buy/sell attribution of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickFlow {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Order-flow classifier for one symbol.
#[derive(Debug)]
pub struct OrderFlowClassifier {
    metrics: FlowMetrics,
    buy_flow: BoundedBuffer<Decimal>,
    sell_flow: BoundedBuffer<Decimal>,
    /// Aggressive volume per classified tape entry (0 when passive).
    aggression: BoundedBuffer<Decimal>,
}

impl OrderFlowClassifier {
    pub fn new(config: &FlowConfig) -> Self {
        Self {
            metrics: FlowMetrics::default(),
            buy_flow: BoundedBuffer::new(config.flow_window),
            sell_flow: BoundedBuffer::new(config.flow_window),
            aggression: BoundedBuffer::new(config.aggression_window),
        }
    }

    /// Attribute a tick's volume by its price change.
    pub fn classify_tick(&mut self, tick: &Tick) -> TickFlow {
        let (buy, sell) = split_volume(tick.volume, tick.change);
        self.metrics.add(buy, sell, tick.timestamp);
        self.buy_flow.push(buy);
        self.sell_flow.push(sell);
        TickFlow { buy, sell }
    }

    /// Attribute a tape entry by its aggressor tag.
    pub fn classify_tape_entry(&mut self, entry: &TapeEntry) {
        let volume = entry.volume;
        let aggressive = entry.is_aggressive();
        let m = &mut self.metrics;

        let aggressive_volume = match entry.aggressor {
            AggressorSide::Buyer => {
                m.add(volume, Decimal::ZERO, entry.timestamp);
                m.buy_trades += 1;
                if aggressive {
                    m.aggressive_buy_volume = m.aggressive_buy_volume.saturating_add(volume);
                } else {
                    m.passive_buy_volume = m.passive_buy_volume.saturating_add(volume);
                }
                if aggressive { volume } else { Decimal::ZERO }
            }
            AggressorSide::Seller => {
                m.add(Decimal::ZERO, volume, entry.timestamp);
                m.sell_trades += 1;
                if aggressive {
                    m.aggressive_sell_volume = m.aggressive_sell_volume.saturating_add(volume);
                } else {
                    m.passive_sell_volume = m.passive_sell_volume.saturating_add(volume);
                }
                if aggressive { volume } else { Decimal::ZERO }
            }
            AggressorSide::Unknown => {
                let half = volume / Decimal::TWO;
                m.add(half, volume - half, entry.timestamp);
                Decimal::ZERO
            }
        };

        self.aggression.push(aggressive_volume);
    }

    pub fn flow_metrics(&self) -> FlowMetrics {
        self.metrics.clone()
    }

    pub fn metrics(&self) -> &FlowMetrics {
        &self.metrics
    }

    /// Buy flow window, oldest first.
    pub fn buy_flow_series(&self) -> Vec<f64> {
        to_f64_series(&self.buy_flow)
    }

    /// Sell flow window, oldest first.
    pub fn sell_flow_series(&self) -> Vec<f64> {
        to_f64_series(&self.sell_flow)
    }

    /// Aggression window, oldest first.
    pub fn aggression_series(&self) -> Vec<f64> {
        to_f64_series(&self.aggression)
    }

    /// Most recent buy and sell flow samples.
    pub fn latest_flow(&self) -> TickFlow {
        TickFlow {
            buy: self.buy_flow.latest().copied().unwrap_or_default(),
            sell: self.sell_flow.latest().copied().unwrap_or_default(),
        }
    }

    /// Clear all flow state (new trading session).
    pub fn reset(&mut self) {
        self.metrics = FlowMetrics::default();
        self.buy_flow.clear();
        self.sell_flow.clear();
        self.aggression.clear();
    }
}

fn to_f64_series(buf: &BoundedBuffer<Decimal>) -> Vec<f64> {
    buf.iter().map(|v| v.to_f64().unwrap_or(0.0)).collect()
}
