//! Market payload types delivered by feeds
//!
//! These are the payloads the transport layer hands to the pipeline. They
//! carry no validation of their own: the pipeline's validation gate decides
//! whether a payload is usable. All prices and volumes are `Decimal`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::Symbol;

/// Top-of-book quote plus last trade for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    /// Unix nanoseconds.
    pub timestamp: i64,
    /// Last traded price.
    pub price: Decimal,
    /// Volume traded at `price` since the previous tick.
    pub volume: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Signed price change since the previous tick.
    #[serde(default)]
    pub change: Decimal,
}

impl Tick {
    /// Quoted spread (`ask - bid`).
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// One price level of a displayed order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub volume: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume }
    }
}

/// Order-book snapshot as published by a feed.
///
/// Bids are expected best-first (descending price), asks best-first
/// (ascending price).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: Symbol,
    /// Unix nanoseconds.
    pub timestamp: i64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(bid.price + (ask.price - bid.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Total displayed volume on both sides, saturating at `Decimal::MAX`.
    pub fn total_volume(&self) -> Decimal {
        self.bids
            .iter()
            .chain(self.asks.iter())
            .fold(Decimal::ZERO, |total, level| total.saturating_add(level.volume))
    }
}

/// Side that crossed the spread on an executed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggressorSide {
    Buyer,
    Seller,
    Unknown,
}

/// A single time-and-sales record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeEntry {
    pub symbol: Symbol,
    /// Unix nanoseconds.
    pub timestamp: i64,
    pub price: Decimal,
    pub volume: Decimal,
    pub aggressor: AggressorSide,
    #[serde(default)]
    pub is_large: bool,
    #[serde(default)]
    pub is_dominant: bool,
}

impl TapeEntry {
    /// Whether the venue flagged this print as large or dominant.
    pub fn is_aggressive(&self) -> bool {
        self.is_large || self.is_dominant
    }
}
