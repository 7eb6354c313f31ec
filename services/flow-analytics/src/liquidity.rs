//! Liquidity and microstructure analysis
//!
//! Computes, from order-book snapshots and the recent tape:
//! - Distance-weighted side liquidity (`Σ volume · e^(-0.1 · index)`)
//! - Top-of-book imbalance in `[-100, 100]`
//! - Liquidity gaps (wide touch spread, holes between adjacent levels)
//! - Hidden-liquidity estimate in `[0, 1]`
//! - Absorption of large prints
//! - Resilience of current depth versus the stored book history
//!
//! and a per-tick microstructure snapshot. Every formula floors its
//! denominators and returns a neutral value on empty input.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use types::market::{BookLevel, OrderBookSnapshot, TapeEntry, Tick};

/// Decay per level index in the side-liquidity weighting.
const LEVEL_DECAY: f64 = 0.1;
/// Resilience is clamped to `[0, RESILIENCE_CAP]`.
const RESILIENCE_CAP: f64 = 2.0;

/// Configuration for liquidity analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Levels per side used for imbalance.
    pub imbalance_depth: usize,
    /// A spread wider than this many ticks is a gap.
    pub gap_tick_multiple: Decimal,
    /// Tape entries compared against visible depth for hidden liquidity.
    pub hidden_window: usize,
    /// Tape entries examined for absorption.
    pub absorption_window: usize,
    /// A print larger than `absorption_ratio × mean` counts as large.
    pub absorption_ratio: f64,
    /// Absorption is flagged when large prints exceed this share.
    pub absorption_share: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            imbalance_depth: 5,
            gap_tick_multiple: Decimal::from(3),
            hidden_window: 10,
            absorption_window: 20,
            absorption_ratio: 2.0,
            absorption_share: 0.3,
        }
    }
}

/// Where a gap was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Between best bid and best ask.
    Touch,
    /// Between two adjacent bid levels.
    Bid,
    /// Between two adjacent ask levels.
    Ask,
}

/// A price point in a liquidity evaluation. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// `(bid - ask) / (bid + ask) * 100`.
    pub imbalance: f64,
    /// For gaps the width in ticks; for profile levels the share of
    /// visible liquidity.
    pub significance: f64,
    pub timestamp: i64,
    /// Set for gaps only.
    pub gap: Option<GapKind>,
}

/// Result of absorption detection over the recent tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionSignal {
    pub detected: bool,
    pub large_count: usize,
    pub sample_count: usize,
    pub mean_volume: f64,
    /// High minus low price across the sample.
    pub price_range: Decimal,
}

impl AbsorptionSignal {
    fn none() -> Self {
        Self {
            detected: false,
            large_count: 0,
            sample_count: 0,
            mean_volume: 0.0,
            price_range: Decimal::ZERO,
        }
    }
}

/// Per-book liquidity evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityAnalysis {
    pub bid_liquidity: f64,
    pub ask_liquidity: f64,
    pub total_liquidity: f64,
    pub imbalance: f64,
    pub spread: Decimal,
    pub mid_price: Decimal,
    pub hidden_liquidity: f64,
    pub absorption: AbsorptionSignal,
    pub resilience: f64,
    pub gap_count: usize,
    pub timestamp: i64,
}

/// Per-tick microstructure view. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureSnapshot {
    /// -1, 0 or +1 versus the previous buffered tick.
    pub tick_direction: i8,
    pub effective_spread: Decimal,
    /// `|change| / max(volume, 1)`.
    pub price_impact: Decimal,
    pub market_impact: Decimal,
    pub temporary_impact: Decimal,
    pub permanent_impact: Decimal,
    /// Change in book imbalance between the last two books.
    pub order_book_pressure_delta: f64,
    pub timestamp: i64,
}

/// Per-level view of the current book plus its gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityProfile {
    /// Bids best-first followed by asks best-first.
    pub levels: Vec<PriceLevel>,
    pub gaps: Vec<PriceLevel>,
    pub analysis: Option<LiquidityAnalysis>,
    pub timestamp: i64,
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// `(bid - ask) / (bid + ask) * 100`, 0 when both are zero.
///
/// A ratio too large for `Decimal` takes the bound of its sign.
pub fn level_imbalance(bid_volume: Decimal, ask_volume: Decimal) -> f64 {
    let total = bid_volume.saturating_add(ask_volume);
    if total <= Decimal::ZERO {
        return 0.0;
    }
    let diff = bid_volume.saturating_sub(ask_volume);
    match diff.checked_div(total) {
        Some(ratio) => (to_f64(ratio) * 100.0).clamp(-100.0, 100.0),
        None if diff.is_sign_negative() => -100.0,
        None => 100.0,
    }
}

/// Saturating sum of level volumes.
fn sum_volume(volumes: impl Iterator<Item = Decimal>) -> Decimal {
    volumes.fold(Decimal::ZERO, Decimal::saturating_add)
}

/// Distance-weighted liquidity of one side, best level first.
pub fn side_liquidity(levels: &[BookLevel]) -> f64 {
    levels
        .iter()
        .enumerate()
        .map(|(i, level)| to_f64(level.volume) * (-(i as f64) * LEVEL_DECAY).exp())
        .sum()
}

/// Imbalance of the top `depth` levels per side.
pub fn order_book_imbalance(book: &OrderBookSnapshot, depth: usize) -> f64 {
    let bid = sum_volume(book.bids.iter().take(depth).map(|l| l.volume));
    let ask = sum_volume(book.asks.iter().take(depth).map(|l| l.volume));
    level_imbalance(bid, ask)
}

/// Gaps at the touch and between adjacent levels on either side.
///
/// A gap is any distance greater than `tick_multiple × tick_size`. Its
/// price is the midpoint and its significance the width in ticks.
pub fn liquidity_gaps(
    book: &OrderBookSnapshot,
    tick_size: Decimal,
    tick_multiple: Decimal,
) -> Vec<PriceLevel> {
    if tick_size <= Decimal::ZERO {
        return Vec::new();
    }
    let threshold = tick_size.saturating_mul(tick_multiple);
    let mut gaps = Vec::new();

    let gap = |inner: &BookLevel, outer: &BookLevel, kind: GapKind| {
        let width = (inner.price - outer.price).abs();
        let (bid_volume, ask_volume) = match kind {
            GapKind::Touch => (inner.volume, outer.volume),
            GapKind::Bid => (inner.volume, Decimal::ZERO),
            GapKind::Ask => (Decimal::ZERO, inner.volume),
        };
        PriceLevel {
            price: inner.price + (outer.price - inner.price) / Decimal::TWO,
            bid_volume,
            ask_volume,
            imbalance: level_imbalance(bid_volume, ask_volume),
            significance: width.checked_div(tick_size).map_or(f64::MAX, to_f64),
            timestamp: book.timestamp,
            gap: Some(kind),
        }
    };

    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        if ask.price - bid.price > threshold {
            gaps.push(gap(bid, ask, GapKind::Touch));
        }
    }
    for (side, kind) in [(&book.bids, GapKind::Bid), (&book.asks, GapKind::Ask)] {
        for pair in side.windows(2) {
            if (pair[0].price - pair[1].price).abs() > threshold {
                gaps.push(gap(&pair[0], &pair[1], kind));
            }
        }
    }
    gaps
}

/// Traded volume in excess of visible depth: `clamp(recent/visible - 1, 0, 1)`.
///
/// `recent_tape` should already be limited to the comparison window.
pub fn hidden_liquidity_estimate(book: &OrderBookSnapshot, recent_tape: &[TapeEntry]) -> f64 {
    let visible = book.total_volume();
    if visible <= Decimal::ZERO {
        return 0.0;
    }
    let traded = sum_volume(recent_tape.iter().map(|e| e.volume));
    // Overflow means traded volume dwarfs the visible book.
    traded
        .checked_div(visible)
        .map_or(1.0, |ratio| (to_f64(ratio) - 1.0).clamp(0.0, 1.0))
}

/// Flag absorption when more than `share` of the prints exceed
/// `ratio × mean volume`.
pub fn detect_absorption(tape: &[TapeEntry], ratio: f64, share: f64) -> AbsorptionSignal {
    if tape.is_empty() {
        return AbsorptionSignal::none();
    }
    let volumes: Vec<f64> = tape.iter().map(|e| to_f64(e.volume)).collect();
    let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let large_count = volumes.iter().filter(|v| **v > mean * ratio).count();

    let (low, high) = tape.iter().fold((tape[0].price, tape[0].price), |(lo, hi), e| {
        (lo.min(e.price), hi.max(e.price))
    });

    AbsorptionSignal {
        detected: large_count as f64 / volumes.len() as f64 > share,
        large_count,
        sample_count: volumes.len(),
        mean_volume: mean,
        price_range: high - low,
    }
}

/// Current weighted depth over the mean weighted depth of `history`,
/// clamped to `[0, 2]`. 1.0 without usable history.
pub fn resilience<'a>(
    current: &OrderBookSnapshot,
    history: impl IntoIterator<Item = &'a OrderBookSnapshot>,
) -> f64 {
    let (sum, count) = history.into_iter().fold((0.0, 0usize), |(sum, count), book| {
        (sum + two_sided_liquidity(book), count + 1)
    });
    if count == 0 {
        return 1.0;
    }
    let mean = sum / count as f64;
    if mean <= 0.0 {
        return 1.0;
    }
    (two_sided_liquidity(current) / mean).clamp(0.0, RESILIENCE_CAP)
}

fn two_sided_liquidity(book: &OrderBookSnapshot) -> f64 {
    side_liquidity(&book.bids) + side_liquidity(&book.asks)
}

/// Microstructure of one tick against the previous buffered tick.
pub fn microstructure(
    tick: &Tick,
    previous: Option<&Tick>,
    order_book_pressure_delta: f64,
) -> MicrostructureSnapshot {
    let tick_direction = match previous {
        Some(prev) if tick.price > prev.price => 1,
        Some(prev) if tick.price < prev.price => -1,
        _ => 0,
    };
    let price_impact = tick.change.abs() / tick.volume.max(Decimal::ONE);

    MicrostructureSnapshot {
        tick_direction,
        effective_spread: tick.spread(),
        price_impact,
        market_impact: price_impact * Decimal::new(7, 1),
        temporary_impact: price_impact * Decimal::new(3, 1),
        permanent_impact: price_impact * Decimal::new(1, 1),
        order_book_pressure_delta,
        timestamp: tick.timestamp,
    }
}

/// Stateful analyzer for one symbol: remembers the last evaluation and
/// the imbalance trend.
#[derive(Debug)]
pub struct LiquidityAnalyzer {
    config: LiquidityConfig,
    tick_size: Decimal,
    imbalance: Option<f64>,
    previous_imbalance: Option<f64>,
    last_analysis: Option<LiquidityAnalysis>,
}

impl LiquidityAnalyzer {
    pub fn new(config: LiquidityConfig, tick_size: Decimal) -> Self {
        Self {
            config,
            tick_size,
            imbalance: None,
            previous_imbalance: None,
            last_analysis: None,
        }
    }

    /// Evaluate a book against the stored history and recent tape.
    pub fn analyze<'a>(
        &mut self,
        book: &OrderBookSnapshot,
        history: impl IntoIterator<Item = &'a OrderBookSnapshot>,
        tape: &[TapeEntry],
    ) -> (LiquidityAnalysis, Vec<PriceLevel>) {
        let gaps = self.gaps(book);
        let imbalance = order_book_imbalance(book, self.config.imbalance_depth);
        let bid_liquidity = side_liquidity(&book.bids);
        let ask_liquidity = side_liquidity(&book.asks);

        let hidden_tape = &tape[tape.len().saturating_sub(self.config.hidden_window)..];
        let absorption_tape = &tape[tape.len().saturating_sub(self.config.absorption_window)..];

        let analysis = LiquidityAnalysis {
            bid_liquidity,
            ask_liquidity,
            total_liquidity: bid_liquidity + ask_liquidity,
            imbalance,
            spread: book.spread().unwrap_or_default(),
            mid_price: book.mid_price().unwrap_or_default(),
            hidden_liquidity: hidden_liquidity_estimate(book, hidden_tape),
            absorption: detect_absorption(
                absorption_tape,
                self.config.absorption_ratio,
                self.config.absorption_share,
            ),
            resilience: resilience(book, history),
            gap_count: gaps.len(),
            timestamp: book.timestamp,
        };

        self.previous_imbalance = self.imbalance.replace(imbalance);
        self.last_analysis = Some(analysis.clone());
        (analysis, gaps)
    }

    pub fn gaps(&self, book: &OrderBookSnapshot) -> Vec<PriceLevel> {
        liquidity_gaps(book, self.tick_size, self.config.gap_tick_multiple)
    }

    /// Change in imbalance between the last two books, 0 until two exist.
    pub fn pressure_delta(&self) -> f64 {
        match (self.imbalance, self.previous_imbalance) {
            (Some(current), Some(previous)) => current - previous,
            _ => 0.0,
        }
    }

    pub fn last_analysis(&self) -> Option<&LiquidityAnalysis> {
        self.last_analysis.as_ref()
    }

    /// Per-level view of `book`. Empty without a book.
    pub fn liquidity_profile(&self, book: Option<&OrderBookSnapshot>) -> LiquidityProfile {
        let Some(book) = book else {
            return LiquidityProfile {
                levels: Vec::new(),
                gaps: Vec::new(),
                analysis: self.last_analysis.clone(),
                timestamp: 0,
            };
        };

        let visible = book.total_volume().max(Decimal::ONE);
        let bids = book
            .bids
            .iter()
            .map(|l| (l.price, l.volume, Decimal::ZERO, l.volume));
        let asks = book
            .asks
            .iter()
            .map(|l| (l.price, Decimal::ZERO, l.volume, l.volume));
        let levels = bids
            .chain(asks)
            .map(|(price, bid_volume, ask_volume, volume)| PriceLevel {
                price,
                bid_volume,
                ask_volume,
                imbalance: level_imbalance(bid_volume, ask_volume),
                significance: to_f64(volume / visible),
                timestamp: book.timestamp,
                gap: None,
            })
            .collect();

        LiquidityProfile {
            levels,
            gaps: self.gaps(book),
            analysis: self.last_analysis.clone(),
            timestamp: book.timestamp,
        }
    }

    pub fn reset(&mut self) {
        self.imbalance = None;
        self.previous_imbalance = None;
        self.last_analysis = None;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use types::ids::Symbol;

    fn arb_side() -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(1u32..10_000, 1..10)
    }

    /// Volumes from whole lots down to 1e-28.
    fn arb_fractional_side() -> impl Strategy<Value = Vec<Decimal>> {
        prop::collection::vec(
            (1i64..10_000_000, 0u32..=28).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale)),
            1..10,
        )
    }

    fn book_from(bids: &[Decimal], asks: &[Decimal]) -> OrderBookSnapshot {
        OrderBookSnapshot {
            symbol: Symbol::new("ES"),
            timestamp: 1,
            bids: bids
                .iter()
                .enumerate()
                .map(|(i, v)| BookLevel::new(Decimal::from(1_000 - i as i64), *v))
                .collect(),
            asks: asks
                .iter()
                .enumerate()
                .map(|(i, v)| BookLevel::new(Decimal::from(1_001 + i as i64), *v))
                .collect(),
        }
    }

    fn make_book(bids: &[u32], asks: &[u32]) -> OrderBookSnapshot {
        let lots = |side: &[u32]| side.iter().map(|v| Decimal::from(*v)).collect::<Vec<_>>();
        book_from(&lots(bids), &lots(asks))
    }

    proptest! {
        #[test]
        fn prop_imbalance_bounded(bids in arb_side(), asks in arb_side()) {
            let imbalance = order_book_imbalance(&make_book(&bids, &asks), 5);
            prop_assert!((-100.0..=100.0).contains(&imbalance));
        }

        #[test]
        fn prop_mirrored_book_is_balanced(side in arb_side()) {
            let imbalance = order_book_imbalance(&make_book(&side, &side), 5);
            prop_assert_eq!(imbalance, 0.0);
        }

        #[test]
        fn prop_hidden_liquidity_in_unit_range(
            bids in arb_fractional_side(),
            asks in arb_fractional_side(),
            traded in 0u32..100_000,
        ) {
            let book = book_from(&bids, &asks);
            let print = TapeEntry {
                symbol: Symbol::new("ES"),
                timestamp: 1,
                price: Decimal::from(1_000),
                volume: Decimal::from(traded),
                aggressor: types::market::AggressorSide::Unknown,
                is_large: false,
                is_dominant: false,
            };
            let estimate = hidden_liquidity_estimate(&book, &[print]);
            prop_assert!((0.0..=1.0).contains(&estimate));
        }

        #[test]
        fn prop_fractional_imbalance_bounded(bids in arb_fractional_side(), asks in arb_fractional_side()) {
            let imbalance = order_book_imbalance(&book_from(&bids, &asks), 5);
            prop_assert!((-100.0..=100.0).contains(&imbalance));
        }
    }
}
