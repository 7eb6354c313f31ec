//! Validation gate for incoming feed payloads
//!
//! Schema and sanity checks on ticks, order books and tape entries. A failed
//! check is an expected, recoverable condition: the caller drops the payload
//! and counts it as invalid. Nothing here panics or propagates.

use rust_decimal::Decimal;
use types::errors::ValidationFailure;
use types::ids::Symbol;
use types::market::{OrderBookSnapshot, TapeEntry, Tick};

/// Check a tick: price > 0, volume >= 0, timestamp > 0, bid > 0, ask > 0,
/// bid <= ask.
pub fn check_tick(tick: &Tick) -> Result<(), ValidationFailure> {
    if tick.price <= Decimal::ZERO {
        return Err(ValidationFailure::NonPositivePrice(tick.price));
    }
    if tick.volume < Decimal::ZERO {
        return Err(ValidationFailure::NegativeVolume(tick.volume));
    }
    if tick.timestamp <= 0 {
        return Err(ValidationFailure::NonPositiveTimestamp(tick.timestamp));
    }
    if tick.bid <= Decimal::ZERO || tick.ask <= Decimal::ZERO {
        return Err(ValidationFailure::NonPositiveQuote {
            bid: tick.bid,
            ask: tick.ask,
        });
    }
    if tick.bid > tick.ask {
        return Err(ValidationFailure::CrossedQuote {
            bid: tick.bid,
            ask: tick.ask,
        });
    }
    Ok(())
}

/// Check an order book: both sides non-empty, timestamp > 0,
/// best bid < best ask.
pub fn check_order_book(book: &OrderBookSnapshot) -> Result<(), ValidationFailure> {
    let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => (bid.price, ask.price),
        _ => return Err(ValidationFailure::EmptyBookSide),
    };
    if book.timestamp <= 0 {
        return Err(ValidationFailure::NonPositiveTimestamp(book.timestamp));
    }
    if best_bid >= best_ask {
        return Err(ValidationFailure::CrossedBook { best_bid, best_ask });
    }
    Ok(())
}

/// Check a tape entry: price > 0, volume > 0, timestamp > 0.
pub fn check_tape_entry(entry: &TapeEntry) -> Result<(), ValidationFailure> {
    if entry.price <= Decimal::ZERO {
        return Err(ValidationFailure::NonPositivePrice(entry.price));
    }
    if entry.volume <= Decimal::ZERO {
        return Err(ValidationFailure::NonPositiveVolume(entry.volume));
    }
    if entry.timestamp <= 0 {
        return Err(ValidationFailure::NonPositiveTimestamp(entry.timestamp));
    }
    Ok(())
}

/// A pipeline serves exactly one instrument.
pub fn check_symbol(expected: &Symbol, actual: &Symbol) -> Result<(), ValidationFailure> {
    if expected != actual {
        return Err(ValidationFailure::SymbolMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        });
    }
    Ok(())
}

pub fn validate_tick(tick: &Tick) -> bool {
    check_tick(tick).is_ok()
}

pub fn validate_order_book(book: &OrderBookSnapshot) -> bool {
    check_order_book(book).is_ok()
}

pub fn validate_tape_entry(entry: &TapeEntry) -> bool {
    check_tape_entry(entry).is_ok()
}
