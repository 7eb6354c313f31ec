//! Error types for the analytics pipeline
//!
//! Error taxonomy using thiserror. Validation failures and sequence anomalies
//! are expected conditions: they are counted and logged, never propagated
//! out of an ingest call.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::ids::{FeedId, Symbol};

/// Reason a payload was rejected by the validation gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("non-positive price: {0}")]
    NonPositivePrice(Decimal),

    #[error("negative volume: {0}")]
    NegativeVolume(Decimal),

    #[error("non-positive volume: {0}")]
    NonPositiveVolume(Decimal),

    #[error("non-positive timestamp: {0}")]
    NonPositiveTimestamp(i64),

    #[error("non-positive quote: bid {bid}, ask {ask}")]
    NonPositiveQuote { bid: Decimal, ask: Decimal },

    #[error("crossed quote: bid {bid} > ask {ask}")]
    CrossedQuote { bid: Decimal, ask: Decimal },

    #[error("order book side is empty")]
    EmptyBookSide,

    #[error("crossed book: best bid {best_bid} >= best ask {best_ask}")]
    CrossedBook { best_bid: Decimal, best_ask: Decimal },

    #[error("symbol mismatch: expected {expected}, got {actual}")]
    SymbolMismatch { expected: Symbol, actual: Symbol },
}

/// Feed registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("unknown feed: {0}")]
    UnknownFeed(FeedId),

    #[error("feed already registered: {0}")]
    AlreadyRegistered(FeedId),
}

/// Pipeline-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline halted: {reason}")]
    Halted { reason: String },

    #[error("pipeline stopped")]
    Stopped,

    #[error("no pipeline for symbol {0}")]
    UnknownSymbol(Symbol),

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_failure_display() {
        let err = ValidationFailure::CrossedQuote {
            bid: Decimal::from(101),
            ask: Decimal::from(100),
        };
        assert_eq!(err.to_string(), "crossed quote: bid 101 > ask 100");
    }

    #[test]
    fn test_pipeline_error_from_feed_error() {
        let feed_err = FeedError::UnknownFeed(FeedId::new("x"));
        let err: PipelineError = feed_err.into();
        assert!(matches!(err, PipelineError::Feed(_)));
        assert!(err.to_string().contains("unknown feed: x"));
    }

    #[test]
    fn test_halted_display() {
        let err = PipelineError::Halted {
            reason: "operator stop".to_string(),
        };
        assert_eq!(err.to_string(), "pipeline halted: operator stop");
    }
}
