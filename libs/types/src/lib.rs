//! Types library for the order-flow analytics pipeline
//!
//! Shared type definitions used by the feed-ingestion and analytics
//! services: identifiers, market payloads, feed descriptors, clock helpers
//! and the error taxonomy.
//!
//! # Modules
//! - `ids`: Identifiers (FeedId, Symbol)
//! - `market`: Feed payloads (Tick, OrderBookSnapshot, TapeEntry)
//! - `feed`: Feed roles, connection states and configuration
//! - `time`: Nanosecond clock helpers
//! - `errors`: Error taxonomy

pub mod errors;
pub mod feed;
pub mod ids;
pub mod market;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::feed::*;
    pub use crate::ids::*;
    pub use crate::market::*;
    pub use crate::time::*;
}
