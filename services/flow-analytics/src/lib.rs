//! Flow Analytics Service
//!
//! Ingests market data from several redundant feeds for one instrument at a
//! time and produces:
//! - Feed connection tracking with reconnect backoff and failover ranking
//! - Per-feed quality telemetry (validity, latency, duplicates, gaps)
//! - Bounded tick, order-book and tape history
//! - Buy/sell order-flow classification and aggression tracking
//! - Price-bucketed volume profile with point of control
//! - Order-book imbalance, liquidity gaps, hidden liquidity and absorption
//! - Directional flow signals with momentum, acceleration and confidence
//!
//! # Architecture
//!
//! ```text
//!   Feed A   Feed B   Feed C
//!      │        │        │
//!   ┌──▼────────▼────────▼──┐
//!   │      FlowRouter       │  ← Splits by symbol
//!   └──────────┬────────────┘
//!              │ (one worker per symbol)
//!   ┌──────────▼────────────┐
//!   │   Validate / Dedup    │  ← Sequence, telemetry
//!   └──────────┬────────────┘
//!              │
//!   ┌──────────▼────────────┐
//!   │   MarketStateStore    │
//!   └───┬───────┬───────┬───┘
//!       │       │       │
//!   ┌───▼──┐ ┌──▼───┐ ┌─▼────────┐
//!   │ Flow │ │Profile│ │Liquidity │
//!   └───┬──┘ └──┬───┘ └─┬────────┘
//!       │       │       │
//!   ┌───▼───────▼───────▼───┐
//!   │  Scorer → Broadcast   │
//!   └───────────────────────┘
//! ```

pub mod config;
pub mod events;
pub mod feeds;
pub mod ingestion;
pub mod liquidity;
pub mod metrics;
pub mod order_flow;
pub mod pipeline;
pub mod router;
pub mod scoring;
pub mod store;
pub mod validation;
pub mod volume_profile;
pub mod worker;

pub use config::{ConfigError, PipelineConfig};
pub use events::{AnalyticsEvent, AnalyticsPayload, FeedMessage, InboundMessage};
pub use pipeline::SymbolPipeline;
pub use router::FlowRouter;
pub use worker::{PipelineHandle, PipelineWorker};

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";
