//! Inbound feed messages and outbound analytics events
//!
//! Inbound messages are what the transport layer hands to a pipeline:
//! sequenced payloads plus feed lifecycle calls. Outbound events carry a
//! UUID v7 `event_id` and a per-pipeline monotonic `sequence` so consumers
//! can order and deduplicate them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::feed::ConnectionState;
use types::ids::{FeedId, Symbol};
use types::market::{OrderBookSnapshot, TapeEntry, Tick};
use uuid::Uuid;

use crate::liquidity::{LiquidityAnalysis, MicrostructureSnapshot, PriceLevel};
use crate::order_flow::FlowMetrics;
use crate::scoring::FlowDirection;

/// A payload as delivered by one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedMessage<T> {
    /// Feed-assigned sequence number, if the feed sequences its output.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Send time (Unix nanos). Falls back to the payload timestamp.
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub payload: T,
}

impl<T> FeedMessage<T> {
    pub fn new(payload: T) -> Self {
        Self {
            sequence: None,
            timestamp: None,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Everything the transport layer can deliver to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Tick {
        feed_id: FeedId,
        message: FeedMessage<Tick>,
    },
    OrderBook {
        feed_id: FeedId,
        message: FeedMessage<OrderBookSnapshot>,
    },
    Tape {
        feed_id: FeedId,
        message: FeedMessage<Vec<TapeEntry>>,
    },
    Connect {
        feed_id: FeedId,
    },
    Disconnect {
        feed_id: FeedId,
        #[serde(default)]
        reason: Option<String>,
    },
    Heartbeat {
        feed_id: FeedId,
    },
}

impl InboundMessage {
    pub fn feed_id(&self) -> &FeedId {
        match self {
            InboundMessage::Tick { feed_id, .. }
            | InboundMessage::OrderBook { feed_id, .. }
            | InboundMessage::Tape { feed_id, .. }
            | InboundMessage::Connect { feed_id }
            | InboundMessage::Disconnect { feed_id, .. }
            | InboundMessage::Heartbeat { feed_id } => feed_id,
        }
    }

    pub fn type_label(&self) -> &'static str {
        match self {
            InboundMessage::Tick { .. } => "tick",
            InboundMessage::OrderBook { .. } => "order_book",
            InboundMessage::Tape { .. } => "tape",
            InboundMessage::Connect { .. } => "connect",
            InboundMessage::Disconnect { .. } => "disconnect",
            InboundMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Outbound analytics event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    /// Unique event identifier (UUID v7)
    pub event_id: Uuid,
    /// Monotonic per pipeline, starting at 1
    pub sequence: u64,
    /// Unix nanoseconds
    pub timestamp: i64,
    pub symbol: Symbol,
    pub payload: AnalyticsPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "kebab-case")]
pub enum AnalyticsPayload {
    MarketDataUpdated {
        tick: Tick,
        flow_metrics: FlowMetrics,
        microstructure: MicrostructureSnapshot,
    },
    OrderBookUpdated {
        book: OrderBookSnapshot,
        liquidity: LiquidityAnalysis,
        gaps: Vec<PriceLevel>,
        imbalance: f64,
    },
    /// Emitted only when flow confidence exceeds the threshold.
    FlowChange {
        buy_flow: Decimal,
        sell_flow: Decimal,
        net_flow: Decimal,
        direction: FlowDirection,
        momentum: f64,
        acceleration: f64,
        confidence: f64,
        /// Quality score of the feed that delivered the triggering tick.
        quality: f64,
    },
    FeedStatusChanged {
        feed_id: FeedId,
        status: ConnectionState,
        reason: Option<String>,
    },
    /// Instruction to the transport layer after a disconnect.
    ReconnectScheduled {
        feed_id: FeedId,
        attempt: u32,
        delay_ms: u64,
        demoted: bool,
    },
    EmergencyShutdown {
        reason: String,
        timestamp: i64,
    },
}

impl AnalyticsEvent {
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            AnalyticsPayload::MarketDataUpdated { .. } => "market-data-updated",
            AnalyticsPayload::OrderBookUpdated { .. } => "order-book-updated",
            AnalyticsPayload::FlowChange { .. } => "flow-change",
            AnalyticsPayload::FeedStatusChanged { .. } => "feed-status-changed",
            AnalyticsPayload::ReconnectScheduled { .. } => "reconnect-scheduled",
            AnalyticsPayload::EmergencyShutdown { .. } => "emergency-shutdown",
        }
    }
}

/// Stamps outbound payloads with ids and a monotonic sequence.
#[derive(Debug)]
pub struct EventSequencer {
    symbol: Symbol,
    next_sequence: u64,
}

impl EventSequencer {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            next_sequence: 1,
        }
    }

    pub fn stamp(&mut self, timestamp: i64, payload: AnalyticsPayload) -> AnalyticsEvent {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        AnalyticsEvent {
            event_id: Uuid::now_v7(),
            sequence,
            timestamp,
            symbol: self.symbol.clone(),
            payload,
        }
    }

    /// Sequence of the last stamped event, 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shutdown(reason: &str) -> AnalyticsPayload {
        AnalyticsPayload::EmergencyShutdown {
            reason: reason.to_string(),
            timestamp: 42,
        }
    }

    #[test]
    fn test_sequencer_is_monotonic() {
        let mut seq = EventSequencer::new(Symbol::new("ES"));
        assert_eq!(seq.last_sequence(), 0);
        let a = seq.stamp(1, shutdown("a"));
        let b = seq.stamp(2, shutdown("b"));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(b.symbol, Symbol::new("ES"));
        assert_eq!(seq.last_sequence(), 2);
    }

    #[test]
    fn test_event_type_tag() {
        let mut seq = EventSequencer::new(Symbol::new("ES"));
        let event = seq.stamp(1, shutdown("operator"));
        assert_eq!(event.event_type_label(), "emergency-shutdown");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["event_type"], "emergency-shutdown");

        let back: AnalyticsEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_parse_inbound_tick() {
        let raw = r#"{
            "type": "tick",
            "feed_id": "primary",
            "message": {
                "sequence": 7,
                "payload": {
                    "symbol": "ES",
                    "timestamp": 1000,
                    "price": "100.25",
                    "volume": "5",
                    "bid": "100",
                    "ask": "100.5"
                }
            }
        }"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.type_label(), "tick");
        assert_eq!(msg.feed_id(), &FeedId::new("primary"));
        match msg {
            InboundMessage::Tick { message, .. } => {
                assert_eq!(message.sequence, Some(7));
                assert_eq!(message.timestamp, None);
                assert_eq!(message.payload.change, Decimal::ZERO);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_parse_lifecycle() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"disconnect","feed_id":"b"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Disconnect {
                feed_id: FeedId::new("b"),
                reason: None,
            }
        );
    }
}
