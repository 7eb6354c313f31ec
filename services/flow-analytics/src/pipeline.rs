//! Per-symbol analytics pipeline
//!
//! `SymbolPipeline` owns every piece of mutable state for one instrument:
//! the feed registry, telemetry, sequencing, the market state store and
//! the analytics components. It is a plain synchronous value with a single
//! writer; concurrency lives in the worker that owns it.
//!
//! Processing order for a tick:
//!
//! ```text
//! feed check → symbol + validation → sequence → dedup
//!     → telemetry → store → classify → profile → microstructure → events
//! ```
//!
//! Malformed input is dropped and counted. The only error an ingest call
//! returns is `Halted` after an emergency shutdown.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use types::errors::{FeedError, PipelineError, ValidationFailure};
use types::feed::FeedConfig;
use types::ids::{FeedId, Symbol};
use types::market::{OrderBookSnapshot, TapeEntry, Tick};
use types::time::elapsed_millis;

use crate::config::PipelineConfig;
use crate::events::{AnalyticsEvent, AnalyticsPayload, EventSequencer, FeedMessage, InboundMessage};
use crate::feeds::{Backoff, ExponentialBackoff, FeedRegistry, FeedStatus, FeedStatusChange};
use crate::ingestion::{DuplicateFilter, SequenceCheck, SequenceTracker};
use crate::liquidity::{microstructure, LiquidityAnalyzer, LiquidityProfile};
use crate::metrics::{QualityMetrics, QualityTelemetry, QualityUpdate};
use crate::order_flow::{FlowMetrics, OrderFlowClassifier};
use crate::scoring::{FlowScorer, FlowSignal};
use crate::store::{MarketStateStore, SweepReport};
use crate::validation::{check_order_book, check_symbol, check_tape_entry, check_tick};
use crate::volume_profile::{ProfileBucket, VolumeProfile};

/// Reason attached to disconnects raised by heartbeat supervision.
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Analytics pipeline for one symbol.
#[derive(Debug)]
pub struct SymbolPipeline {
    symbol: Symbol,
    config: PipelineConfig,
    registry: FeedRegistry,
    telemetry: QualityTelemetry,
    sequences: SequenceTracker,
    dedup: DuplicateFilter,
    store: MarketStateStore,
    flow: OrderFlowClassifier,
    profile: VolumeProfile,
    liquidity: LiquidityAnalyzer,
    scorer: FlowScorer,
    events: EventSequencer,
    /// Set by emergency shutdown, cleared by reinitialize.
    halted: Option<String>,
}

impl SymbolPipeline {
    /// Build a pipeline using exponential backoff from the config.
    pub fn new(symbol: Symbol, config: PipelineConfig, now: i64) -> Result<Self, PipelineError> {
        let backoff = Arc::new(ExponentialBackoff::new(config.feeds.backoff.clone()));
        Self::with_backoff(symbol, config, backoff, now)
    }

    /// Build a pipeline with an externally supplied reconnect backoff.
    ///
    /// Fails with `PipelineError::Config` if `config` does not validate.
    pub fn with_backoff(
        symbol: Symbol,
        config: PipelineConfig,
        backoff: Arc<dyn Backoff>,
        now: i64,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let mut pipeline = Self {
            registry: FeedRegistry::new(&config.feeds, backoff),
            telemetry: QualityTelemetry::new(config.telemetry.clone()),
            sequences: SequenceTracker::new(),
            dedup: DuplicateFilter::new(&config.sequencing),
            store: MarketStateStore::new(&config.store),
            flow: OrderFlowClassifier::new(&config.flow),
            profile: VolumeProfile::new(config.profile.clone()),
            liquidity: LiquidityAnalyzer::new(config.liquidity.clone(), config.profile.tick_size),
            scorer: FlowScorer::new(config.scoring.clone()),
            events: EventSequencer::new(symbol.clone()),
            halted: None,
            symbol,
            config,
        };

        for feed in pipeline.config.feeds.feeds.clone() {
            pipeline.register_feed(feed, now)?;
        }
        info!(symbol = %pipeline.symbol, feeds = pipeline.registry.feed_ids().len(), "Pipeline created");
        Ok(pipeline)
    }

    pub fn register_feed(&mut self, feed: FeedConfig, now: i64) -> Result<(), PipelineError> {
        let feed_id = feed.id.clone();
        self.registry.register_feed(feed)?;
        self.telemetry.track(&feed_id, now);
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Dispatch any inbound message.
    pub fn handle(
        &mut self,
        message: InboundMessage,
        now: i64,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        match message {
            InboundMessage::Tick { feed_id, message } => self.on_tick(&feed_id, message, now),
            InboundMessage::OrderBook { feed_id, message } => {
                self.on_order_book(&feed_id, message, now)
            }
            InboundMessage::Tape { feed_id, message } => self.on_tape(&feed_id, message, now),
            InboundMessage::Connect { feed_id } => self.connect(&feed_id, now),
            InboundMessage::Disconnect { feed_id, reason } => {
                self.disconnect(&feed_id, reason.as_deref().unwrap_or("disconnected"), now)
            }
            InboundMessage::Heartbeat { feed_id } => {
                self.heartbeat(&feed_id, now)?;
                Ok(Vec::new())
            }
        }
    }

    pub fn on_tick(
        &mut self,
        feed_id: &FeedId,
        message: FeedMessage<Tick>,
        now: i64,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        if !self.admit(feed_id, now) {
            return Ok(Vec::new());
        }

        let mut tick = message.payload;
        if let Err(reason) = check_symbol(&self.symbol, &tick.symbol).and_then(|_| check_tick(&tick)) {
            self.reject(feed_id, "tick", &reason);
            return Ok(Vec::new());
        }
        self.check_sequence(feed_id, message.sequence);

        if self.dedup.is_duplicate(&tick, self.store.ticks().iter()) {
            self.telemetry.record_duplicate(feed_id);
            return Ok(Vec::new());
        }
        self.accept(feed_id, message.timestamp.unwrap_or(tick.timestamp), now);

        let previous = self.store.last_tick().cloned();
        if let Some(prev) = &previous {
            tick.change = tick.price - prev.price;
        }
        self.store.store_tick(tick.clone());
        self.flow.classify_tick(&tick);
        self.profile.update_profile(&tick);
        let micro = microstructure(&tick, previous.as_ref(), self.liquidity.pressure_delta());

        let timestamp = tick.timestamp;
        let mut events = vec![self.events.stamp(
            timestamp,
            AnalyticsPayload::MarketDataUpdated {
                tick,
                flow_metrics: self.flow.flow_metrics(),
                microstructure: micro,
            },
        )];
        events.extend(self.flow_change(feed_id, timestamp));
        Ok(events)
    }

    pub fn on_order_book(
        &mut self,
        feed_id: &FeedId,
        message: FeedMessage<OrderBookSnapshot>,
        now: i64,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        if !self.admit(feed_id, now) {
            return Ok(Vec::new());
        }

        let book = message.payload;
        if let Err(reason) =
            check_symbol(&self.symbol, &book.symbol).and_then(|_| check_order_book(&book))
        {
            self.reject(feed_id, "order_book", &reason);
            return Ok(Vec::new());
        }
        self.check_sequence(feed_id, message.sequence);

        if self.dedup.is_duplicate_book(&book) {
            self.telemetry.record_duplicate(feed_id);
            debug!(feed_id = %feed_id, timestamp = book.timestamp, "Duplicate order book suppressed");
            return Ok(Vec::new());
        }
        self.accept(feed_id, message.timestamp.unwrap_or(book.timestamp), now);

        let window = self
            .config
            .liquidity
            .hidden_window
            .max(self.config.liquidity.absorption_window);
        let tape = self.store.recent_tape(window);
        let (analysis, gaps) = self
            .liquidity
            .analyze(&book, self.store.book_history().iter(), &tape);

        self.dedup.remember_book(&book);
        self.store.store_order_book(book.clone());

        let timestamp = book.timestamp;
        let imbalance = analysis.imbalance;
        Ok(vec![self.events.stamp(
            timestamp,
            AnalyticsPayload::OrderBookUpdated {
                book,
                liquidity: analysis,
                gaps,
                imbalance,
            },
        )])
    }

    /// Ingest a batch of tape entries. Each entry is validated on its own;
    /// the batch carries one sequence number.
    pub fn on_tape(
        &mut self,
        feed_id: &FeedId,
        message: FeedMessage<Vec<TapeEntry>>,
        now: i64,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        if !self.admit(feed_id, now) || message.payload.is_empty() {
            return Ok(Vec::new());
        }
        self.check_sequence(feed_id, message.sequence);

        let mut accepted = Vec::with_capacity(message.payload.len());
        for entry in message.payload {
            match check_symbol(&self.symbol, &entry.symbol).and_then(|_| check_tape_entry(&entry)) {
                Ok(()) => {
                    self.telemetry.record_valid(feed_id);
                    self.flow.classify_tape_entry(&entry);
                    accepted.push(entry);
                }
                Err(reason) => self.reject(feed_id, "tape", &reason),
            }
        }

        let Some(last) = accepted.last() else {
            return Ok(Vec::new());
        };
        let sent = message.timestamp.unwrap_or(last.timestamp);
        let timestamp = last.timestamp;
        self.telemetry.record_latency(feed_id, elapsed_millis(sent, now));
        self.store.store_tape_entries(accepted);

        Ok(self.flow_change(feed_id, timestamp).into_iter().collect())
    }

    pub fn connect(&mut self, feed_id: &FeedId, now: i64) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        let change = self.registry.mark_connected(feed_id, now)?;
        Ok(change
            .map(|change| self.status_event(change, now))
            .into_iter()
            .collect())
    }

    /// Mark a feed disconnected and emit the reconnect decision.
    pub fn disconnect(
        &mut self,
        feed_id: &FeedId,
        reason: &str,
        now: i64,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        let (change, decision) = self.registry.mark_disconnected(feed_id, reason)?;

        let mut events: Vec<AnalyticsEvent> = change
            .map(|change| self.status_event(change, now))
            .into_iter()
            .collect();
        events.push(self.events.stamp(
            now,
            AnalyticsPayload::ReconnectScheduled {
                feed_id: decision.feed_id,
                attempt: decision.attempt,
                delay_ms: decision.delay.as_millis() as u64,
                demoted: decision.demoted,
            },
        ));
        Ok(events)
    }

    /// Mark a reconnection attempt in flight.
    pub fn connecting(&mut self, feed_id: &FeedId, now: i64) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        self.ensure_running()?;
        let change = self.registry.mark_connecting(feed_id)?;
        Ok(change
            .map(|change| self.status_event(change, now))
            .into_iter()
            .collect())
    }

    pub fn heartbeat(&mut self, feed_id: &FeedId, now: i64) -> Result<(), PipelineError> {
        self.ensure_running()?;
        self.registry.record_heartbeat(feed_id, now)?;
        Ok(())
    }

    // ── Housekeeping ─────────────────────────────────────────────────

    /// Recompute feed quality and push the scores into the registry.
    pub fn recompute_quality(&mut self, now: i64) -> Vec<QualityUpdate> {
        let updates = self.telemetry.recompute(now);
        for update in &updates {
            self.registry.apply_quality(update);
        }
        updates
    }

    pub fn sweep(&mut self, now: i64) -> SweepReport {
        self.store.sweep(now)
    }

    pub fn cleanup_profile(&mut self) -> usize {
        self.profile.cleanup()
    }

    /// Disconnect connected feeds whose heartbeat has lapsed.
    pub fn check_heartbeats(&mut self, now: i64) -> Vec<AnalyticsEvent> {
        if self.halted.is_some() {
            return Vec::new();
        }
        let mut events = Vec::new();
        for feed_id in self.registry.stale_feeds(now) {
            warn!(symbol = %self.symbol, feed_id = %feed_id, "Feed heartbeat timed out");
            match self.disconnect(&feed_id, HEARTBEAT_TIMEOUT_REASON, now) {
                Ok(mut emitted) => events.append(&mut emitted),
                Err(err) => warn!(feed_id = %feed_id, error = %err, "Heartbeat disconnect failed"),
            }
        }
        events
    }

    // ── Critical failure ─────────────────────────────────────────────

    /// Halt ingestion until `reinitialize`. Computed state stays queryable.
    pub fn emergency_shutdown(&mut self, reason: &str, now: i64) -> AnalyticsEvent {
        error!(symbol = %self.symbol, reason, "Emergency shutdown");
        self.halted = Some(reason.to_string());
        self.events.stamp(
            now,
            AnalyticsPayload::EmergencyShutdown {
                reason: reason.to_string(),
                timestamp: now,
            },
        )
    }

    /// Clear all session state and resume ingestion. Feeds stay registered.
    pub fn reinitialize(&mut self, now: i64) {
        self.halted = None;
        self.telemetry.reset(now);
        self.sequences.reset();
        self.dedup.reset();
        self.store.clear();
        self.flow.reset();
        self.profile.reset();
        self.liquidity.reset();
        info!(symbol = %self.symbol, "Pipeline reinitialized");
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.halted.is_none() && self.registry.is_ready()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Latest tick.
    pub fn current_market_data(&self) -> Option<Tick> {
        self.store.current_tick()
    }

    pub fn order_book(&self) -> Option<OrderBookSnapshot> {
        self.store.order_book()
    }

    pub fn recent_ticks(&self, count: usize) -> Vec<Tick> {
        self.store.recent_ticks(count)
    }

    pub fn recent_tape(&self, count: usize) -> Vec<TapeEntry> {
        self.store.recent_tape(count)
    }

    pub fn volume_profile(&self) -> Vec<ProfileBucket> {
        self.profile.profile()
    }

    pub fn point_of_control(&self) -> Option<ProfileBucket> {
        self.profile.point_of_control()
    }

    pub fn liquidity_profile(&self) -> LiquidityProfile {
        self.liquidity
            .liquidity_profile(self.store.book_history().latest())
    }

    pub fn flow_metrics(&self) -> FlowMetrics {
        self.flow.flow_metrics()
    }

    pub fn flow_signal(&self) -> FlowSignal {
        self.scorer.signal(&self.flow)
    }

    pub fn feed_statuses(&self) -> Vec<FeedStatus> {
        self.registry.statuses()
    }

    pub fn preferred_feed(&self) -> Option<FeedId> {
        self.registry.preferred_feed()
    }

    pub fn quality(&self, feed_id: &FeedId) -> Option<QualityMetrics> {
        self.telemetry.snapshot(feed_id)
    }

    pub fn quality_snapshots(&self) -> Vec<QualityMetrics> {
        self.telemetry.snapshots()
    }

    /// Sequence number of the last emitted event.
    pub fn last_event_sequence(&self) -> u64 {
        self.events.last_sequence()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn ensure_running(&self) -> Result<(), PipelineError> {
        match &self.halted {
            Some(reason) => Err(PipelineError::Halted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Any message from a known feed counts as a heartbeat.
    fn admit(&mut self, feed_id: &FeedId, now: i64) -> bool {
        match self.registry.record_heartbeat(feed_id, now) {
            Ok(()) => true,
            Err(FeedError::UnknownFeed(_)) | Err(FeedError::AlreadyRegistered(_)) => {
                warn!(symbol = %self.symbol, feed_id = %feed_id, "Dropping input from unknown feed");
                false
            }
        }
    }

    fn reject(&mut self, feed_id: &FeedId, kind: &'static str, reason: &ValidationFailure) {
        self.telemetry.record_invalid(feed_id);
        debug!(feed_id = %feed_id, kind, reason = %reason, "Invalid payload dropped");
    }

    fn accept(&mut self, feed_id: &FeedId, sent: i64, now: i64) {
        self.telemetry.record_valid(feed_id);
        self.telemetry.record_latency(feed_id, elapsed_millis(sent, now));
    }

    fn check_sequence(&mut self, feed_id: &FeedId, sequence: Option<u64>) {
        let Some(sequence) = sequence else {
            return;
        };
        match self.sequences.check(feed_id, sequence) {
            SequenceCheck::OutOfOrder { .. } => self.telemetry.record_out_of_order(feed_id),
            SequenceCheck::Gap { .. } => self.telemetry.record_gap(feed_id),
            SequenceCheck::First | SequenceCheck::InOrder => {}
        }
    }

    fn flow_change(&mut self, feed_id: &FeedId, timestamp: i64) -> Option<AnalyticsEvent> {
        let signal = self.scorer.signal(&self.flow);
        if !self.scorer.is_flow_change(signal.confidence) {
            return None;
        }
        let latest = self.flow.latest_flow();
        let net_flow: Decimal = self.flow.metrics().net_order_flow;
        Some(self.events.stamp(
            timestamp,
            AnalyticsPayload::FlowChange {
                buy_flow: latest.buy,
                sell_flow: latest.sell,
                net_flow,
                direction: signal.direction,
                momentum: signal.momentum,
                acceleration: signal.acceleration,
                confidence: signal.confidence,
                quality: self.telemetry.quality_score(feed_id),
            },
        ))
    }

    fn status_event(&mut self, change: FeedStatusChange, now: i64) -> AnalyticsEvent {
        self.events.stamp(
            now,
            AnalyticsPayload::FeedStatusChanged {
                feed_id: change.feed_id,
                status: change.status,
                reason: change.reason,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::feed::{ConnectionState, FeedRole};
    use types::market::{AggressorSide, BookLevel};

    const SECOND: i64 = 1_000_000_000;
    const MS: i64 = 1_000_000;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.feeds.feeds = vec![
            FeedConfig::new("a", "Feed A", FeedRole::Primary),
            FeedConfig::new("b", "Feed B", FeedRole::Secondary),
        ];
        config.feeds.backoff.jitter = 0.0;
        config
    }

    fn pipeline() -> SymbolPipeline {
        SymbolPipeline::new(Symbol::new("ES"), config(), SECOND).unwrap()
    }

    fn tick(timestamp: i64, price: i64, volume: i64) -> FeedMessage<Tick> {
        FeedMessage::new(Tick {
            symbol: Symbol::new("ES"),
            timestamp,
            price: d(price),
            volume: d(volume),
            bid: d(price - 1),
            ask: d(price + 1),
            change: Decimal::ZERO,
        })
    }

    fn book(timestamp: i64, bid_volume: i64) -> FeedMessage<OrderBookSnapshot> {
        FeedMessage::new(OrderBookSnapshot {
            symbol: Symbol::new("ES"),
            timestamp,
            bids: vec![BookLevel::new(d(100), d(bid_volume))],
            asks: vec![BookLevel::new(d(101), d(10))],
        })
    }

    fn print(timestamp: i64, volume: i64, aggressor: AggressorSide) -> TapeEntry {
        TapeEntry {
            symbol: Symbol::new("ES"),
            timestamp,
            price: d(100),
            volume: d(volume),
            aggressor,
            is_large: false,
            is_dominant: false,
        }
    }

    fn feed(id: &str) -> FeedId {
        FeedId::new(id)
    }

    #[test]
    fn test_tick_emits_market_data() {
        let mut p = pipeline();
        let events = p.on_tick(&feed("a"), tick(2 * SECOND, 100, 10), 2 * SECOND).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type_label(), "market-data-updated");
        assert_eq!(events[0].sequence, 1);
        assert_eq!(p.current_market_data().unwrap().price, d(100));
        assert_eq!(p.quality(&feed("a")).unwrap().valid_messages, 1);
    }

    #[test]
    fn test_change_derived_from_previous_tick() {
        let mut p = pipeline();
        p.on_tick(&feed("a"), tick(2 * SECOND, 100, 100), 2 * SECOND).unwrap();
        p.on_tick(&feed("a"), tick(3 * SECOND, 101, 100), 3 * SECOND).unwrap();

        let last = p.current_market_data().unwrap();
        assert_eq!(last.change, d(1));
        let m = p.flow_metrics();
        assert_eq!(m.total_buy_volume, d(120));
        assert_eq!(m.total_sell_volume, d(80));
    }

    #[test]
    fn test_invalid_tick_counted_not_raised() {
        let mut p = pipeline();
        let mut bad = tick(2 * SECOND, 100, 10);
        bad.payload.bid = d(105);
        let events = p.on_tick(&feed("a"), bad, 2 * SECOND).unwrap();
        assert!(events.is_empty());
        assert_eq!(p.quality(&feed("a")).unwrap().invalid_messages, 1);
        assert!(p.recent_ticks(10).is_empty());
    }

    #[test]
    fn test_wrong_symbol_is_invalid() {
        let mut p = pipeline();
        let mut other = tick(2 * SECOND, 100, 10);
        other.payload.symbol = Symbol::new("NQ");
        assert!(p.on_tick(&feed("a"), other, 2 * SECOND).unwrap().is_empty());
        assert_eq!(p.quality(&feed("a")).unwrap().invalid_messages, 1);
    }

    #[test]
    fn test_unknown_feed_dropped() {
        let mut p = pipeline();
        let events = p.on_tick(&feed("zz"), tick(2 * SECOND, 100, 10), 2 * SECOND).unwrap();
        assert!(events.is_empty());
        assert!(p.recent_ticks(10).is_empty());
    }

    #[test]
    fn test_duplicate_across_feeds() {
        let mut p = pipeline();
        p.on_tick(&feed("a"), tick(2 * SECOND, 100, 10), 2 * SECOND).unwrap();
        let events = p
            .on_tick(&feed("b"), tick(2 * SECOND + 40 * MS, 100, 10), 2 * SECOND)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(p.recent_ticks(10).len(), 1);
        assert_eq!(p.quality(&feed("b")).unwrap().duplicate_messages, 1);
    }

    #[test]
    fn test_out_of_order_still_processed() {
        let mut p = pipeline();
        p.on_tick(&feed("a"), tick(2 * SECOND, 100, 10).with_sequence(5), 2 * SECOND)
            .unwrap();
        let events = p
            .on_tick(&feed("a"), tick(3 * SECOND, 101, 10).with_sequence(4), 3 * SECOND)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(p.recent_ticks(10).len(), 2);
        assert_eq!(p.quality(&feed("a")).unwrap().out_of_order_messages, 1);
    }

    #[test]
    fn test_order_book_analysis() {
        let mut p = pipeline();
        let events = p.on_order_book(&feed("a"), book(2 * SECOND, 30), 2 * SECOND).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            AnalyticsPayload::OrderBookUpdated { imbalance, gaps, liquidity, .. } => {
                assert!((imbalance - 50.0).abs() < 1e-9);
                assert_eq!(gaps.len(), 1);
                assert_eq!(gaps[0].price, Decimal::new(1005, 1));
                assert_eq!(liquidity.resilience, 1.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(p.order_book().is_some());
        assert_eq!(p.liquidity_profile().levels.len(), 2);
    }

    #[test]
    fn test_duplicate_book_suppressed() {
        let mut p = pipeline();
        p.on_order_book(&feed("a"), book(2 * SECOND, 30), 2 * SECOND).unwrap();
        let events = p
            .on_order_book(&feed("b"), book(2 * SECOND + 10 * MS, 30), 2 * SECOND)
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(p.quality(&feed("b")).unwrap().duplicate_messages, 1);
    }

    #[test]
    fn test_tape_batch_partial_validity() {
        let mut p = pipeline();
        let mut bad = print(2 * SECOND, 5, AggressorSide::Buyer);
        bad.volume = Decimal::ZERO;
        let batch = vec![
            print(2 * SECOND, 5, AggressorSide::Buyer),
            bad,
            print(2 * SECOND, 3, AggressorSide::Seller),
        ];
        p.on_tape(&feed("a"), FeedMessage::new(batch), 2 * SECOND).unwrap();

        let q = p.quality(&feed("a")).unwrap();
        assert_eq!(q.valid_messages, 2);
        assert_eq!(q.invalid_messages, 1);
        assert_eq!(p.recent_tape(10).len(), 2);
        assert_eq!(p.flow_metrics().net_order_flow, d(2));
    }

    #[test]
    fn test_lifecycle_events_and_readiness() {
        let mut p = pipeline();
        assert!(!p.is_ready());

        let events = p.connect(&feed("a"), 2 * SECOND).unwrap();
        assert_eq!(events[0].event_type_label(), "feed-status-changed");
        assert!(p.is_ready());

        let events = p.disconnect(&feed("a"), "eof", 3 * SECOND).unwrap();
        assert_eq!(events.len(), 2);
        match &events[1].payload {
            AnalyticsPayload::ReconnectScheduled { attempt, delay_ms, .. } => {
                assert_eq!(*attempt, 1);
                assert_eq!(*delay_ms, 1_000);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert!(!p.is_ready());
    }

    #[test]
    fn test_connect_unknown_feed_errors() {
        let mut p = pipeline();
        let err = p.connect(&feed("zz"), SECOND).unwrap_err();
        assert_eq!(err, PipelineError::Feed(FeedError::UnknownFeed(feed("zz"))));
    }

    #[test]
    fn test_heartbeat_timeout_disconnects() {
        let mut p = pipeline();
        p.connect(&feed("a"), SECOND).unwrap();
        assert!(p.check_heartbeats(20 * SECOND).is_empty());

        let events = p.check_heartbeats(40 * SECOND);
        assert_eq!(events.len(), 2);
        let status = &p.feed_statuses()[0];
        assert_eq!(status.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_messages_refresh_heartbeat() {
        let mut p = pipeline();
        p.connect(&feed("a"), SECOND).unwrap();
        p.on_tick(&feed("a"), tick(25 * SECOND, 100, 1), 25 * SECOND).unwrap();
        assert!(p.check_heartbeats(40 * SECOND).is_empty());
    }

    #[test]
    fn test_quality_recompute_feeds_registry() {
        let mut p = pipeline();
        p.connect(&feed("a"), SECOND).unwrap();
        let mut bad = tick(2 * SECOND, 100, 1);
        bad.payload.price = Decimal::ZERO;
        for _ in 0..10 {
            p.on_tick(&feed("a"), bad.clone(), 2 * SECOND).unwrap();
        }
        p.recompute_quality(3 * SECOND);
        assert!(!p.is_ready());
        assert!(p.feed_statuses()[0].quality_score < 0.5);
    }

    #[test]
    fn test_emergency_shutdown_and_reinitialize() {
        let mut p = pipeline();
        p.on_tick(&feed("a"), tick(2 * SECOND, 100, 10), 2 * SECOND).unwrap();

        let event = p.emergency_shutdown("operator stop", 3 * SECOND);
        assert_eq!(event.event_type_label(), "emergency-shutdown");
        assert!(p.is_halted());

        let err = p.on_tick(&feed("a"), tick(4 * SECOND, 101, 10), 4 * SECOND).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Halted {
                reason: "operator stop".to_string()
            }
        );
        // Computed state stays queryable.
        assert_eq!(p.recent_ticks(10).len(), 1);

        p.reinitialize(5 * SECOND);
        assert!(!p.is_halted());
        assert!(p.recent_ticks(10).is_empty());
        assert_eq!(p.flow_metrics(), FlowMetrics::default());
        assert_eq!(p.quality(&feed("a")).unwrap().total_messages, 0);
        assert!(p.on_tick(&feed("a"), tick(6 * SECOND, 101, 10), 6 * SECOND).is_ok());
    }

    #[test]
    fn test_flow_change_above_threshold() {
        let mut p = pipeline();
        let batch: Vec<TapeEntry> = (0..10)
            .map(|i| print(2 * SECOND + i, 1_000, AggressorSide::Buyer))
            .collect();
        let events = p.on_tape(&feed("a"), FeedMessage::new(batch), 2 * SECOND).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            AnalyticsPayload::FlowChange { confidence, net_flow, .. } => {
                assert!((confidence - 1.0).abs() < 1e-12);
                assert_eq!(*net_flow, d(10_000));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut cfg = config();
        cfg.worker.command_capacity = 0;
        let err = SymbolPipeline::new(Symbol::new("ES"), cfg, SECOND).unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("worker.command_capacity")));

        let mut cfg = config();
        cfg.worker.event_capacity = 0;
        assert!(matches!(
            SymbolPipeline::new(Symbol::new("ES"), cfg, SECOND),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_huge_tick_volume_saturates() {
        let mut p = pipeline();
        let huge: Decimal = "50000000000000000000000000000".parse().unwrap();
        for (i, price) in [100, 101].into_iter().enumerate() {
            let ts = (2 + i as i64) * SECOND;
            let mut msg = tick(ts, price, 0);
            msg.payload.volume = huge;
            assert_eq!(p.on_tick(&feed("a"), msg, ts).unwrap().len(), 1);
        }
        assert_eq!(p.flow_metrics().total_volume(), Decimal::MAX);
        assert_eq!(p.volume_profile().len(), 2);
    }

    #[test]
    fn test_near_zero_depth_book_is_analyzed() {
        let mut p = pipeline();
        p.on_tape(
            &feed("a"),
            FeedMessage::new(vec![print(2 * SECOND, 1_000, AggressorSide::Buyer)]),
            2 * SECOND,
        )
        .unwrap();

        let thin = FeedMessage::new(OrderBookSnapshot {
            symbol: Symbol::new("ES"),
            timestamp: 3 * SECOND,
            bids: vec![BookLevel::new(d(100), Decimal::new(1, 28))],
            asks: vec![BookLevel::new(d(101), Decimal::ZERO)],
        });
        let events = p.on_order_book(&feed("a"), thin, 3 * SECOND).unwrap();
        match &events[0].payload {
            AnalyticsPayload::OrderBookUpdated { liquidity, .. } => {
                assert_eq!(liquidity.hidden_liquidity, 1.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_event_sequence_is_monotonic() {
        let mut p = pipeline();
        let mut sequences = Vec::new();
        for i in 0..5 {
            let events = p
                .on_tick(&feed("a"), tick((2 + i) * SECOND, 100 + i, 1), (2 + i) * SECOND)
                .unwrap();
            sequences.extend(events.iter().map(|e| e.sequence));
        }
        assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(p.last_event_sequence(), 5);
    }
}
