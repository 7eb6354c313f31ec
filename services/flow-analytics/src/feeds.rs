//! Feed registry and reconnection policy
//!
//! Tracks the configured feeds of a pipeline, their connection state,
//! heartbeats and reconnect attempts. Telemetry pushes quality scores back
//! in, which drives readiness and feed preference.
//!
//! A feed that keeps failing to reconnect is demoted: consumers rank it
//! below healthy feeds regardless of its nominal role. It is promoted back
//! once it is connected again with an acceptable quality score.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::errors::FeedError;
use types::feed::{ConnectionState, FeedConfig, FeedRole};
use types::ids::FeedId;
use types::time::millis_to_nanos;

use crate::metrics::QualityUpdate;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnection attempt.
    pub initial_ms: u64,
    /// Upper bound on any delay.
    pub max_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 64_000,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Configuration for the feed registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedRegistryConfig {
    /// Feeds registered at startup.
    pub feeds: Vec<FeedConfig>,
    /// Minimum quality score for a primary feed to count as ready.
    pub quality_threshold: f64,
    /// Reconnect attempts tolerated before a feed is demoted.
    pub max_reconnect_attempts: u32,
    /// A connected feed silent for this long is considered disconnected.
    pub heartbeat_timeout_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for FeedRegistryConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            quality_threshold: 0.5,
            max_reconnect_attempts: 5,
            heartbeat_timeout_ms: 30_000,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Supplies the delay before reconnection attempt `attempt` (1-based).
pub trait Backoff: Send + Sync + fmt::Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    fn base_millis(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.config.initial_ms as f64 * self.config.multiplier.powi(exponent);
        let max = self.config.max_ms as f64;
        if scaled.is_finite() {
            scaled.min(max)
        } else {
            max
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_millis(attempt);
        let millis = if self.config.jitter > 0.0 && base > 0.0 {
            let range = base * self.config.jitter;
            let jitter: f64 = rand::thread_rng().gen_range(-range..=range);
            (base + jitter).max(1.0)
        } else {
            base
        };
        Duration::from_millis(millis as u64)
    }
}

/// Live state of one registered feed.
#[derive(Debug, Clone)]
struct FeedState {
    config: FeedConfig,
    state: ConnectionState,
    last_heartbeat: Option<i64>,
    reconnect_attempts: u32,
    latency_ms: f64,
    quality_score: f64,
    demoted: bool,
}

impl FeedState {
    fn new(config: FeedConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            last_heartbeat: None,
            reconnect_attempts: 0,
            latency_ms: 0.0,
            quality_score: 1.0,
            demoted: false,
        }
    }

    fn status(&self) -> FeedStatus {
        FeedStatus {
            feed_id: self.config.id.clone(),
            name: self.config.name.clone(),
            role: self.config.role,
            state: self.state,
            last_heartbeat: self.last_heartbeat,
            reconnect_attempts: self.reconnect_attempts,
            latency_ms: self.latency_ms,
            quality_score: self.quality_score,
            demoted: self.demoted,
        }
    }
}

/// Public view of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStatus {
    pub feed_id: FeedId,
    pub name: String,
    pub role: FeedRole,
    pub state: ConnectionState,
    pub last_heartbeat: Option<i64>,
    pub reconnect_attempts: u32,
    pub latency_ms: f64,
    pub quality_score: f64,
    pub demoted: bool,
}

/// Emitted when a feed's connection state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStatusChange {
    pub feed_id: FeedId,
    pub status: ConnectionState,
    pub reason: Option<String>,
}

/// What the transport layer should do after a disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectDecision {
    pub feed_id: FeedId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub delay: Duration,
    /// Whether the feed is now ranked below healthy feeds.
    pub demoted: bool,
}

/// Registry of feeds for one pipeline.
///
/// Uses BTreeMap for deterministic iteration.
#[derive(Debug)]
pub struct FeedRegistry {
    feeds: BTreeMap<FeedId, FeedState>,
    quality_threshold: f64,
    max_reconnect_attempts: u32,
    heartbeat_timeout_nanos: i64,
    backoff: Arc<dyn Backoff>,
}

impl FeedRegistry {
    /// Create a registry with an externally supplied backoff policy.
    pub fn new(config: &FeedRegistryConfig, backoff: Arc<dyn Backoff>) -> Self {
        Self {
            feeds: BTreeMap::new(),
            quality_threshold: config.quality_threshold,
            max_reconnect_attempts: config.max_reconnect_attempts,
            heartbeat_timeout_nanos: millis_to_nanos(config.heartbeat_timeout_ms),
            backoff,
        }
    }

    /// Create a registry using exponential backoff from the config.
    pub fn with_exponential_backoff(config: &FeedRegistryConfig) -> Self {
        Self::new(
            config,
            Arc::new(ExponentialBackoff::new(config.backoff.clone())),
        )
    }

    pub fn register_feed(&mut self, config: FeedConfig) -> Result<(), FeedError> {
        if self.feeds.contains_key(&config.id) {
            return Err(FeedError::AlreadyRegistered(config.id));
        }
        info!(
            feed_id = %config.id,
            name = %config.name,
            role = config.role.label(),
            "Feed registered"
        );
        self.feeds.insert(config.id.clone(), FeedState::new(config));
        Ok(())
    }

    pub fn contains(&self, feed_id: &FeedId) -> bool {
        self.feeds.contains_key(feed_id)
    }

    fn feed_mut(&mut self, feed_id: &FeedId) -> Result<&mut FeedState, FeedError> {
        self.feeds
            .get_mut(feed_id)
            .ok_or_else(|| FeedError::UnknownFeed(feed_id.clone()))
    }

    /// Mark a reconnection attempt in flight.
    pub fn mark_connecting(
        &mut self,
        feed_id: &FeedId,
    ) -> Result<Option<FeedStatusChange>, FeedError> {
        let feed = self.feed_mut(feed_id)?;
        Ok(transition(feed, ConnectionState::Connecting, None))
    }

    pub fn mark_connected(
        &mut self,
        feed_id: &FeedId,
        now: i64,
    ) -> Result<Option<FeedStatusChange>, FeedError> {
        let feed = self.feed_mut(feed_id)?;
        feed.reconnect_attempts = 0;
        feed.last_heartbeat = Some(now);
        Ok(transition(feed, ConnectionState::Connected, None))
    }

    /// Record a disconnect and decide the next reconnection attempt.
    ///
    /// Every call counts as one failed attempt until the feed connects again.
    pub fn mark_disconnected(
        &mut self,
        feed_id: &FeedId,
        reason: &str,
    ) -> Result<(Option<FeedStatusChange>, ReconnectDecision), FeedError> {
        let max_attempts = self.max_reconnect_attempts;
        let backoff = Arc::clone(&self.backoff);
        let feed = self.feed_mut(feed_id)?;

        let change = transition(
            feed,
            ConnectionState::Disconnected,
            Some(reason.to_string()),
        );

        feed.reconnect_attempts = feed.reconnect_attempts.saturating_add(1);
        if feed.reconnect_attempts > max_attempts && !feed.demoted {
            feed.demoted = true;
            warn!(
                feed_id = %feed_id,
                attempts = feed.reconnect_attempts,
                max_attempts,
                "Feed demoted after repeated reconnect failures"
            );
        }

        let attempt = feed.reconnect_attempts;
        let decision = ReconnectDecision {
            feed_id: feed_id.clone(),
            attempt,
            delay: backoff.delay(attempt),
            demoted: feed.demoted,
        };

        warn!(
            feed_id = %feed_id,
            reason,
            attempt,
            delay_ms = decision.delay.as_millis() as u64,
            "Feed disconnected, reconnect scheduled"
        );

        Ok((change, decision))
    }

    pub fn record_heartbeat(&mut self, feed_id: &FeedId, now: i64) -> Result<(), FeedError> {
        let feed = self.feed_mut(feed_id)?;
        feed.last_heartbeat = Some(now);
        Ok(())
    }

    /// Connected feeds whose last heartbeat is older than the timeout.
    pub fn stale_feeds(&self, now: i64) -> Vec<FeedId> {
        self.feeds
            .values()
            .filter(|feed| feed.state == ConnectionState::Connected)
            .filter(|feed| {
                feed.last_heartbeat
                    .map_or(true, |hb| now - hb > self.heartbeat_timeout_nanos)
            })
            .map(|feed| feed.config.id.clone())
            .collect()
    }

    /// Push a recomputed quality score into the registry.
    ///
    /// Promotes a demoted feed that is connected and healthy again.
    pub fn apply_quality(&mut self, update: &QualityUpdate) {
        let threshold = self.quality_threshold;
        if let Some(feed) = self.feeds.get_mut(&update.feed_id) {
            feed.quality_score = update.quality_score;
            feed.latency_ms = update.average_latency_ms;

            if feed.demoted
                && feed.state == ConnectionState::Connected
                && feed.quality_score >= threshold
            {
                feed.demoted = false;
                info!(
                    feed_id = %update.feed_id,
                    quality = feed.quality_score,
                    "Feed promoted back to its nominal role"
                );
            }
        }
    }

    /// True if a primary feed is connected with quality at or above the
    /// threshold.
    pub fn is_ready(&self) -> bool {
        self.feeds.values().any(|feed| {
            feed.config.role == FeedRole::Primary
                && feed.state == ConnectionState::Connected
                && feed.quality_score >= self.quality_threshold
        })
    }

    /// Best connected feed: non-demoted first, then quality, then role.
    pub fn preferred_feed(&self) -> Option<FeedId> {
        self.ranked_statuses()
            .into_iter()
            .find(|status| status.state == ConnectionState::Connected)
            .map(|status| status.feed_id)
    }

    /// All feeds ordered by effective priority.
    pub fn ranked_statuses(&self) -> Vec<FeedStatus> {
        let mut statuses = self.statuses();
        statuses.sort_by(|a, b| {
            a.demoted
                .cmp(&b.demoted)
                .then_with(|| b.quality_score.total_cmp(&a.quality_score))
                .then_with(|| a.role.base_priority().cmp(&b.role.base_priority()))
                .then_with(|| a.feed_id.cmp(&b.feed_id))
        });
        statuses
    }

    /// All feeds ordered by id.
    pub fn statuses(&self) -> Vec<FeedStatus> {
        self.feeds.values().map(FeedState::status).collect()
    }

    pub fn status(&self, feed_id: &FeedId) -> Option<FeedStatus> {
        self.feeds.get(feed_id).map(FeedState::status)
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.feeds.keys().cloned().collect()
    }
}

/// Move a feed to `next`, returning a change notification if the state
/// actually changed.
fn transition(
    feed: &mut FeedState,
    next: ConnectionState,
    reason: Option<String>,
) -> Option<FeedStatusChange> {
    if feed.state == next {
        return None;
    }
    info!(
        feed_id = %feed.config.id,
        from = feed.state.label(),
        to = next.label(),
        "Feed state changed"
    );
    feed.state = next;
    Some(FeedStatusChange {
        feed_id: feed.config.id.clone(),
        status: next,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1_000_000_000;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        }
    }

    fn registry() -> FeedRegistry {
        let config = FeedRegistryConfig {
            max_reconnect_attempts: 2,
            backoff: no_jitter(),
            ..FeedRegistryConfig::default()
        };
        let mut registry = FeedRegistry::with_exponential_backoff(&config);
        registry
            .register_feed(FeedConfig::new("p", "Primary", FeedRole::Primary))
            .unwrap();
        registry
            .register_feed(FeedConfig::new("s", "Secondary", FeedRole::Secondary))
            .unwrap();
        registry
    }

    fn quality(feed: &str, score: f64) -> QualityUpdate {
        QualityUpdate {
            feed_id: FeedId::new(feed),
            quality_score: score,
            average_latency_ms: 5.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = ExponentialBackoff::new(no_jitter());
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(30), Duration::from_secs(64));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let backoff = ExponentialBackoff::new(BackoffConfig::default());
        for _ in 0..50 {
            let delay = backoff.delay(1).as_millis();
            assert!((900..=1100).contains(&delay));
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register_feed(FeedConfig::new("p", "Again", FeedRole::Backup))
            .unwrap_err();
        assert_eq!(err, FeedError::AlreadyRegistered(FeedId::new("p")));
    }

    #[test]
    fn test_unknown_feed() {
        let mut registry = registry();
        let err = registry.mark_connected(&FeedId::new("x"), 0).unwrap_err();
        assert!(matches!(err, FeedError::UnknownFeed(_)));
    }

    #[test]
    fn test_ready_requires_connected_primary() {
        let mut registry = registry();
        assert!(!registry.is_ready());

        registry.mark_connected(&FeedId::new("s"), 0).unwrap();
        assert!(!registry.is_ready());

        registry.mark_connected(&FeedId::new("p"), 0).unwrap();
        assert!(registry.is_ready());
    }

    #[test]
    fn test_ready_requires_quality() {
        let mut registry = registry();
        registry.mark_connected(&FeedId::new("p"), 0).unwrap();
        registry.apply_quality(&quality("p", 0.4));
        assert!(!registry.is_ready());
        registry.apply_quality(&quality("p", 0.5));
        assert!(registry.is_ready());
    }

    #[test]
    fn test_transitions_emit_changes_once() {
        let mut registry = registry();
        let feed = FeedId::new("p");

        let change = registry.mark_connected(&feed, 0).unwrap().unwrap();
        assert_eq!(change.status, ConnectionState::Connected);
        assert!(registry.mark_connected(&feed, 1).unwrap().is_none());

        let (change, _) = registry.mark_disconnected(&feed, "socket closed").unwrap();
        let change = change.unwrap();
        assert_eq!(change.status, ConnectionState::Disconnected);
        assert_eq!(change.reason.as_deref(), Some("socket closed"));
    }

    #[test]
    fn test_reconnect_attempts_and_demotion() {
        let mut registry = registry();
        let feed = FeedId::new("p");
        registry.mark_connected(&feed, 0).unwrap();

        let (_, d1) = registry.mark_disconnected(&feed, "eof").unwrap();
        assert_eq!(d1.attempt, 1);
        assert_eq!(d1.delay, Duration::from_secs(1));
        assert!(!d1.demoted);

        registry.mark_connecting(&feed).unwrap();
        let (_, d2) = registry.mark_disconnected(&feed, "refused").unwrap();
        assert_eq!(d2.attempt, 2);
        assert_eq!(d2.delay, Duration::from_secs(2));
        assert!(!d2.demoted);

        let (_, d3) = registry.mark_disconnected(&feed, "refused").unwrap();
        assert!(d3.demoted);
        assert!(registry.status(&feed).unwrap().demoted);
    }

    #[test]
    fn test_connect_resets_attempts_and_quality_promotes() {
        let mut registry = registry();
        let feed = FeedId::new("p");
        for _ in 0..3 {
            registry.mark_disconnected(&feed, "refused").unwrap();
        }
        assert!(registry.status(&feed).unwrap().demoted);

        registry.mark_connected(&feed, 10).unwrap();
        let status = registry.status(&feed).unwrap();
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.demoted);

        registry.apply_quality(&quality("p", 0.9));
        assert!(!registry.status(&feed).unwrap().demoted);
    }

    #[test]
    fn test_preferred_feed_ranks_demoted_last() {
        let mut registry = registry();
        let p = FeedId::new("p");
        let s = FeedId::new("s");
        for _ in 0..3 {
            registry.mark_disconnected(&p, "refused").unwrap();
        }
        registry.mark_connected(&p, 0).unwrap();
        registry.mark_connected(&s, 0).unwrap();
        registry.apply_quality(&quality("p", 0.3));

        assert_eq!(registry.preferred_feed(), Some(s.clone()));
        let ranked = registry.ranked_statuses();
        assert_eq!(ranked[0].feed_id, s);
    }

    #[test]
    fn test_preferred_feed_prefers_quality_over_role() {
        let mut registry = registry();
        registry.mark_connected(&FeedId::new("p"), 0).unwrap();
        registry.mark_connected(&FeedId::new("s"), 0).unwrap();
        registry.apply_quality(&quality("p", 0.6));
        registry.apply_quality(&quality("s", 0.9));
        assert_eq!(registry.preferred_feed(), Some(FeedId::new("s")));
    }

    #[test]
    fn test_stale_feeds() {
        let mut registry = registry();
        let p = FeedId::new("p");
        registry.mark_connected(&p, 0).unwrap();
        assert!(registry.stale_feeds(10 * SECOND).is_empty());

        registry.record_heartbeat(&p, 10 * SECOND).unwrap();
        assert!(registry.stale_feeds(39 * SECOND).is_empty());
        assert_eq!(registry.stale_feeds(41 * SECOND), vec![p]);
    }
}
