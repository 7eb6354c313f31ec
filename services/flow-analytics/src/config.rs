//! Pipeline configuration
//!
//! One serde tree aggregating every component's section. Each section is
//! `#[serde(default)]`, so a partial JSON file overrides only what it names.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::errors::PipelineError;

use crate::feeds::FeedRegistryConfig;
use crate::ingestion::SequencingConfig;
use crate::liquidity::LiquidityConfig;
use crate::metrics::TelemetryConfig;
use crate::order_flow::FlowConfig;
use crate::scoring::ScoringConfig;
use crate::store::StoreConfig;
use crate::volume_profile::ProfileConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

/// Async worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded inbound command queue per symbol.
    pub command_capacity: usize,
    /// Broadcast buffer for outbound events.
    pub event_capacity: usize,
    pub heartbeat_check_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command_capacity: 4_096,
            event_capacity: 1_024,
            heartbeat_check_interval_ms: 1_000,
        }
    }
}

/// Complete configuration of one symbol pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feeds: FeedRegistryConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub sequencing: SequencingConfig,
    pub flow: FlowConfig,
    pub profile: ProfileConfig,
    pub liquidity: LiquidityConfig,
    pub scoring: ScoringConfig,
    pub worker: WorkerConfig,
}

impl PipelineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("store.tick_capacity", self.store.tick_capacity)?;
        positive("store.book_capacity", self.store.book_capacity)?;
        positive("store.tape_capacity", self.store.tape_capacity)?;
        positive("flow.flow_window", self.flow.flow_window)?;
        positive("flow.aggression_window", self.flow.aggression_window)?;
        positive("profile.max_buckets", self.profile.max_buckets)?;
        positive("liquidity.imbalance_depth", self.liquidity.imbalance_depth)?;
        positive("worker.command_capacity", self.worker.command_capacity)?;
        positive("worker.event_capacity", self.worker.event_capacity)?;
        positive("telemetry.latency_samples", self.telemetry.latency_samples)?;

        positive_interval("telemetry.recompute_interval_ms", self.telemetry.recompute_interval_ms)?;
        positive_interval("store.sweep_interval_ms", self.store.sweep_interval_ms)?;
        positive_interval("profile.cleanup_interval_ms", self.profile.cleanup_interval_ms)?;
        positive_interval(
            "worker.heartbeat_check_interval_ms",
            self.worker.heartbeat_check_interval_ms,
        )?;

        if self.profile.tick_size <= Decimal::ZERO {
            return Err(invalid("profile.tick_size", "must be greater than zero"));
        }
        if self.liquidity.gap_tick_multiple <= Decimal::ZERO {
            return Err(invalid("liquidity.gap_tick_multiple", "must be greater than zero"));
        }
        if self.telemetry.max_latency_ms <= 0.0 {
            return Err(invalid("telemetry.max_latency_ms", "must be greater than zero"));
        }
        unit_range("feeds.quality_threshold", self.feeds.quality_threshold)?;
        unit_range("scoring.flow_change_threshold", self.scoring.flow_change_threshold)?;
        unit_range("liquidity.absorption_share", self.liquidity.absorption_share)?;
        unit_range("profile.min_significance", self.profile.min_significance)?;

        let backoff = &self.feeds.backoff;
        if backoff.multiplier < 1.0 {
            return Err(invalid("feeds.backoff.multiplier", "must be at least 1.0"));
        }
        if backoff.initial_ms > backoff.max_ms {
            return Err(invalid("feeds.backoff.initial_ms", "must not exceed max_ms"));
        }
        if !(0.0..1.0).contains(&backoff.jitter) {
            return Err(invalid("feeds.backoff.jitter", "must be in [0, 1)"));
        }

        let mut ids: Vec<_> = self.feeds.feeds.iter().map(|f| &f.id).collect();
        ids.sort();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("feeds.feeds", "duplicate feed id"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn positive_interval(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(field, "interval must be greater than zero"));
    }
    Ok(())
}

fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, "must be in [0, 1]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::feed::{FeedConfig, FeedRole};

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.tick_capacity, 1_000);
        assert_eq!(config.store.book_capacity, 100);
        assert_eq!(config.profile.tick_size, Decimal::new(25, 2));
        assert_eq!(config.sequencing.duplicate_window_ms, 100);
        assert_eq!(config.telemetry.recompute_interval_ms, 5_000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let raw = r#"{
            "store": { "tick_capacity": 50 },
            "feeds": {
                "quality_threshold": 0.8,
                "feeds": [ { "id": "a", "name": "Feed A", "role": "primary" } ]
            }
        }"#;
        let config = PipelineConfig::from_json_str(raw).unwrap();
        assert_eq!(config.store.tick_capacity, 50);
        assert_eq!(config.store.tape_capacity, 1_000);
        assert_eq!(config.feeds.quality_threshold, 0.8);
        assert_eq!(config.feeds.max_reconnect_attempts, 5);
        assert_eq!(config.feeds.feeds[0].role, FeedRole::Primary);
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(
            PipelineConfig::from_json_str("{}").unwrap(),
            PipelineConfig::default()
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = PipelineConfig::from_json_str(r#"{"profile":{"tick_size":"0"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "profile.tick_size", .. }));

        let err = PipelineConfig::from_json_str(r#"{"store":{"tick_capacity":0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "store.tick_capacity", .. }));

        let err = PipelineConfig::from_json_str(r#"{"feeds":{"quality_threshold":1.5}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "feeds.quality_threshold", .. }));
    }

    #[test]
    fn test_rejects_duplicate_feeds() {
        let mut config = PipelineConfig::default();
        config.feeds.feeds = vec![
            FeedConfig::new("a", "A", FeedRole::Primary),
            FeedConfig::new("a", "A again", FeedRole::Backup),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_error_into_pipeline_error() {
        let err: PipelineError = invalid("worker.event_capacity", "must be greater than zero").into();
        assert_eq!(
            err,
            PipelineError::Config(
                "invalid config value for worker.event_capacity: must be greater than zero"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            PipelineConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/nonexistent/flow-analytics.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
