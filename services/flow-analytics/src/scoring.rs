//! Flow confidence and momentum scoring
//!
//! Aggregates the classifier's cumulative metrics and rolling series into
//! the signals consumed downstream: momentum, acceleration, dominant
//! direction and a confidence score in `[0, 1]`.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::order_flow::{FlowMetrics, OrderFlowClassifier};

/// Weight of flow dominance in the confidence score.
const DOMINANCE_WEIGHT: f64 = 0.7;
/// Weight of volume sufficiency in the confidence score.
const SUFFICIENCY_WEIGHT: f64 = 0.3;

/// Configuration for the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Buy-flow samples per half of the momentum comparison.
    pub momentum_window: usize,
    /// Aggression samples per half of the acceleration comparison.
    pub acceleration_window: usize,
    /// Net flow beyond this share of total volume sets the direction.
    pub dominance_ratio: f64,
    /// Total volume at which the sufficiency term saturates.
    pub volume_sufficiency: f64,
    /// Confidence above which a flow-change event is emitted.
    pub flow_change_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            momentum_window: 10,
            acceleration_window: 5,
            dominance_ratio: 0.1,
            volume_sufficiency: 10_000.0,
            flow_change_threshold: 0.7,
        }
    }
}

/// Dominant side of cumulative flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    Bullish,
    Bearish,
    Neutral,
}

/// Scored view of the current flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSignal {
    pub direction: FlowDirection,
    pub momentum: f64,
    pub acceleration: f64,
    pub confidence: f64,
}

/// Relative change of the mean of the last `window` samples versus the
/// `window` before them. 0 with fewer than `2 × window` samples or when
/// the older mean is 0.
pub fn window_change(series: &[f64], window: usize) -> f64 {
    if window == 0 || series.len() < window * 2 {
        return 0.0;
    }
    let end = series.len();
    let recent = mean(&series[end - window..]);
    let older = mean(&series[end - 2 * window..end - window]);
    if older == 0.0 {
        return 0.0;
    }
    (recent - older) / older
}

fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Bullish if net flow exceeds `ratio × total volume`, bearish below the
/// negative bound, neutral otherwise.
pub fn dominant_flow(metrics: &FlowMetrics, ratio: f64) -> FlowDirection {
    let net = metrics.net_order_flow.to_f64().unwrap_or(0.0);
    let bound = ratio * metrics.total_volume().to_f64().unwrap_or(0.0);
    if net > bound {
        FlowDirection::Bullish
    } else if net < -bound {
        FlowDirection::Bearish
    } else {
        FlowDirection::Neutral
    }
}

/// `0.7 · |net|/total + 0.3 · min(1, total/sufficiency)`, 0 without volume.
pub fn flow_confidence(metrics: &FlowMetrics, volume_sufficiency: f64) -> f64 {
    let total = metrics.total_volume();
    if total <= Decimal::ZERO {
        return 0.0;
    }
    let total_f = total.to_f64().unwrap_or(0.0);
    let dominance = metrics
        .net_order_flow
        .abs()
        .checked_div(total)
        .and_then(|ratio| ratio.to_f64())
        .unwrap_or(1.0);
    let sufficiency = if volume_sufficiency > 0.0 {
        (total_f / volume_sufficiency).min(1.0)
    } else {
        1.0
    };
    (DOMINANCE_WEIGHT * dominance + SUFFICIENCY_WEIGHT * sufficiency).clamp(0.0, 1.0)
}

/// Stateless scorer over a classifier.
#[derive(Debug, Clone)]
pub struct FlowScorer {
    config: ScoringConfig,
}

impl FlowScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn momentum(&self, flow: &OrderFlowClassifier) -> f64 {
        window_change(&flow.buy_flow_series(), self.config.momentum_window)
    }

    pub fn acceleration(&self, flow: &OrderFlowClassifier) -> f64 {
        window_change(&flow.aggression_series(), self.config.acceleration_window)
    }

    pub fn dominant_flow(&self, flow: &OrderFlowClassifier) -> FlowDirection {
        dominant_flow(flow.metrics(), self.config.dominance_ratio)
    }

    pub fn flow_confidence(&self, flow: &OrderFlowClassifier) -> f64 {
        flow_confidence(flow.metrics(), self.config.volume_sufficiency)
    }

    pub fn signal(&self, flow: &OrderFlowClassifier) -> FlowSignal {
        FlowSignal {
            direction: self.dominant_flow(flow),
            momentum: self.momentum(flow),
            acceleration: self.acceleration(flow),
            confidence: self.flow_confidence(flow),
        }
    }

    /// Whether a confidence level warrants a flow-change event.
    pub fn is_flow_change(&self, confidence: f64) -> bool {
        confidence > self.config.flow_change_threshold
    }
}
