use serde::{Deserialize, Serialize};

use crate::analyzer::{AnchorPolicy, PatternRule, Window};
use crate::models::{AmplitudeMetrics, Evaluation, Signal};

/// Whether a moderate-amplitude bar is traded with or against its color.
///
/// Per-strategy tuning, so both directions are first-class policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    /// Green bar opens long, red bar opens short.
    Continuation,
    /// Green bar opens short, red bar opens long.
    Reversal,
}

/// Single-bar amplitude rule with a moderate band and an extreme threshold.
///
/// All thresholds are fractions (0.015 = 1.5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmplitudeConfig {
    /// Lower edge of the moderate body band.
    pub band_min: f64,
    /// Upper edge of the moderate body band.
    pub band_max: f64,
    /// High-low range beyond which the move counts as extreme.
    pub extreme_threshold: f64,
    /// Direction taken on a band hit. Extreme moves are always contrarian.
    pub band_direction: DirectionPolicy,
    pub anchor: AnchorPolicy,
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            band_min: 0.010,                           // 1.0% body
            band_max: 0.015,                           // 1.5% body
            extreme_threshold: 0.02,                   // 2.0% range
            band_direction: DirectionPolicy::Continuation,
            anchor: AnchorPolicy::Previous,
        }
    }
}

pub struct AmplitudeRule {
    config: AmplitudeConfig,
}

impl AmplitudeRule {
    pub fn new(config: AmplitudeConfig) -> Self {
        Self { config }
    }
}

impl Default for AmplitudeRule {
    fn default() -> Self {
        Self::new(AmplitudeConfig::default())
    }
}

impl PatternRule for AmplitudeRule {
    fn evaluate(&self, window: &Window) -> Evaluation {
        let Some(idx) = window.anchor(self.config.anchor) else {
            return Evaluation::none();
        };
        let candle = &window.candles()[idx];
        let metrics = AmplitudeMetrics::from(candle);

        let in_band = metrics.body_pct > 0.0
            && metrics.body_pct >= self.config.band_min
            && metrics.body_pct <= self.config.band_max;
        let extreme = metrics.total_range_pct > self.config.extreme_threshold;

        let mut evaluation = Evaluation {
            signal: Signal::None,
            entry_price: None,
            reference_price: Some(candle.close),
            condition: None,
            metrics: Some(metrics),
        };

        // Degenerate prices collapse to zero amplitude and never fire.
        if candle.open <= 0.0 || candle.low <= 0.0 {
            return evaluation;
        }
        // A doji has no color to trade with or against.
        if !metrics.is_green && !metrics.is_red {
            return evaluation;
        }

        // The band takes precedence when the configured ranges overlap.
        if in_band {
            evaluation.signal = match (self.config.band_direction, metrics.is_green) {
                (DirectionPolicy::Continuation, true) => Signal::Long,
                (DirectionPolicy::Continuation, false) => Signal::Short,
                (DirectionPolicy::Reversal, true) => Signal::Short,
                (DirectionPolicy::Reversal, false) => Signal::Long,
            };
            evaluation.entry_price = Some(candle.mid_price());
            evaluation.condition = Some(format!(
                "body {:.2}% within band {:.2}%-{:.2}%",
                metrics.body_pct * 100.0,
                self.config.band_min * 100.0,
                self.config.band_max * 100.0
            ));
        } else if extreme {
            // Extreme moves fade the bar.
            evaluation.signal = if metrics.is_green {
                Signal::Short
            } else {
                Signal::Long
            };
            evaluation.entry_price = Some(candle.close);
            evaluation.condition = Some(format!(
                "range {:.2}% beyond extreme {:.2}%",
                metrics.total_range_pct * 100.0,
                self.config.extreme_threshold * 100.0
            ));
        }

        evaluation
    }

    fn name(&self) -> &str {
        "amplitude-band"
    }

    fn min_candles(&self) -> usize {
        self.config.anchor.min_candles()
    }
}

/// Single-bar full-range reversal: when the bar's high-low range exceeds the
/// threshold, fade it at the midpoint between close and the adverse extreme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeReversalConfig {
    /// Minimum high-low range (fraction of the low) to fade.
    pub threshold: f64,
    pub anchor: AnchorPolicy,
}

impl Default for RangeReversalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.042, // 4.2% range
            anchor: AnchorPolicy::Previous,
        }
    }
}

pub struct RangeReversalRule {
    config: RangeReversalConfig,
}

impl RangeReversalRule {
    pub fn new(config: RangeReversalConfig) -> Self {
        Self { config }
    }
}

impl Default for RangeReversalRule {
    fn default() -> Self {
        Self::new(RangeReversalConfig::default())
    }
}

impl PatternRule for RangeReversalRule {
    fn evaluate(&self, window: &Window) -> Evaluation {
        let Some(idx) = window.anchor(self.config.anchor) else {
            return Evaluation::none();
        };
        let candle = &window.candles()[idx];
        let metrics = AmplitudeMetrics::from(candle);

        let mut evaluation = Evaluation {
            signal: Signal::None,
            entry_price: None,
            reference_price: Some(candle.close),
            condition: None,
            metrics: Some(metrics),
        };

        if metrics.total_range_pct < self.config.threshold || metrics.total_range_pct <= 0.0 {
            return evaluation;
        }

        if metrics.is_green {
            evaluation.signal = Signal::Short;
            evaluation.entry_price = Some((candle.close + candle.high) / 2.0);
        } else if metrics.is_red {
            evaluation.signal = Signal::Long;
            evaluation.entry_price = Some((candle.close + candle.low) / 2.0);
        } else {
            return evaluation;
        }

        evaluation.condition = Some(format!(
            "range {:.2}% >= threshold {:.2}%",
            metrics.total_range_pct * 100.0,
            self.config.threshold * 100.0
        ));
        evaluation
    }

    fn name(&self) -> &str {
        "range-reversal"
    }

    fn min_candles(&self) -> usize {
        self.config.anchor.min_candles()
    }
}
