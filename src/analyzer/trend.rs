use serde::{Deserialize, Serialize};

use crate::analyzer::{PatternRule, Window};
use crate::indicators::calculate_ema;
use crate::models::{AmplitudeMetrics, Evaluation, Signal};

/// Multi-bar trend-confirmation rule over a 7-bar window (newest-first):
/// the last closed bar K2 must show a moderate body, the four bars before
/// it (K3..K6) must be quiet, and the direction follows K2's color.
///
/// An optional EMA filter additionally requires the short/mid/long EMAs to
/// be strictly stacked in the trade direction; a disagreeing candle signal
/// is suppressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Minimum K2 body amplitude (exclusive).
    pub min_body: f64,
    /// Maximum K2 body amplitude (exclusive).
    pub max_body: f64,
    /// Cap on the summed K3..K6 body amplitudes (exclusive).
    pub max_total_body: f64,
    /// Enable the EMA trend filter.
    pub ema_filter: bool,
    pub ema_short: usize,
    pub ema_mid: usize,
    pub ema_long: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            min_body: 0.010,       // 1% body
            max_body: 0.040,       // 4% body
            max_total_body: 0.020, // 2% summed continuation noise
            ema_filter: false,
            ema_short: 13,
            ema_mid: 34,
            ema_long: 89,
        }
    }
}

pub struct TrendRule {
    config: TrendConfig,
}

const WINDOW_LEN: usize = 7;

impl TrendRule {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    /// EMA stack check over the full window, oldest to newest. Returns
    /// (bullish, bearish); both false when data is insufficient or the
    /// stack is mixed.
    fn ema_trend(&self, window: &Window) -> (bool, bool) {
        let closes = window.closes_oldest_first();
        let short = calculate_ema(&closes, self.config.ema_short);
        let mid = calculate_ema(&closes, self.config.ema_mid);
        let long = calculate_ema(&closes, self.config.ema_long);

        match (short, mid, long) {
            (Some(s), Some(m), Some(l)) => {
                tracing::debug!(
                    ema_short = s,
                    ema_mid = m,
                    ema_long = l,
                    "EMA stack computed"
                );
                (s > m && m > l, s < m && m < l)
            }
            _ => {
                tracing::debug!(
                    candles = window.len(),
                    needed = self.config.ema_long,
                    "not enough candles for the EMA stack"
                );
                (false, false)
            }
        }
    }
}

impl Default for TrendRule {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

impl PatternRule for TrendRule {
    fn evaluate(&self, window: &Window) -> Evaluation {
        if window.len() < WINDOW_LEN {
            return Evaluation::none();
        }

        let candles = window.candles();
        let k2 = &candles[1];
        let metrics = AmplitudeMetrics::from(k2);
        let body2 = metrics.body_pct;

        // Summed single-bar bodies across the continuation run K3..K6.
        let total_body: f64 = candles[2..6].iter().map(|c| c.body_pct()).sum();

        let mut evaluation = Evaluation {
            signal: Signal::None,
            entry_price: None,
            reference_price: Some(k2.close),
            condition: None,
            metrics: Some(metrics),
        };

        let can_entry = body2 > self.config.min_body
            && body2 < self.config.max_body
            && total_body < self.config.max_total_body;
        if !can_entry {
            return evaluation;
        }

        let signal = if metrics.is_green {
            Signal::Long
        } else if metrics.is_red {
            Signal::Short
        } else {
            return evaluation;
        };

        if self.config.ema_filter {
            let (bullish, bearish) = self.ema_trend(window);
            let agrees = match signal {
                Signal::Long => bullish,
                Signal::Short => bearish,
                Signal::None => false,
            };
            if !agrees {
                tracing::debug!(?signal, "EMA filter disagrees, suppressing candle signal");
                return evaluation;
            }
        }

        evaluation.signal = signal;
        evaluation.entry_price = Some(k2.close);
        evaluation.condition = Some(format!(
            "k2 body {:.2}% in ({:.2}%, {:.2}%), run {:.2}% < {:.2}%",
            body2 * 100.0,
            self.config.min_body * 100.0,
            self.config.max_body * 100.0,
            total_body * 100.0,
            self.config.max_total_body * 100.0
        ));
        evaluation
    }

    fn name(&self) -> &str {
        "trend-confirmation"
    }

    fn min_candles(&self) -> usize {
        if self.config.ema_filter {
            WINDOW_LEN.max(self.config.ema_long)
        } else {
            WINDOW_LEN
        }
    }
}
