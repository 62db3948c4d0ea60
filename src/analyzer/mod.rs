// Pattern analysis module
pub mod amplitude;
pub mod trend;

pub use amplitude::{AmplitudeConfig, AmplitudeRule, RangeReversalConfig, RangeReversalRule};
pub use trend::{TrendConfig, TrendRule};

use crate::models::{Candle, Evaluation};
use serde::{Deserialize, Serialize};

/// Which bar of the window a single-bar rule analyzes.
///
/// Strategies legitimately differ here: some trade off the in-progress bar
/// (index 0 of a newest-first feed), some off the last closed bar
/// (index 1), some off the first bar the exchange has confirmed. All three
/// are named policies rather than a single hard-coded convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    Latest,
    Previous,
    FirstConfirmed,
}

impl AnchorPolicy {
    pub fn min_candles(&self) -> usize {
        match self {
            AnchorPolicy::Latest | AnchorPolicy::FirstConfirmed => 1,
            AnchorPolicy::Previous => 2,
        }
    }
}

/// An ordered candle window, normalized to newest-first on construction and
/// owned by a single analysis pass.
#[derive(Debug, Clone)]
pub struct Window {
    candles: Vec<Candle>,
}

impl Window {
    /// Wrap candles already ordered newest-first (the exchange wire order).
    pub fn from_newest_first(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    /// Wrap candles ordered oldest-first, reversing into the pinned
    /// newest-first convention.
    pub fn from_oldest_first(mut candles: Vec<Candle>) -> Self {
        candles.reverse();
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Candles, newest-first.
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Closes ordered oldest to newest, the order indicator math expects.
    pub fn closes_oldest_first(&self) -> Vec<f64> {
        self.candles.iter().rev().map(|c| c.close).collect()
    }

    /// Resolve the anchor bar for a single-bar rule. Returns the index into
    /// the newest-first window, or None when the window cannot satisfy the
    /// policy.
    pub fn anchor(&self, policy: AnchorPolicy) -> Option<usize> {
        match policy {
            AnchorPolicy::Latest => (!self.candles.is_empty()).then_some(0),
            AnchorPolicy::Previous => (self.candles.len() >= 2).then_some(1),
            AnchorPolicy::FirstConfirmed => self.candles.iter().position(|c| c.is_confirmed),
        }
    }
}

/// Base trait for all pattern rules.
///
/// Evaluation is a pure function of the window: no hidden state, no I/O,
/// and identical windows always produce identical results. Short or broken
/// windows yield a no-signal evaluation rather than an error.
pub trait PatternRule: Send + Sync {
    /// Evaluate the window and produce a signal (or none).
    fn evaluate(&self, window: &Window) -> Evaluation;

    /// Rule name for logs and audit records.
    fn name(&self) -> &str;

    /// Minimum candles required for this rule to produce a signal.
    fn min_candles(&self) -> usize;
}
