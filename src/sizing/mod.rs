use serde::{Deserialize, Serialize};

/// How a raw contract count is snapped to the instrument's lot step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Round up to the next multiple of the lot step.
    CeilToStep,
    /// Round to the nearest multiple of the lot step.
    NearestStep,
}

/// Position sizing inputs. `margin * leverage` is the notional to deploy;
/// one contract is worth `contract_face_value` units of the base asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    /// Margin committed per order, in quote currency (USDT).
    pub margin: f64,
    pub leverage: f64,
    pub contract_face_value: f64,
    /// Minimum tradable contract increment.
    pub lot_step: f64,
    pub rounding: RoundingPolicy,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            margin: 5.0,
            leverage: 20.0,
            contract_face_value: 1.0,
            lot_step: 10.0,
            rounding: RoundingPolicy::CeilToStep,
        }
    }
}

/// Outcome of sizing: either a tradable quantity or a recoverable
/// "too small" decision that aborts placement without being an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeDecision {
    Quantity(f64),
    TooSmall { raw: f64 },
}

impl SizeDecision {
    pub fn quantity(&self) -> Option<f64> {
        match self {
            SizeDecision::Quantity(q) => Some(*q),
            SizeDecision::TooSmall { .. } => None,
        }
    }
}

/// Convert margin, leverage and entry price into a lot-quantized contract
/// count.
pub fn size(config: &SizerConfig, entry_price: f64) -> SizeDecision {
    if entry_price <= 0.0 || config.contract_face_value <= 0.0 || config.lot_step <= 0.0 {
        return SizeDecision::TooSmall { raw: 0.0 };
    }

    let raw = config.margin * config.leverage / (entry_price * config.contract_face_value);

    // Below one whole contract nothing can fill.
    if raw < 1.0 {
        return SizeDecision::TooSmall { raw };
    }

    let steps = raw / config.lot_step;
    let quantity = match config.rounding {
        RoundingPolicy::CeilToStep => steps.ceil() * config.lot_step,
        RoundingPolicy::NearestStep => steps.round() * config.lot_step,
    };

    if quantity < config.lot_step {
        return SizeDecision::TooSmall { raw };
    }

    SizeDecision::Quantity(quantity)
}
