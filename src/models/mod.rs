use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One OHLCV observation for a fixed bar interval.
///
/// Immutable once fetched. `open_time` is the bar's opening timestamp in
/// milliseconds since the epoch, matching the exchange wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Whether the exchange has marked this bar as closed.
    pub is_confirmed: bool,
}

impl Candle {
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }

    /// Body movement as a fraction of the open price.
    ///
    /// A non-positive open would divide by zero; it is treated as zero
    /// amplitude so the caller suppresses the signal instead of panicking.
    pub fn body_pct(&self) -> f64 {
        if self.open <= 0.0 {
            return 0.0;
        }
        (self.close - self.open).abs() / self.open
    }

    /// High-to-low range as a fraction of the low price.
    pub fn range_pct(&self) -> f64 {
        if self.low <= 0.0 {
            return 0.0;
        }
        (self.high - self.low) / self.low
    }

    /// Midpoint of the bar's full range.
    pub fn mid_price(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Per-bar amplitude diagnostics, derived once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeMetrics {
    pub body_pct: f64,
    pub total_range_pct: f64,
    pub is_green: bool,
    pub is_red: bool,
}

impl From<&Candle> for AmplitudeMetrics {
    fn from(candle: &Candle) -> Self {
        Self {
            body_pct: candle.body_pct(),
            total_range_pct: candle.range_pct(),
            is_green: candle.is_green(),
            is_red: candle.is_red(),
        }
    }
}

/// Trading signal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    None,
}

impl Signal {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Signal::Long => Some(Direction::Long),
            Signal::Short => Some(Direction::Short),
            Signal::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    pub fn position_side(&self) -> PositionSide {
        match self {
            Direction::Long => PositionSide::Long,
            Direction::Short => PositionSide::Short,
        }
    }
}

/// Result of one analysis pass over a candle window.
///
/// Produced once per cycle and shared read-only by every account, so all
/// accounts act on the identical signal and entry price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub signal: Signal,
    /// Limit entry price when a signal fired.
    pub entry_price: Option<f64>,
    /// Close of the analyzed bar; used as the cycle's reference price even
    /// when no signal fired.
    pub reference_price: Option<f64>,
    /// Which rule condition fired, for logs and notifications.
    pub condition: Option<String>,
    pub metrics: Option<AmplitudeMetrics>,
}

impl Evaluation {
    /// A no-signal result for windows too short (or too broken) to analyze.
    pub fn none() -> Self {
        Self {
            signal: Signal::None,
            entry_price: None,
            reference_price: None,
            condition: None,
            metrics: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    /// Net mode orders carry no explicit position side.
    Net,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Net => "net",
        }
    }
}

/// A live order as reported by the exchange.
///
/// The coordinator only distinguishes "live" from "gone"; fills and
/// expirations both just disappear from this view.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub limit_price: f64,
    pub order_type: String,
    pub take_profit_trigger: Option<f64>,
}

impl PendingOrder {
    /// Whether this is an entry order the lifecycle manages (a plain limit
    /// order opening a position, not an attached close order).
    pub fn is_entry(&self) -> bool {
        self.order_type == "limit"
    }

    /// Whether `price` has already crossed the attached take-profit trigger:
    /// a long entry is stale once price >= trigger, a short once price <= it.
    pub fn take_profit_crossed(&self, price: f64) -> bool {
        let Some(trigger) = self.take_profit_trigger else {
            return false;
        };
        match self.side {
            OrderSide::Buy => price >= trigger,
            OrderSide::Sell => price <= trigger,
        }
    }
}

/// Acknowledgement for a successfully accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
}

/// A fully specified entry order with its attached bracket, validated at
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderIntent {
    pub instrument: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub limit_price: f64,
    pub size: f64,
    pub take_profit_trigger: f64,
    pub stop_loss_trigger: f64,
    pub client_order_id: String,
}

impl OrderIntent {
    /// Build and validate an intent. The bracket must sit on the correct
    /// side of the limit price for the order's direction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: &str,
        direction: Direction,
        limit_price: f64,
        size: f64,
        take_profit_trigger: f64,
        stop_loss_trigger: f64,
        client_order_id: String,
    ) -> crate::Result<Self> {
        if instrument.is_empty() {
            return Err("order intent requires an instrument".into());
        }
        if limit_price <= 0.0 || size <= 0.0 {
            return Err(format!(
                "order intent requires positive price and size, got px={} sz={}",
                limit_price, size
            )
            .into());
        }
        let bracket_ok = match direction {
            Direction::Long => take_profit_trigger > limit_price && stop_loss_trigger < limit_price,
            Direction::Short => {
                take_profit_trigger < limit_price && stop_loss_trigger > limit_price
            }
        };
        if !bracket_ok {
            return Err(format!(
                "bracket on wrong side of entry: px={} tp={} sl={} ({:?})",
                limit_price, take_profit_trigger, stop_loss_trigger, direction
            )
            .into());
        }
        Ok(Self {
            instrument: instrument.to_string(),
            side: direction.side(),
            position_side: direction.position_side(),
            limit_price,
            size,
            take_profit_trigger,
            stop_loss_trigger,
            client_order_id,
        })
    }

    /// Generate a fresh client order id: `{prefix}{timestamp}{6 random
    /// alphanumerics}`, truncated to the exchange's 32-character limit.
    /// Every submission attempt gets its own id.
    pub fn generate_client_id(prefix: &str) -> String {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut rng = rand::thread_rng();
        let random_str: String = (0..6)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        let mut id = format!("{}{}{}", prefix, timestamp, random_str);
        id.truncate(32);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 1_700_000_000_000,
            open,
            high,
            low,
            close,
            volume: 1000.0,
            is_confirmed: true,
        }
    }

    #[test]
    fn test_body_pct_zero_open_does_not_panic() {
        let c = candle(0.0, 1.0, 0.5, 0.8);
        assert_eq!(c.body_pct(), 0.0);
    }

    #[test]
    fn test_range_pct_zero_low_does_not_panic() {
        let c = candle(1.0, 2.0, 0.0, 1.5);
        assert_eq!(c.range_pct(), 0.0);
    }

    #[test]
    fn test_amplitude_metrics_green_bar() {
        let c = candle(100.0, 101.5, 99.8, 101.2);
        let m = AmplitudeMetrics::from(&c);
        assert!(m.is_green);
        assert!(!m.is_red);
        assert!((m.body_pct - 0.012).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit_crossed_directional() {
        let long = PendingOrder {
            order_id: "1".to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            limit_price: 100.0,
            order_type: "limit".to_string(),
            take_profit_trigger: Some(105.0),
        };
        assert!(long.take_profit_crossed(105.0));
        assert!(long.take_profit_crossed(106.0));
        assert!(!long.take_profit_crossed(104.0));

        let short = PendingOrder {
            side: OrderSide::Sell,
            position_side: PositionSide::Short,
            take_profit_trigger: Some(95.0),
            ..long
        };
        assert!(short.take_profit_crossed(95.0));
        assert!(short.take_profit_crossed(94.0));
        assert!(!short.take_profit_crossed(96.0));
    }

    #[test]
    fn test_take_profit_crossed_without_trigger() {
        let order = PendingOrder {
            order_id: "1".to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            limit_price: 100.0,
            order_type: "limit".to_string(),
            take_profit_trigger: None,
        };
        assert!(!order.take_profit_crossed(1_000_000.0));
    }

    #[test]
    fn test_order_intent_rejects_inverted_bracket() {
        // Long bracket with take-profit below entry
        let result = OrderIntent::new(
            "VINE-USDT-SWAP",
            Direction::Long,
            1.0,
            10.0,
            0.9,
            1.1,
            "test1".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_order_intent_valid_short() {
        let intent = OrderIntent::new(
            "VINE-USDT-SWAP",
            Direction::Short,
            1.0,
            10.0,
            0.95,
            1.02,
            "test2".to_string(),
        )
        .unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.position_side, PositionSide::Short);
    }

    #[test]
    fn test_client_id_respects_length_limit() {
        let id = OrderIntent::generate_client_id("VERYLONGPREFIXINDEED");
        assert!(id.len() <= 32);
        assert!(id.starts_with("VERYLONGPREFIXINDEED"));
    }

    #[test]
    fn test_client_ids_are_unique_per_call() {
        let a = OrderIntent::generate_client_id("RVB");
        let b = OrderIntent::generate_client_id("RVB");
        assert_ne!(a, b);
    }
}
