use serde::{Deserialize, Serialize};

use crate::api::TradingApi;
use crate::models::{Direction, OrderIntent, PendingOrder};
use crate::persistence::OrderHistory;
use crate::retry::{retry, RetryConfig};
use crate::sizing::{self, SizeDecision, SizerConfig};

/// How live entry orders are handled before placing a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Cancel only entries whose attached take-profit trigger the reference
    /// price has already crossed. If live entries remain, the cycle is
    /// skipped for this account (an entry is already working).
    TakeProfitCrossed,
    /// Unconditionally cancel every live entry order first.
    CancelAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Take-profit distance from entry (0.055 = 5.5%).
    pub take_profit_pct: f64,
    /// Stop-loss distance from entry.
    pub stop_loss_pct: f64,
    /// Limit-price offset against the trader: longs nudge up, shorts down,
    /// biasing toward fill at acceptable execution.
    pub slippage_pct: f64,
    pub cancel_policy: CancelPolicy,
    /// Minimum minutes between placements per account; 0 disables the
    /// throttle.
    pub min_order_interval_minutes: u64,
    /// Decimal places for the limit and bracket prices on the wire.
    pub price_decimals: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            take_profit_pct: 0.055,
            stop_loss_pct: 0.017,
            slippage_pct: 0.005,
            cancel_policy: CancelPolicy::CancelAll,
            min_order_interval_minutes: 10,
            price_decimals: 5,
        }
    }
}

/// Terminal result of one account's pass through the lifecycle.
///
/// Every variant maps to exactly one notification and one audit record,
/// emitted by the caller; the state machine itself touches nothing but the
/// trading port and the order-time marker.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Entry order accepted by the exchange.
    Placed { intent: OrderIntent, order_id: String },
    /// Within the minimum order interval; nothing attempted.
    Throttled,
    /// Live entries remain under the TakeProfitCrossed policy.
    PendingRemain { live: usize },
    /// Sized below one lot step; placement aborted.
    TooSmall { raw: f64 },
    /// Could not confirm the pending-order view; fail-closed, no placement.
    QueryFailed { error: String },
    /// A cancellation failed after retries; fail-closed, no placement.
    CancelFailed { order_id: String, error: String },
    /// The placement itself was rejected or unreachable after retries.
    PlaceFailed { intent: OrderIntent, error: String },
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::QueryFailed { .. }
                | CycleOutcome::CancelFailed { .. }
                | CycleOutcome::PlaceFailed { .. }
        )
    }

    /// Short label for logs and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Placed { .. } => "placed",
            CycleOutcome::Throttled => "throttled",
            CycleOutcome::PendingRemain { .. } => "pending_remain",
            CycleOutcome::TooSmall { .. } => "too_small",
            CycleOutcome::QueryFailed { .. } => "query_failed",
            CycleOutcome::CancelFailed { .. } => "cancel_failed",
            CycleOutcome::PlaceFailed { .. } => "place_failed",
        }
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Drives cancel -> size -> place for one (account, instrument) pair.
///
/// The sequence is strictly ordered: the pending-order view must be
/// confirmed, and any required cancellation completed, before sizing and
/// placement. A cancellation that fails after retries aborts the cycle so a
/// new order can never double exposure on top of a live one.
pub struct OrderLifecycleManager<'a> {
    trading: &'a dyn TradingApi,
    config: &'a LifecycleConfig,
    sizer: &'a SizerConfig,
    retry: &'a RetryConfig,
    instrument: &'a str,
    client_id_prefix: &'a str,
    account_name: &'a str,
    /// Throttle marker store; None disables persistence (dry runs).
    history: Option<&'a OrderHistory>,
}

impl<'a> OrderLifecycleManager<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trading: &'a dyn TradingApi,
        config: &'a LifecycleConfig,
        sizer: &'a SizerConfig,
        retry: &'a RetryConfig,
        instrument: &'a str,
        client_id_prefix: &'a str,
        account_name: &'a str,
        history: Option<&'a OrderHistory>,
    ) -> Self {
        Self {
            trading,
            config,
            sizer,
            retry,
            instrument,
            client_id_prefix,
            account_name,
            history,
        }
    }

    /// Limit price with the slippage offset applied against the trader.
    fn slipped_entry(&self, direction: Direction, entry_price: f64) -> f64 {
        let adjusted = match direction {
            Direction::Long => entry_price * (1.0 + self.config.slippage_pct),
            Direction::Short => entry_price * (1.0 - self.config.slippage_pct),
        };
        round_to(adjusted, self.config.price_decimals)
    }

    /// Bracket prices from the (slippage-adjusted) limit price.
    fn bracket(&self, direction: Direction, limit_price: f64) -> (f64, f64) {
        let (tp, sl) = match direction {
            Direction::Long => (
                limit_price * (1.0 + self.config.take_profit_pct),
                limit_price * (1.0 - self.config.stop_loss_pct),
            ),
            Direction::Short => (
                limit_price * (1.0 - self.config.take_profit_pct),
                limit_price * (1.0 + self.config.stop_loss_pct),
            ),
        };
        (
            round_to(tp, self.config.price_decimals),
            round_to(sl, self.config.price_decimals),
        )
    }

    /// Which live entries must be canceled under the configured policy, and
    /// how many live entries would remain afterwards.
    fn cancellation_set(
        &self,
        pending: &[PendingOrder],
        reference_price: f64,
    ) -> (Vec<String>, usize) {
        let entries: Vec<&PendingOrder> = pending.iter().filter(|o| o.is_entry()).collect();
        match self.config.cancel_policy {
            CancelPolicy::CancelAll => {
                (entries.iter().map(|o| o.order_id.clone()).collect(), 0)
            }
            CancelPolicy::TakeProfitCrossed => {
                let (crossed, live): (Vec<&PendingOrder>, Vec<&PendingOrder>) = entries
                    .iter()
                    .partition(|o| o.take_profit_crossed(reference_price));
                (
                    crossed.iter().map(|o| o.order_id.clone()).collect(),
                    live.len(),
                )
            }
        }
    }

    /// Run one full cycle for this account.
    pub async fn run(
        &self,
        direction: Direction,
        entry_price: f64,
        reference_price: f64,
    ) -> CycleOutcome {
        // Throttle before touching the exchange at all.
        if self.config.min_order_interval_minutes > 0 {
            if let Some(history) = self.history {
                if !history.interval_elapsed(self.account_name, self.config.min_order_interval_minutes)
                {
                    tracing::info!(
                        account = self.account_name,
                        min_minutes = self.config.min_order_interval_minutes,
                        "within minimum order interval, skipping"
                    );
                    return CycleOutcome::Throttled;
                }
            }
        }

        // CHECKING_PENDING
        let pending = match retry("pending_orders", self.retry, || {
            self.trading.pending_orders(self.instrument)
        })
        .await
        {
            Ok(pending) => pending,
            Err(e) => {
                return CycleOutcome::QueryFailed {
                    error: e.to_string(),
                }
            }
        };

        let (to_cancel, remaining) = self.cancellation_set(&pending, reference_price);

        // CANCELING
        for order_id in &to_cancel {
            let result = retry("cancel_order", self.retry, || {
                self.trading.cancel_order(self.instrument, order_id)
            })
            .await;

            if let Err(e) = result {
                tracing::error!(
                    account = self.account_name,
                    order_id = %order_id,
                    error = %e,
                    "cancellation failed after retries, aborting cycle"
                );
                return CycleOutcome::CancelFailed {
                    order_id: order_id.clone(),
                    error: e.to_string(),
                };
            }
        }

        if remaining > 0 {
            tracing::info!(
                account = self.account_name,
                live = remaining,
                "live entries remain, no new order this cycle"
            );
            return CycleOutcome::PendingRemain { live: remaining };
        }

        // SIZING
        let limit_price = self.slipped_entry(direction, entry_price);
        let quantity = match sizing::size(self.sizer, limit_price) {
            SizeDecision::Quantity(q) => q,
            SizeDecision::TooSmall { raw } => {
                tracing::warn!(
                    account = self.account_name,
                    raw,
                    "sized below one lot step, aborting"
                );
                return CycleOutcome::TooSmall { raw };
            }
        };

        // PLACING
        let (take_profit, stop_loss) = self.bracket(direction, limit_price);
        let intent = match OrderIntent::new(
            self.instrument,
            direction,
            limit_price,
            quantity,
            take_profit,
            stop_loss,
            OrderIntent::generate_client_id(self.client_id_prefix),
        ) {
            Ok(intent) => intent,
            Err(e) => {
                // Only reachable with degenerate percentage config.
                tracing::error!(account = self.account_name, error = %e, "order intent rejected");
                return CycleOutcome::TooSmall { raw: 0.0 };
            }
        };

        tracing::info!(
            account = self.account_name,
            ?direction,
            limit_price,
            quantity,
            take_profit,
            stop_loss,
            client_order_id = %intent.client_order_id,
            "placing order"
        );

        match retry("place_order", self.retry, || {
            self.trading.place_order(&intent)
        })
        .await
        {
            Ok(ack) => {
                if let Some(history) = self.history {
                    // Marker written only on success; a failed cycle must
                    // not consume the interval.
                    if let Err(e) = history.record_order(self.account_name) {
                        tracing::warn!(account = self.account_name, error = %e, "could not persist order time");
                    }
                }
                CycleOutcome::Placed {
                    intent,
                    order_id: ack.order_id,
                }
            }
            Err(e) => CycleOutcome::PlaceFailed {
                intent,
                error: e.to_string(),
            },
        }
    }
}
