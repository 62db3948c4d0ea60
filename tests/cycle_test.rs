use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use reversalbot::analyzer::{
    AmplitudeConfig, AmplitudeRule, AnchorPolicy, PatternRule, RangeReversalConfig,
    RangeReversalRule, Window,
};
use reversalbot::analyzer::amplitude::DirectionPolicy;
use reversalbot::api::{ApiError, TradingApi};
use reversalbot::audit::{AuditEvent, AuditLog, MemoryAuditLog};
use reversalbot::config::AppConfig;
use reversalbot::fanout::{AccountFanout, AccountResult};
use reversalbot::lifecycle::{CancelPolicy, CycleOutcome};
use reversalbot::models::{
    Candle, OrderAck, OrderIntent, OrderSide, PendingOrder, PositionSide, Signal,
};
use reversalbot::notify::NullNotifier;

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

/// Trading port that records every call in order.
#[derive(Default)]
struct ScriptedTrading {
    calls: Mutex<Vec<String>>,
    pending: Vec<PendingOrder>,
    fail_cancel: bool,
}

impl ScriptedTrading {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn placed_intents(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("place:"))
            .collect()
    }
}

#[async_trait]
impl TradingApi for ScriptedTrading {
    async fn pending_orders(&self, _instrument: &str) -> Result<Vec<PendingOrder>, ApiError> {
        self.calls.lock().unwrap().push("query".to_string());
        Ok(self.pending.clone())
    }

    async fn cancel_order(&self, _instrument: &str, order_id: &str) -> Result<(), ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cancel:{}", order_id));
        if self.fail_cancel {
            return Err(ApiError::exchange("51400", "cancellation rejected"));
        }
        Ok(())
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, ApiError> {
        self.calls.lock().unwrap().push(format!(
            "place:{}:{}:{}",
            intent.client_order_id, intent.limit_price, intent.size
        ));
        Ok(OrderAck {
            order_id: "ord-1".to_string(),
        })
    }
}

fn set_account_env(suffix: &str, name: &str) {
    std::env::set_var(format!("OKX{}_API_KEY", suffix), "key");
    std::env::set_var(format!("OKX{}_SECRET_KEY", suffix), "secret");
    std::env::set_var(format!("OKX{}_PASSPHRASE", suffix), "phrase");
    std::env::set_var(format!("OKX{}_ACCOUNT_NAME", suffix), name);
}

fn clear_account_env(suffix: &str) {
    for var in ["API_KEY", "SECRET_KEY", "PASSPHRASE", "ACCOUNT_NAME"] {
        std::env::remove_var(format!("OKX{}_{}", suffix, var));
    }
}

fn test_config(suffixes: Vec<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.account_suffixes = suffixes.into_iter().map(String::from).collect();
    config.lifecycle.min_order_interval_minutes = 0;
    config.retry.max_retries = 0;
    config.retry.retry_delay_secs = 0;
    config.fanout.account_deadline_secs = 5;
    config
}

fn fanout_with(
    config: AppConfig,
    trading: Arc<ScriptedTrading>,
    audit: Arc<MemoryAuditLog>,
) -> AccountFanout {
    AccountFanout::new(
        Arc::new(config),
        Arc::new(NullNotifier),
        audit,
        None,
    )
    .with_sessions(Arc::new(move |_creds| {
        Ok(Arc::clone(&trading) as Arc<dyn TradingApi>)
    }))
}

#[tokio::test]
async fn test_full_cycle_from_candles_to_bracket_orders() {
    set_account_env("IT1", "alpha");
    set_account_env("IT2", "beta");

    // Red bar with a 4.5% high-low range: the range-reversal rule goes long
    // at the midpoint of close and low.
    let window = Window::from_newest_first(vec![candle(1.04, 1.045, 1.0, 1.005)]);
    let rule = RangeReversalRule::new(RangeReversalConfig {
        threshold: 0.042,
        anchor: AnchorPolicy::Latest,
    });
    let evaluation = rule.evaluate(&window);
    assert_eq!(evaluation.signal, Signal::Long);

    let trading = Arc::new(ScriptedTrading::default());
    let audit = Arc::new(MemoryAuditLog::new());
    let fanout = fanout_with(
        test_config(vec!["IT1", "IT2"]),
        Arc::clone(&trading),
        Arc::clone(&audit),
    );

    let outcomes = fanout.run(&evaluation).await;

    assert_eq!(outcomes.len(), 2);
    for outcome in &outcomes {
        assert!(matches!(
            outcome.result,
            AccountResult::Completed(CycleOutcome::Placed { .. })
        ));
    }

    // Both accounts placed from the identical market view.
    let placed = trading.placed_intents();
    assert_eq!(placed.len(), 2);
    let price_of = |s: &str| s.split(':').nth(2).unwrap().to_string();
    assert_eq!(price_of(&placed[0]), price_of(&placed[1]));

    // One audit record per account.
    let records = audit.records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.event == AuditEvent::OrderPlaced));

    clear_account_env("IT1");
    clear_account_env("IT2");
}

#[tokio::test]
async fn test_band_direction_policies_disagree_on_purpose() {
    // open=100, close=101.2, high=101.5, low=99.8: body 1.2% inside the
    // [1.0%, 1.5%] band, entry at the bar midpoint 100.65.
    let window = Window::from_newest_first(vec![candle(100.0, 101.5, 99.8, 101.2)]);

    let continuation = AmplitudeRule::new(AmplitudeConfig {
        band_min: 0.010,
        band_max: 0.015,
        band_direction: DirectionPolicy::Continuation,
        anchor: AnchorPolicy::Latest,
        ..AmplitudeConfig::default()
    });
    let eval = continuation.evaluate(&window);
    assert_eq!(eval.signal, Signal::Long);
    assert!((eval.entry_price.unwrap() - 100.65).abs() < 1e-9);

    let reversal = AmplitudeRule::new(AmplitudeConfig {
        band_min: 0.010,
        band_max: 0.015,
        band_direction: DirectionPolicy::Reversal,
        anchor: AnchorPolicy::Latest,
        ..AmplitudeConfig::default()
    });
    let eval = reversal.evaluate(&window);
    assert_eq!(eval.signal, Signal::Short);
    assert!((eval.entry_price.unwrap() - 100.65).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancel_always_precedes_place() {
    set_account_env("IT3", "gamma");

    let pending = PendingOrder {
        order_id: "stale-1".to_string(),
        side: OrderSide::Buy,
        position_side: PositionSide::Long,
        limit_price: 1.0,
        order_type: "limit".to_string(),
        take_profit_trigger: Some(1.05),
    };
    let trading = Arc::new(ScriptedTrading {
        pending: vec![pending],
        ..ScriptedTrading::default()
    });

    let mut config = test_config(vec!["IT3"]);
    config.lifecycle.cancel_policy = CancelPolicy::CancelAll;
    let fanout = fanout_with(config, Arc::clone(&trading), Arc::new(MemoryAuditLog::new()));

    let window = Window::from_newest_first(vec![candle(1.04, 1.045, 1.0, 1.005)]);
    let evaluation = RangeReversalRule::new(RangeReversalConfig {
        threshold: 0.042,
        anchor: AnchorPolicy::Latest,
    })
    .evaluate(&window);

    let _ = fanout.run(&evaluation).await;

    let calls = trading.calls();
    let cancel_idx = calls.iter().position(|c| c == "cancel:stale-1").unwrap();
    let place_idx = calls.iter().position(|c| c.starts_with("place:")).unwrap();
    assert!(cancel_idx < place_idx, "cancel must complete before place");

    clear_account_env("IT3");
}

#[tokio::test]
async fn test_failed_cancel_blocks_placement_for_that_account_only() {
    set_account_env("IT4", "delta");
    set_account_env("IT5", "epsilon");

    // delta's exchange rejects cancellations; epsilon has no pending
    // orders to cancel.
    let broken = Arc::new(ScriptedTrading {
        pending: vec![PendingOrder {
            order_id: "stuck-1".to_string(),
            side: OrderSide::Sell,
            position_side: PositionSide::Short,
            limit_price: 1.0,
            order_type: "limit".to_string(),
            take_profit_trigger: None,
        }],
        fail_cancel: true,
        ..ScriptedTrading::default()
    });
    let healthy = Arc::new(ScriptedTrading::default());

    let broken_for_factory = Arc::clone(&broken);
    let healthy_for_factory = Arc::clone(&healthy);
    let audit = Arc::new(MemoryAuditLog::new());
    let fanout = AccountFanout::new(
        Arc::new(test_config(vec!["IT4", "IT5"])),
        Arc::new(NullNotifier),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        None,
    )
    .with_sessions(Arc::new(move |creds| {
        if creds.name == "delta" {
            Ok(Arc::clone(&broken_for_factory) as Arc<dyn TradingApi>)
        } else {
            Ok(Arc::clone(&healthy_for_factory) as Arc<dyn TradingApi>)
        }
    }));

    let window = Window::from_newest_first(vec![candle(1.04, 1.045, 1.0, 1.005)]);
    let evaluation = RangeReversalRule::new(RangeReversalConfig {
        threshold: 0.042,
        anchor: AnchorPolicy::Latest,
    })
    .evaluate(&window);

    let outcomes = fanout.run(&evaluation).await;

    let delta = outcomes.iter().find(|o| o.account_name == "delta").unwrap();
    assert!(matches!(
        delta.result,
        AccountResult::Completed(CycleOutcome::CancelFailed { .. })
    ));
    // Fail-closed: the broken account never placed.
    assert!(broken.placed_intents().is_empty());

    // The healthy account still traded.
    let epsilon = outcomes
        .iter()
        .find(|o| o.account_name == "epsilon")
        .unwrap();
    assert!(matches!(
        epsilon.result,
        AccountResult::Completed(CycleOutcome::Placed { .. })
    ));
    assert_eq!(healthy.placed_intents().len(), 1);

    clear_account_env("IT4");
    clear_account_env("IT5");
}

#[tokio::test]
async fn test_analyzer_is_pure_across_repeated_evaluations() {
    let window = Window::from_newest_first(vec![candle(100.0, 104.5, 99.9, 103.8)]);
    let rule = RangeReversalRule::new(RangeReversalConfig {
        threshold: 0.042,
        anchor: AnchorPolicy::Latest,
    });

    let first = rule.evaluate(&window);
    for _ in 0..5 {
        assert_eq!(rule.evaluate(&window), first);
    }
}

#[tokio::test]
async fn test_short_feed_produces_no_signal_and_no_trades() {
    let trading = Arc::new(ScriptedTrading::default());
    let fanout = fanout_with(
        test_config(vec!["IT6"]),
        Arc::clone(&trading),
        Arc::new(MemoryAuditLog::new()),
    );

    // Empty feed: the rule yields NONE and fan-out refuses to run.
    let evaluation = RangeReversalRule::default().evaluate(&Window::from_newest_first(Vec::new()));
    assert_eq!(evaluation.signal, Signal::None);

    let outcomes = tokio::time::timeout(Duration::from_secs(1), fanout.run(&evaluation))
        .await
        .unwrap();
    assert!(outcomes.is_empty());
    assert!(trading.calls().is_empty());
}
