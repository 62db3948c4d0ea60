use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use reversalbot::analyzer::Window;
use reversalbot::api::{MarketData, OkxClient};
use reversalbot::audit::{AuditEvent, AuditLog, AuditRecord, JsonlAuditLog};
use reversalbot::config::{AccountCredentials, AppConfig, RuleKind};
use reversalbot::fanout::AccountFanout;
use reversalbot::models::Signal;
use reversalbot::notify::{amplitude_alert, BarkNotifier, NotificationSink, NullNotifier};
use reversalbot::persistence::OrderHistory;
use reversalbot::retry::retry;

/// One batch cycle: fetch candles, evaluate the pattern rule, fan the
/// signal out across all configured accounts. Run from a scheduler; there
/// is no persistent loop.
#[derive(Parser)]
#[command(name = "reversalbot", version, about)]
struct Cli {
    /// Pattern rule to run (overrides config)
    #[arg(long, value_enum)]
    rule: Option<RuleKind>,

    /// Instrument to trade (overrides config, e.g. ETH-USDT-SWAP)
    #[arg(long)]
    instrument: Option<String>,

    /// Candle interval (overrides config, e.g. 5m, 15m)
    #[arg(long)]
    bar: Option<String>,

    /// Analyze and log only: no orders, no notifications, no marker writes
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(rule) = cli.rule {
        config.rule = rule;
    }
    if let Some(instrument) = cli.instrument {
        config.instrument = instrument;
    }
    if let Some(bar) = cli.bar {
        config.bar = bar;
    }
    let config = Arc::new(config);

    tracing::info!(
        instrument = %config.instrument,
        bar = %config.bar,
        rule = ?config.rule,
        dry_run = cli.dry_run,
        "cycle start"
    );

    let audit: Arc<dyn AuditLog> = Arc::new(JsonlAuditLog::new(&config.audit.log_dir));
    let notifier: Arc<dyn NotificationSink> = if cli.dry_run {
        Arc::new(NullNotifier)
    } else {
        Arc::new(BarkNotifier::from_env(config.notify.sound.clone()))
    };

    // Market data runs over the first account with usable credentials,
    // the way the strategies always did.
    let Some(credentials) = first_credentials(&config.account_suffixes) else {
        tracing::error!("no account credentials configured, nothing to do");
        return Ok(());
    };
    let market = OkxClient::new(credentials).context("failed to build exchange client")?;

    // Candle fetch and analysis complete before any account processing;
    // every account acts on this one evaluation.
    let limit = config.effective_candle_limit();
    let candles = match retry("recent_candles", &config.retry, || {
        market.recent_candles(&config.instrument, &config.bar, limit)
    })
    .await
    {
        Ok(candles) => candles,
        Err(e) => {
            // Market-data failure means no signal this cycle, not a crash.
            tracing::error!(error = %e, "candle fetch failed, no signal this cycle");
            return Ok(());
        }
    };

    let window = Window::from_newest_first(candles);
    let rule = config.build_rule();
    let evaluation = rule.evaluate(&window);

    tracing::info!(
        rule = rule.name(),
        signal = ?evaluation.signal,
        entry_price = ?evaluation.entry_price,
        condition = ?evaluation.condition,
        metrics = ?evaluation.metrics,
        "evaluation complete"
    );

    // Amplitude alert fires on threshold breach whether or not an order
    // follows.
    if config.rule == RuleKind::RangeReversal {
        if let Some(metrics) = &evaluation.metrics {
            if metrics.total_range_pct >= config.range_reversal.threshold {
                let (title, body) = amplitude_alert(
                    &config.instrument,
                    metrics.total_range_pct * 100.0,
                    config.range_reversal.threshold * 100.0,
                    window.candles().first().map(|c| c.open).unwrap_or(0.0),
                    evaluation.reference_price.unwrap_or(0.0),
                );
                notifier.notify(&title, &body, &config.notify.group).await;
            }
        }
    }

    let market_record = if evaluation.signal == Signal::None {
        AuditRecord::new("market", &config.instrument, AuditEvent::NoSignal)
    } else {
        AuditRecord::new("market", &config.instrument, AuditEvent::SignalDetected)
    }
    .with_signal(&format!("{:?}", evaluation.signal), evaluation.entry_price)
    .with_details(serde_json::json!({
        "rule": rule.name(),
        "condition": evaluation.condition,
        "metrics": evaluation.metrics,
    }));
    if let Err(e) = audit.append(&market_record).await {
        tracing::warn!(error = %e, "audit append failed");
    }

    if evaluation.signal == Signal::None {
        tracing::info!("no signal this cycle");
        return Ok(());
    }

    if cli.dry_run {
        tracing::info!("dry run, stopping before account fan-out");
        return Ok(());
    }

    let history = Arc::new(OrderHistory::new(&config.audit.log_dir));
    let fanout = AccountFanout::new(Arc::clone(&config), notifier, audit, Some(history));
    let outcomes = fanout.run(&evaluation).await;

    for outcome in &outcomes {
        tracing::info!(
            account = %outcome.account_name,
            result = ?outcome.result,
            "account done"
        );
    }
    tracing::info!(accounts = outcomes.len(), "cycle complete");

    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reversalbot=info".into()),
        )
        .init();
}

/// First configured account with complete credentials.
fn first_credentials(suffixes: &[String]) -> Option<AccountCredentials> {
    suffixes
        .iter()
        .find_map(|suffix| AccountCredentials::from_env(suffix))
}
