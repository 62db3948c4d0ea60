use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::api::{OkxClient, TradingApi};
use crate::audit::{AuditEvent, AuditLog, AuditRecord};
use crate::config::{AccountCredentials, AppConfig};
use crate::lifecycle::{CycleOutcome, OrderLifecycleManager};
use crate::models::Evaluation;
use crate::notify::{trade_notification, NotificationSink};
use crate::persistence::OrderHistory;

/// Builds a trading session for one account. Swapped for a mock in tests.
pub type SessionFactory =
    Arc<dyn Fn(&AccountCredentials) -> crate::Result<Arc<dyn TradingApi>> + Send + Sync>;

/// Terminal result for one account in one cycle.
#[derive(Debug, Clone)]
pub enum AccountResult {
    /// Credentials missing or incomplete; nothing attempted.
    Skipped { reason: String },
    /// The exchange session could not be constructed.
    InitFailed { error: String },
    /// The account's deadline expired mid-lifecycle.
    DeadlineExceeded,
    Completed(CycleOutcome),
}

#[derive(Debug, Clone)]
pub struct AccountOutcome {
    pub account_name: String,
    pub result: AccountResult,
}

/// Runs the order lifecycle once per configured account.
///
/// Accounts are independent: they share only the read-only evaluation
/// computed before fan-out, and one account's failure never prevents the
/// others from running. Each account gets one notification and one audit
/// record, whatever happens.
pub struct AccountFanout {
    config: Arc<AppConfig>,
    notifier: Arc<dyn NotificationSink>,
    audit: Arc<dyn AuditLog>,
    history: Option<Arc<OrderHistory>>,
    sessions: SessionFactory,
}

impl AccountFanout {
    pub fn new(
        config: Arc<AppConfig>,
        notifier: Arc<dyn NotificationSink>,
        audit: Arc<dyn AuditLog>,
        history: Option<Arc<OrderHistory>>,
    ) -> Self {
        Self {
            config,
            notifier,
            audit,
            history,
            sessions: Arc::new(|creds: &AccountCredentials| {
                let client = OkxClient::new(creds.clone())?;
                Ok(Arc::new(client) as Arc<dyn TradingApi>)
            }),
        }
    }

    /// Replace the session factory (tests).
    pub fn with_sessions(mut self, sessions: SessionFactory) -> Self {
        self.sessions = sessions;
        self
    }

    /// Fan the evaluation out across every configured account.
    ///
    /// Must only be called with an evaluation whose signal fired; the
    /// market view is never re-derived per account.
    pub async fn run(&self, evaluation: &Evaluation) -> Vec<AccountOutcome> {
        let Some(direction) = evaluation.signal.direction() else {
            return Vec::new();
        };
        let Some(entry_price) = evaluation.entry_price else {
            tracing::error!("signal fired without an entry price, refusing to trade");
            return Vec::new();
        };
        let reference_price = evaluation.reference_price.unwrap_or(entry_price);

        let semaphore = Arc::new(Semaphore::new(self.config.fanout.max_concurrency.max(1)));
        let deadline = Duration::from_secs(self.config.fanout.account_deadline_secs);
        let mut join_set: JoinSet<AccountOutcome> = JoinSet::new();
        let mut outcomes = Vec::new();

        for suffix in &self.config.account_suffixes {
            let Some(credentials) = AccountCredentials::from_env(suffix) else {
                let name = if suffix.is_empty() {
                    "default".to_string()
                } else {
                    format!("account{}", suffix)
                };
                let outcome = AccountOutcome {
                    account_name: name,
                    result: AccountResult::Skipped {
                        reason: format!("credentials for suffix '{}' missing or incomplete", suffix),
                    },
                };
                self.report(&outcome, evaluation).await;
                outcomes.push(outcome);
                continue;
            };

            let config = Arc::clone(&self.config);
            let sessions = Arc::clone(&self.sessions);
            let history = self.history.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("fanout semaphore never closes");
                let account_name = credentials.name.clone();

                let trading = match sessions(&credentials) {
                    Ok(trading) => trading,
                    Err(e) => {
                        tracing::error!(account = %account_name, error = %e, "session init failed");
                        return AccountOutcome {
                            account_name,
                            result: AccountResult::InitFailed {
                                error: e.to_string(),
                            },
                        };
                    }
                };

                let prefix = config.client_id_prefix();
                let manager = OrderLifecycleManager::new(
                    trading.as_ref(),
                    &config.lifecycle,
                    &config.sizer,
                    &config.retry,
                    &config.instrument,
                    &prefix,
                    &account_name,
                    history.as_deref(),
                );

                let run = manager.run(direction, entry_price, reference_price);
                let result = match tokio::time::timeout(deadline, run).await {
                    Ok(outcome) => AccountResult::Completed(outcome),
                    Err(_) => {
                        tracing::error!(account = %account_name, ?deadline, "account deadline exceeded");
                        AccountResult::DeadlineExceeded
                    }
                };

                AccountOutcome {
                    account_name,
                    result,
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.report(&outcome, evaluation).await;
                    outcomes.push(outcome);
                }
                Err(e) => {
                    // A panicked account task must not take down the batch.
                    tracing::error!(error = %e, "account task panicked");
                }
            }
        }

        outcomes
    }

    /// Emit exactly one notification and one audit record for an account's
    /// outcome. Notification failures never propagate.
    async fn report(&self, outcome: &AccountOutcome, evaluation: &Evaluation) {
        let name = &outcome.account_name;
        let group = &self.config.notify.group;
        let signal = format!("{:?}", evaluation.signal);

        let record = match &outcome.result {
            AccountResult::Skipped { reason } => {
                tracing::warn!(account = %name, reason = %reason, "account skipped");
                AuditRecord::new(name, &self.config.instrument, AuditEvent::CycleSkipped)
                    .with_signal(&signal, evaluation.entry_price)
                    .with_details(json!({ "reason": reason }))
            }
            AccountResult::InitFailed { error } => {
                self.notifier
                    .notify(
                        &format!("{} init FAILED", name),
                        &format!("{}\n{}", self.config.instrument, error),
                        group,
                    )
                    .await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderFailed)
                    .with_signal(&signal, evaluation.entry_price)
                    .with_details(json!({ "stage": "init", "error": error }))
            }
            AccountResult::DeadlineExceeded => {
                self.notifier
                    .notify(
                        &format!("{} cycle FAILED", name),
                        &format!("{}\ndeadline exceeded", self.config.instrument),
                        group,
                    )
                    .await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderFailed)
                    .with_signal(&signal, evaluation.entry_price)
                    .with_details(json!({ "stage": "deadline" }))
            }
            AccountResult::Completed(cycle) => self.report_cycle(name, cycle, evaluation).await,
        };

        if let Err(e) = self.audit.append(&record).await {
            tracing::warn!(account = %name, error = %e, "audit append failed");
        }
    }

    async fn report_cycle(
        &self,
        name: &str,
        cycle: &CycleOutcome,
        evaluation: &Evaluation,
    ) -> AuditRecord {
        let group = &self.config.notify.group;
        let signal = format!("{:?}", evaluation.signal);
        let margin = self.config.sizer.margin;
        let base = AuditRecord::new(name, &self.config.instrument, AuditEvent::CycleSkipped)
            .with_signal(&signal, evaluation.entry_price);

        match cycle {
            CycleOutcome::Placed { intent, order_id } => {
                let (title, body) =
                    trade_notification(name, evaluation.signal, intent, margin, true, None);
                self.notifier.notify(&title, &body, group).await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderPlaced)
                    .with_signal(&signal, Some(intent.limit_price))
                    .with_quantity(intent.size)
                    .with_details(json!({
                        "order_id": order_id,
                        "client_order_id": intent.client_order_id,
                        "take_profit": intent.take_profit_trigger,
                        "stop_loss": intent.stop_loss_trigger,
                    }))
            }
            CycleOutcome::PlaceFailed { intent, error } => {
                let (title, body) = trade_notification(
                    name,
                    evaluation.signal,
                    intent,
                    margin,
                    false,
                    Some(error),
                );
                self.notifier.notify(&title, &body, group).await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderFailed)
                    .with_signal(&signal, Some(intent.limit_price))
                    .with_quantity(intent.size)
                    .with_details(json!({
                        "stage": "place",
                        "client_order_id": intent.client_order_id,
                        "error": error,
                    }))
            }
            CycleOutcome::CancelFailed { order_id, error } => {
                self.notifier
                    .notify(
                        &format!("{} cancel FAILED", name),
                        &format!("{}\norder {}\n{}", self.config.instrument, order_id, error),
                        group,
                    )
                    .await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderFailed)
                    .with_signal(&signal, evaluation.entry_price)
                    .with_details(json!({ "stage": "cancel", "order_id": order_id, "error": error }))
            }
            CycleOutcome::QueryFailed { error } => {
                self.notifier
                    .notify(
                        &format!("{} order check FAILED", name),
                        &format!("{}\n{}", self.config.instrument, error),
                        group,
                    )
                    .await;
                AuditRecord::new(name, &self.config.instrument, AuditEvent::OrderFailed)
                    .with_signal(&signal, evaluation.entry_price)
                    .with_details(json!({ "stage": "query", "error": error }))
            }
            CycleOutcome::TooSmall { raw } => {
                self.notifier
                    .notify(
                        &format!("{} order skipped", name),
                        &format!(
                            "{}\nsize below one lot step (raw {:.4}), margin {} USDT",
                            self.config.instrument, raw, margin
                        ),
                        group,
                    )
                    .await;
                base.with_details(json!({ "reason": "too_small", "raw": raw }))
            }
            CycleOutcome::Throttled => {
                tracing::info!(account = %name, "throttled, no order this cycle");
                base.with_details(json!({ "reason": "throttled" }))
            }
            CycleOutcome::PendingRemain { live } => {
                tracing::info!(account = %name, live = %live, "live entries remain, no order this cycle");
                base.with_details(json!({ "reason": "pending_remain", "live": live }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::audit::MemoryAuditLog;
    use crate::models::{AmplitudeMetrics, OrderAck, OrderIntent, PendingOrder, Signal};
    use crate::notify::NullNotifier;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingTrading {
        placed: Mutex<Vec<OrderIntent>>,
        hang: bool,
    }

    #[async_trait]
    impl TradingApi for RecordingTrading {
        async fn pending_orders(&self, _instrument: &str) -> Result<Vec<PendingOrder>, ApiError> {
            if self.hang {
                // Simulate a stuck exchange session.
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(Vec::new())
        }

        async fn cancel_order(&self, _instrument: &str, _order_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, ApiError> {
            self.placed.lock().unwrap().push(intent.clone());
            Ok(OrderAck {
                order_id: "1".to_string(),
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

    fn long_evaluation() -> Evaluation {
        Evaluation {
            signal: Signal::Long,
            entry_price: Some(1.0),
            reference_price: Some(1.0),
            condition: Some("test".to_string()),
            metrics: Some(AmplitudeMetrics {
                body_pct: 0.012,
                total_range_pct: 0.017,
                is_green: true,
                is_red: false,
            }),
        }
    }

    fn test_config(suffixes: Vec<String>) -> AppConfig {
        let mut config = AppConfig::default();
        config.account_suffixes = suffixes;
        config.lifecycle.min_order_interval_minutes = 0;
        config.retry.max_retries = 0;
        config.retry.retry_delay_secs = 0;
        config.fanout.account_deadline_secs = 2;
        config
    }

    #[tokio::test]
    async fn test_broken_account_does_not_block_valid_one() {
        set_account_env("TA2", "valid");
        clear_account_env("TA1"); // broken: no credentials at all

        let trading = Arc::new(RecordingTrading {
            placed: Mutex::new(Vec::new()),
            hang: false,
        });
        let trading_for_factory = Arc::clone(&trading);

        let audit = Arc::new(MemoryAuditLog::new());
        let fanout = AccountFanout::new(
            Arc::new(test_config(vec!["TA1".to_string(), "TA2".to_string()])),
            Arc::new(NullNotifier),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            None,
        )
        .with_sessions(Arc::new(move |_creds| {
            Ok(Arc::clone(&trading_for_factory) as Arc<dyn TradingApi>)
        }));

        let outcomes = fanout.run(&long_evaluation()).await;

        assert_eq!(outcomes.len(), 2);
        let skipped = outcomes
            .iter()
            .find(|o| matches!(o.result, AccountResult::Skipped { .. }))
            .unwrap();
        assert_eq!(skipped.account_name, "accountTA1");

        let completed = outcomes
            .iter()
            .find(|o| matches!(o.result, AccountResult::Completed(CycleOutcome::Placed { .. })))
            .unwrap();
        assert_eq!(completed.account_name, "valid");

        // One audit record per account, whatever happened.
        assert_eq!(audit.records().await.len(), 2);

        clear_account_env("TA2");
    }

    #[tokio::test]
    async fn test_all_accounts_act_on_identical_entry_price() {
        set_account_env("TB1", "one");
        set_account_env("TB2", "two");

        let trading = Arc::new(RecordingTrading {
            placed: Mutex::new(Vec::new()),
            hang: false,
        });
        let trading_for_factory = Arc::clone(&trading);

        let fanout = AccountFanout::new(
            Arc::new(test_config(vec!["TB1".to_string(), "TB2".to_string()])),
            Arc::new(NullNotifier),
            Arc::new(MemoryAuditLog::new()),
            None,
        )
        .with_sessions(Arc::new(move |_creds| {
            Ok(Arc::clone(&trading_for_factory) as Arc<dyn TradingApi>)
        }));

        let _ = fanout.run(&long_evaluation()).await;

        let placed = trading.placed.lock().unwrap();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].limit_price, placed[1].limit_price);
        assert_eq!(placed[0].take_profit_trigger, placed[1].take_profit_trigger);
        // Client order ids stay unique per account even on the shared view.
        assert_ne!(placed[0].client_order_id, placed[1].client_order_id);

        clear_account_env("TB1");
        clear_account_env("TB2");
    }

    #[tokio::test]
    async fn test_stuck_account_hits_deadline_and_others_proceed() {
        set_account_env("TC1", "stuck");
        set_account_env("TC2", "fine");

        let fanout = AccountFanout::new(
            Arc::new(test_config(vec!["TC1".to_string(), "TC2".to_string()])),
            Arc::new(NullNotifier),
            Arc::new(MemoryAuditLog::new()),
            None,
        )
        .with_sessions(Arc::new(move |creds| {
            let hang = creds.name == "stuck";
            Ok(Arc::new(RecordingTrading {
                placed: Mutex::new(Vec::new()),
                hang,
            }) as Arc<dyn TradingApi>)
        }));

        let outcomes = fanout.run(&long_evaluation()).await;

        assert_eq!(outcomes.len(), 2);
        let stuck = outcomes.iter().find(|o| o.account_name == "stuck").unwrap();
        assert!(matches!(stuck.result, AccountResult::DeadlineExceeded));
        let fine = outcomes.iter().find(|o| o.account_name == "fine").unwrap();
        assert!(matches!(
            fine.result,
            AccountResult::Completed(CycleOutcome::Placed { .. })
        ));

        clear_account_env("TC1");
        clear_account_env("TC2");
    }

    #[tokio::test]
    async fn test_init_failure_is_reported_not_fatal() {
        set_account_env("TD1", "badinit");

        let fanout = AccountFanout::new(
            Arc::new(test_config(vec!["TD1".to_string()])),
            Arc::new(NullNotifier),
            Arc::new(MemoryAuditLog::new()),
            None,
        )
        .with_sessions(Arc::new(|_creds| Err("no route to exchange".into())));

        let outcomes = fanout.run(&long_evaluation()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0].result,
            AccountResult::InitFailed { .. }
        ));

        clear_account_env("TD1");
    }

    #[tokio::test]
    async fn test_no_signal_evaluation_fans_out_to_nobody() {
        let fanout = AccountFanout::new(
            Arc::new(test_config(vec!["TE1".to_string()])),
            Arc::new(NullNotifier),
            Arc::new(MemoryAuditLog::new()),
            None,
        );

        let outcomes = fanout.run(&Evaluation::none()).await;
        assert!(outcomes.is_empty());
    }
}
