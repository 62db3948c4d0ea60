use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::Result;

/// Persisted last-order-time markers, one per account, backing the
/// minimum-order-interval throttle.
///
/// A small JSON map of account name to unix seconds. The marker is written
/// only after a successful placement, so failed cycles never consume the
/// interval. This is a best-effort throttle across process restarts, not a
/// hard idempotency guarantee.
pub struct OrderHistory {
    path: PathBuf,
}

impl OrderHistory {
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        Self {
            path: log_dir.as_ref().join("order_history.json"),
        }
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> HashMap<String, i64> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "order history unreadable, starting fresh");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    /// Unix seconds of the account's last successful placement, if any.
    pub fn last_order_time(&self, account_name: &str) -> Option<i64> {
        self.read_map().get(account_name).copied()
    }

    /// Record a successful placement at the current time.
    pub fn record_order(&self, account_name: &str) -> Result<()> {
        self.record_order_at(account_name, Utc::now().timestamp())
    }

    pub fn record_order_at(&self, account_name: &str, unix_secs: i64) -> Result<()> {
        let mut map = self.read_map();
        map.insert(account_name.to_string(), unix_secs);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;

        tracing::info!(account = account_name, path = %self.path.display(), "order time recorded");
        Ok(())
    }

    /// Whether enough time has passed since the last placement. A fresh
    /// account (no marker) is always allowed.
    pub fn interval_elapsed(&self, account_name: &str, min_interval_minutes: u64) -> bool {
        self.interval_elapsed_at(account_name, min_interval_minutes, Utc::now().timestamp())
    }

    pub fn interval_elapsed_at(
        &self,
        account_name: &str,
        min_interval_minutes: u64,
        now_unix_secs: i64,
    ) -> bool {
        let Some(last) = self.last_order_time(account_name) else {
            tracing::debug!(account = account_name, "no prior order, interval check passes");
            return true;
        };
        let elapsed_minutes = (now_unix_secs - last) as f64 / 60.0;
        tracing::debug!(
            account = account_name,
            elapsed_minutes,
            min_interval_minutes,
            "order interval check"
        );
        elapsed_minutes >= min_interval_minutes as f64
    }
}
