use std::future::Future;
use std::time::Duration;

/// Bounded-retry settings shared by every exchange call in a cycle.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt, so attempts = max_retries + 1.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 2,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent, sleeping
/// a fixed delay between attempts.
///
/// The sleep is local to this call; parallel account workers retrying their
/// own operations are not held up by it. The last error is returned after
/// exhaustion.
pub async fn retry<T, E, F, Fut>(label: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = config.max_retries + 1;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(label, attempt, "operation recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(label, attempt, attempts, error = %e, "operation failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(config.delay()).await;
                }
            }
        }
    }

    tracing::error!(label, attempts, "operation failed after all attempts");
    Err(last_err.expect("at least one attempt was made"))
}
