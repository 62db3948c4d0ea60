use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::models::{OrderIntent, Signal};

/// Push-notification port. Fire-and-forget: implementations log failures
/// and never propagate them into the order lifecycle.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, body: &str, group: &str);
}

/// Bark push notifier.
///
/// The key doubles as the endpoint URL; without one, notifications are
/// silently skipped.
pub struct BarkNotifier {
    client: Client,
    key_url: Option<String>,
    sound: String,
}

impl BarkNotifier {
    pub fn new(key_url: Option<String>, sound: String) -> Self {
        Self {
            client: Client::new(),
            key_url,
            sound,
        }
    }

    /// Read the endpoint from `BARK_KEY`.
    pub fn from_env(sound: String) -> Self {
        Self::new(std::env::var("BARK_KEY").ok(), sound)
    }
}

#[async_trait]
impl NotificationSink for BarkNotifier {
    async fn notify(&self, title: &str, body: &str, group: &str) {
        let Some(url) = &self.key_url else {
            tracing::debug!("BARK_KEY not configured, skipping notification");
            return;
        };

        let payload = json!({
            "title": title,
            "body": body,
            "group": group,
            "sound": self.sound,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(title, "push notification sent");
            }
            Ok(response) => {
                tracing::warn!(title, status = %response.status(), "push notification rejected");
            }
            Err(e) => {
                tracing::warn!(title, error = %e, "push notification failed");
            }
        }
    }
}

/// Sink that drops everything; used by dry runs and tests.
pub struct NullNotifier;

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify(&self, _title: &str, _body: &str, _group: &str) {}
}

/// Render the per-account trade notification body: entry, size, bracket,
/// and the raw exchange response when placement failed.
pub fn trade_notification(
    account_name: &str,
    signal: Signal,
    intent: &OrderIntent,
    margin: f64,
    success: bool,
    error_msg: Option<&str>,
) -> (String, String) {
    let title = if success {
        format!("{} order placed", account_name)
    } else {
        format!("{} order FAILED", account_name)
    };

    let mut body = format!(
        "{} {:?}\nentry: {}\nsize: {}\nmargin: {} USDT\ntp: {}\nsl: {}",
        intent.instrument,
        signal,
        intent.limit_price,
        intent.size,
        margin,
        intent.take_profit_trigger,
        intent.stop_loss_trigger,
    );
    if let Some(err) = error_msg {
        body.push_str("\nerror: ");
        body.push_str(err);
    }

    (title, body)
}

/// Render the amplitude alert pushed whenever the threshold is exceeded,
/// order or no order.
pub fn amplitude_alert(
    instrument: &str,
    amplitude_pct: f64,
    threshold_pct: f64,
    open_price: f64,
    latest_price: f64,
) -> (String, String) {
    let title = format!("{} amplitude alert", instrument);
    let body = format!(
        "amplitude {:.2}% >= {:.2}%\nopen: {}\nlatest: {}",
        amplitude_pct, threshold_pct, open_price, latest_price
    );
    (title, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    #[tokio::test]
    async fn test_bark_posts_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/push")
            .match_body(mockito::Matcher::PartialJson(json!({
                "title": "t",
                "body": "b",
                "group": "g",
                "sound": "minuet",
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = BarkNotifier::new(Some(format!("{}/push", server.url())), "minuet".to_string());
        notifier.notify("t", "b", "g").await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bark_without_key_is_a_no_op() {
        let notifier = BarkNotifier::new(None, "minuet".to_string());
        // Must not panic or block.
        notifier.notify("t", "b", "g").await;
    }

    #[tokio::test]
    async fn test_bark_failure_does_not_propagate() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/push")
            .with_status(500)
            .create_async()
            .await;

        let notifier = BarkNotifier::new(Some(format!("{}/push", server.url())), "minuet".to_string());
        notifier.notify("t", "b", "g").await;
    }

    #[test]
    fn test_trade_notification_includes_exchange_error() {
        let intent = OrderIntent::new(
            "VINE-USDT-SWAP",
            Direction::Long,
            1.0,
            10.0,
            1.055,
            0.983,
            "id".to_string(),
        )
        .unwrap();

        let (title, body) = trade_notification(
            "acct1",
            Signal::Long,
            &intent,
            5.0,
            false,
            Some("code=51008 msg=insufficient balance"),
        );
        assert!(title.contains("FAILED"));
        assert!(body.contains("insufficient balance"));
        assert!(body.contains("VINE-USDT-SWAP"));
    }

    #[test]
    fn test_amplitude_alert_formats_percentages() {
        let (_, body) = amplitude_alert("VINE-USDT-SWAP", 4.5, 4.2, 1.0, 1.04);
        assert!(body.contains("4.50%"));
        assert!(body.contains("4.20%"));
    }
}
