use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use crate::api::{ApiError, MarketData, TradingApi};
use crate::config::AccountCredentials;
use crate::models::{Candle, OrderAck, OrderIntent, OrderSide, PendingOrder, PositionSide};

const OKX_API_BASE: &str = "https://www.okx.com";
const REQUEST_TIMEOUT_SECS: u64 = 10;
// Conservative client-side cap; OKX allows far more per endpoint.
const RATE_LIMIT_RPS: u32 = 5;

type HmacSha256 = Hmac<Sha256>;

type OkxRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// OKX v5 REST client bound to one account's credentials.
///
/// Sessions are constructed fresh per cycle and shared across nothing;
/// clones share the rate limiter.
#[derive(Clone)]
pub struct OkxClient {
    client: Client,
    credentials: AccountCredentials,
    base_url: String,
    rate_limiter: Arc<OkxRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxPendingOrderRaw {
    ord_id: String,
    side: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    px: String,
    ord_type: String,
    #[serde(default)]
    attach_algo_ords: Vec<OkxAttachedAlgoRaw>,
    #[serde(default)]
    linked_algo_ord: Option<OkxAttachedAlgoRaw>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxAttachedAlgoRaw {
    #[serde(default)]
    tp_trigger_px: String,
}

impl OkxPendingOrderRaw {
    /// The take-profit trigger, read from attachAlgoOrds first and the
    /// linked algo order as a fallback, mirroring how the exchange reports
    /// brackets on live orders.
    fn take_profit_trigger(&self) -> Option<f64> {
        self.attach_algo_ords
            .first()
            .and_then(|a| a.tp_trigger_px.parse::<f64>().ok())
            .or_else(|| {
                self.linked_algo_ord
                    .as_ref()
                    .and_then(|a| a.tp_trigger_px.parse::<f64>().ok())
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxOrderResultRaw {
    #[serde(default)]
    ord_id: String,
    #[serde(default)]
    s_code: String,
    #[serde(default)]
    s_msg: String,
}

// ============== Implementation ==============

impl OkxClient {
    pub fn new(credentials: AccountCredentials) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(RATE_LIMIT_RPS).unwrap());

        Ok(Self {
            client,
            credentials,
            base_url: OKX_API_BASE.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Point the client at a different host (tests).
    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// base64(HMAC-SHA256(timestamp + method + path + body)) with the
    /// account secret, per the OKX v5 signing scheme.
    fn sign(&self, timestamp: &str, method: &str, request_path: &str, body: &str) -> Result<String, ApiError> {
        let message = format!("{}{}{}{}", timestamp, method, request_path, body);
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes())
            .map_err(|e| ApiError::Signing(format!("HMAC init failed: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        request_path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ApiError> {
        self.rate_limiter.until_ready().await;

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let signature = self.sign(&timestamp, method.as_str(), request_path, &body_str)?;

        let url = format!("{}{}", self.base_url, request_path);
        let mut request = self
            .client
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("Content-Type", "application/json");

        if self.credentials.is_demo() {
            request = request.header("x-simulated-trading", "1");
        }

        if let Some(b) = body {
            request = request.json(&b);
        }

        Ok(request.send().await?)
    }

    /// Decode the OKX envelope, treating any non-"0" code as a failure
    /// regardless of HTTP status.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Vec<T>, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        let envelope: OkxResponse<T> = serde_json::from_str(&text)
            .map_err(|e| ApiError::Decode(format!("status {}: {} ({})", status, e, text)))?;

        if envelope.code != "0" {
            return Err(ApiError::exchange(envelope.code, envelope.msg));
        }

        Ok(envelope.data)
    }

    fn parse_candle_row(row: &[String]) -> Option<Candle> {
        if row.len() < 6 {
            return None;
        }
        Some(Candle {
            open_time: row[0].parse().ok()?,
            open: row[1].parse().ok()?,
            high: row[2].parse().ok()?,
            low: row[3].parse().ok()?,
            close: row[4].parse().ok()?,
            volume: row[5].parse().ok()?,
            // Ninth column: "1" once the bar has closed.
            is_confirmed: row.get(8).map(|c| c == "1").unwrap_or(true),
        })
    }
}

/// Format a price or size the way the exchange expects: plain decimal,
/// no exponent, no trailing leftovers from float noise.
fn fmt_decimal(value: f64) -> String {
    let s = format!("{:.8}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

#[async_trait]
impl MarketData for OkxClient {
    async fn recent_candles(
        &self,
        instrument: &str,
        bar: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError> {
        self.rate_limiter.until_ready().await;

        // Public endpoint, no signing required.
        let url = format!(
            "{}/api/v5/market/candles?instId={}&bar={}&limit={}",
            self.base_url, instrument, bar, limit
        );
        let response = self.client.get(&url).send().await?;
        let rows: Vec<Vec<String>> = Self::decode(response).await?;

        let candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| Self::parse_candle_row(row))
            .collect();

        if candles.len() < rows.len() {
            tracing::warn!(
                instrument,
                parsed = candles.len(),
                received = rows.len(),
                "dropped malformed candle rows"
            );
        }

        tracing::debug!(instrument, bar, count = candles.len(), "fetched candles");
        Ok(candles)
    }
}

#[async_trait]
impl TradingApi for OkxClient {
    async fn pending_orders(&self, instrument: &str) -> Result<Vec<PendingOrder>, ApiError> {
        let path = format!("/api/v5/trade/orders-pending?instId={}", instrument);
        let response = self
            .signed_request(reqwest::Method::GET, &path, None)
            .await?;
        let raw: Vec<OkxPendingOrderRaw> = Self::decode(response).await?;

        let orders = raw
            .into_iter()
            .map(|o| PendingOrder {
                take_profit_trigger: o.take_profit_trigger(),
                side: if o.side == "sell" {
                    OrderSide::Sell
                } else {
                    OrderSide::Buy
                },
                position_side: match o.pos_side.as_str() {
                    "long" => PositionSide::Long,
                    "short" => PositionSide::Short,
                    _ => PositionSide::Net,
                },
                limit_price: o.px.parse().unwrap_or(0.0),
                order_type: o.ord_type,
                order_id: o.ord_id,
            })
            .collect();

        Ok(orders)
    }

    async fn cancel_order(&self, instrument: &str, order_id: &str) -> Result<(), ApiError> {
        let body = json!({
            "instId": instrument,
            "ordId": order_id,
        });
        let response = self
            .signed_request(reqwest::Method::POST, "/api/v5/trade/cancel-order", Some(body))
            .await?;
        let results: Vec<OkxOrderResultRaw> = Self::decode(response).await?;

        // Per-order status sits inside the data array.
        if let Some(result) = results.first() {
            if !result.s_code.is_empty() && result.s_code != "0" {
                return Err(ApiError::exchange(&result.s_code, &result.s_msg));
            }
        }

        tracing::info!(instrument, order_id, "order canceled");
        Ok(())
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, ApiError> {
        let body = json!({
            "instId": intent.instrument,
            "tdMode": "cross",
            "side": intent.side.as_str(),
            "ordType": "limit",
            "px": fmt_decimal(intent.limit_price),
            "sz": fmt_decimal(intent.size),
            "clOrdId": intent.client_order_id,
            "posSide": intent.position_side.as_str(),
            "attachAlgoOrds": [{
                "attachAlgoClOrdId": OrderIntent::generate_client_id("A"),
                "tpTriggerPx": fmt_decimal(intent.take_profit_trigger),
                "tpOrdPx": "-1",
                "tpOrdKind": "condition",
                "slTriggerPx": fmt_decimal(intent.stop_loss_trigger),
                "slOrdPx": "-1",
                "tpTriggerPxType": "last",
                "slTriggerPxType": "last",
            }],
        });

        tracing::debug!(body = %body, "submitting order");

        let response = self
            .signed_request(reqwest::Method::POST, "/api/v5/trade/order", Some(body))
            .await?;
        let results: Vec<OkxOrderResultRaw> = Self::decode(response).await?;

        let result = results
            .first()
            .ok_or_else(|| ApiError::Decode("empty order placement response".to_string()))?;

        if !result.s_code.is_empty() && result.s_code != "0" {
            return Err(ApiError::exchange(&result.s_code, &result.s_msg));
        }

        tracing::info!(
            instrument = %intent.instrument,
            order_id = %result.ord_id,
            client_order_id = %intent.client_order_id,
            "order placed"
        );

        Ok(OrderAck {
            order_id: result.ord_id.clone(),
        })
    }
}
