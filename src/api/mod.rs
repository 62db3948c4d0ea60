// Exchange-facing ports and the OKX REST implementation
pub mod okx;

pub use okx::OkxClient;

use async_trait::async_trait;

use crate::models::{Candle, OrderAck, OrderIntent, PendingOrder};

/// Errors surfaced by the exchange ports.
///
/// `Exchange` carries the raw reason code and message so failure
/// notifications can include the exchange's own diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange rejected request: code={code} msg={msg}")]
    Exchange { code: String, msg: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("request signing failed: {0}")]
    Signing(String),
}

impl ApiError {
    pub fn exchange(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Exchange {
            code: code.into(),
            msg: msg.into(),
        }
    }
}

/// Market-data port: recent candles for one instrument/interval pair.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `limit` candles, newest first (the exchange wire order).
    async fn recent_candles(
        &self,
        instrument: &str,
        bar: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ApiError>;
}

/// Trading port driven by the order lifecycle.
#[async_trait]
pub trait TradingApi: Send + Sync {
    /// Live (unfilled, uncanceled) orders for the instrument.
    async fn pending_orders(&self, instrument: &str) -> Result<Vec<PendingOrder>, ApiError>;

    /// Cancel one order. A non-"0" exchange code is a failure even on
    /// HTTP 200.
    async fn cancel_order(&self, instrument: &str, order_id: &str) -> Result<(), ApiError>;

    /// Place an entry order with its attached bracket.
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, ApiError>;
}
