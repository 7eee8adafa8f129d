//! Bybit v5 REST client implementing the exchange gateway.
//!
//! Public market data needs no credentials. Wallet, coin info and order
//! placement are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + payload`.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, info};

use crate::models::Command;

use super::types::*;
use super::{ExchangeGateway, OrderAck};

pub const BYBIT_URL: &str = "https://api.bybit.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// API key pair for private endpoints.
#[derive(Clone)]
pub struct BybitCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for BybitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Spot trading client for Bybit's unified account.
pub struct BybitClient {
    http: Client,
    base_url: String,
    credentials: Option<BybitCredentials>,
    recv_window: u64,
}

impl BybitClient {
    /// Create a client. Without credentials only public endpoints work.
    pub fn with_base_url(
        base_url: String,
        credentials: Option<BybitCredentials>,
        recv_window: u64,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window,
        })
    }

    fn credentials(&self) -> Result<&BybitCredentials> {
        self.credentials
            .as_ref()
            .context("Bybit API credentials not configured")
    }

    fn build_signed_headers(&self, payload: &str) -> Result<HeaderMap> {
        let creds = self.credentials()?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let recv_window = self.recv_window.to_string();

        let signature = sign(&creds.api_secret, &timestamp, &creds.api_key, &recv_window, payload)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-BAPI-API-KEY",
            HeaderValue::from_str(&creds.api_key).context("Invalid API key header value")?,
        );
        headers.insert("X-BAPI-TIMESTAMP", HeaderValue::from_str(&timestamp)?);
        headers.insert("X-BAPI-RECV-WINDOW", HeaderValue::from_str(&recv_window)?);
        headers.insert("X-BAPI-SIGN", HeaderValue::from_str(&signature)?);
        Ok(headers)
    }

    async fn get_public<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "Bybit public request");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", path))?;

        unwrap_envelope(response, path).await
    }

    async fn get_private<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<T> {
        let headers = self.build_signed_headers(query)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(url = %url, "Bybit private request");

        let response = self
            .http
            .get(&url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", path))?;

        unwrap_envelope(response, path).await
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let tickers: TickerList = self
            .get_public("/v5/market/tickers", &format!("category=spot&symbol={}", symbol))
            .await?;

        let ticker = tickers
            .list
            .into_iter()
            .find(|t| t.symbol == symbol)
            .ok_or_else(|| anyhow!("No ticker returned for {}", symbol))?;

        Decimal::from_str(&ticker.last_price)
            .with_context(|| format!("Invalid lastPrice '{}'", ticker.last_price))
    }
}

#[async_trait]
impl ExchangeGateway for BybitClient {
    async fn place_order(&self, symbol: &str, side: Command, quantity: Decimal) -> Result<OrderAck> {
        let request = CreateOrderRequest {
            category: "spot".to_string(),
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            order_type: "Market".to_string(),
            qty: quantity.normalize().to_string(),
            market_unit: "baseCoin".to_string(),
            order_link_id: uuid::Uuid::new_v4().simple().to_string(),
        };
        let body = serde_json::to_string(&request)?;
        let headers = self.build_signed_headers(&body)?;

        let response = self
            .http
            .post(format!("{}/v5/order/create", self.base_url))
            .headers(headers)
            .body(body)
            .send()
            .await
            .context("Failed to submit order")?;

        let status = response.status();
        let envelope: BybitResponse<CreateOrderResult> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse order response ({})", status))?;

        if envelope.ret_code != 0 {
            bail!("{} (retCode {})", envelope.ret_msg, envelope.ret_code);
        }

        let order_id = envelope
            .result
            .map(|r| r.order_id)
            .filter(|id| !id.is_empty());

        info!(symbol = %symbol, side = %side, qty = %quantity, order_id = ?order_id, "Order accepted");

        Ok(OrderAck {
            order_id,
            message: envelope.ret_msg,
        })
    }

    async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        retry(policy, || async move {
            self.fetch_price(symbol).await.map_err(backoff::Error::transient)
        })
        .await
    }

    async fn get_wallet_available(&self, asset: &str) -> Result<Decimal> {
        let balances: WalletBalanceList = self
            .get_private("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;

        let coin = balances
            .list
            .first()
            .and_then(|account| account.coin.iter().find(|c| c.coin == asset));

        match coin {
            Some(c) if !c.available_to_withdraw.is_empty() => {
                Decimal::from_str(&c.available_to_withdraw)
                    .with_context(|| format!("Invalid balance '{}'", c.available_to_withdraw))
            }
            _ => Ok(Decimal::ZERO),
        }
    }

    async fn get_min_precision(&self, asset: &str) -> Result<u32> {
        let info: CoinInfoList = self
            .get_private("/v5/asset/coin/query-info", &format!("coin={}", asset))
            .await?;

        let accuracy = info
            .rows
            .first()
            .and_then(|row| row.chains.first())
            .map(|chain| chain.min_accuracy.clone())
            .ok_or_else(|| anyhow!("No chain info for {}", asset))?;

        accuracy
            .parse()
            .with_context(|| format!("Invalid minAccuracy '{}'", accuracy))
    }

    fn can_trade(&self) -> bool {
        self.credentials.is_some()
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("{} request failed: {} - {}", path, status, body);
    }

    let envelope: BybitResponse<T> = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", path))?;

    if envelope.ret_code != 0 {
        bail!("{} returned {} (retCode {})", path, envelope.ret_msg, envelope.ret_code);
    }

    envelope
        .result
        .ok_or_else(|| anyhow!("{} returned no result", path))
}

/// Hex HMAC-SHA256 request signature.
fn sign(secret: &str, timestamp: &str, api_key: &str, recv_window: &str, payload: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("Failed to initialize HMAC for Bybit signature")?;
    mac.update(timestamp.as_bytes());
    mac.update(api_key.as_bytes());
    mac.update(recv_window.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
