//! Wire types for the Bybit, Mailgun, Telegram and exchange-rate APIs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Envelope of every Bybit v5 response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitResponse<T> {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    pub result: Option<T>,
}

/// Result of /v5/market/tickers.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerList {
    #[serde(default)]
    pub list: Vec<Ticker>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_price: String,
}

/// Result of /v5/account/wallet-balance.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletBalanceList {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletAccount {
    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCoin {
    pub coin: String,
    #[serde(default)]
    pub available_to_withdraw: String,
}

/// Result of /v5/asset/coin/query-info.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinInfoList {
    #[serde(default)]
    pub rows: Vec<CoinInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinInfo {
    #[serde(default)]
    pub chains: Vec<CoinChain>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinChain {
    pub min_accuracy: String,
}

/// Body of /v5/order/create.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    pub market_unit: String,
    pub order_link_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResult {
    #[serde(default)]
    pub order_id: String,
}

/// Page of Mailgun events.
#[derive(Debug, Clone, Deserialize)]
pub struct MailgunEvents {
    #[serde(default)]
    pub items: Vec<MailgunEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunEvent {
    pub timestamp: f64,
    pub storage: Option<MailgunStorage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunStorage {
    pub key: String,
    #[serde(default)]
    pub url: String,
}

/// Stored Mailgun message (only the fields we read).
#[derive(Debug, Clone, Deserialize)]
pub struct StoredMessage {
    #[serde(rename = "body-plain", default)]
    pub body_plain: Option<String>,
}

/// Telegram sendMessage request.
#[derive(Debug, Clone, Serialize)]
pub struct TelegramMessage<'a> {
    pub chat_id: &'a str,
    pub text: &'a str,
    pub parse_mode: &'a str,
}

/// Response of the exchange-rate API's /latest endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRateResponse {
    #[serde(default)]
    pub conversion_rates: HashMap<String, f64>,
}
