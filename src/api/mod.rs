//! External collaborators: exchange, signal inbox, chat notifications and
//! currency conversion.
//!
//! The trading core only sees the traits defined here; the HTTP clients are
//! the production implementations.

mod bybit;
mod exchange_rate;
mod mailgun;
mod telegram;
mod types;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{Command, SignalRecord};

pub use bybit::{BybitClient, BybitCredentials, BYBIT_URL};
pub use exchange_rate::ExchangeRateConverter;
pub use mailgun::{MailgunClient, MAILGUN_URL};
pub use telegram::{LogNotifier, RateLimitedNotifier, TelegramNotifier};

/// Exchange acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: Option<String>,
    pub message: String,
}

/// Order placement and market/wallet queries.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit a market order for `quantity` base units.
    async fn place_order(&self, symbol: &str, side: Command, quantity: Decimal) -> Result<OrderAck>;

    /// Last traded price of `symbol`.
    async fn get_price(&self, symbol: &str) -> Result<Decimal>;

    /// Balance of `asset` available for trading.
    async fn get_wallet_available(&self, asset: &str) -> Result<Decimal>;

    /// Minimum precision (decimal digits) of `asset`.
    async fn get_min_precision(&self, asset: &str) -> Result<u32>;

    /// Whether authenticated calls (orders, wallet) are possible.
    fn can_trade(&self) -> bool {
        true
    }
}

/// Inbox-like source of raw signal text.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Most recent raw signal for `listener`, if any.
    async fn latest_signal(&self, listener: &str) -> Result<Option<String>>;

    /// Up to `limit` recent signals for `listener`, newest first.
    async fn recent_signals(&self, listener: &str, limit: u32) -> Result<Vec<SignalRecord>>;
}

/// Best-effort delivery of human-readable messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was delivered.
    async fn send(&self, text: &str) -> bool;
}

/// USD to RUB conversion used by status reports.
#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn usd_to_rub(&self, amount: Decimal) -> Decimal;
}
