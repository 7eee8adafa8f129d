//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::{CurrencyConverter, ExchangeGateway, Notifier, OrderAck, SignalSource};
use crate::db::NoopJournal;
use crate::models::{Command, InstanceConfig, Mode, RiskLimits, SignalRecord};

use super::{ExecutionEngine, Ledger, RateLimiter, TradingState};

/// Scripted exchange. Prices are served from a queue, repeating the last
/// one once the queue runs dry.
#[derive(Default)]
pub struct FakeExchange {
    prices: Mutex<VecDeque<Decimal>>,
    last_price: Mutex<Decimal>,
    fail_prices: AtomicBool,
    reject: Mutex<Option<String>>,
    wallet: Mutex<(Decimal, u32)>,
    order_delay: Mutex<Duration>,
    orders: Mutex<Vec<(Command, Decimal)>>,
    price_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeExchange {
    pub fn with_price(price: Decimal) -> Self {
        let exchange = Self::default();
        *exchange.last_price.lock().unwrap() = price;
        *exchange.wallet.lock().unwrap() = (dec!(1), 8);
        exchange
    }

    /// Queue prices served by the next `get_price` calls.
    pub fn push_prices(&self, prices: &[Decimal]) {
        self.prices.lock().unwrap().extend(prices.iter().copied());
    }

    pub fn set_price(&self, price: Decimal) {
        self.prices.lock().unwrap().clear();
        *self.last_price.lock().unwrap() = price;
    }

    pub fn fail_prices(&self, fail: bool) {
        self.fail_prices.store(fail, Ordering::SeqCst);
    }

    pub fn reject_orders(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_wallet(&self, available: Decimal, precision: u32) {
        *self.wallet.lock().unwrap() = (available, precision);
    }

    pub fn set_order_delay(&self, delay: Duration) {
        *self.order_delay.lock().unwrap() = delay;
    }

    pub fn orders(&self) -> Vec<(Command, Decimal)> {
        self.orders.lock().unwrap().clone()
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_orders(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeGateway for FakeExchange {
    async fn place_order(&self, _symbol: &str, side: Command, quantity: Decimal) -> Result<OrderAck> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.order_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.orders.lock().unwrap().push((side, quantity));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.reject.lock().unwrap().clone() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(OrderAck {
                order_id: Some(format!("fake-{}", self.orders.lock().unwrap().len())),
                message: "OK".to_string(),
            }),
        }
    }

    async fn get_price(&self, _symbol: &str) -> Result<Decimal> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_prices.load(Ordering::SeqCst) {
            return Err(anyhow!("ticker unavailable"));
        }

        let mut last = self.last_price.lock().unwrap();
        if let Some(next) = self.prices.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    async fn get_wallet_available(&self, _asset: &str) -> Result<Decimal> {
        Ok(self.wallet.lock().unwrap().0)
    }

    async fn get_min_precision(&self, _asset: &str) -> Result<u32> {
        Ok(self.wallet.lock().unwrap().1)
    }
}

/// Signal inbox whose latest message is set by the test.
#[derive(Default)]
pub struct FakeSignals {
    latest: Mutex<Option<String>>,
    history: Mutex<Vec<SignalRecord>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeSignals {
    pub fn set(&self, text: &str) {
        *self.latest.lock().unwrap() = Some(text.to_string());
        self.history.lock().unwrap().insert(
            0,
            SignalRecord {
                text: text.to_string(),
                received_at: Utc::now(),
            },
        );
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalSource for FakeSignals {
    async fn latest_signal(&self, _listener: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("inbox unreachable"));
        }
        Ok(self.latest.lock().unwrap().clone())
    }

    async fn recent_signals(&self, _listener: &str, limit: u32) -> Result<Vec<SignalRecord>> {
        let history = self.history.lock().unwrap();
        Ok(history.iter().take(limit as usize).cloned().collect())
    }
}

/// Notifier that keeps every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> bool {
        self.messages.lock().unwrap().push(text.to_string());
        true
    }
}

/// Converter with a fixed rate.
pub struct FixedRate(pub Decimal);

#[async_trait]
impl CurrencyConverter for FixedRate {
    async fn usd_to_rub(&self, amount: Decimal) -> Decimal {
        amount * self.0
    }
}

pub fn test_config(mode: Mode) -> InstanceConfig {
    InstanceConfig {
        name: "alpha".to_string(),
        symbol: "BTCUSDT".to_string(),
        amount: dec!(0.5),
        mode,
        listener: "alpha".to_string(),
        initial_limits: RiskLimits::new(dec!(5), dec!(5)),
    }
}

pub fn engine_for(
    mode: Mode,
    exchange: Arc<FakeExchange>,
    notifier: Arc<RecordingNotifier>,
    ledger: Ledger,
) -> ExecutionEngine {
    ExecutionEngine::new(
        Arc::new(test_config(mode)),
        exchange,
        notifier,
        Arc::new(NoopJournal),
        RateLimiter::per_second("orders", 1000),
        TradingState::new(ledger),
    )
}
