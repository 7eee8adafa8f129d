//! Order execution engine: the single choke point through which both loops
//! and manual triggers place orders.
//!
//! Handles:
//! - Serializing executions per instance (the execution mutex)
//! - Sizing the order (fixed amount, or truncated wallet balance for real sells)
//! - Submitting the order and reading the post-order price
//! - Updating the ledger, notifying and journaling

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::api::{ExchangeGateway, Notifier, OrderAck};
use crate::db::{ExecutionJournal, ExecutionRecord, ExecutionStatus};
use crate::models::{Command, InstanceConfig};

use super::{RateLimiter, TradingError, TradingState};

/// Offset used for notification timestamps (UTC+7).
const NOTIFY_OFFSET_SECS: i32 = 7 * 3600;

/// Result of a successful execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub command: Command,
    pub quantity: Decimal,
    pub price: Decimal,
    pub reference_price: Decimal,
    /// Percentage change realized by a sell
    pub realized_percent: Option<Decimal>,
    pub accumulated_percent: Decimal,
    pub order: OrderAck,
    pub executed_at: DateTime<FixedOffset>,
}

/// Per-instance execution engine.
pub struct ExecutionEngine {
    config: Arc<InstanceConfig>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn ExecutionJournal>,
    limiter: RateLimiter,
    state: Mutex<TradingState>,
}

impl ExecutionEngine {
    pub fn new(
        config: Arc<InstanceConfig>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn ExecutionJournal>,
        limiter: RateLimiter,
        state: TradingState,
    ) -> Self {
        Self {
            config,
            gateway,
            notifier,
            journal,
            limiter,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Acquire the execution mutex.
    pub async fn lock(&self) -> MutexGuard<'_, TradingState> {
        self.state.lock().await
    }

    /// Execute `command` under the execution mutex.
    pub async fn execute(&self, command: Command) -> Result<ExecutionReport, TradingError> {
        let mut state = self.lock().await;
        self.execute_locked(&mut state, command).await
    }

    /// Execute `command`, then arm skip-next-signal whatever the outcome.
    ///
    /// Used by forced sells and manual triggers so the signal loop absorbs
    /// the matching transition instead of trading it again. The last
    /// observed signal is kept as it was: the forced order did not come
    /// from the inbox.
    pub async fn execute_and_skip_next(
        &self,
        command: Command,
    ) -> Result<ExecutionReport, TradingError> {
        let mut state = self.lock().await;
        let observed = state.ledger.last_command();
        let result = self.execute_locked(&mut state, command).await;
        state.ledger.set_last_command(observed);
        state.skip_next_signal.arm();
        result
    }

    /// Execute with the mutex already held by the caller.
    pub async fn execute_locked(
        &self,
        state: &mut TradingState,
        command: Command,
    ) -> Result<ExecutionReport, TradingError> {
        self.limiter.acquire().await;

        let reference_price = state.ledger.last_price();

        let quantity = match self.order_quantity(command).await {
            Ok(quantity) => quantity,
            Err(e) => return Err(self.fail(command, None, reference_price, e).await),
        };

        let order = match self.submit(command, quantity).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.fail(command, Some(quantity), reference_price, e).await),
        };

        // The fill price is read separately from the submission.
        let price = match self.gateway.get_price(&self.config.symbol).await {
            Ok(price) => price,
            Err(e) => {
                let err = TradingError::PriceUnavailable(e.to_string());
                return Err(self.fail(command, Some(quantity), reference_price, err).await);
            }
        };

        let realized_percent = match command {
            Command::Buy => {
                state.ledger.record_buy(price);
                None
            }
            Command::Sell => match state.ledger.record_sell(price) {
                Ok(pct) => Some(pct),
                Err(e) => return Err(self.fail(command, Some(quantity), reference_price, e).await),
            },
        };

        let report = ExecutionReport {
            command,
            quantity,
            price,
            reference_price,
            realized_percent,
            accumulated_percent: state.ledger.accumulated_percentage_change(),
            order,
            executed_at: notification_time(),
        };

        info!(
            instance = %self.config.name,
            side = %command,
            symbol = %self.config.symbol,
            quantity = %quantity,
            price = %price,
            reference = %reference_price,
            orders = state.ledger.order_counter(),
            order_id = report.order.order_id.as_deref().unwrap_or("-"),
            ack = %report.order.message,
            "Order executed"
        );

        self.notifier.send(&self.success_message(&report)).await;
        self.journal
            .record_execution(&ExecutionRecord {
                instance: self.config.name.clone(),
                side: command,
                quantity: Some(quantity),
                price: Some(price),
                reference_price,
                realized_percent,
                status: ExecutionStatus::Executed,
                error: None,
                executed_at: Utc::now(),
            })
            .await;

        Ok(report)
    }

    /// Quantity to trade for `command`.
    async fn order_quantity(&self, command: Command) -> Result<Decimal, TradingError> {
        if command == Command::Buy || self.config.mode.is_simulation() {
            return Ok(self.config.amount);
        }

        let asset = self.config.base_asset().ok_or_else(|| {
            TradingError::GatewayRejected(format!("cannot derive base asset of {}", self.config.symbol))
        })?;

        let precision = self
            .gateway
            .get_min_precision(asset)
            .await
            .map_err(|e| TradingError::GatewayRejected(format!("precision lookup failed: {}", e)))?;
        let available = self
            .gateway
            .get_wallet_available(asset)
            .await
            .map_err(|e| TradingError::GatewayRejected(format!("balance lookup failed: {}", e)))?;

        let quantity = truncate_to_precision(available, precision);
        if quantity <= Decimal::ZERO {
            return Err(TradingError::GatewayRejected(format!(
                "no {} balance available to sell",
                asset
            )));
        }

        Ok(quantity)
    }

    async fn submit(&self, command: Command, quantity: Decimal) -> Result<OrderAck, TradingError> {
        if self.config.mode.is_simulation() {
            return Ok(OrderAck {
                order_id: None,
                message: "Simulation order placed".to_string(),
            });
        }

        self.gateway
            .place_order(&self.config.symbol, command, quantity)
            .await
            .map_err(|e| TradingError::GatewayRejected(e.to_string()))
    }

    /// Log, notify and journal a failed execution, returning the error.
    async fn fail(
        &self,
        command: Command,
        quantity: Option<Decimal>,
        reference_price: Decimal,
        err: TradingError,
    ) -> TradingError {
        error!(
            instance = %self.config.name,
            side = %command,
            mode = %self.config.mode,
            order_placed = err.order_placed(),
            error = %err,
            "Execution failed"
        );

        let text = if err.order_placed() {
            format!(
                "_{}_ *{} Mode* Unexpected error: {}",
                self.config.name, self.config.mode, err
            )
        } else {
            format!("_{}_ *{} Mode* : {}", self.config.name, self.config.mode, err)
        };
        self.notifier.send(&text).await;

        self.journal
            .record_execution(&ExecutionRecord {
                instance: self.config.name.clone(),
                side: command,
                quantity,
                price: None,
                reference_price,
                realized_percent: None,
                status: ExecutionStatus::Failed,
                error: Some(err.to_string()),
                executed_at: Utc::now(),
            })
            .await;

        err
    }

    fn success_message(&self, report: &ExecutionReport) -> String {
        let time = report.executed_at.format("%Y-%m-%d %H:%M:%S");
        match report.realized_percent {
            Some(pct) => {
                let result = if pct > Decimal::ZERO {
                    format!("☘☘ Profit: +{:.2}%", pct)
                } else {
                    format!("❗❗ Loss: {:.2}%", pct)
                };
                format!(
                    "_{}_ Executed `{}` {} at price *{}* . last price : *{}* . _{}_ || all time : *{:.2}%* || Time : *{}* ",
                    self.config.name,
                    report.command,
                    self.config.symbol,
                    report.price,
                    report.reference_price,
                    result,
                    report.accumulated_percent,
                    time
                )
            }
            None => format!(
                "_{}_ Executed `{}` {} at price *{}* . last price : *{}* || Time : *{}*",
                self.config.name,
                report.command,
                self.config.symbol,
                report.price,
                report.reference_price,
                time
            ),
        }
    }
}

/// Truncate (never round) `value` to an instrument precision.
///
/// Precisions above 4 digits are reduced by 2, matching the exchange's
/// effective lot step for high-precision coins.
pub fn truncate_to_precision(value: Decimal, precision: u32) -> Decimal {
    let digits = if precision > 4 { precision - 2 } else { precision };
    value.round_dp_with_strategy(digits, RoundingStrategy::ToZero)
}

/// Current time in the notification offset.
pub fn notification_time() -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(NOTIFY_OFFSET_SECS).expect("UTC+7 is a valid offset");
    Utc::now().with_timezone(&offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;
    use crate::trading::testing::{engine_for, FakeExchange, RecordingNotifier};
    use crate::trading::Ledger;
    use rust_decimal_macros::dec;

    #[test]
    fn test_truncate_high_precision() {
        assert_eq!(truncate_to_precision(dec!(12.34567), 6), dec!(12.3456));
        assert_eq!(truncate_to_precision(dec!(0.99999999), 8), dec!(0.999999));
    }

    #[test]
    fn test_truncate_low_precision_never_rounds_up() {
        assert_eq!(truncate_to_precision(dec!(1.23459), 4), dec!(1.2345));
        assert_eq!(truncate_to_precision(dec!(7.9), 0), dec!(7));
        assert_eq!(truncate_to_precision(dec!(0.129), 2), dec!(0.12));
    }

    #[test]
    fn test_notification_time_offset() {
        assert_eq!(notification_time().offset().local_minus_utc(), 7 * 3600);
    }

    #[tokio::test]
    async fn test_simulated_buy_updates_ledger() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_for(Mode::Simulation, exchange.clone(), notifier.clone(), Ledger::new());

        let report = engine.execute(Command::Buy).await.unwrap();

        assert_eq!(report.price, dec!(100));
        assert_eq!(report.quantity, dec!(0.5));
        assert_eq!(exchange.orders().len(), 0, "simulation must not submit orders");

        let state = engine.lock().await;
        assert_eq!(state.ledger.last_price(), dec!(100));
        assert_eq!(state.ledger.order_counter(), 1);
        assert_eq!(notifier.messages().len(), 1);
        assert!(notifier.messages()[0].contains("Executed `Buy` BTCUSDT at price *100*"));
    }

    #[tokio::test]
    async fn test_real_sell_uses_truncated_balance() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(110)));
        exchange.set_wallet(dec!(12.34567), 6);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_for(
            Mode::Real,
            exchange.clone(),
            notifier.clone(),
            Ledger::with_reference(dec!(100), Command::Buy),
        );

        let report = engine.execute(Command::Sell).await.unwrap();

        assert_eq!(exchange.orders(), vec![(Command::Sell, dec!(12.3456))]);
        assert_eq!(report.realized_percent, Some(dec!(10)));
        assert!(notifier.messages()[0].contains("Profit: +10.00%"));

        let state = engine.lock().await;
        assert_eq!(state.ledger.wins(), 1);
        assert_eq!(state.ledger.accumulated_percentage_change(), dec!(10));
    }

    #[tokio::test]
    async fn test_real_buy_uses_fixed_amount() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        let engine = engine_for(
            Mode::Real,
            exchange.clone(),
            Arc::new(RecordingNotifier::default()),
            Ledger::new(),
        );

        engine.execute(Command::Buy).await.unwrap();
        assert_eq!(exchange.orders(), vec![(Command::Buy, dec!(0.5))]);
    }

    #[tokio::test]
    async fn test_rejected_order_leaves_ledger_untouched() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.reject_orders("Insufficient balance");
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_for(Mode::Real, exchange.clone(), notifier.clone(), Ledger::new());

        let err = engine.execute(Command::Buy).await.unwrap_err();

        assert!(matches!(err, TradingError::GatewayRejected(ref msg) if msg.contains("Insufficient")));
        assert_eq!(exchange.price_calls(), 0);
        let state = engine.lock().await;
        assert_eq!(state.ledger.order_counter(), 0);
        assert_eq!(state.ledger.last_command(), Command::Sell);
        assert_eq!(notifier.messages().len(), 1);
        assert!(notifier.messages()[0].contains("*Real Mode* :"));
    }

    #[tokio::test]
    async fn test_price_failure_after_order() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.fail_prices(true);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine_for(Mode::Real, exchange.clone(), notifier.clone(), Ledger::new());

        let err = engine.execute(Command::Buy).await.unwrap_err();

        assert!(matches!(err, TradingError::PriceUnavailable(_)));
        assert!(err.order_placed());
        assert_eq!(exchange.orders().len(), 1);
        assert_eq!(engine.lock().await.ledger.order_counter(), 0);
        assert!(notifier.messages()[0].contains("Unexpected error"));
    }

    #[tokio::test]
    async fn test_sell_without_reference_is_computation_error() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        let engine = engine_for(
            Mode::Simulation,
            exchange,
            Arc::new(RecordingNotifier::default()),
            Ledger::new(),
        );

        let err = engine.execute(Command::Sell).await.unwrap_err();
        assert!(matches!(err, TradingError::ComputationError { .. }));
        assert_eq!(engine.lock().await.ledger.order_counter(), 0);
    }

    #[tokio::test]
    async fn test_empty_wallet_is_rejected_before_submission() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.set_wallet(dec!(0.000009), 6);
        let engine = engine_for(
            Mode::Real,
            exchange.clone(),
            Arc::new(RecordingNotifier::default()),
            Ledger::with_reference(dec!(100), Command::Buy),
        );

        let err = engine.execute(Command::Sell).await.unwrap_err();
        assert!(matches!(err, TradingError::GatewayRejected(_)));
        assert!(exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_forced_execution_arms_skip_even_on_failure() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.reject_orders("down");
        let engine = engine_for(
            Mode::Real,
            exchange,
            Arc::new(RecordingNotifier::default()),
            Ledger::with_reference(dec!(100), Command::Buy),
        );

        assert!(engine.execute_and_skip_next(Command::Sell).await.is_err());
        assert!(engine.lock().await.skip_next_signal.is_armed());
    }

    #[tokio::test]
    async fn test_forced_execution_keeps_observed_signal() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(94)));
        let engine = engine_for(
            Mode::Simulation,
            exchange,
            Arc::new(RecordingNotifier::default()),
            Ledger::with_reference(dec!(100), Command::Buy),
        );

        engine.execute_and_skip_next(Command::Sell).await.unwrap();

        let state = engine.lock().await;
        assert_eq!(state.ledger.last_price(), dec!(94));
        assert_eq!(state.ledger.losses(), 1);
        assert_eq!(state.ledger.last_command(), Command::Buy);
        assert!(state.skip_next_signal.is_armed());
    }

    #[tokio::test]
    async fn test_concurrent_executions_are_serialized() {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.set_order_delay(std::time::Duration::from_millis(20));
        let engine = Arc::new(engine_for(
            Mode::Real,
            exchange.clone(),
            Arc::new(RecordingNotifier::default()),
            Ledger::new(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.execute(Command::Buy).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(exchange.max_concurrent_orders(), 1);
        assert_eq!(engine.lock().await.ledger.order_counter(), 4);
    }
}
