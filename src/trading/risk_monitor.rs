//! Stop-loss / take-profit monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ExchangeGateway, Notifier};
use crate::models::{Command, RiskLimits, RiskParameter};

use super::{EngineSettings, ExecutionEngine, ExecutionReport, PauseGate, TradingError};

/// `current <= reference * (1 - stop_loss / 100)`, disabled at zero.
pub fn stop_loss_hit(reference: Decimal, current: Decimal, stop_loss_percent: Decimal) -> bool {
    stop_loss_percent > Decimal::ZERO
        && current <= reference * (Decimal::ONE - stop_loss_percent / dec!(100))
}

/// `current >= reference * (1 + take_profit / 100)`, disabled at zero.
pub fn take_profit_hit(reference: Decimal, current: Decimal, take_profit_percent: Decimal) -> bool {
    take_profit_percent > Decimal::ZERO
        && current >= reference * (Decimal::ONE + take_profit_percent / dec!(100))
}

/// A threshold that fired and the forced sell it caused.
#[derive(Debug)]
pub struct RiskTrigger {
    pub parameter: RiskParameter,
    pub percent: Decimal,
    pub result: Result<ExecutionReport, TradingError>,
}

pub struct RiskMonitor {
    engine: Arc<ExecutionEngine>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    pause: Arc<PauseGate>,
    running: Arc<AtomicBool>,
    limits: watch::Receiver<RiskLimits>,
    settings: EngineSettings,
}

impl RiskMonitor {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        pause: Arc<PauseGate>,
        running: Arc<AtomicBool>,
        limits: watch::Receiver<RiskLimits>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            engine,
            gateway,
            notifier,
            pause,
            running,
            limits,
            settings,
        }
    }

    pub async fn run(self) {
        let name = self.engine.config().name.clone();
        info!(instance = %name, "Risk monitor started");

        while self.running.load(Ordering::SeqCst) {
            self.pause.wait_until_open().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.tick().await {
                Ok(triggers) => {
                    for trigger in &triggers {
                        match &trigger.result {
                            Ok(report) => info!(
                                instance = %name,
                                parameter = trigger.parameter.as_str(),
                                percent = %trigger.percent,
                                quantity = %report.quantity,
                                price = %report.price,
                                "Risk limit sell executed"
                            ),
                            Err(e) => warn!(
                                instance = %name,
                                parameter = trigger.parameter.as_str(),
                                percent = %trigger.percent,
                                error = %e,
                                "Risk limit sell failed"
                            ),
                        }
                    }
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "Risk check failed");
                    self.notifier
                        .send(&format!("_{}_ Risk check failed: {}", name, e))
                        .await;
                }
            }

            tokio::time::sleep(self.settings.risk_poll_interval).await;
        }

        info!(instance = %name, "Risk monitor stopped");
    }

    /// Read the price once and evaluate both thresholds against it.
    ///
    /// Both checks run even if the first one fired; each reads the
    /// reference price afresh.
    pub async fn tick(&self) -> Result<Vec<RiskTrigger>, TradingError> {
        let symbol = &self.engine.config().symbol;
        let current = self
            .gateway
            .get_price(symbol)
            .await
            .map_err(|e| TradingError::PriceUnavailable(e.to_string()))?;

        let mut triggers = Vec::new();
        for parameter in [RiskParameter::StopLoss, RiskParameter::TakeProfit] {
            if let Some(trigger) = self.check(parameter, current).await {
                triggers.push(trigger);
            }
        }

        Ok(triggers)
    }

    async fn check(&self, parameter: RiskParameter, current: Decimal) -> Option<RiskTrigger> {
        let reference = {
            let state = self.engine.lock().await;
            if !state.ledger.has_reference() {
                return None;
            }
            state.ledger.last_price()
        };

        let limits = *self.limits.borrow();
        let config = self.engine.config();
        let (percent, text) = match parameter {
            RiskParameter::StopLoss => {
                let pct = limits.stop_loss_percent;
                if !stop_loss_hit(reference, current, pct) {
                    return None;
                }
                (pct, format!("_{}_ *Stop LOSS* 🔴! : hit by *{}%*", config.name, pct))
            }
            RiskParameter::TakeProfit => {
                let pct = limits.take_profit_percent;
                if !take_profit_hit(reference, current, pct) {
                    return None;
                }
                (pct, format!("_{}_ *TAKE PROFIT* 🟦 ! : hit by *{}%*", config.name, pct))
            }
        };

        debug!(
            instance = %config.name,
            parameter = parameter.as_str(),
            reference = %reference,
            current = %current,
            "Threshold crossed"
        );
        self.notifier.send(&text).await;

        let result = self.engine.execute_and_skip_next(Command::Sell).await;
        Some(RiskTrigger {
            parameter,
            percent,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mode;
    use crate::trading::testing::{engine_for, FakeExchange, RecordingNotifier};
    use crate::trading::Ledger;

    #[test]
    fn test_stop_loss_threshold() {
        assert!(stop_loss_hit(dec!(100), dec!(94), dec!(5)));
        assert!(stop_loss_hit(dec!(100), dec!(95), dec!(5)));
        assert!(!stop_loss_hit(dec!(100), dec!(96), dec!(5)));
        assert!(!stop_loss_hit(dec!(100), dec!(1), Decimal::ZERO));
    }

    #[test]
    fn test_take_profit_threshold() {
        assert!(take_profit_hit(dec!(100), dec!(106), dec!(5)));
        assert!(take_profit_hit(dec!(100), dec!(105), dec!(5)));
        assert!(!take_profit_hit(dec!(100), dec!(104), dec!(5)));
        assert!(!take_profit_hit(dec!(100), dec!(1000), Decimal::ZERO));
    }

    struct Harness {
        exchange: Arc<FakeExchange>,
        notifier: Arc<RecordingNotifier>,
        engine: Arc<ExecutionEngine>,
        limits: watch::Sender<RiskLimits>,
        running: Arc<AtomicBool>,
        monitor: RiskMonitor,
    }

    fn harness(ledger: Ledger, limits: RiskLimits) -> Harness {
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(engine_for(Mode::Simulation, exchange.clone(), notifier.clone(), ledger));
        let (limits, rx) = watch::channel(limits);
        let running = Arc::new(AtomicBool::new(true));
        let monitor = RiskMonitor::new(
            engine.clone(),
            exchange.clone(),
            notifier.clone(),
            Arc::new(PauseGate::new()),
            running.clone(),
            rx,
            EngineSettings::fast(),
        );
        Harness {
            exchange,
            notifier,
            engine,
            limits,
            running,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_stop_loss_forces_sell_and_arms_skip() {
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(5), dec!(5)),
        );
        h.exchange.set_price(dec!(94));

        let triggers = h.monitor.tick().await.unwrap();

        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].parameter, RiskParameter::StopLoss);
        assert!(triggers[0].result.is_ok());
        assert_eq!(h.notifier.count_containing("*Stop LOSS*"), 1);

        let state = h.engine.lock().await;
        assert!(state.skip_next_signal.is_armed());
        assert_eq!(state.ledger.last_price(), dec!(94));
        assert_eq!(state.ledger.losses(), 1);
    }

    #[tokio::test]
    async fn test_inside_band_does_nothing() {
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(5), dec!(5)),
        );
        h.exchange.set_price(dec!(104));

        assert!(h.monitor.tick().await.unwrap().is_empty());
        assert!(h.notifier.messages().is_empty());
        assert!(!h.engine.lock().await.skip_next_signal.is_armed());
    }

    #[tokio::test]
    async fn test_broadcast_limits_apply_on_next_tick() {
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(5), dec!(5)),
        );
        h.exchange.set_price(dec!(104));
        assert!(h.monitor.tick().await.unwrap().is_empty());

        h.limits.send_modify(|l| *l = l.with(RiskParameter::TakeProfit, dec!(3)));

        let triggers = h.monitor.tick().await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].parameter, RiskParameter::TakeProfit);
        assert_eq!(h.notifier.count_containing("*TAKE PROFIT*"), 1);
        assert_eq!(h.engine.lock().await.ledger.wins(), 1);
    }

    #[tokio::test]
    async fn test_no_reference_skips_checks() {
        let h = harness(Ledger::new(), RiskLimits::new(dec!(5), dec!(5)));
        h.exchange.set_price(dec!(1));

        assert!(h.monitor.tick().await.unwrap().is_empty());
        assert_eq!(h.engine.lock().await.ledger.order_counter(), 0);
    }

    #[tokio::test]
    async fn test_price_failure_is_typed() {
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(5), dec!(5)),
        );
        h.exchange.fail_prices(true);

        let err = h.monitor.tick().await.unwrap_err();
        assert!(matches!(err, TradingError::PriceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_run_notifies_each_failed_check() {
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(5), dec!(5)),
        );
        h.exchange.fail_prices(true);

        let task = tokio::spawn(h.monitor.run());
        tokio::time::sleep(std::time::Duration::from_millis(70)).await;
        h.running.store(false, Ordering::SeqCst);
        task.await.unwrap();

        let failures = h.notifier.count_containing("_alpha_ Risk check failed");
        assert!(failures >= 2, "one notification per failed check, got {}", failures);
        assert_eq!(failures, h.exchange.price_calls());

        let state = h.engine.lock().await;
        assert_eq!(state.ledger.order_counter(), 0);
        assert!(!state.skip_next_signal.is_armed());
    }

    #[tokio::test]
    async fn test_both_thresholds_evaluated_in_one_tick() {
        // Degenerate setup: the forced stop-loss sell fills at a price that
        // crosses the take-profit band of the new reference.
        let h = harness(
            Ledger::with_reference(dec!(100), Command::Buy),
            RiskLimits::new(dec!(1), dec!(5)),
        );
        h.exchange.set_price(dec!(90));
        h.exchange.push_prices(&[dec!(90), dec!(80)]);

        let triggers = h.monitor.tick().await.unwrap();

        let kinds: Vec<_> = triggers.iter().map(|t| t.parameter).collect();
        assert_eq!(kinds, vec![RiskParameter::StopLoss, RiskParameter::TakeProfit]);
        assert_eq!(h.engine.lock().await.ledger.order_counter(), 2);
    }
}
