//! One trading agent: configuration, shared state and its two loops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{CurrencyConverter, ExchangeGateway, Notifier, SignalSource};
use crate::db::ExecutionJournal;
use crate::models::{Command, InstanceConfig, RiskLimits, RiskParameter, SignalRecord};

use super::status::{StatusInputs, StatusReport};
use super::{
    EngineSettings, ExecutionEngine, ExecutionReport, Ledger, LedgerSnapshot, PauseGate,
    RateLimiter, RiskMonitor, SignalLoop, TradingError, TradingState,
};

/// Collaborators shared by every instance of a registry.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub source: Arc<dyn SignalSource>,
    /// Already rate limited for the whole process
    pub notifier: Arc<dyn Notifier>,
    pub journal: Arc<dyn ExecutionJournal>,
    pub converter: Arc<dyn CurrencyConverter>,
}

pub struct TradingInstance {
    config: Arc<InstanceConfig>,
    engine: Arc<ExecutionEngine>,
    services: Services,
    settings: EngineSettings,
    pause: Arc<PauseGate>,
    limits: watch::Sender<RiskLimits>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for TradingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradingInstance")
            .field("name", &self.config.name)
            .field("symbol", &self.config.symbol)
            .field("mode", &self.config.mode)
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl TradingInstance {
    /// Build the instance and spawn its signal loop and risk monitor.
    pub async fn start(
        config: InstanceConfig,
        services: Services,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            services.gateway.clone(),
            services.notifier.clone(),
            services.journal.clone(),
            RateLimiter::per_second("orders", settings.calls_per_second),
            TradingState::new(Ledger::new()),
        ));
        let (limits, limits_rx) = watch::channel(config.initial_limits);

        let instance = Arc::new(Self {
            config: config.clone(),
            engine: engine.clone(),
            services: services.clone(),
            settings: settings.clone(),
            pause: Arc::new(PauseGate::new()),
            limits,
            running: Arc::new(AtomicBool::new(true)),
            tasks: Mutex::new(Vec::new()),
        });

        services
            .notifier
            .send(&format!(
                "BOT *{}* Started ```{} {} {} {} ```",
                config.name, config.symbol, config.amount, config.mode, config.listener
            ))
            .await;
        services.journal.record_instance_started(&config).await;

        let signal_loop = SignalLoop::new(
            engine.clone(),
            services.source.clone(),
            services.notifier.clone(),
            instance.pause.clone(),
            instance.running.clone(),
            settings.clone(),
        );
        let risk_monitor = RiskMonitor::new(
            engine,
            services.gateway.clone(),
            services.notifier.clone(),
            instance.pause.clone(),
            instance.running.clone(),
            limits_rx,
            settings,
        );

        {
            let mut tasks = instance.tasks.lock().await;
            tasks.push(tokio::spawn(signal_loop.run()));
            tasks.push(tokio::spawn(risk_monitor.run()));
        }

        info!(
            instance = %config.name,
            symbol = %config.symbol,
            mode = %config.mode,
            "Instance started"
        );

        instance
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn limits(&self) -> RiskLimits {
        *self.limits.borrow()
    }

    /// Update one risk threshold; the risk monitor sees it on its next tick.
    pub fn set_limit(&self, parameter: RiskParameter, value: Decimal) {
        self.limits.send_modify(|limits| *limits = limits.with(parameter, value));
        info!(
            instance = %self.config.name,
            parameter = parameter.as_str(),
            value = %value,
            "Risk limit updated"
        );
    }

    pub async fn pause(&self) {
        self.pause.pause();
        self.services
            .notifier
            .send(&format!("*{}* is Paused", self.config.name))
            .await;
    }

    pub async fn resume(&self) {
        self.pause.resume();
        self.services
            .notifier
            .send(&format!("*{}* is resumed", self.config.name))
            .await;
    }

    /// Ask both loops to exit at their next iteration boundary.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // A paused loop must get past the gate to see the flag.
        self.pause.resume();

        self.services
            .notifier
            .send(&format!("*{}* is Stopping ...", self.config.name))
            .await;
        self.services.journal.record_instance_stopped(&self.config.name).await;
        info!(instance = %self.config.name, "Instance stopping");
    }

    /// Wait for both loops to finish after [`stop`](Self::stop).
    pub async fn wait_stopped(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(instance = %self.config.name, error = %e, "Loop task ended abnormally");
            }
        }
    }

    /// Execute `command` now; the matching signal transition is then
    /// absorbed.
    pub async fn manual_trigger(&self, command: Command) -> Result<ExecutionReport, TradingError> {
        let result = self.engine.execute_and_skip_next(command).await;
        self.services
            .notifier
            .send(&format!("_{}_ Executed manual_trigger", self.config.name))
            .await;
        result
    }

    pub async fn recent_signals(&self, limit: u32) -> Result<Vec<SignalRecord>> {
        self.services
            .source
            .recent_signals(&self.config.listener, limit)
            .await
    }

    pub async fn snapshot(&self) -> (LedgerSnapshot, bool) {
        let state = self.engine.lock().await;
        (state.ledger.snapshot(), state.skip_next_signal.is_armed())
    }

    /// Realized percentage change of the most recent sells.
    pub async fn realized_returns(&self) -> Vec<Decimal> {
        self.engine.lock().await.ledger.realized_returns().collect()
    }

    pub async fn status(&self) -> StatusReport {
        let (ledger, skip_next_signal) = self.snapshot().await;

        let current_price = match self.services.gateway.get_price(&self.config.symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(instance = %self.config.name, error = %e, "Status without current price");
                None
            }
        };

        StatusReport::build(
            StatusInputs {
                config: &self.config,
                ledger,
                limits: self.limits(),
                paused: self.is_paused(),
                skip_next_signal,
                current_price,
                fee_rate: self.settings.fee_rate,
            },
            self.services.converter.as_ref(),
        )
        .await
    }
}
