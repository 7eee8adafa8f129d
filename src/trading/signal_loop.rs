//! Signal ingestion loop: polls the signal source and trades transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{Notifier, SignalSource};
use crate::models::Command;

use super::{EngineSettings, ExecutionEngine, ExecutionReport, PauseGate, RateLimiter, TradingError};

const SEPARATOR: &str = "----------------------------------------";

/// What one poll of the signal source led to.
#[derive(Debug)]
pub enum SignalOutcome {
    /// Nothing in the inbox, or no buy/sell word in it
    NoSignal,
    /// Same direction as the last observed command
    Unchanged(Command),
    /// Transition absorbed by an armed skip slot
    Skipped(Command),
    Executed(ExecutionReport),
    Failed(TradingError),
}

pub struct SignalLoop {
    engine: Arc<ExecutionEngine>,
    source: Arc<dyn SignalSource>,
    notifier: Arc<dyn Notifier>,
    pause: Arc<PauseGate>,
    running: Arc<AtomicBool>,
    fetch_limiter: RateLimiter,
    settings: EngineSettings,
}

impl SignalLoop {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        source: Arc<dyn SignalSource>,
        notifier: Arc<dyn Notifier>,
        pause: Arc<PauseGate>,
        running: Arc<AtomicBool>,
        settings: EngineSettings,
    ) -> Self {
        let fetch_limiter = RateLimiter::per_second("signal_fetch", settings.calls_per_second);
        Self {
            engine,
            source,
            notifier,
            pause,
            running,
            fetch_limiter,
            settings,
        }
    }

    /// Poll until the running flag is cleared.
    pub async fn run(self) {
        let name = self.engine.config().name.clone();
        info!(instance = %name, "Signal loop started");

        while self.running.load(Ordering::SeqCst) {
            self.pause.wait_until_open().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let delay = match self.tick().await {
                Ok(outcome) => {
                    match outcome {
                        SignalOutcome::NoSignal => debug!(instance = %name, "No signal"),
                        SignalOutcome::Unchanged(command) => {
                            debug!(instance = %name, command = %command, "Signal unchanged")
                        }
                        SignalOutcome::Skipped(command) => {
                            debug!(instance = %name, command = %command, "Signal skipped")
                        }
                        SignalOutcome::Executed(report) => debug!(
                            instance = %name,
                            command = %report.command,
                            quantity = %report.quantity,
                            price = %report.price,
                            "Signal executed"
                        ),
                        SignalOutcome::Failed(e) => {
                            warn!(instance = %name, error = %e, "Signal execution failed")
                        }
                    }
                    self.settings.signal_poll_interval
                }
                Err(e) => {
                    warn!(instance = %name, error = %e, "Signal fetch failed");
                    self.notifier
                        .send(&format!("_{}_ Signal fetch failed: {}", name, e))
                        .await;
                    self.settings.error_backoff
                }
            };

            tokio::time::sleep(delay).await;
        }

        info!(instance = %name, "Signal loop stopped");
    }

    /// One poll: fetch, normalize, and act on a transition.
    ///
    /// Only a source failure is returned as an error; execution failures
    /// are reported through [`SignalOutcome::Failed`].
    pub async fn tick(&self) -> Result<SignalOutcome, TradingError> {
        let config = self.engine.config();

        self.fetch_limiter.acquire().await;
        let text = self
            .source
            .latest_signal(&config.listener)
            .await
            .map_err(|e| TradingError::SignalSourceUnavailable(e.to_string()))?;

        let Some(command) = text.as_deref().and_then(Command::from_signal_text) else {
            return Ok(SignalOutcome::NoSignal);
        };

        let mut state = self.engine.lock().await;
        if command == state.ledger.last_command() {
            return Ok(SignalOutcome::Unchanged(command));
        }

        if state.skip_next_signal.take() {
            state.ledger.set_last_command(command);
            info!(instance = %config.name, command = %command, "Transition absorbed after forced execution");
            return Ok(SignalOutcome::Skipped(command));
        }

        info!(instance = %config.name, command = %command, "Signal transition");
        match self.engine.execute_locked(&mut state, command).await {
            Ok(report) => {
                state.ledger.set_last_command(command);
                drop(state);
                self.notifier.send(SEPARATOR).await;
                Ok(SignalOutcome::Executed(report))
            }
            Err(e) => Ok(SignalOutcome::Failed(e)),
        }
    }
}
