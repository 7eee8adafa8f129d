//! Trading core: ledger, execution engine, the two per-instance loops, the
//! pause gate and the instance registry.

mod config;
mod error;
mod executor;
mod instance;
mod ledger;
mod pause;
mod rate_limit;
mod registry;
mod risk_monitor;
mod signal_loop;
mod status;

#[cfg(test)]
pub mod testing;

pub use config::EngineSettings;
pub use error::TradingError;
pub use executor::{ExecutionEngine, ExecutionReport};
pub use instance::{Services, TradingInstance};
pub use ledger::{Ledger, LedgerSnapshot, TradingState};
pub use pause::PauseGate;
pub use rate_limit::RateLimiter;
pub use registry::{BroadcastTarget, Registry};
pub use risk_monitor::RiskMonitor;
pub use signal_loop::SignalLoop;
