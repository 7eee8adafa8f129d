//! Data models for signals and instance configuration.

mod instance;
mod signal;

pub use instance::{InstanceConfig, InstanceSpec, Mode, RiskLimits, RiskParameter, QUOTE_ASSET};
pub use signal::{Command, SignalRecord};
