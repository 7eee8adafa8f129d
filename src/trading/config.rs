//! Engine timing and accounting settings.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Settings shared by every instance of a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Delay between signal polls
    pub signal_poll_interval: Duration,

    /// Delay between stop-loss / take-profit checks
    pub risk_poll_interval: Duration,

    /// Delay after a failed signal fetch
    pub error_backoff: Duration,

    /// Maximum outbound calls per second for each throttled call kind
    pub calls_per_second: u32,

    /// Number of signals returned by a recent-signals listing
    pub recent_signals_limit: u32,

    /// Exchange fee charged per order, as a fraction (0.001 = 0.1%)
    pub fee_rate: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            signal_poll_interval: Duration::from_secs(1),
            risk_poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
            calls_per_second: 5,
            recent_signals_limit: 20,
            fee_rate: dec!(0.001),
        }
    }
}

impl EngineSettings {
    /// Fast settings for tests.
    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            signal_poll_interval: Duration::from_millis(10),
            risk_poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(10),
            calls_per_second: 1000,
            recent_signals_limit: 5,
            fee_rate: dec!(0.001),
        }
    }
}
