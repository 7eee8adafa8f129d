//! Error taxonomy of the trading core.

use rust_decimal::Decimal;
use thiserror::Error;

/// Failures surfaced by the execution engine and the instance registry.
///
/// None of these terminate a running instance; only `ConfigurationError`
/// prevents one from being created.
#[derive(Debug, Clone, Error)]
pub enum TradingError {
    /// The exchange refused the order, or sizing queries failed before it.
    #[error("order rejected: {0}")]
    GatewayRejected(String),

    /// The order went through but the follow-up ticker read failed.
    #[error("order placed but price unavailable: {0}")]
    PriceUnavailable(String),

    /// Percentage change against a degenerate reference price.
    #[error("cannot compute return against reference price {reference}")]
    ComputationError { reference: Decimal },

    /// Transient failure of the signal source; retried next tick.
    #[error("signal source unavailable: {0}")]
    SignalSourceUnavailable(String),

    /// Invalid creation request; the instance never starts.
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl TradingError {
    /// Whether the order itself reached the exchange.
    pub fn order_placed(&self) -> bool {
        matches!(
            self,
            TradingError::PriceUnavailable(_) | TradingError::ComputationError { .. }
        )
    }
}
