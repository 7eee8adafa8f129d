//! Instance configuration: identity, instrument, sizing, mode and risk limits.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trading::TradingError;

/// Quote asset every supported instrument is priced in.
pub const QUOTE_ASSET: &str = "USDT";

/// Whether orders reach the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Orders are acknowledged locally; prices still come from the exchange
    Simulation,
    /// Orders are submitted and sells are sized from the live wallet balance
    Real,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Simulation => "Simulation",
            Mode::Real => "Real",
        }
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.to_lowercase().as_str() {
            "simulation" => Ok(Mode::Simulation),
            "real" => Ok(Mode::Real),
            _ => Err(TradingError::ConfigurationError(format!(
                "invalid mode '{}' (expected Simulation or Real)",
                s
            ))),
        }
    }
}

/// Which risk threshold a broadcast updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskParameter {
    TakeProfit,
    StopLoss,
}

impl RiskParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskParameter::TakeProfit => "take_profit",
            RiskParameter::StopLoss => "stop_loss",
        }
    }
}

impl FromStr for RiskParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "take_profit" | "tp" => Ok(RiskParameter::TakeProfit),
            "stop_loss" | "sl" => Ok(RiskParameter::StopLoss),
            other => Err(format!("unknown parameter: {}", other)),
        }
    }
}

/// Take-profit and stop-loss percentages. Zero disables a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RiskLimits {
    pub take_profit_percent: Decimal,
    pub stop_loss_percent: Decimal,
}

impl RiskLimits {
    pub fn new(take_profit_percent: Decimal, stop_loss_percent: Decimal) -> Self {
        Self {
            take_profit_percent,
            stop_loss_percent,
        }
    }

    pub fn with(mut self, parameter: RiskParameter, value: Decimal) -> Self {
        match parameter {
            RiskParameter::TakeProfit => self.take_profit_percent = value,
            RiskParameter::StopLoss => self.stop_loss_percent = value,
        }
        self
    }
}

/// Creation request for a trading instance, as typed by an operator or
/// loaded from an instances file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    pub mode: String,
    #[serde(default)]
    pub take_profit_percent: Decimal,
    #[serde(default)]
    pub stop_loss_percent: Decimal,
    pub listener: String,
}

impl InstanceSpec {
    /// Validate the request into an immutable instance configuration.
    pub fn validate(&self) -> Result<InstanceConfig, TradingError> {
        let mode: Mode = self.mode.parse()?;

        let name = self.name.trim();
        if name.is_empty() {
            return Err(TradingError::ConfigurationError("instance name is empty".into()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(TradingError::ConfigurationError(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.take_profit_percent < Decimal::ZERO || self.stop_loss_percent < Decimal::ZERO {
            return Err(TradingError::ConfigurationError(
                "take profit and stop loss must not be negative".into(),
            ));
        }

        let symbol = self.symbol.trim().to_uppercase();
        if mode == Mode::Real && base_asset(&symbol).is_none() {
            return Err(TradingError::ConfigurationError(format!(
                "symbol {} has no {} quote",
                symbol, QUOTE_ASSET
            )));
        }

        Ok(InstanceConfig {
            name: name.to_string(),
            symbol,
            amount: self.amount,
            mode,
            listener: self.listener.trim().to_string(),
            initial_limits: RiskLimits::new(self.take_profit_percent, self.stop_loss_percent),
        })
    }
}

/// Validated, immutable part of an instance's configuration.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    pub mode: Mode,
    pub listener: String,
    pub initial_limits: RiskLimits,
}

impl InstanceConfig {
    pub fn base_asset(&self) -> Option<&str> {
        base_asset(&self.symbol)
    }
}

/// Base asset of a `XXXUSDT` symbol.
pub fn base_asset(symbol: &str) -> Option<&str> {
    symbol
        .find(QUOTE_ASSET)
        .map(|idx| &symbol[..idx])
        .filter(|base| !base.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(mode: &str) -> InstanceSpec {
        InstanceSpec {
            name: "alpha".to_string(),
            symbol: "btcusdt".to_string(),
            amount: dec!(0.00011),
            mode: mode.to_string(),
            take_profit_percent: dec!(5),
            stop_loss_percent: dec!(2),
            listener: "alpha-signals".to_string(),
        }
    }

    #[test]
    fn test_mode_parsing_strips_spaces() {
        assert_eq!("Simulation".parse::<Mode>().unwrap(), Mode::Simulation);
        assert_eq!(" Re al ".parse::<Mode>().unwrap(), Mode::Real);
        assert!(matches!(
            "Paper".parse::<Mode>(),
            Err(TradingError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate_normalizes_symbol() {
        let config = spec("Real").validate().unwrap();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.base_asset(), Some("BTC"));
        assert_eq!(config.initial_limits.take_profit_percent, dec!(5));
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let mut bad_amount = spec("Simulation");
        bad_amount.amount = Decimal::ZERO;
        assert!(bad_amount.validate().is_err());

        let mut bad_symbol = spec("Real");
        bad_symbol.symbol = "BTCEUR".to_string();
        assert!(bad_symbol.validate().is_err());

        // Simulation does not need a wallet asset
        let mut sim_symbol = spec("Simulation");
        sim_symbol.symbol = "BTCEUR".to_string();
        assert!(sim_symbol.validate().is_ok());

        let mut negative = spec("Simulation");
        negative.stop_loss_percent = dec!(-1);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_risk_limits_update() {
        let limits = RiskLimits::new(dec!(5), dec!(2)).with(RiskParameter::StopLoss, dec!(3));
        assert_eq!(limits.stop_loss_percent, dec!(3));
        assert_eq!(limits.take_profit_percent, dec!(5));
        assert_eq!("tp".parse::<RiskParameter>().unwrap(), RiskParameter::TakeProfit);
    }

    #[test]
    fn test_base_asset() {
        assert_eq!(base_asset("ETHUSDT"), Some("ETH"));
        assert_eq!(base_asset("USDT"), None);
        assert_eq!(base_asset("ETHBTC"), None);
    }
}
