//! Per-instance accounting: reference price, realized returns and counters.
//!
//! The ledger does no I/O. It is only reachable through the instance's
//! execution mutex (see [`TradingState`]), so every read and write is
//! serialized with order execution.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Command;

use super::TradingError;

/// Number of most recent sell returns kept for performance summaries.
pub const RETURNS_HISTORY: usize = 500;

/// Accounting state of one instance.
#[derive(Debug, Clone)]
pub struct Ledger {
    last_price: Decimal,
    last_command: Command,
    last_buy_price: Decimal,
    accumulated_percentage_change: Decimal,
    order_counter: u64,
    wins: u64,
    losses: u64,
    realized_returns: VecDeque<Decimal>,
}

/// Copy of the ledger's scalar fields, taken under the lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSnapshot {
    pub last_price: Decimal,
    pub last_command: Command,
    pub last_buy_price: Decimal,
    pub accumulated_percentage_change: Decimal,
    pub order_counter: u64,
    pub wins: u64,
    pub losses: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Fresh ledger: no reference price yet, and the last observed command
    /// is `Sell` so that the first `Buy` signal is a transition.
    pub fn new() -> Self {
        Self::with_reference(Decimal::ZERO, Command::Sell)
    }

    pub fn with_reference(last_price: Decimal, last_command: Command) -> Self {
        Self {
            last_price,
            last_command,
            last_buy_price: Decimal::ZERO,
            accumulated_percentage_change: Decimal::ZERO,
            order_counter: 0,
            wins: 0,
            losses: 0,
            realized_returns: VecDeque::new(),
        }
    }

    /// Account for a filled buy.
    pub fn record_buy(&mut self, price: Decimal) {
        self.last_buy_price = price;
        self.last_price = price;
        self.last_command = Command::Buy;
        self.order_counter += 1;
    }

    /// Account for a filled sell and return its percentage change against
    /// the reference price.
    ///
    /// Leaves the ledger untouched when the reference price is zero.
    pub fn record_sell(&mut self, price: Decimal) -> Result<Decimal, TradingError> {
        let pct = percentage_change(self.last_price, price)?;

        self.accumulated_percentage_change += pct;
        if pct > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        if self.realized_returns.len() == RETURNS_HISTORY {
            self.realized_returns.pop_front();
        }
        self.realized_returns.push_back(pct);
        self.last_price = price;
        self.last_command = Command::Sell;
        self.order_counter += 1;

        Ok(pct)
    }

    /// Acknowledge a signal transition without trading.
    pub fn set_last_command(&mut self, command: Command) {
        self.last_command = command;
    }

    /// Whether a reference price has been established.
    pub fn has_reference(&self) -> bool {
        !self.last_price.is_zero()
    }

    pub fn last_price(&self) -> Decimal {
        self.last_price
    }

    pub fn last_command(&self) -> Command {
        self.last_command
    }

    #[cfg(test)]
    pub fn last_buy_price(&self) -> Decimal {
        self.last_buy_price
    }

    pub fn accumulated_percentage_change(&self) -> Decimal {
        self.accumulated_percentage_change
    }

    pub fn order_counter(&self) -> u64 {
        self.order_counter
    }

    #[cfg(test)]
    pub fn wins(&self) -> u64 {
        self.wins
    }

    #[cfg(test)]
    pub fn losses(&self) -> u64 {
        self.losses
    }

    /// Realized percentage change of the last [`RETURNS_HISTORY`] sells,
    /// oldest first.
    pub fn realized_returns(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.realized_returns.iter().copied()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            last_price: self.last_price,
            last_command: self.last_command,
            last_buy_price: self.last_buy_price,
            accumulated_percentage_change: self.accumulated_percentage_change,
            order_counter: self.order_counter,
            wins: self.wins,
            losses: self.losses,
        }
    }
}

/// `(price - reference) / reference * 100`, rejecting a zero reference.
pub fn percentage_change(reference: Decimal, price: Decimal) -> Result<Decimal, TradingError> {
    if reference.is_zero() {
        return Err(TradingError::ComputationError { reference });
    }
    (price - reference)
        .checked_div(reference)
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .ok_or(TradingError::ComputationError { reference })
}

/// One-shot message from the risk monitor (or a manual trigger) to the
/// signal loop: absorb the next observed transition instead of trading it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipSlot {
    armed: bool,
}

impl SkipSlot {
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Consume the flag, returning whether it was armed.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Everything guarded by an instance's execution mutex.
#[derive(Debug, Default)]
pub struct TradingState {
    pub ledger: Ledger,
    pub skip_next_signal: SkipSlot,
}

impl TradingState {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger,
            skip_next_signal: SkipSlot::default(),
        }
    }
}
