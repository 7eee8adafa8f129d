//! Instance status report with unrealized and realized P&L.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::api::CurrencyConverter;
use crate::models::{Command, InstanceConfig, Mode, RiskLimits};

use super::LedgerSnapshot;

static MARKDOWN_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([*_`\[\]])").expect("Invalid markdown regex"));

/// Escape Telegram Markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    MARKDOWN_SPECIAL.replace_all(text, r"\$1").into_owned()
}

/// A P&L figure in base units, percent of the trade amount, quote asset
/// and RUB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitAndLoss {
    pub base: Decimal,
    pub percent: Decimal,
    pub quote: Decimal,
    pub rub: Decimal,
}

impl ProfitAndLoss {
    pub fn zero() -> Self {
        Self {
            base: Decimal::ZERO,
            percent: Decimal::ZERO,
            quote: Decimal::ZERO,
            rub: Decimal::ZERO,
        }
    }
}

/// `amount * current / reference - amount - amount * fee_rate`.
///
/// `None` when there is no open exposure to value: no reference price, or
/// neither a prior order nor a pending buy.
pub fn unrealized_base(
    amount: Decimal,
    snapshot: &LedgerSnapshot,
    current: Decimal,
    fee_rate: Decimal,
) -> Option<Decimal> {
    let exposed = snapshot.last_command == Command::Buy || snapshot.order_counter > 0;
    if !exposed || snapshot.last_price.is_zero() {
        return None;
    }
    let value = (amount * current).checked_div(snapshot.last_price)?;
    Some(value - amount - amount * fee_rate)
}

/// `amount * (accumulated% / 100 - order_counter * fee_rate)`.
pub fn realized_base(amount: Decimal, snapshot: &LedgerSnapshot, fee_rate: Decimal) -> Decimal {
    let fees = Decimal::from(snapshot.order_counter) * fee_rate;
    amount * (snapshot.accumulated_percentage_change / dec!(100) - fees)
}

/// Point-in-time view of one instance.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub name: String,
    pub symbol: String,
    pub amount: Decimal,
    pub mode: Mode,
    pub listener: String,
    pub paused: bool,
    pub limits: RiskLimits,
    pub ledger: LedgerSnapshot,
    pub skip_next_signal: bool,
    pub current_price: Option<Decimal>,
    /// Trade amount valued at the current price, in RUB
    pub notional_rub: Option<Decimal>,
    pub unrealized: Option<ProfitAndLoss>,
    pub realized: ProfitAndLoss,
}

/// Inputs of a status report, gathered by the owning instance.
pub struct StatusInputs<'a> {
    pub config: &'a InstanceConfig,
    pub ledger: LedgerSnapshot,
    pub limits: RiskLimits,
    pub paused: bool,
    pub skip_next_signal: bool,
    pub current_price: Option<Decimal>,
    pub fee_rate: Decimal,
}

impl StatusReport {
    pub async fn build(inputs: StatusInputs<'_>, converter: &dyn CurrencyConverter) -> Self {
        let config = inputs.config;
        let amount = config.amount;
        let to_percent = |base: Decimal| base / amount * dec!(100);

        let mut notional_rub = None;
        let mut unrealized = None;
        let realized_amount = realized_base(amount, &inputs.ledger, inputs.fee_rate);
        let mut realized = ProfitAndLoss {
            base: realized_amount,
            percent: to_percent(realized_amount),
            ..ProfitAndLoss::zero()
        };

        if let Some(current) = inputs.current_price {
            notional_rub = Some(to_rub(converter, amount * current).await);

            let base = unrealized_base(amount, &inputs.ledger, current, inputs.fee_rate)
                .unwrap_or(Decimal::ZERO);
            let quote = base * current;
            unrealized = Some(ProfitAndLoss {
                base,
                percent: to_percent(base),
                quote,
                rub: to_rub(converter, quote).await,
            });

            realized.quote = realized.base * current;
            realized.rub = to_rub(converter, realized.quote).await;
        }

        Self {
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            amount,
            mode: config.mode,
            listener: config.listener.clone(),
            paused: inputs.paused,
            limits: inputs.limits,
            ledger: inputs.ledger,
            skip_next_signal: inputs.skip_next_signal,
            current_price: inputs.current_price,
            notional_rub,
            unrealized,
            realized,
        }
    }

    /// Markdown rendering for the notifier.
    pub fn render(&self) -> String {
        let state = if self.paused { "Paused🔄" } else { "Running 🟩" };
        let na = || "n/a".to_string();
        let current = self.current_price.map(|p| p.to_string()).unwrap_or_else(na);
        let notional = self.notional_rub.map(|v| v.round_dp(2).to_string()).unwrap_or_else(na);
        let unrealized = self.unrealized.unwrap_or_else(ProfitAndLoss::zero);

        format!(
            "BOT *{}* is *{}* : ```\n\
             - symbol : {}\n\
             - amount : {}\n\
             - amount RUB : {}\n\
             - mode : {}\n\
             - last_price: {}\n\
             - last_buy_price: {}\n\
             - Current_price: {}\n\
             - Unrealized_PL : {} USD\n\
             - Unrealized_PL_RUB : {} RUB\n\
             - Unrealized_PL_% : {} %\n\
             - Realized_pl : {} USD\n\
             - Realized_pl_RUB : {} RUB\n\
             - Realized_pl_% : {} %\n\
             - Orders No : {}\n\
             - Wins : {}\n\
             - Losses : {}\n\
             - take_profit_percent : {}\n\
             - stop_loss_percent : {}\n\
             - listener : {}\n\
             - last_command_received : {}\n\
             - skip_next_signal : {}\n\
             ```",
            escape_markdown(&self.name),
            state,
            self.symbol,
            self.amount,
            notional,
            self.mode,
            self.ledger.last_price,
            self.ledger.last_buy_price,
            current,
            unrealized.quote.round_dp(3),
            unrealized.rub.round_dp(2),
            unrealized.percent.round_dp(3),
            self.realized.quote.round_dp(3),
            self.realized.rub.round_dp(2),
            self.realized.percent.round_dp(3),
            self.ledger.order_counter,
            self.ledger.wins,
            self.ledger.losses,
            self.limits.take_profit_percent,
            self.limits.stop_loss_percent,
            escape_markdown(&self.listener),
            self.ledger.last_command,
            self.skip_next_signal,
        )
    }
}

/// Convert a signed quote amount, keeping its sign.
async fn to_rub(converter: &dyn CurrencyConverter, amount: Decimal) -> Decimal {
    if amount.is_zero() {
        return Decimal::ZERO;
    }
    let rub = converter.usd_to_rub(amount.abs()).await;
    if amount.is_sign_negative() {
        -rub
    } else {
        rub
    }
}
