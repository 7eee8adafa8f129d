//! Line-oriented operator console.
//!
//! Each input line is parsed with clap and mapped onto one registry or
//! instance operation. Replies are returned as text so the caller decides
//! where they go.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::debug;

use crate::metrics::MetricsCalculator;
use crate::models::{Command, InstanceSpec, RiskParameter, QUOTE_ASSET};
use crate::trading::{BroadcastTarget, Registry, TradingInstance};

const NO_SELECTION: &str = "Select an instance first";

#[derive(Parser, Debug)]
#[command(name = "console", no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Subcommand, Debug)]
enum ConsoleCommand {
    /// Create and start an instance
    Create {
        name: String,
        /// Instrument, e.g. BTCUSDT
        symbol: String,
        /// Trade amount in base units
        amount: Decimal,
        /// Simulation or Real
        mode: String,
        /// Signal listener identity
        listener: String,
        /// Take-profit percent (0 disables)
        #[arg(long, default_value = "0")]
        tp: Decimal,
        /// Stop-loss percent (0 disables)
        #[arg(long, default_value = "0")]
        sl: Decimal,
    },

    /// List running instances
    List,

    /// Select the instance later commands apply to
    Select { name: String },

    /// Show status and P&L of the selected instance
    Status,

    /// Pause both loops of the selected instance
    Pause,

    /// Resume the selected instance
    Resume,

    /// Stop and remove the selected instance
    Stop,

    /// Execute buy or sell now on the selected instance
    Trigger { side: Command },

    /// Set take-profit percent
    SetTp {
        value: Decimal,
        /// Apply to every instance
        #[arg(long)]
        all: bool,
    },

    /// Set stop-loss percent
    SetSl {
        value: Decimal,
        /// Apply to every instance
        #[arg(long)]
        all: bool,
    },

    /// Recent raw signals of the selected instance
    Signals {
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Exchange USDT balance
    Balance,

    /// Stop everything and exit
    #[command(alias = "exit")]
    Quit,
}

/// Result of one console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

pub struct Console {
    registry: Arc<Registry>,
    selected: Option<String>,
}

impl Console {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Handle one input line.
    pub async fn handle(&mut self, line: &str) -> Reply {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Reply::text("");
        }

        let parsed = match ConsoleLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            // Covers `help` and malformed input alike.
            Err(e) => return Reply::Text(e.render().to_string()),
        };
        debug!(command = ?parsed.command, "Console command");

        match self.dispatch(parsed.command).await {
            Ok(reply) => reply,
            Err(e) => Reply::Text(format!("Error: {:#}", e)),
        }
    }

    async fn dispatch(&mut self, command: ConsoleCommand) -> Result<Reply> {
        let reply = match command {
            ConsoleCommand::Create {
                name,
                symbol,
                amount,
                mode,
                listener,
                tp,
                sl,
            } => {
                let spec = InstanceSpec {
                    name,
                    symbol,
                    amount,
                    mode,
                    take_profit_percent: tp,
                    stop_loss_percent: sl,
                    listener,
                };
                let instance = self.registry.create(&spec).await?;
                self.selected = Some(instance.name().to_string());
                Reply::text(format!("Instance {} created and selected", instance.name()))
            }

            ConsoleCommand::List => {
                if self.registry.is_empty().await {
                    return Ok(Reply::text("No instances running"));
                }
                let instances = self.registry.instances().await;
                let lines: Vec<String> = instances
                    .iter()
                    .map(|i| {
                        let marker = if self.selected() == Some(i.name()) { "*" } else { " " };
                        let state = if i.is_paused() { "paused" } else { "running" };
                        let config = i.config();
                        format!(
                            "{} {:<16} {:<10} {:>12} {:<10} {}",
                            marker, config.name, config.symbol, config.amount, config.mode, state
                        )
                    })
                    .collect();
                Reply::text(lines.join("\n"))
            }

            ConsoleCommand::Select { name } => match self.registry.get(&name).await {
                Some(_) => {
                    self.selected = Some(name.clone());
                    Reply::text(format!("Selected {}", name))
                }
                None => Reply::text(format!(
                    "No instance named {}. Running: {}",
                    name,
                    self.registry.names().await.join(", ")
                )),
            },

            ConsoleCommand::Status => {
                let Some(instance) = self.selected_instance().await else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                let report = instance.status().await;
                let summary = MetricsCalculator::summarize(&instance.realized_returns().await);
                Reply::text(format!(
                    "{}\n{}",
                    report.render(),
                    MetricsCalculator::describe(&summary)
                ))
            }

            ConsoleCommand::Pause => {
                let Some(instance) = self.selected_instance().await else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                instance.pause().await;
                Reply::text(format!("{} paused", instance.name()))
            }

            ConsoleCommand::Resume => {
                let Some(instance) = self.selected_instance().await else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                instance.resume().await;
                Reply::text(format!("{} resumed", instance.name()))
            }

            ConsoleCommand::Stop => {
                let Some(name) = self.selected.take() else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                match self.registry.stop(&name).await {
                    Some(_) => Reply::text(format!("{} stopping", name)),
                    None => Reply::text(format!("No instance named {}", name)),
                }
            }

            ConsoleCommand::Trigger { side } => {
                let Some(instance) = self.selected_instance().await else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                match instance.manual_trigger(side).await {
                    Ok(report) => Reply::text(format!(
                        "{} {} {} at {}",
                        instance.name(),
                        report.command,
                        report.quantity,
                        report.price
                    )),
                    Err(e) => Reply::text(format!("{} {} failed: {}", instance.name(), side, e)),
                }
            }

            ConsoleCommand::SetTp { value, all } => {
                self.set_limit(RiskParameter::TakeProfit, value, all).await?
            }

            ConsoleCommand::SetSl { value, all } => {
                self.set_limit(RiskParameter::StopLoss, value, all).await?
            }

            ConsoleCommand::Signals { limit } => {
                let Some(instance) = self.selected_instance().await else {
                    return Ok(Reply::text(NO_SELECTION));
                };
                let limit = limit.unwrap_or(self.registry.settings().recent_signals_limit);
                let signals = instance.recent_signals(limit).await?;
                if signals.is_empty() {
                    return Ok(Reply::text("No signals received"));
                }
                let lines: Vec<String> = signals
                    .iter()
                    .map(|s| {
                        let command = s.command().map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                        format!(
                            "{}  {:<4}  {}",
                            s.received_at.format("%Y-%m-%d %H:%M:%S"),
                            command,
                            s.text.trim()
                        )
                    })
                    .collect();
                Reply::text(lines.join("\n"))
            }

            ConsoleCommand::Balance => {
                let services = self.registry.services();
                let usd = services.gateway.get_wallet_available(QUOTE_ASSET).await?;
                let usd = usd.round_dp(3);
                let rub = services.converter.usd_to_rub(usd).await.round_dp(2);
                Reply::text(format!("Account USD : {}\n RUB : {}", usd, rub))
            }

            ConsoleCommand::Quit => Reply::Quit,
        };

        Ok(reply)
    }

    async fn selected_instance(&self) -> Option<Arc<TradingInstance>> {
        let name = self.selected.as_deref()?;
        self.registry.get(name).await
    }

    async fn set_limit(&self, parameter: RiskParameter, value: Decimal, all: bool) -> Result<Reply> {
        let target = if all {
            BroadcastTarget::All
        } else {
            match &self.selected {
                Some(name) => BroadcastTarget::Only(vec![name.clone()]),
                None => return Ok(Reply::text(NO_SELECTION)),
            }
        };

        let updated = self.registry.broadcast(parameter, value, &target).await?;
        if updated.is_empty() {
            return Ok(Reply::text("No instances updated"));
        }
        Ok(Reply::text(format!(
            "{} set to {}% for {}",
            parameter.as_str(),
            value,
            updated.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NoopJournal;
    use crate::trading::testing::{FakeExchange, FakeSignals, FixedRate, RecordingNotifier};
    use crate::trading::{EngineSettings, Services};
    use rust_decimal_macros::dec;

    fn console() -> (Console, Arc<FakeSignals>) {
        let signals = Arc::new(FakeSignals::default());
        let exchange = Arc::new(FakeExchange::with_price(dec!(100)));
        exchange.set_wallet(dec!(250.12345), 8);
        let services = Services {
            gateway: exchange,
            source: signals.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            journal: Arc::new(NoopJournal),
            converter: Arc::new(FixedRate(dec!(90))),
        };
        let registry = Arc::new(Registry::new(services, EngineSettings::fast()));
        (Console::new(registry), signals)
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(t) => t,
            Reply::Quit => panic!("unexpected quit"),
        }
    }

    #[tokio::test]
    async fn test_commands_need_selection() {
        let (mut console, _) = console();
        for line in ["status", "pause", "resume", "stop", "trigger buy", "set-tp 3", "signals"] {
            assert_eq!(text(console.handle(line).await), NO_SELECTION, "{}", line);
        }
    }

    #[tokio::test]
    async fn test_create_select_and_list() {
        let (mut console, _) = console();

        let reply = text(console.handle("create alpha btcusdt 0.001 Simulation alpha --tp 5").await);
        assert!(reply.contains("alpha created"));
        assert_eq!(console.selected(), Some("alpha"));

        console.handle("create beta ethusdt 0.1 Simulation beta").await;
        let listing = text(console.handle("list").await);
        assert!(listing.contains("* beta"));
        assert!(listing.contains("BTCUSDT"));

        assert_eq!(text(console.handle("select alpha").await), "Selected alpha");
        assert_eq!(
            text(console.handle("select nobody").await),
            "No instance named nobody. Running: alpha, beta"
        );

        let dup = text(console.handle("create alpha btcusdt 1 Simulation x").await);
        assert!(dup.starts_with("Error:"));

        assert_eq!(console.handle("quit").await, Reply::Quit);
        console.registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_set_limits_selected_and_all() {
        let (mut console, _) = console();
        console.handle("create alpha btcusdt 0.001 Simulation alpha").await;
        console.handle("create beta ethusdt 0.1 Simulation beta").await;

        let reply = text(console.handle("set-sl 2").await);
        assert_eq!(reply, "stop_loss set to 2% for beta");

        let reply = text(console.handle("set-tp 4 --all").await);
        assert_eq!(reply, "take_profit set to 4% for alpha, beta");

        let alpha = console.registry.get("alpha").await.unwrap();
        assert_eq!(alpha.limits().take_profit_percent, dec!(4));
        assert_eq!(alpha.limits().stop_loss_percent, Decimal::ZERO);

        console.registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_trigger_status_and_stop() {
        let (mut console, signals) = console();
        console.handle("create alpha btcusdt 0.5 Simulation alpha").await;
        console.handle("pause").await;

        let reply = text(console.handle("trigger buy").await);
        assert_eq!(reply, "alpha Buy 0.5 at 100");

        let status = text(console.handle("status").await);
        assert!(status.contains("- Orders No : 1"));
        assert!(status.contains("no closed trades yet"));

        signals.set("Buy BTCUSDT");
        let listing = text(console.handle("signals").await);
        assert!(listing.contains("Buy   Buy BTCUSDT"));

        assert_eq!(text(console.handle("stop").await), "alpha stopping");
        assert_eq!(console.selected(), None);
        assert!(console.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_balance_and_bad_input() {
        let (mut console, _) = console();

        let reply = text(console.handle("balance").await);
        assert_eq!(reply, "Account USD : 250.123\n RUB : 22511.07");

        let reply = text(console.handle("trigger hold").await);
        assert!(reply.contains("unknown command"));

        let help = text(console.handle("help").await);
        assert!(help.contains("set-tp"));
    }
}
