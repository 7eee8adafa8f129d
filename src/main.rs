//! Signal Trader
//!
//! Runs autonomous per-instrument trading agents that follow buy/sell
//! signals delivered by mail and enforce their own stop-loss and
//! take-profit limits on Bybit spot.

mod api;
mod config;
mod console;
mod db;
mod metrics;
mod models;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{CurrencyConverter, ExchangeGateway, SignalSource};
use crate::config::{load_instance_specs, EngineArgs, ServiceArgs};
use crate::console::{Console, Reply};
use crate::db::Database;
use crate::models::{Command, QUOTE_ASSET};
use crate::trading::Registry;

/// Signal-driven spot trading agents.
#[derive(Parser)]
#[command(name = "signal-trader")]
#[command(about = "Trade Bybit spot from mailed buy/sell signals", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./signal-trader.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    services: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry and the operator console
    Run {
        /// JSON file with instances to start immediately
        #[arg(short, long)]
        instances: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show journaled executions
    History {
        /// Only this instance
        #[arg(short, long)]
        instance: Option<String>,

        /// Number of executions to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// List journaled instances
    Instances,

    /// List recent raw signals of a listener
    Signals {
        listener: String,

        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show the exchange USDT balance
    Balance,

    /// Print the command a signal text normalizes to
    ParseSignal {
        /// Raw signal text
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { instances, engine } => {
            let settings = engine.settings();
            let db = Arc::new(Database::new(&cli.database).await?);
            let services = cli.services.services(&settings, db)?;
            let registry = Arc::new(Registry::new(services, settings));

            if let Some(path) = instances {
                for spec in load_instance_specs(&path)? {
                    match registry.create(&spec).await {
                        Ok(instance) => info!(instance = %instance.name(), "Instance loaded"),
                        Err(e) => error!(instance = %spec.name, error = %e, "Instance rejected"),
                    }
                }
            }

            println!("\n=== Signal Trader ===");
            println!("Instances: {}", registry.len().await);
            println!("Type 'help' for commands, 'quit' or Ctrl+C to stop.\n");

            run_console(registry.clone()).await?;

            println!("Stopping all instances...");
            registry.stop_all().await;
        }

        Commands::History { instance, limit } => {
            let db = Database::new(&cli.database).await?;
            let executions = db.recent_executions(instance.as_deref(), limit).await?;

            if executions.is_empty() {
                println!("No executions recorded.");
                return Ok(());
            }

            println!(
                "\n{:<8} {:<20} {:<16} {:<5} {:>12} {:>14} {:>14} {:>9} {:<8}",
                "ID", "TIME", "INSTANCE", "SIDE", "QTY", "PRICE", "REFERENCE", "RESULT%", "STATUS"
            );
            println!("{}", "-".repeat(114));

            for e in &executions {
                println!(
                    "{:<8} {:<20} {:<16} {:<5} {:>12} {:>14} {:>14} {:>9} {:<8}",
                    e.id.chars().take(8).collect::<String>(),
                    truncate(&e.executed_at, 19),
                    truncate(&e.instance, 16),
                    e.side,
                    e.quantity.as_deref().unwrap_or("-"),
                    e.price.as_deref().unwrap_or("-"),
                    e.reference_price,
                    e.realized_percent.as_deref().map(|p| truncate(p, 8)).unwrap_or_else(|| "-".into()),
                    e.status
                );
                if let Some(err) = &e.error_message {
                    println!("    {}", err);
                }
            }

            if let Some(name) = instance {
                let (executed, failed) = db.execution_stats(&name).await?;
                println!("\nExecuted: {}  Failed: {}", executed, failed);
            }
        }

        Commands::Instances => {
            let db = Database::new(&cli.database).await?;
            let instances = db.instances().await?;

            if instances.is_empty() {
                println!("No instances recorded.");
                return Ok(());
            }

            println!(
                "\n{:<16} {:<10} {:>12} {:<10} {:<16} {:>6} {:>6} {:<20} {:<8}",
                "NAME", "SYMBOL", "AMOUNT", "MODE", "LISTENER", "TP%", "SL%", "CREATED", "STATE"
            );
            println!("{}", "-".repeat(113));

            for i in &instances {
                println!(
                    "{:<16} {:<10} {:>12} {:<10} {:<16} {:>6} {:>6} {:<20} {:<8}",
                    truncate(&i.name, 16),
                    i.symbol,
                    i.amount,
                    i.mode,
                    truncate(&i.listener, 16),
                    i.take_profit_percent,
                    i.stop_loss_percent,
                    truncate(&i.created_at, 19),
                    if i.stopped_at.is_some() { "stopped" } else { "open" }
                );
            }
        }

        Commands::Signals { listener, limit } => {
            let source = cli.services.mailgun()?;
            let signals = source.recent_signals(&listener, limit).await?;

            if signals.is_empty() {
                println!("No signals for {}.", listener);
                return Ok(());
            }

            for s in &signals {
                let command = s.command().map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{}  {:<4}  {}",
                    s.received_at.format("%Y-%m-%d %H:%M:%S"),
                    command,
                    truncate(s.text.trim(), 60)
                );
            }
        }

        Commands::Balance => {
            let gateway = cli.services.bybit()?;
            let converter = cli.services.converter()?;

            let usd = gateway.get_wallet_available(QUOTE_ASSET).await?.round_dp(3);
            let rub = converter.usd_to_rub(usd).await.round_dp(2);

            println!("Account USD : {}", usd);
            println!("        RUB : {}", rub);
        }

        Commands::ParseSignal { text } => {
            let text = text.join(" ");
            match Command::from_signal_text(&text) {
                Some(command) => println!("{}", command),
                None => println!("no signal"),
            }
        }
    }

    Ok(())
}

/// Read console lines until `quit`, end of input or Ctrl+C.
async fn run_console(registry: Arc<Registry>) -> Result<()> {
    let mut console = Console::new(registry);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match console.handle(&line).await {
                    Reply::Text(text) if text.is_empty() => {}
                    Reply::Text(text) => println!("{}", text),
                    Reply::Quit => break,
                }
            }
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
