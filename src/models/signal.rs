//! Trading commands and signal text normalization.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static COMMAND_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(buy|sell)\b").expect("Invalid command regex"));

/// Direction of a signal or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    Buy,
    Sell,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Buy => "Buy",
            Command::Sell => "Sell",
        }
    }

    /// Extract the first whole-word `buy` / `sell` (any case) from raw text.
    ///
    /// Returns `None` when the text carries no command.
    pub fn from_signal_text(text: &str) -> Option<Self> {
        let word = COMMAND_PATTERN.find(text)?;
        word.as_str().parse().ok()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(Command::Buy),
            "sell" => Ok(Command::Sell),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

/// A raw signal as delivered by the signal source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    /// Unprocessed message body
    pub text: String,

    /// When the signal was received
    pub received_at: DateTime<Utc>,
}

impl SignalRecord {
    pub fn command(&self) -> Option<Command> {
        Command::from_signal_text(&self.text)
    }
}
