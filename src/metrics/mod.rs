//! Performance metrics over realized returns.

mod calculator;

pub use calculator::MetricsCalculator;
