//! Performance summary over realized sell returns: win rate, mean, spread,
//! extremes and maximum drawdown.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

/// Summary of an instance's realized percentage returns.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    /// Number of sells
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Fraction of sells with a positive return (0.0 - 1.0)
    pub win_rate: f64,
    /// Sum of percentage returns
    pub total_percent: Decimal,
    pub mean_percent: f64,
    pub std_dev_percent: f64,
    pub best_percent: Decimal,
    pub worst_percent: Decimal,
    /// Largest peak-to-trough fall of the cumulative percentage curve
    pub max_drawdown_percent: Decimal,
}

impl Default for PerformanceSummary {
    fn default() -> Self {
        Self {
            trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            total_percent: Decimal::ZERO,
            mean_percent: 0.0,
            std_dev_percent: 0.0,
            best_percent: Decimal::ZERO,
            worst_percent: Decimal::ZERO,
            max_drawdown_percent: Decimal::ZERO,
        }
    }
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Summarize per-sell percentage returns, oldest first.
    pub fn summarize(returns: &[Decimal]) -> PerformanceSummary {
        if returns.is_empty() {
            return PerformanceSummary::default();
        }

        let wins = returns.iter().filter(|&&r| r > Decimal::ZERO).count();
        let mut summary = PerformanceSummary {
            trades: returns.len(),
            wins,
            losses: returns.len() - wins,
            win_rate: wins as f64 / returns.len() as f64,
            total_percent: returns.iter().copied().sum(),
            best_percent: returns.iter().copied().max().unwrap_or_default(),
            worst_percent: returns.iter().copied().min().unwrap_or_default(),
            max_drawdown_percent: Self::max_drawdown(returns),
            ..Default::default()
        };

        let values: Vec<f64> = returns.iter().filter_map(|r| r.to_f64()).collect();
        summary.mean_percent = values.iter().mean();
        // Sample standard deviation is undefined for one value.
        if values.len() > 1 {
            summary.std_dev_percent = values.iter().std_dev();
        }

        summary
    }

    /// Maximum drawdown of the running sum of returns.
    fn max_drawdown(returns: &[Decimal]) -> Decimal {
        let mut equity = Decimal::ZERO;
        let mut peak = Decimal::ZERO;
        let mut max_dd = Decimal::ZERO;

        for r in returns {
            equity += r;
            if equity > peak {
                peak = equity;
            }
            max_dd = max_dd.max(peak - equity);
        }

        max_dd
    }

    /// One-line rendering for notifications and the console.
    pub fn describe(summary: &PerformanceSummary) -> String {
        if summary.trades == 0 {
            return "no closed trades yet".to_string();
        }
        format!(
            "{} sells ({} won, {} lost), win rate {:.1}%, total {:.2}%, mean {:.2}% (sd {:.2}), best {:.2}%, worst {:.2}%, max drawdown {:.2}%",
            summary.trades,
            summary.wins,
            summary.losses,
            summary.win_rate * 100.0,
            summary.total_percent,
            summary.mean_percent,
            summary.std_dev_percent,
            summary.best_percent,
            summary.worst_percent,
            summary.max_drawdown_percent,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_summarize_returns() {
        let returns = vec![dec!(10), dec!(-5), dec!(20), dec!(-3), dec!(15)];

        let summary = MetricsCalculator::summarize(&returns);

        assert_eq!(summary.trades, 5);
        assert_eq!(summary.wins, 3);
        assert_eq!(summary.losses, 2);
        assert!((summary.win_rate - 0.6).abs() < 1e-9);
        assert_eq!(summary.total_percent, dec!(37));
        assert!((summary.mean_percent - 7.4).abs() < 1e-9);
        assert!(summary.std_dev_percent > 0.0);
        assert_eq!(summary.best_percent, dec!(20));
        assert_eq!(summary.worst_percent, dec!(-5));
        assert!(MetricsCalculator::describe(&summary).starts_with("5 sells (3 won, 2 lost), win rate 60.0%"));
    }

    #[test]
    fn test_max_drawdown() {
        let returns = vec![
            dec!(10), // 10, peak 10
            dec!(5),  // 15, peak 15
            dec!(-8), // 7
            dec!(-2), // 5, drawdown 10
            dec!(10), // 15
            dec!(5),  // 20, peak 20
        ];

        let summary = MetricsCalculator::summarize(&returns);
        assert_eq!(summary.max_drawdown_percent, dec!(10));
    }

    #[test]
    fn test_flat_sell_counts_as_loss() {
        let summary = MetricsCalculator::summarize(&[Decimal::ZERO]);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.std_dev_percent, 0.0);
    }

    #[test]
    fn test_empty_history() {
        let summary = MetricsCalculator::summarize(&[]);
        assert_eq!(summary, PerformanceSummary::default());
        assert_eq!(MetricsCalculator::describe(&summary), "no closed trades yet");
    }
}
