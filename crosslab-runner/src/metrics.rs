//! Performance metrics: pure functions that compute strategy statistics.
//!
//! Every metric is a pure function: equity curve and/or signal events in,
//! scalar out. No dependencies on the data pipeline.

use serde::{Deserialize, Serialize};

use crosslab_core::engine::PortfolioSnapshot;
use crosslab_core::signals::{Signal, SignalEvent};

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate performance metrics for a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub strategy_return: f64,
    pub buy_and_hold_return: f64,
    /// Strategy minus buy-and-hold.
    pub excess_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub entry_count: usize,
    pub long_entries: usize,
    pub short_entries: usize,
    /// Fraction of bars with a non-zero position.
    pub exposure: f64,
    pub final_equity: f64,
    pub bar_count: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics from a run's snapshots and signal events.
    pub fn compute(snapshots: &[PortfolioSnapshot], events: &[SignalEvent]) -> Self {
        let equity: Vec<f64> = snapshots.iter().map(|s| s.total_equity).collect();
        let strategy_return = snapshots
            .iter()
            .rev()
            .find_map(|s| s.cumulative_strategy_return)
            .unwrap_or(0.0);
        let buy_and_hold_return = snapshots
            .iter()
            .rev()
            .find_map(|s| s.cumulative_buy_and_hold_return)
            .unwrap_or(0.0);
        let strategy_returns: Vec<f64> =
            snapshots.iter().filter_map(|s| s.strategy_return).collect();

        Self {
            strategy_return,
            buy_and_hold_return,
            excess_return: strategy_return - buy_and_hold_return,
            cagr: cagr(&equity),
            sharpe: sharpe_ratio(&strategy_returns),
            max_drawdown: max_drawdown(&equity),
            entry_count: count_signals(events, |s| s != Signal::Hold),
            long_entries: count_signals(events, |s| s == Signal::EnterLong),
            short_entries: count_signals(events, |s| s == Signal::EnterShort),
            exposure: exposure(snapshots),
            final_equity: equity.last().copied().unwrap_or(0.0),
            bar_count: snapshots.len(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Compound Annual Growth Rate over the equity curve.
///
/// Returns 0.0 for fewer than two bars or non-positive equity at either end.
pub fn cagr(equity_curve: &[f64]) -> f64 {
    let (Some(&initial), Some(&final_eq)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || initial <= 0.0 || final_eq <= 0.0 {
        return 0.0;
    }
    let years = equity_curve.len() as f64 / TRADING_DAYS_PER_YEAR;
    (final_eq / initial).powf(1.0 / years) - 1.0
}

/// Annualized Sharpe ratio of daily strategy returns (risk-free rate 0).
///
/// Returns 0.0 if variance is zero or fewer than 2 returns.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(returns);
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    (mean / std) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
///
/// Returns 0.0 if equity is constant or monotonically increasing.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;

    for &eq in equity_curve {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            let dd = (eq - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Fraction of bars holding a position.
pub fn exposure(snapshots: &[PortfolioSnapshot]) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    let held = snapshots.iter().filter(|s| s.shares_held != 0).count();
    held as f64 / snapshots.len() as f64
}

fn count_signals(events: &[SignalEvent], pred: impl Fn(Signal) -> bool) -> usize {
    events
        .iter()
        .filter_map(|e| e.signal)
        .filter(|&s| pred(s))
        .count()
}

fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}
