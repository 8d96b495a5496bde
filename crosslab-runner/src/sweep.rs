//! Parameter sweep over SMA window pairs.
//!
//! Every `(fast, slow)` pair with `fast < slow` runs the full pipeline on the
//! same series, optionally in parallel with rayon. Pairs that never cross are
//! reported as skipped rather than failing the sweep.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crosslab_core::domain::Series;
use crosslab_core::engine::{run_backtest, StrategyParams};
use crosslab_core::error::EngineError;

use crate::metrics::PerformanceMetrics;

/// Fast and slow window candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub fast_windows: Vec<usize>,
    pub slow_windows: Vec<usize>,
}

impl ParamGrid {
    pub fn new(fast_windows: Vec<usize>, slow_windows: Vec<usize>) -> Self {
        Self {
            fast_windows,
            slow_windows,
        }
    }

    /// Fast 10, 20, 40 against slow 50, 100, 252.
    pub fn classic() -> Self {
        Self::new(vec![10, 20, 40], vec![50, 100, 252])
    }

    /// All `(fast, slow)` pairs with `fast < slow`, in grid order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for &fast in &self.fast_windows {
            for &slow in &self.slow_windows {
                if fast < slow {
                    pairs.push((fast, slow));
                }
            }
        }
        pairs
    }

    pub fn size(&self) -> usize {
        self.pairs().len()
    }
}

/// One completed sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub params: StrategyParams,
    pub metrics: PerformanceMetrics,
}

/// Ranked sweep results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Best strategy return first.
    pub rows: Vec<SweepRow>,
    /// `(fast, slow)` pairs that produced no entry signal.
    pub skipped: Vec<(usize, usize)>,
}

impl SweepReport {
    pub fn best(&self) -> Option<&SweepRow> {
        self.rows.first()
    }
}

fn run_pair(
    series: &Series,
    fast: usize,
    slow: usize,
    capital: f64,
) -> Result<Option<SweepRow>, EngineError> {
    let params = StrategyParams::new(fast, slow, capital);
    match run_backtest(series, &params) {
        Ok(run) => Ok(Some(SweepRow {
            params,
            metrics: PerformanceMetrics::compute(&run.snapshots, &run.events),
        })),
        Err(EngineError::NoEntrySignal) => {
            debug!(fast, slow, "no entry signal, skipping");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run every pair in `grid` against `series`.
///
/// Any error other than a missing entry signal aborts the sweep.
pub fn run_sweep(
    series: &Series,
    grid: &ParamGrid,
    initial_capital: f64,
    parallel: bool,
) -> Result<SweepReport, EngineError> {
    let pairs = grid.pairs();
    info!(pairs = pairs.len(), parallel, "starting sweep");

    let outcomes: Vec<Option<SweepRow>> = if parallel {
        pairs
            .par_iter()
            .map(|&(fast, slow)| run_pair(series, fast, slow, initial_capital))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        pairs
            .iter()
            .map(|&(fast, slow)| run_pair(series, fast, slow, initial_capital))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut rows = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (outcome, pair) in outcomes.into_iter().zip(pairs) {
        match outcome {
            Some(row) => rows.push(row),
            None => skipped.push(pair),
        }
    }

    rows.sort_by(|a, b| {
        b.metrics
            .strategy_return
            .total_cmp(&a.metrics.strategy_return)
            .then(a.params.window_fast.cmp(&b.params.window_fast))
            .then(a.params.window_slow.cmp(&b.params.window_slow))
    });

    Ok(SweepReport { rows, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosslab_core::domain::Bar;

    fn wave_series(n: usize) -> Series {
        let base = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars = (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.1).sin() * 10.0;
                Bar::new(base + chrono::Duration::days(i as i64), c, c, c, c)
            })
            .collect();
        Series::new(bars).unwrap()
    }

    #[test]
    fn grid_skips_non_increasing_pairs() {
        let grid = ParamGrid::new(vec![5, 10, 20], vec![10, 30]);
        assert_eq!(grid.pairs(), vec![(5, 10), (5, 30), (10, 30), (20, 30)]);
        assert_eq!(grid.size(), 4);
        assert_eq!(ParamGrid::classic().size(), 9);
    }

    #[test]
    fn parallel_matches_sequential() {
        let series = wave_series(300);
        let grid = ParamGrid::new(vec![3, 5, 8], vec![13, 21, 34]);
        let seq = run_sweep(&series, &grid, 10_000.0, false).unwrap();
        let par = run_sweep(&series, &grid, 10_000.0, true).unwrap();
        assert_eq!(seq, par);
        assert_eq!(seq.rows.len() + seq.skipped.len(), 9);
    }

    #[test]
    fn rows_are_ranked_by_strategy_return() {
        let series = wave_series(300);
        let report = run_sweep(&series, &ParamGrid::new(vec![3, 5], vec![13, 21]), 10_000.0, true)
            .unwrap();
        for pair in report.rows.windows(2) {
            assert!(pair[0].metrics.strategy_return >= pair[1].metrics.strategy_return);
        }
        assert_eq!(report.best(), report.rows.first());
    }

    #[test]
    fn pairs_without_entry_are_skipped() {
        let base = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let bars = (0..30)
            .map(|i| Bar::new(base + chrono::Duration::days(i), 50.0, 50.0, 50.0, 50.0))
            .collect();
        let flat = Series::new(bars).unwrap();
        let report = run_sweep(&flat, &ParamGrid::new(vec![2], vec![5, 10]), 1_000.0, false).unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.skipped, vec![(2, 5), (2, 10)]);
    }

    #[test]
    fn bad_capital_aborts() {
        let series = wave_series(100);
        assert!(matches!(
            run_sweep(&series, &ParamGrid::new(vec![3], vec![10]), 0.0, true),
            Err(EngineError::InvalidCapital { .. })
        ));
    }
}
