//! Backtest pipeline: Series → SMA pair → crossover scan → portfolio.
//!
//! Each stage is a pure function of its inputs. `run_backtest` wires them
//! together and either returns every output table or fails atomically.

pub mod portfolio;

pub use portfolio::{simulate, size_position, PortfolioSnapshot, Sizing, MIN_ENTRY_PRICE};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::domain::Series;
use crate::error::EngineError;
use crate::indicators::SmaPair;
use crate::signals::{trade_marks, CrossoverDetector, SignalEvent, TradeMark};

/// Numeric parameters of one backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub window_fast: usize,
    pub window_slow: usize,
    pub initial_capital: f64,
}

impl StrategyParams {
    pub fn new(window_fast: usize, window_slow: usize, initial_capital: f64) -> Self {
        Self {
            window_fast,
            window_slow,
            initial_capital,
        }
    }

    /// Reject bad parameters before touching any data.
    pub fn validate(&self) -> Result<(), EngineError> {
        for window in [self.window_fast, self.window_slow] {
            if window < 1 {
                return Err(EngineError::InvalidWindow { window });
            }
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::InvalidCapital {
                capital: self.initial_capital,
            });
        }
        Ok(())
    }
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self::new(40, 252, 100_000.0)
    }
}

/// Every table produced by one run, aligned to the input series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub params: StrategyParams,
    pub sma: SmaPair,
    pub events: Vec<SignalEvent>,
    pub marks: Vec<TradeMark>,
    pub snapshots: Vec<PortfolioSnapshot>,
}

impl BacktestRun {
    pub fn entry_count(&self) -> usize {
        self.marks.len()
    }

    pub fn final_snapshot(&self) -> Option<&PortfolioSnapshot> {
        self.snapshots.last()
    }
}

/// Run the full pipeline on one series.
pub fn run_backtest(series: &Series, params: &StrategyParams) -> Result<BacktestRun, EngineError> {
    let span = info_span!(
        "backtest",
        symbol = series.symbol().unwrap_or("-"),
        fast = params.window_fast,
        slow = params.window_slow
    );
    let _guard = span.enter();

    params.validate()?;

    let sma = SmaPair::compute(series, params.window_fast, params.window_slow)?;
    let events = CrossoverDetector::new(series, &sma)?.detect();
    let marks = trade_marks(&events);
    debug!(bars = series.len(), entries = marks.len(), "crossover scan complete");

    let snapshots = simulate(series, &events, params.initial_capital)?;
    if let Some(last) = snapshots.last() {
        info!(
            bars = series.len(),
            entries = marks.len(),
            final_equity = last.total_equity,
            "backtest complete"
        );
    }

    Ok(BacktestRun {
        params: *params,
        sma,
        events,
        marks,
        snapshots,
    })
}
