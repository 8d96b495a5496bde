//! Backtest runner: wires together data loading, the engine, and metrics.
//!
//! Two entry points:
//! - `run_single_backtest()`: loads data through the cache, then runs. Used by the CLI.
//! - `run_backtest_on_series()`: takes an already loaded series. Used by CSV import and tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crosslab_core::data::{DataProvider, DataSource, ParquetCache};
use crosslab_core::engine::{run_backtest, PortfolioSnapshot, StrategyParams};
use crosslab_core::error::EngineError;
use crosslab_core::indicators::SmaPair;
use crosslab_core::signals::{SignalEvent, TradeMark};

use crate::config::{BacktestConfig, ConfigError, RunId};
use crate::data_loader::{load_series, LoadError, LoadOptions, LoadedSeries};
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub symbol: String,
    pub start_date: String,
    pub end_date: String,
    pub params: StrategyParams,
    pub dataset_hash: String,
    pub source: DataSource,
    pub has_synthetic: bool,
    pub metrics: PerformanceMetrics,
    pub sma: SmaPair,
    pub events: Vec<SignalEvent>,
    pub marks: Vec<TradeMark>,
    pub snapshots: Vec<PortfolioSnapshot>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run a single backtest from a BacktestConfig (loads data through the cache).
pub fn run_single_backtest(
    config: &BacktestConfig,
    cache: &ParquetCache,
    provider: Option<&dyn DataProvider>,
    opts: &LoadOptions,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let loaded = load_series(&config.backtest.symbol, cache, provider, opts)?;
    run_backtest_on_series(config, &loaded)
}

/// Run a backtest on pre-loaded data: no I/O.
pub fn run_backtest_on_series(
    config: &BacktestConfig,
    loaded: &LoadedSeries,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let params = config.params();
    let run = run_backtest(&loaded.series, &params)?;
    let metrics = PerformanceMetrics::compute(&run.snapshots, &run.events);
    let run_id = config.run_id(&loaded.dataset_hash)?;

    let short_id = run_id.get(..12).unwrap_or(run_id.as_str());
    info!(
        symbol = %config.backtest.symbol,
        run_id = short_id,
        strategy_return = metrics.strategy_return,
        buy_and_hold_return = metrics.buy_and_hold_return,
        "run complete"
    );

    let series = &loaded.series;
    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        symbol: config.backtest.symbol.clone(),
        start_date: series.first_date().map(|d| d.to_string()).unwrap_or_default(),
        end_date: series.last_date().map(|d| d.to_string()).unwrap_or_default(),
        params,
        dataset_hash: loaded.dataset_hash.clone(),
        source: loaded.source,
        has_synthetic: loaded.is_synthetic(),
        metrics,
        sma: run.sma,
        events: run.events,
        marks: run.marks,
        snapshots: run.snapshots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lookback;
    use crosslab_core::domain::{Bar, Series};

    fn loaded(closes: &[f64]) -> LoadedSeries {
        let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(base + chrono::Duration::days(i as i64), c, c, c, c))
            .collect();
        LoadedSeries::from_series(Series::with_symbol("TEST", bars).unwrap(), DataSource::CsvImport)
    }

    fn config(fast: usize, slow: usize) -> BacktestConfig {
        BacktestConfig::new(
            "TEST",
            StrategyParams::new(fast, slow, 100_000.0),
            Lookback::OneYear,
        )
    }

    #[test]
    fn result_carries_provenance() {
        let data = loaded(&[10.0, 10.0, 10.0, 12.0, 12.0, 12.0, 8.0, 8.0, 8.0]);
        let result = run_backtest_on_series(&config(2, 3), &data).unwrap();

        assert_eq!(result.schema_version, SCHEMA_VERSION);
        assert_eq!(result.symbol, "TEST");
        assert_eq!(result.start_date, "2024-01-02");
        assert_eq!(result.end_date, "2024-01-10");
        assert_eq!(result.dataset_hash, data.dataset_hash);
        assert_eq!(result.source, DataSource::CsvImport);
        assert!(!result.has_synthetic);
        assert_eq!(result.marks.len(), 2);
        assert_eq!(result.snapshots.len(), 9);
        assert_eq!(result.run_id, config(2, 3).run_id(&data.dataset_hash).unwrap());
    }

    #[test]
    fn no_crossover_is_an_engine_error() {
        let data = loaded(&[5.0; 10]);
        assert!(matches!(
            run_backtest_on_series(&config(2, 3), &data),
            Err(RunError::Engine(EngineError::NoEntrySignal))
        ));
    }

    #[test]
    fn invalid_config_fails_before_running() {
        let data = loaded(&[5.0; 10]);
        assert!(matches!(
            run_backtest_on_series(&config(0, 3), &data),
            Err(RunError::Config(ConfigError::InvalidWindow(0)))
        ));
    }
}
