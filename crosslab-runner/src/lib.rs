//! CrossLab Runner: backtest orchestration, metrics, export, parameter sweeps.
//!
//! This crate builds on `crosslab-core` to provide:
//! - TOML configuration with lookback presets and run fingerprinting
//! - Data loading with cache/download/synthetic fallback and CSV import
//! - Single-backtest runner with performance metrics
//! - JSON/CSV/Markdown artifacts
//! - Parallel SMA window sweeps

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod sweep;

pub use config::{BacktestConfig, ConfigError, Lookback, RunId};
pub use data_loader::{
    generate_synthetic_bars, load_csv, load_series, LoadError, LoadOptions, LoadedSeries,
};
pub use export::{
    export_json, export_marks_csv, export_portfolio_csv, export_signals_csv, generate_report,
    import_json, load_artifacts, save_artifacts,
};
pub use metrics::PerformanceMetrics;
pub use runner::{run_backtest_on_series, run_single_backtest, BacktestResult, RunError, SCHEMA_VERSION};
pub use sweep::{run_sweep, ParamGrid, SweepReport, SweepRow};
