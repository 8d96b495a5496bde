//! CrossLab Core: series model, SMA indicators, crossover detection, portfolio simulation.
//!
//! This crate contains the backtesting engine:
//! - Domain types (bars, validated price series with derived returns)
//! - Rolling simple moving averages with explicit warm-up
//! - Crossover state machine emitting entry signals and trade marks
//! - Single-position portfolio simulation sized at the first entry
//! - Data collaborators (Polygon provider, Parquet cache) used by the runner

pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod signals;

pub use error::EngineError;
