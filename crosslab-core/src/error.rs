//! Engine error taxonomy.
//!
//! Every error is raised at the point of detection and propagated unchanged.
//! The engine is deterministic, so none of these is retryable: the same
//! inputs always fail the same way.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::BarError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("duplicate bar date {date}")]
    DuplicateDate { date: NaiveDate },

    #[error("invalid bar on {date}: {reason}")]
    InvalidBar { date: NaiveDate, reason: BarError },

    #[error("invalid window length {window} (must be >= 1)")]
    InvalidWindow { window: usize },

    #[error("no entry signal: the moving averages never cross")]
    NoEntrySignal,

    #[error("invalid entry price {price} on {date}")]
    InvalidEntryPrice { date: NaiveDate, price: f64 },

    #[error("invalid initial capital {capital} (must be finite and > 0)")]
    InvalidCapital { capital: f64 },

    #[error("length mismatch: expected {expected} values aligned to the series, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
