//! Rolling indicators over a [`Series`].
//!
//! Indicators are pure functions: series in, aligned value sequence out.
//! Warm-up positions are `None`, never a sentinel number, so downstream
//! formulas cannot mistake an undefined mean for zero.

pub mod sma;

pub use sma::{compute_sma, Sma, SmaPair};

use crate::domain::Series;

/// Trait for indicators.
///
/// # Look-ahead contamination guard
/// No value at bar t may depend on bars after t. Every indicator must give
/// the same prefix on a truncated series as on the full series.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20").
    fn name(&self) -> &str;

    /// Number of leading bars that are always `None`.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the whole series, aligned 1:1 with its bars.
    fn compute(&self, series: &Series) -> Vec<Option<f64>>;
}

/// Build a series from close prices for tests.
///
/// Consecutive calendar days starting 2024-01-02; OHLC all equal to close.
#[cfg(test)]
pub fn make_series(closes: &[f64]) -> Series {
    use crate::domain::Bar;
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            Bar::new(
                base_date + chrono::Duration::days(i as i64),
                close,
                close,
                close,
                close,
            )
            .with_volume(1000)
        })
        .collect();
    Series::new(bars).unwrap()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
