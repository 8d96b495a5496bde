//! Simple Moving Average (SMA).
//!
//! Rolling mean of close prices over a trailing window.
//! Lookback: window - 1 (first defined value at index window-1).

use serde::{Deserialize, Serialize};

use super::Indicator;
use crate::domain::Series;
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Sma {
    window: usize,
    name: String,
}

impl Sma {
    pub fn new(window: usize) -> Result<Self, EngineError> {
        if window < 1 {
            return Err(EngineError::InvalidWindow { window });
        }
        Ok(Self {
            window,
            name: format!("sma_{window}"),
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window - 1
    }

    fn compute(&self, series: &Series) -> Vec<Option<f64>> {
        let closes = series.closes();
        let n = closes.len();
        let mut result = vec![None; n];

        // Mean of the offsets from the window's first close. A window of equal
        // closes yields exactly that close, so tied averages stay tied across
        // window lengths.
        for i in self.lookback()..n {
            let window = &closes[i + 1 - self.window..=i];
            let base = window[0];
            let offset = window.iter().map(|c| c - base).sum::<f64>() / self.window as f64;
            result[i] = Some(base + offset);
        }

        result
    }
}

/// One-shot SMA over a series' closes.
pub fn compute_sma(series: &Series, window: usize) -> Result<Vec<Option<f64>>, EngineError> {
    Ok(Sma::new(window)?.compute(series))
}

/// Fast and slow SMA sequences, both aligned to the same series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmaPair {
    pub window_fast: usize,
    pub window_slow: usize,
    pub fast: Vec<Option<f64>>,
    pub slow: Vec<Option<f64>>,
}

impl SmaPair {
    /// Compute both averages. `window_fast` is usually the shorter window,
    /// but nothing here requires it.
    pub fn compute(
        series: &Series,
        window_fast: usize,
        window_slow: usize,
    ) -> Result<Self, EngineError> {
        let fast = compute_sma(series, window_fast)?;
        let slow = compute_sma(series, window_slow)?;
        Ok(Self {
            window_fast,
            window_slow,
            fast,
            slow,
        })
    }

    pub fn len(&self) -> usize {
        self.fast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fast.is_empty()
    }

    /// Both values at `index`, or `None` if either is still warming up.
    pub fn get(&self, index: usize) -> Option<(f64, f64)> {
        match (self.fast.get(index), self.slow.get(index)) {
            (Some(Some(f)), Some(Some(s))) => Some((*f, *s)),
            _ => None,
        }
    }
}
