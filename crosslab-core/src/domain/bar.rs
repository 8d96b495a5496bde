//! Bar: one trading day of OHLCV data.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Daily OHLCV bar for a single instrument.
///
/// `vwap` and `transactions` are optional because not every source reports
/// them (CSV imports and synthetic bars usually do not).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default)]
    pub vwap: Option<f64>,
    #[serde(default)]
    pub transactions: Option<u64>,
}

/// Why a bar failed the OHLC sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BarError {
    #[error("non-finite price field")]
    NonFinite,
    #[error("negative low price")]
    NegativeLow,
    #[error("high below low")]
    HighBelowLow,
    #[error("open outside [low, high]")]
    OpenOutOfRange,
    #[error("close outside [low, high]")]
    CloseOutOfRange,
}

impl Bar {
    /// Bar with OHLC only; volume zero, no vwap or transaction count.
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume: 0,
            vwap: None,
            transactions: None,
        }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.volume = volume;
        self
    }

    /// Check `0 <= low <= {open, close} <= high` with all prices finite.
    pub fn validate(&self) -> Result<(), BarError> {
        if !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
        {
            return Err(BarError::NonFinite);
        }
        if self.low < 0.0 {
            return Err(BarError::NegativeLow);
        }
        if self.high < self.low {
            return Err(BarError::HighBelowLow);
        }
        if self.open < self.low || self.open > self.high {
            return Err(BarError::OpenOutOfRange);
        }
        if self.close < self.low || self.close > self.high {
            return Err(BarError::CloseOutOfRange);
        }
        Ok(())
    }

    pub fn is_sane(&self) -> bool {
        self.validate().is_ok()
    }
}
