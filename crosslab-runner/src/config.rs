//! Serializable backtest configuration, loaded from TOML.
//!
//! ```toml
//! [backtest]
//! symbol = "AAPL"
//! lookback = "5Y"
//! initial_capital = 100000.0
//!
//! [strategy]
//! window_fast = 40
//! window_slow = 252
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crosslab_core::engine::StrategyParams;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("window must be >= 1, got {0}")]
    InvalidWindow(usize),

    #[error("initial capital must be positive and finite, got {0}")]
    InvalidCapital(f64),

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("unknown lookback '{0}' (expected 1D, 5D, 1M, 6M, YTD, 1Y or 5Y)")]
    UnknownLookback(String),

    #[error("lookback {lookback} from {anchor} is out of the calendar range")]
    DateOutOfRange { lookback: Lookback, anchor: NaiveDate },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Date-range presets, counted back from the end date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lookback {
    #[serde(rename = "1D")]
    OneDay,
    #[serde(rename = "5D")]
    FiveDays,
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "YTD")]
    YearToDate,
    #[serde(rename = "1Y")]
    OneYear,
    #[default]
    #[serde(rename = "5Y")]
    FiveYears,
}

impl Lookback {
    pub const ALL: [Lookback; 7] = [
        Lookback::OneDay,
        Lookback::FiveDays,
        Lookback::OneMonth,
        Lookback::SixMonths,
        Lookback::YearToDate,
        Lookback::OneYear,
        Lookback::FiveYears,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Lookback::OneDay => "1D",
            Lookback::FiveDays => "5D",
            Lookback::OneMonth => "1M",
            Lookback::SixMonths => "6M",
            Lookback::YearToDate => "YTD",
            Lookback::OneYear => "1Y",
            Lookback::FiveYears => "5Y",
        }
    }

    /// First date of the window ending at `anchor`.
    ///
    /// YTD steps back by the anchor's month number, landing in the previous
    /// December.
    pub fn start_from(self, anchor: NaiveDate) -> Result<NaiveDate, ConfigError> {
        let start = match self {
            Lookback::OneDay => anchor.checked_sub_days(Days::new(1)),
            Lookback::FiveDays => anchor.checked_sub_days(Days::new(5)),
            Lookback::OneMonth => anchor.checked_sub_months(Months::new(1)),
            Lookback::SixMonths => anchor.checked_sub_months(Months::new(6)),
            Lookback::YearToDate => anchor.checked_sub_months(Months::new(anchor.month())),
            Lookback::OneYear => anchor.checked_sub_months(Months::new(12)),
            Lookback::FiveYears => anchor.checked_sub_months(Months::new(60)),
        };
        start.ok_or(ConfigError::DateOutOfRange {
            lookback: self,
            anchor,
        })
    }

    /// `(start, end)` for a window ending today.
    pub fn resolve(self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ConfigError> {
        Ok((self.start_from(today)?, today))
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lookback {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Lookback::ALL
            .into_iter()
            .find(|l| l.as_str() == upper)
            .ok_or_else(|| ConfigError::UnknownLookback(s.to_string()))
    }
}

/// `[backtest]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub symbol: String,
    #[serde(default)]
    pub lookback: Lookback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
}

/// `[strategy]` section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategySection {
    #[serde(default = "default_fast")]
    pub window_fast: usize,
    #[serde(default = "default_slow")]
    pub window_slow: usize,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            window_fast: default_fast(),
            window_slow: default_slow(),
        }
    }
}

fn default_capital() -> f64 {
    StrategyParams::default().initial_capital
}

fn default_fast() -> usize {
    StrategyParams::default().window_fast
}

fn default_slow() -> usize {
    StrategyParams::default().window_slow
}

/// Everything needed to reproduce one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub backtest: BacktestSection,
    #[serde(default)]
    pub strategy: StrategySection,
}

impl BacktestConfig {
    pub fn new(symbol: impl Into<String>, params: StrategyParams, lookback: Lookback) -> Self {
        Self {
            backtest: BacktestSection {
                symbol: symbol.into(),
                lookback,
                start_date: None,
                end_date: None,
                initial_capital: params.initial_capital,
            },
            strategy: StrategySection {
                window_fast: params.window_fast,
                window_slow: params.window_slow,
            },
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backtest.symbol.trim().is_empty() {
            return Err(ConfigError::EmptySymbol);
        }
        for window in [self.strategy.window_fast, self.strategy.window_slow] {
            if window < 1 {
                return Err(ConfigError::InvalidWindow(window));
            }
        }
        let capital = self.backtest.initial_capital;
        if !capital.is_finite() || capital <= 0.0 {
            return Err(ConfigError::InvalidCapital(capital));
        }
        if let (Some(start), Some(end)) = (self.backtest.start_date, self.backtest.end_date) {
            if start > end {
                return Err(ConfigError::InvalidDateRange { start, end });
            }
        }
        Ok(())
    }

    pub fn params(&self) -> StrategyParams {
        StrategyParams::new(
            self.strategy.window_fast,
            self.strategy.window_slow,
            self.backtest.initial_capital,
        )
    }

    /// Inclusive date range to load.
    ///
    /// Explicit dates win; a missing start is filled in from the lookback,
    /// counted back from the end date (or `today`).
    pub fn date_range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ConfigError> {
        let end = self.backtest.end_date.unwrap_or(today);
        let start = match self.backtest.start_date {
            Some(start) => start,
            None => self.backtest.lookback.start_from(end)?,
        };
        if start > end {
            return Err(ConfigError::InvalidDateRange { start, end });
        }
        Ok((start, end))
    }

    /// Deterministic run id over this config and the dataset it ran on.
    pub fn run_id(&self, dataset_hash: &str) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(json.as_bytes());
        hasher.update(dataset_hash.as_bytes());
        Ok(hasher.finalize().to_hex().to_string())
    }
}
