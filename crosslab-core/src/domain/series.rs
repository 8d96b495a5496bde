//! Series: a validated, date-ordered bar sequence with derived returns.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Bar;
use crate::error::EngineError;

/// Ordered daily bars for one instrument.
///
/// Construction sorts by date, rejects duplicate dates and insane bars, and
/// computes per-bar returns once. A `Series` is immutable afterwards.
///
/// Returns at index 0 are `None`: there is no prior close. Consumers must
/// treat `None` as missing, never as zero.
///
/// Deserializing goes through the same checks as [`Series::new`]; stored
/// returns in the input are ignored and recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct Series {
    symbol: Option<String>,
    bars: Vec<Bar>,
    daily_returns: Vec<Option<f64>>,
    cumulative_returns: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct RawSeries {
    #[serde(default)]
    symbol: Option<String>,
    bars: Vec<Bar>,
}

impl TryFrom<RawSeries> for Series {
    type Error = EngineError;

    fn try_from(raw: RawSeries) -> Result<Self, Self::Error> {
        Series::build(raw.symbol, raw.bars)
    }
}

impl Series {
    pub fn new(bars: Vec<Bar>) -> Result<Self, EngineError> {
        Self::build(None, bars)
    }

    pub fn with_symbol(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, EngineError> {
        Self::build(Some(symbol.into()), bars)
    }

    fn build(symbol: Option<String>, mut bars: Vec<Bar>) -> Result<Self, EngineError> {
        bars.sort_by_key(|b| b.date);

        for pair in bars.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(EngineError::DuplicateDate { date: pair[1].date });
            }
        }
        for bar in &bars {
            bar.validate().map_err(|reason| EngineError::InvalidBar {
                date: bar.date,
                reason,
            })?;
        }

        let daily_returns = daily_returns(&bars);
        let cumulative_returns = compound(&daily_returns);

        Ok(Self {
            symbol,
            bars,
            daily_returns,
            cumulative_returns,
        })
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn bar(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars.iter().map(|b| b.date)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// `close[i] / close[i-1] - 1`; `None` at index 0 or after a zero close.
    pub fn daily_returns(&self) -> &[Option<f64>] {
        &self.daily_returns
    }

    /// Compounded buy-and-hold return up to each bar.
    pub fn cumulative_returns(&self) -> &[Option<f64>] {
        &self.cumulative_returns
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Bars within `[start, end]`, as a new series with the same symbol.
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect();
        let daily_returns = daily_returns(&bars);
        let cumulative_returns = compound(&daily_returns);
        Self {
            symbol: self.symbol.clone(),
            bars,
            daily_returns,
            cumulative_returns,
        }
    }

    /// Deterministic BLAKE3 hash over dates and OHLCV values.
    pub fn dataset_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        if let Some(symbol) = &self.symbol {
            hasher.update(symbol.as_bytes());
        }
        for bar in &self.bars {
            hasher.update(bar.date.to_string().as_bytes());
            hasher.update(&bar.open.to_le_bytes());
            hasher.update(&bar.high.to_le_bytes());
            hasher.update(&bar.low.to_le_bytes());
            hasher.update(&bar.close.to_le_bytes());
            hasher.update(&bar.volume.to_le_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

fn daily_returns(bars: &[Bar]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        if i == 0 {
            out.push(None);
            continue;
        }
        let prev = bars[i - 1].close;
        out.push(if prev == 0.0 {
            None
        } else {
            Some(bar.close / prev - 1.0)
        });
    }
    out
}

/// Running `Π(1 + r) - 1` over the defined returns.
///
/// Missing returns are skipped in the product, and the output is missing
/// wherever the input is missing.
pub(crate) fn compound(returns: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut growth = 1.0;
    returns
        .iter()
        .map(|r| {
            r.map(|r| {
                growth *= 1.0 + r;
                growth - 1.0
            })
        })
        .collect()
}
