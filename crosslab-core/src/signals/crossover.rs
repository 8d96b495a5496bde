//! Moving average crossover detection as a finite-state scan.
//!
//! The scan carries one of three states (`Flat`, `Long`, `Short`) from left
//! to right. Entering `Long` (fast above slow) or `Short` (fast below slow)
//! is reported only on the bar where the condition newly holds; every other
//! evaluated bar reports `Hold`. Exact equality of the two averages never
//! transitions.
//!
//! Bars where either average is undefined are skipped: the state is carried
//! through untouched and the event's `signal` is `None`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Series};
use crate::error::EngineError;
use crate::indicators::SmaPair;

/// Directional state of the scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverState {
    #[default]
    Flat,
    Long,
    Short,
}

/// Signal emitted on an evaluated bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Hold,
    EnterLong,
    EnterShort,
}

impl Signal {
    /// Numeric form used by the portfolio: 0, +1 or -1.
    pub fn value(self) -> i8 {
        match self {
            Signal::Hold => 0,
            Signal::EnterLong => 1,
            Signal::EnterShort => -1,
        }
    }
}

/// Per-bar output of the scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub index: usize,
    pub date: NaiveDate,
    pub close: f64,
    /// `None` when the bar was skipped because an average was undefined.
    pub signal: Option<Signal>,
    /// State after this bar.
    pub state: CrossoverState,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
}

impl SignalEvent {
    /// Numeric signal, with skipped bars contributing 0.
    pub fn value(&self) -> i8 {
        self.signal.map_or(0, Signal::value)
    }

    pub fn is_entry(&self) -> bool {
        self.value() != 0
    }
}

/// Pure transition function: state and the two averages in, new state and
/// signal out.
pub fn transition(state: CrossoverState, fast: f64, slow: f64) -> (CrossoverState, Signal) {
    if fast > slow && state != CrossoverState::Long {
        (CrossoverState::Long, Signal::EnterLong)
    } else if fast < slow && state != CrossoverState::Short {
        (CrossoverState::Short, Signal::EnterShort)
    } else {
        (state, Signal::Hold)
    }
}

/// Crossover detector over a series and its SMA pair.
///
/// Holds only borrowed inputs; every call to [`scan`](Self::scan) starts
/// from `Flat` at bar 0 and replays the identical sequence.
#[derive(Debug, Clone, Copy)]
pub struct CrossoverDetector<'a> {
    bars: &'a [Bar],
    pair: &'a SmaPair,
}

impl<'a> CrossoverDetector<'a> {
    pub fn new(series: &'a Series, pair: &'a SmaPair) -> Result<Self, EngineError> {
        for len in [pair.fast.len(), pair.slow.len()] {
            if len != series.len() {
                return Err(EngineError::LengthMismatch {
                    expected: series.len(),
                    actual: len,
                });
            }
        }
        Ok(Self {
            bars: series.bars(),
            pair,
        })
    }

    /// Lazy scan over all bars.
    pub fn scan(&self) -> CrossoverScan<'a> {
        CrossoverScan {
            bars: self.bars,
            pair: self.pair,
            index: 0,
            state: CrossoverState::Flat,
        }
    }

    pub fn detect(&self) -> Vec<SignalEvent> {
        self.scan().collect()
    }
}

/// Iterator returned by [`CrossoverDetector::scan`].
#[derive(Debug, Clone)]
pub struct CrossoverScan<'a> {
    bars: &'a [Bar],
    pair: &'a SmaPair,
    index: usize,
    state: CrossoverState,
}

impl Iterator for CrossoverScan<'_> {
    type Item = SignalEvent;

    fn next(&mut self) -> Option<SignalEvent> {
        let bar = self.bars.get(self.index)?;
        let index = self.index;
        self.index += 1;

        let Some((fast, slow)) = self.pair.get(index) else {
            return Some(SignalEvent {
                index,
                date: bar.date,
                close: bar.close,
                signal: None,
                state: self.state,
                buy_price: None,
                sell_price: None,
            });
        };

        let (state, signal) = transition(self.state, fast, slow);
        self.state = state;

        let (buy_price, sell_price) = match signal {
            Signal::EnterLong => (Some(bar.close), None),
            Signal::EnterShort => (None, Some(bar.close)),
            Signal::Hold => (None, None),
        };

        Some(SignalEvent {
            index,
            date: bar.date,
            close: bar.close,
            signal: Some(signal),
            state,
            buy_price,
            sell_price,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bars.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CrossoverScan<'_> {}

impl std::iter::FusedIterator for CrossoverScan<'_> {}

/// Which side a price mark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkKind {
    Buy,
    Sell,
}

/// One row of the buy/sell marks table: an entry bar and its close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMark {
    pub date: NaiveDate,
    pub kind: MarkKind,
    pub price: f64,
}

/// Collect the entry bars of a scan into a date-ordered marks table.
pub fn trade_marks(events: &[SignalEvent]) -> Vec<TradeMark> {
    events
        .iter()
        .filter_map(|e| match (e.buy_price, e.sell_price) {
            (Some(price), _) => Some(TradeMark {
                date: e.date,
                kind: MarkKind::Buy,
                price,
            }),
            (None, Some(price)) => Some(TradeMark {
                date: e.date,
                kind: MarkKind::Sell,
                price,
            }),
            (None, None) => None,
        })
        .collect()
}
