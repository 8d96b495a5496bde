//! Single-position portfolio simulation driven by crossover signals.
//!
//! Sizing happens once: the first non-zero signal fixes
//! `unit = floor(initial_capital / entry_close)` shares, and every later
//! exposure is `unit * cumulative_signal`. Cash moves by the notional of each
//! entry at that bar's close.
//!
//! Invariant: `total_equity == position_value + cash` on every bar, computed
//! as exactly that sum.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::series::compound;
use crate::domain::Series;
use crate::error::EngineError;
use crate::signals::SignalEvent;

/// Entry prices at or below this are treated as zero.
pub const MIN_ENTRY_PRICE: f64 = 1e-12;

/// Portfolio state at the close of one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub date: NaiveDate,
    pub close: f64,
    pub signal: i8,
    /// Net directional exposure in units: -1, 0 or +1.
    pub cumulative_signal: i64,
    pub shares_held: i64,
    pub position_value: f64,
    pub cash: f64,
    pub total_equity: f64,
    pub strategy_return: Option<f64>,
    pub cumulative_strategy_return: Option<f64>,
    pub cumulative_buy_and_hold_return: Option<f64>,
}

/// Position sizing fixed at the first entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sizing {
    pub first_entry_index: usize,
    pub entry_price: f64,
    pub shares_per_unit: i64,
}

/// Locate the first entry and size one unit of exposure from it.
pub fn size_position(
    series: &Series,
    events: &[SignalEvent],
    initial_capital: f64,
) -> Result<Sizing, EngineError> {
    let first_entry_index = events
        .iter()
        .position(SignalEvent::is_entry)
        .ok_or(EngineError::NoEntrySignal)?;

    let bar = series
        .bar(first_entry_index)
        .ok_or(EngineError::LengthMismatch {
            expected: series.len(),
            actual: events.len(),
        })?;
    let entry_price = bar.close;
    if !entry_price.is_finite() || entry_price <= MIN_ENTRY_PRICE {
        return Err(EngineError::InvalidEntryPrice {
            date: bar.date,
            price: entry_price,
        });
    }

    Ok(Sizing {
        first_entry_index,
        entry_price,
        shares_per_unit: (initial_capital / entry_price).floor() as i64,
    })
}

/// Simulate the portfolio over every bar of `series`.
///
/// `events` must be the scan output for the same series (one event per bar).
pub fn simulate(
    series: &Series,
    events: &[SignalEvent],
    initial_capital: f64,
) -> Result<Vec<PortfolioSnapshot>, EngineError> {
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err(EngineError::InvalidCapital {
            capital: initial_capital,
        });
    }
    if events.len() != series.len() {
        return Err(EngineError::LengthMismatch {
            expected: series.len(),
            actual: events.len(),
        });
    }

    let sizing = size_position(series, events, initial_capital)?;
    let unit = sizing.shares_per_unit;

    let mut snapshots = Vec::with_capacity(series.len());
    let mut cumulative_signal: i64 = 0;
    let mut spent = 0.0;
    let mut prev_equity: Option<f64> = None;

    for (bar, event) in series.bars().iter().zip(events) {
        let signal = event.value();
        cumulative_signal += i64::from(signal);
        spent += f64::from(signal) * bar.close * unit as f64;

        let shares_held = unit * cumulative_signal;
        let position_value = shares_held as f64 * bar.close;
        let cash = initial_capital - spent;
        let total_equity = position_value + cash;

        let strategy_return = match prev_equity {
            Some(prev) if prev != 0.0 => Some(total_equity / prev - 1.0),
            _ => None,
        };
        prev_equity = Some(total_equity);

        snapshots.push(PortfolioSnapshot {
            date: bar.date,
            close: bar.close,
            signal,
            cumulative_signal,
            shares_held,
            position_value,
            cash,
            total_equity,
            strategy_return,
            cumulative_strategy_return: None,
            cumulative_buy_and_hold_return: None,
        });
    }

    let strategy_returns: Vec<Option<f64>> =
        snapshots.iter().map(|s| s.strategy_return).collect();
    let cumulative = compound(&strategy_returns);
    let buy_and_hold = series.cumulative_returns();
    for (i, snap) in snapshots.iter_mut().enumerate() {
        snap.cumulative_strategy_return = cumulative[i];
        snap.cumulative_buy_and_hold_return = buy_and_hold[i];
    }

    Ok(snapshots)
}
