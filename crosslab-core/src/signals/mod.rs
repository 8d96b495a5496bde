//! Signal generation.
//!
//! Signals see only the series and its indicators. They never receive
//! portfolio state.

pub mod crossover;

pub use crossover::{
    trade_marks, transition, CrossoverDetector, CrossoverScan, CrossoverState, MarkKind, Signal,
    SignalEvent, TradeMark,
};
