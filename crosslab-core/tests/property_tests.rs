//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. SMA values equal the mean of their exact window, with window-1 warm-up bars
//! 2. Single exposure: cumulative signal never leaves {-1, 0, +1}
//! 3. Equity accounting: total equity == position value + cash on every bar
//! 4. Determinism: the same input always yields the same tables
//! 5. Entries alternate direction and are reported only at transitions
//! 6. A run of equal closes spanning both windows holds the state

use chrono::NaiveDate;
use proptest::prelude::*;
use crosslab_core::domain::{Bar, Series};
use crosslab_core::engine::{run_backtest, StrategyParams};
use crosslab_core::error::EngineError;
use crosslab_core::indicators::{compute_sma, SmaPair};
use crosslab_core::signals::{CrossoverDetector, CrossoverState, Signal};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (1.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_closes(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_price(), 1..max_len)
}

fn arb_windows() -> impl Strategy<Value = (usize, usize)> {
    (1usize..8, 1usize..15)
}

fn series_from(closes: &[f64]) -> Series {
    let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar::new(base + chrono::Duration::days(i as i64), c, c, c, c))
        .collect();
    Series::new(bars).unwrap()
}

// ── 1. SMA window mean ───────────────────────────────────────────────

proptest! {
    #[test]
    fn sma_is_mean_of_exact_window(closes in arb_closes(80), window in 1usize..20) {
        let series = series_from(&closes);
        let sma = compute_sma(&series, window).unwrap();
        prop_assert_eq!(sma.len(), closes.len());

        for (i, value) in sma.iter().enumerate() {
            if i + 1 < window {
                prop_assert!(value.is_none(), "warm-up bar {} must be undefined", i);
            } else {
                let slice = &closes[i + 1 - window..=i];
                let mean = slice.iter().sum::<f64>() / window as f64;
                let got = value.unwrap();
                prop_assert!((got - mean).abs() < 1e-9, "bar {}: {} != {}", i, got, mean);
            }
        }
    }
}

// ── 2. Single exposure ───────────────────────────────────────────────

proptest! {
    #[test]
    fn cumulative_signal_stays_in_unit_range(
        closes in arb_closes(120),
        (fast, slow) in arb_windows(),
    ) {
        let series = series_from(&closes);
        match run_backtest(&series, &StrategyParams::new(fast, slow, 10_000.0)) {
            Ok(run) => {
                for snap in &run.snapshots {
                    prop_assert!((-1..=1).contains(&snap.cumulative_signal));
                }
            }
            Err(e) => prop_assert_eq!(e, EngineError::NoEntrySignal),
        }
    }
}

// ── 3. Equity accounting ─────────────────────────────────────────────

proptest! {
    #[test]
    fn equity_identity_holds_every_bar(
        closes in arb_closes(120),
        (fast, slow) in arb_windows(),
        capital in 100.0..1_000_000.0_f64,
    ) {
        let series = series_from(&closes);
        if let Ok(run) = run_backtest(&series, &StrategyParams::new(fast, slow, capital)) {
            let unit = (capital / run.marks[0].price).floor() as i64;
            for snap in &run.snapshots {
                prop_assert_eq!(snap.total_equity, snap.position_value + snap.cash);
                prop_assert_eq!(snap.shares_held, unit * snap.cumulative_signal);
            }
        }
    }
}

// ── 4. Determinism ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn backtest_is_deterministic(
        closes in arb_closes(100),
        (fast, slow) in arb_windows(),
    ) {
        let series = series_from(&closes);
        let params = StrategyParams::new(fast, slow, 50_000.0);
        let a = run_backtest(&series, &params);
        let b = run_backtest(&series, &params);
        prop_assert_eq!(a, b);
    }
}

// ── 5. Entry alternation ─────────────────────────────────────────────

proptest! {
    #[test]
    fn entries_alternate_direction(
        closes in arb_closes(150),
        (fast, slow) in arb_windows(),
    ) {
        let series = series_from(&closes);
        let pair = SmaPair::compute(&series, fast, slow).unwrap();
        let detector = CrossoverDetector::new(&series, &pair).unwrap();

        let entries: Vec<Signal> = detector
            .scan()
            .filter_map(|e| e.signal)
            .filter(|s| *s != Signal::Hold)
            .collect();
        for pair in entries.windows(2) {
            prop_assert_ne!(pair[0], pair[1]);
        }

        // Restarting the scan reproduces it exactly.
        prop_assert_eq!(detector.detect(), detector.scan().collect::<Vec<_>>());
    }
}

// ── 6. Tie persistence ───────────────────────────────────────────────

proptest! {
    #[test]
    fn equal_closes_hold_state(
        prefix in arb_closes(60),
        run_price in arb_price(),
        extra in 0usize..6,
        suffix in arb_closes(20),
        (fast, slow) in arb_windows(),
    ) {
        let longest = fast.max(slow);
        let run_start = prefix.len();
        let run_end = run_start + longest + extra;

        let mut closes = prefix;
        closes.extend(std::iter::repeat(run_price).take(longest + extra));
        closes.extend(suffix);

        let series = series_from(&closes);
        let pair = SmaPair::compute(&series, fast, slow).unwrap();
        let events: Vec<_> = CrossoverDetector::new(&series, &pair).unwrap().scan().collect();

        // First bar whose windows both lie inside the run.
        let tied_from = run_start + longest - 1;
        let held = if tied_from == 0 {
            CrossoverState::Flat
        } else {
            events[tied_from - 1].state
        };
        for event in &events[tied_from..run_end] {
            prop_assert_eq!(pair.get(event.index), Some((run_price, run_price)));
            prop_assert_eq!(event.signal, Some(Signal::Hold));
            prop_assert_eq!(event.state, held);
        }
    }
}
