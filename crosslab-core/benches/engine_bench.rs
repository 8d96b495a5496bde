//! Criterion benchmarks for CrossLab hot paths.
//!
//! Benchmarks:
//! 1. SMA pair computation
//! 2. Crossover scan
//! 3. Portfolio simulation
//! 4. Full pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use crosslab_core::domain::{Bar, Series};
use crosslab_core::engine::{run_backtest, simulate, StrategyParams};
use crosslab_core::indicators::SmaPair;
use crosslab_core::signals::CrossoverDetector;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(n: usize) -> Series {
    let base_date = chrono::NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    let bars = (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 10.0 + i as f64 * 0.01;
            Bar::new(
                base_date + chrono::Duration::days(i as i64),
                close - 0.3,
                close + 1.5,
                close - 1.5,
                close,
            )
            .with_volume(1_000_000 + (i as u64 % 500_000))
        })
        .collect();
    Series::with_symbol("BENCH", bars).unwrap()
}

const SIZES: [usize; 3] = [1_000, 5_000, 20_000];

// ── 1. SMA ───────────────────────────────────────────────────────────

fn bench_sma(c: &mut Criterion) {
    let mut group = c.benchmark_group("sma_pair");
    for n in SIZES {
        let series = make_series(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &series, |b, s| {
            b.iter(|| SmaPair::compute(black_box(s), 40, 252).unwrap())
        });
    }
    group.finish();
}

// ── 2. Scan ──────────────────────────────────────────────────────────

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("crossover_scan");
    for n in SIZES {
        let series = make_series(n);
        let pair = SmaPair::compute(&series, 40, 252).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                CrossoverDetector::new(black_box(&series), black_box(&pair))
                    .unwrap()
                    .detect()
            })
        });
    }
    group.finish();
}

// ── 3. Simulation ────────────────────────────────────────────────────

fn bench_simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");
    for n in SIZES {
        let series = make_series(n);
        let pair = SmaPair::compute(&series, 20, 60).unwrap();
        let events = CrossoverDetector::new(&series, &pair).unwrap().detect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| simulate(black_box(&series), black_box(&events), 100_000.0).unwrap())
        });
    }
    group.finish();
}

// ── 4. Full pipeline ─────────────────────────────────────────────────

fn bench_pipeline(c: &mut Criterion) {
    let series = make_series(5_000);
    let params = StrategyParams::new(20, 60, 100_000.0);
    c.bench_function("run_backtest_5000", |b| {
        b.iter(|| run_backtest(black_box(&series), black_box(&params)).unwrap())
    });
}

criterion_group!(benches, bench_sma, bench_scan, bench_simulate, bench_pipeline);
criterion_main!(benches);
