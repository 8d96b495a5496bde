//! Bar loading and data resolution for the runner.
//!
//! Given a symbol, loads bars from the Parquet cache and returns a validated
//! [`Series`]. Implements the fallback policy:
//! 1. If cached data covers the range → use it
//! 2. If not cached and a provider is available → download and cache
//! 3. If no data and `synthetic` → generate synthetic bars (tagged)
//! 4. Otherwise → fail with a clear error
//!
//! Synthetic data is a developer-only debug mode. Results produced on
//! synthetic data carry the flag through to every artifact.

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crosslab_core::data::{DataError, DataProvider, DataSource, ParquetCache};
use crosslab_core::domain::{Bar, Series};
use crosslab_core::error::EngineError;

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(
        "no cached data for '{symbol}' and no network access (use --synthetic for synthetic data)"
    )]
    NoCachedDataOffline { symbol: String },

    #[error("no cached data for '{symbol}' and download failed: {reason}")]
    DownloadFailed { symbol: String, reason: String },

    #[error("no bars for '{symbol}' between {start} and {end}")]
    EmptyRange {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("failed to read CSV '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("invalid series: {0}")]
    Series(#[from] EngineError),
}

/// Options controlling how bars are loaded.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Start date for bars.
    pub start: NaiveDate,
    /// End date for bars.
    pub end: NaiveDate,
    /// If true, never make network requests.
    pub offline: bool,
    /// If true, generate synthetic bars when real data is unavailable.
    pub synthetic: bool,
    /// Force re-download even if cached.
    pub force: bool,
}

impl LoadOptions {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            offline: false,
            synthetic: false,
            force: false,
        }
    }
}

/// A loaded series with provenance.
#[derive(Debug, Clone)]
pub struct LoadedSeries {
    pub series: Series,
    pub source: DataSource,
    /// BLAKE3 over the series' dates and OHLCV values.
    pub dataset_hash: String,
}

impl LoadedSeries {
    pub fn from_series(series: Series, source: DataSource) -> Self {
        let dataset_hash = series.dataset_hash();
        Self {
            series,
            source,
            dataset_hash,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == DataSource::Synthetic
    }
}

/// Load one symbol from the cache, with fallback to download or synthetic.
///
/// The returned series is restricted to `[opts.start, opts.end]`.
pub fn load_series(
    symbol: &str,
    cache: &ParquetCache,
    provider: Option<&dyn DataProvider>,
    opts: &LoadOptions,
) -> Result<LoadedSeries, LoadError> {
    let (bars, source) = resolve_bars(symbol, cache, provider, opts)?;

    let series = Series::with_symbol(symbol, bars)?.slice_dates(opts.start, opts.end);
    if series.is_empty() {
        return Err(LoadError::EmptyRange {
            symbol: symbol.to_string(),
            start: opts.start,
            end: opts.end,
        });
    }

    debug!(symbol, bars = series.len(), ?source, "series loaded");
    Ok(LoadedSeries::from_series(series, source))
}

fn resolve_bars(
    symbol: &str,
    cache: &ParquetCache,
    provider: Option<&dyn DataProvider>,
    opts: &LoadOptions,
) -> Result<(Vec<Bar>, DataSource), LoadError> {
    // Step 1: cache
    if !opts.force && cache.covers_range(symbol, opts.start, opts.end) {
        match cache.load(symbol) {
            Ok(bars) => return Ok((bars, cached_source(cache, symbol))),
            Err(e) => warn!(symbol, error = %e, "cache unreadable, refetching"),
        }
    }

    // Step 2: download
    let mut download_error = None;
    if !opts.offline {
        if let Some(prov) = provider.filter(|p| p.is_available()) {
            info!(symbol, provider = prov.name(), start = %opts.start, end = %opts.end, "downloading");
            match prov.fetch(symbol, opts.start, opts.end) {
                Ok(fetched) => {
                    if let Err(e) = cache.write(symbol, &fetched.bars, fetched.source) {
                        warn!(symbol, error = %e, "failed to cache downloaded bars");
                    }
                    return Ok((fetched.bars, fetched.source));
                }
                Err(e) => {
                    warn!(symbol, error = %e, "download failed");
                    download_error = Some(e.to_string());
                }
            }
        }
    }

    // Step 3: a partial cache is better than nothing
    if !opts.force {
        if let Ok(bars) = cache.load(symbol) {
            warn!(symbol, "cached range is incomplete, using what is cached");
            return Ok((bars, cached_source(cache, symbol)));
        }
    }

    // Step 4: synthetic
    if opts.synthetic {
        warn!(symbol, "generating synthetic data, results will be tagged as synthetic");
        return Ok((
            generate_synthetic_bars(symbol, opts.start, opts.end),
            DataSource::Synthetic,
        ));
    }

    if opts.offline {
        return Err(LoadError::NoCachedDataOffline {
            symbol: symbol.to_string(),
        });
    }
    Err(LoadError::DownloadFailed {
        symbol: symbol.to_string(),
        reason: download_error.unwrap_or_else(|| "no data provider configured".into()),
    })
}

/// Cached synthetic bars stay tagged as synthetic.
fn cached_source(cache: &ParquetCache, symbol: &str) -> DataSource {
    match cache.get_meta(symbol) {
        Some(meta) if meta.source == DataSource::Synthetic => DataSource::Synthetic,
        _ => DataSource::Cache,
    }
}

/// One row of an imported CSV file.
#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    vwap: Option<f64>,
    #[serde(default)]
    transactions: Option<u64>,
}

/// Import daily bars from a CSV file.
///
/// Header: `date,open,high,low,close,volume[,vwap,transactions]`, dates as
/// `YYYY-MM-DD`. Rows may be in any order.
pub fn load_csv(path: &Path, symbol: &str) -> Result<LoadedSeries, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.display().to_string(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut bars = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row.map_err(csv_err)?;
        bars.push(Bar {
            date: row.date,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0).max(0.0).round() as u64,
            vwap: row.vwap,
            transactions: row.transactions,
        });
    }

    let series = Series::with_symbol(symbol, bars)?;
    info!(symbol, bars = series.len(), path = %path.display(), "imported CSV");
    Ok(LoadedSeries::from_series(series, DataSource::CsvImport))
}

/// Generate synthetic bars for testing/development.
///
/// Produces a random walk from a starting price of 100.0 on weekdays only.
/// Seeded from the symbol name, so the same symbol always gives the same walk.
pub fn generate_synthetic_bars(symbol: &str, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut bars = Vec::new();
    let mut price = 100.0_f64;
    let mut current = start;

    while current <= end {
        let weekday = current.weekday();
        if weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun {
            current += chrono::Duration::days(1);
            continue;
        }

        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(500_000..5_000_000u64);

        bars.push(Bar::new(current, open, high, low, close).with_volume(volume));

        price = close;
        current += chrono::Duration::days(1);
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosslab_core::data::FetchResult;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_bars() -> Vec<Bar> {
        vec![
            Bar::new(date(2024, 1, 2), 100.0, 102.0, 99.0, 101.0).with_volume(1000),
            Bar::new(date(2024, 1, 3), 101.0, 103.0, 100.0, 102.0).with_volume(1100),
            Bar::new(date(2024, 1, 4), 102.0, 104.0, 101.0, 103.0).with_volume(1200),
        ]
    }

    fn opts(start: NaiveDate, end: NaiveDate) -> LoadOptions {
        LoadOptions::new(start, end)
    }

    struct StubProvider {
        bars: Vec<Bar>,
        fail: bool,
    }

    impl DataProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch(
            &self,
            symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            if self.fail {
                return Err(DataError::NetworkUnreachable("stub offline".into()));
            }
            Ok(FetchResult {
                symbol: symbol.to_string(),
                bars: self.bars.clone(),
                source: DataSource::Polygon,
            })
        }
    }

    #[test]
    fn load_from_cache_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write("SPY", &sample_bars(), DataSource::Polygon).unwrap();

        let loaded =
            load_series("SPY", &cache, None, &opts(date(2024, 1, 2), date(2024, 1, 4))).unwrap();
        assert_eq!(loaded.series.len(), 3);
        assert_eq!(loaded.source, DataSource::Cache);
        assert!(!loaded.is_synthetic());

        cache.write("FAKE", &sample_bars(), DataSource::Synthetic).unwrap();
        let fake =
            load_series("FAKE", &cache, None, &opts(date(2024, 1, 2), date(2024, 1, 4))).unwrap();
        assert!(fake.is_synthetic());
        assert_eq!(loaded.dataset_hash, loaded.series.dataset_hash());
    }

    #[test]
    fn load_filters_to_requested_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write("SPY", &sample_bars(), DataSource::Polygon).unwrap();

        let loaded =
            load_series("SPY", &cache, None, &opts(date(2024, 1, 3), date(2024, 1, 3))).unwrap();
        assert_eq!(loaded.series.len(), 1);
        assert_eq!(loaded.series.first_date(), Some(date(2024, 1, 3)));
    }

    #[test]
    fn sliced_range_restarts_returns() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write("SPY", &sample_bars(), DataSource::Polygon).unwrap();

        let loaded =
            load_series("SPY", &cache, None, &opts(date(2024, 1, 3), date(2024, 1, 4))).unwrap();
        assert_eq!(loaded.series.symbol(), Some("SPY"));
        assert_eq!(loaded.series.closes(), vec![102.0, 103.0]);
        assert_eq!(loaded.series.daily_returns()[0], None);
    }

    #[test]
    fn bars_outside_range_are_empty_range() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = StubProvider {
            bars: sample_bars(),
            fail: false,
        };

        let range = opts(date(2024, 2, 1), date(2024, 2, 29));
        let err = load_series("QQQ", &cache, Some(&provider), &range).unwrap_err();
        assert!(matches!(err, LoadError::EmptyRange { .. }), "{err}");
    }

    #[test]
    fn download_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = StubProvider {
            bars: sample_bars(),
            fail: false,
        };

        let range = opts(date(2024, 1, 1), date(2024, 1, 31));
        let loaded = load_series("QQQ", &cache, Some(&provider), &range).unwrap();
        assert_eq!(loaded.source, DataSource::Polygon);
        assert_eq!(cache.load("QQQ").unwrap(), sample_bars());
    }

    #[test]
    fn failed_download_falls_back_to_partial_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        cache.write("SPY", &sample_bars(), DataSource::Polygon).unwrap();
        let provider = StubProvider {
            bars: vec![],
            fail: true,
        };

        let range = opts(date(2023, 1, 1), date(2024, 12, 31));
        let loaded = load_series("SPY", &cache, Some(&provider), &range).unwrap();
        assert_eq!(loaded.source, DataSource::Cache);
        assert_eq!(loaded.series.len(), 3);
    }

    #[test]
    fn failed_download_without_cache_reports_reason() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = StubProvider {
            bars: vec![],
            fail: true,
        };

        let err = load_series(
            "SPY",
            &cache,
            Some(&provider),
            &opts(date(2024, 1, 1), date(2024, 1, 31)),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::DownloadFailed { .. }));
        assert!(err.to_string().contains("stub offline"));
    }

    #[test]
    fn offline_no_cache_fails_without_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let mut o = opts(date(2024, 1, 1), date(2024, 12, 31));
        o.offline = true;

        let err = load_series("SPY", &cache, None, &o).unwrap_err();
        assert!(err.to_string().contains("no cached data"));
    }

    #[test]
    fn synthetic_fallback_produces_tagged_data() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let mut o = opts(date(2024, 1, 1), date(2024, 3, 31));
        o.synthetic = true;

        let loaded = load_series("FAKE", &cache, None, &o).unwrap();
        assert!(loaded.is_synthetic());
        assert!(!loaded.series.is_empty());
        assert!(loaded
            .series
            .dates()
            .all(|d| d.weekday() != chrono::Weekday::Sat && d.weekday() != chrono::Weekday::Sun));
    }

    #[test]
    fn synthetic_data_is_deterministic_per_symbol() {
        let (s, e) = (date(2024, 1, 1), date(2024, 1, 31));
        let a = generate_synthetic_bars("SPY", s, e);
        let b = generate_synthetic_bars("SPY", s, e);
        let c = generate_synthetic_bars("QQQ", s, e);
        assert_eq!(a, b);
        assert_eq!(a.len(), c.len());
        assert_ne!(a[0].close, c[0].close);
        assert!(a.iter().all(Bar::is_sane));
    }

    #[test]
    fn csv_import_with_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aapl.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "date,open,high,low,close,volume,vwap,transactions").unwrap();
        writeln!(f, "2024-01-03,10.5,11,10,10.8,1500,10.7,42").unwrap();
        writeln!(f, "2024-01-02,10,10.6,9.9,10.5,1200,,").unwrap();
        drop(f);

        let loaded = load_csv(&path, "AAPL").unwrap();
        assert_eq!(loaded.source, DataSource::CsvImport);
        assert_eq!(loaded.series.symbol(), Some("AAPL"));
        let bars = loaded.series.bars();
        assert_eq!(bars[0].date, date(2024, 1, 2));
        assert_eq!(bars[0].vwap, None);
        assert_eq!(bars[1].transactions, Some(42));
        assert_eq!(bars[1].volume, 1500);
    }

    #[test]
    fn csv_import_minimal_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        std::fs::write(&path, "date,open,high,low,close\n2024-01-02,1,1,1,1\n").unwrap();
        let loaded = load_csv(&path, "X").unwrap();
        assert_eq!(loaded.series.bars()[0].volume, 0);
    }

    #[test]
    fn csv_import_rejects_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "date,open,high,low,close,volume\nnot-a-date,1,1,1,1,1\n").unwrap();
        assert!(matches!(
            load_csv(&path, "X"),
            Err(LoadError::Csv { .. })
        ));

        let dup = dir.path().join("dup.csv");
        std::fs::write(
            &dup,
            "date,open,high,low,close,volume\n2024-01-02,1,1,1,1,1\n2024-01-02,1,1,1,1,1\n",
        )
        .unwrap();
        assert!(matches!(
            load_csv(&dup, "X"),
            Err(LoadError::Series(EngineError::DuplicateDate { .. }))
        ));
    }
}
