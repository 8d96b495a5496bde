//! CrossLab CLI: download, run, sweep, info and cache commands.
//!
//! Commands:
//! - `download`: fetch daily bars from Polygon and cache as Parquet
//! - `run`: execute a dual-SMA crossover backtest and save artifacts
//! - `sweep`: rank SMA window pairs on one symbol
//! - `info`: print ticker reference data from Polygon
//! - `cache status`: report cached symbols and date ranges

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use crosslab_core::data::{
    CacheMeta, DataError, DataProvider, DataSource, ParquetCache, PolygonCredentials, PolygonProvider,
};
use crosslab_core::engine::StrategyParams;
use crosslab_core::signals::MarkKind;
use crosslab_runner::{
    load_csv, load_series, run_backtest_on_series, run_single_backtest, run_sweep,
    save_artifacts, BacktestConfig, BacktestResult, LoadOptions, Lookback, ParamGrid,
};

#[derive(Parser)]
#[command(
    name = "crosslab",
    about = "CrossLab CLI: dual moving average crossover backtester"
)]
struct Cli {
    /// Log level: trace, debug, info, warn, error.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Where bars come from and how the date range is chosen.
#[derive(Args)]
struct DataArgs {
    /// Lookback preset: 1D, 5D, 1M, 6M, YTD, 1Y, 5Y.
    #[arg(long)]
    lookback: Option<String>,

    /// Start date (YYYY-MM-DD). Overrides the lookback.
    #[arg(long)]
    start: Option<String>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<String>,

    /// Offline mode: no network access.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Use synthetic data as fallback.
    #[arg(long, default_value_t = false)]
    synthetic: bool,

    /// Cache directory. Defaults to ./data.
    #[arg(long, default_value = "data")]
    cache_dir: PathBuf,

    /// Polygon API key.
    #[arg(long, env = "POLYGON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars from Polygon and cache as Parquet.
    Download {
        /// Symbols to download (e.g., SPY QQQ AAPL).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Force re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,

        #[command(flatten)]
        data: DataArgs,
    },
    /// Execute a backtest from a TOML config file or command-line parameters.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Symbol (ignored with --config).
        #[arg(long)]
        symbol: Option<String>,

        /// Fast SMA window.
        #[arg(long, default_value_t = 40)]
        fast: usize,

        /// Slow SMA window.
        #[arg(long, default_value_t = 252)]
        slow: usize,

        /// Initial capital.
        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,

        /// Read bars from a CSV file instead of the cache.
        #[arg(long)]
        csv: Option<PathBuf>,

        #[command(flatten)]
        data: DataArgs,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Run every fast/slow window pair and rank by strategy return.
    Sweep {
        #[arg(long)]
        symbol: String,

        /// Comma-separated fast windows.
        #[arg(long, value_delimiter = ',', default_values_t = [10, 20, 40])]
        fast: Vec<usize>,

        /// Comma-separated slow windows.
        #[arg(long, value_delimiter = ',', default_values_t = [50, 100, 252])]
        slow: Vec<usize>,

        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,

        /// Run pairs sequentially.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Print at most this many rows.
        #[arg(long, default_value_t = 20)]
        top: usize,

        #[command(flatten)]
        data: DataArgs,
    },
    /// Print ticker reference data.
    Info {
        symbol: String,

        /// Print raw JSON.
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long, env = "POLYGON_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, date ranges and sources.
    Status {
        /// Cache directory. Defaults to ./data.
        #[arg(long, default_value = "data")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => bail!("invalid log level '{other}'"),
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Download {
            symbols,
            force,
            data,
        } => run_download(&symbols, force, &data),
        Commands::Run {
            config,
            symbol,
            fast,
            slow,
            capital,
            csv,
            data,
            output_dir,
        } => {
            let config = match config {
                Some(path) => BacktestConfig::from_file(&path)?,
                None => {
                    let Some(symbol) = symbol.or_else(|| csv.as_deref().map(file_stem)) else {
                        bail!("one of --config, --symbol or --csv is required");
                    };
                    let lookback = parse_lookback(data.lookback.as_deref())?;
                    let config =
                        BacktestConfig::new(symbol, StrategyParams::new(fast, slow, capital), lookback);
                    config.validate()?;
                    config
                }
            };
            run_backtest_cmd(&config, csv.as_deref(), &data, &output_dir)
        }
        Commands::Sweep {
            symbol,
            fast,
            slow,
            capital,
            sequential,
            top,
            data,
        } => run_sweep_cmd(&symbol, ParamGrid::new(fast, slow), capital, !sequential, top, &data),
        Commands::Info {
            symbol,
            json,
            api_key,
        } => run_info(&symbol, json, api_key),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

// ─── Argument helpers ───────────────────────────────────────────────

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_uppercase())
        .unwrap_or_else(|| "CSV".to_string())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn parse_lookback(s: Option<&str>) -> Result<Lookback> {
    Ok(s.map(str::parse::<Lookback>).transpose()?.unwrap_or_default())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Resolve the date range from explicit dates, falling back to the lookback.
fn resolve_range(data: &DataArgs, default: Lookback) -> Result<(NaiveDate, NaiveDate)> {
    let end = data.end.as_deref().map(parse_date).transpose()?.unwrap_or_else(today);
    let start = match data.start.as_deref() {
        Some(s) => parse_date(s)?,
        None => {
            let lookback = match data.lookback.as_deref() {
                Some(s) => s.parse::<Lookback>()?,
                None => default,
            };
            lookback.start_from(end)?
        }
    };
    if start > end {
        bail!("start date {start} is after end date {end}");
    }
    Ok((start, end))
}

fn load_options(data: &DataArgs, start: NaiveDate, end: NaiveDate) -> LoadOptions {
    let mut opts = LoadOptions::new(start, end);
    opts.offline = data.offline;
    opts.synthetic = data.synthetic;
    opts
}

/// `--api-key` wins; otherwise the key is read from the environment.
fn credentials(api_key: Option<String>) -> Result<PolygonCredentials, DataError> {
    match api_key {
        Some(key) => Ok(PolygonCredentials::new(key)),
        None => PolygonCredentials::from_env(),
    }
}

fn polygon(api_key: Option<String>) -> Result<PolygonProvider> {
    Ok(PolygonProvider::new(credentials(api_key)?)?)
}

/// Provider for commands that can still run from the cache without a key.
fn optional_polygon(api_key: Option<String>) -> Result<Option<PolygonProvider>> {
    match credentials(api_key) {
        Ok(creds) => Ok(Some(PolygonProvider::new(creds)?)),
        Err(e) => {
            debug!(error = %e, "downloads disabled");
            Ok(None)
        }
    }
}

// ─── Commands ───────────────────────────────────────────────────────

fn run_download(symbols: &[String], force: bool, data: &DataArgs) -> Result<()> {
    let (start, end) = resolve_range(data, Lookback::FiveYears)?;
    let provider = polygon(data.api_key.clone())?;
    let cache = ParquetCache::new(&data.cache_dir);

    let mut failed = 0usize;
    for symbol in symbols {
        if !force && cache.covers_range(symbol, start, end) {
            println!("{symbol}: already cached for {start} to {end}");
            continue;
        }
        match provider.fetch(symbol, start, end) {
            Ok(fetched) => {
                cache.write(symbol, &fetched.bars, DataSource::Polygon)?;
                println!("{symbol}: {} bars cached", fetched.bars.len());
            }
            Err(e) => {
                eprintln!("Error for {symbol}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} downloads failed", symbols.len());
    }
    Ok(())
}

fn run_backtest_cmd(
    config: &BacktestConfig,
    csv: Option<&Path>,
    data: &DataArgs,
    output_dir: &Path,
) -> Result<()> {
    let result = match csv {
        Some(path) => {
            let loaded = load_csv(path, &config.backtest.symbol)?;
            run_backtest_on_series(config, &loaded)?
        }
        None => {
            let (start, end) = if data.start.is_some() || data.end.is_some() || data.lookback.is_some()
            {
                resolve_range(data, config.backtest.lookback)?
            } else {
                config.date_range(today())?
            };
            let cache = ParquetCache::new(&data.cache_dir);
            let provider = if data.offline {
                None
            } else {
                optional_polygon(data.api_key.clone())?
            };
            let provider_ref = provider.as_ref().map(|p| p as &dyn DataProvider);
            run_single_backtest(config, &cache, provider_ref, &load_options(data, start, end))?
        }
    };

    print_summary(&result);

    let run_dir = save_artifacts(&result, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_sweep_cmd(
    symbol: &str,
    grid: ParamGrid,
    capital: f64,
    parallel: bool,
    top: usize,
    data: &DataArgs,
) -> Result<()> {
    if grid.size() == 0 {
        bail!("grid has no pairs with fast < slow");
    }
    let (start, end) = resolve_range(data, Lookback::FiveYears)?;
    let cache = ParquetCache::new(&data.cache_dir);
    let provider = if data.offline {
        None
    } else {
        optional_polygon(data.api_key.clone())?
    };
    let provider_ref = provider.as_ref().map(|p| p as &dyn DataProvider);
    let loaded = load_series(symbol, &cache, provider_ref, &load_options(data, start, end))?;

    info!(symbol, pairs = grid.size(), "sweeping");
    let report = run_sweep(&loaded.series, &grid, capital, parallel)?;

    println!();
    println!("=== Sweep: {symbol} ({start} to {end}) ===");
    if loaded.is_synthetic() {
        println!("  ** SYNTHETIC DATA **");
    }
    println!(
        "{:>5} {:>5} {:>10} {:>10} {:>8} {:>9} {:>8}",
        "Fast", "Slow", "Return", "B&H", "Sharpe", "MaxDD", "Entries"
    );
    println!("{}", "-".repeat(61));
    for row in report.rows.iter().take(top) {
        let m = &row.metrics;
        println!(
            "{:>5} {:>5} {:>9.2}% {:>9.2}% {:>8.3} {:>8.2}% {:>8}",
            row.params.window_fast,
            row.params.window_slow,
            m.strategy_return * 100.0,
            m.buy_and_hold_return * 100.0,
            m.sharpe,
            m.max_drawdown * 100.0,
            m.entry_count
        );
    }
    if !report.skipped.is_empty() {
        let skipped: Vec<String> = report
            .skipped
            .iter()
            .map(|(f, s)| format!("{f}/{s}"))
            .collect();
        println!("Skipped (no crossover): {}", skipped.join(", "));
    }
    Ok(())
}

fn run_info(symbol: &str, json: bool, api_key: Option<String>) -> Result<()> {
    let provider = polygon(api_key)?;
    let details = provider.ticker_details(symbol)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    println!("{} ({})", details.name, details.symbol);
    if let Some(cap) = details.market_cap {
        println!("  Market cap:  ${:.0}", cap);
    }
    if let Some(url) = &details.homepage_url {
        println!("  Homepage:    {url}");
    }
    if let Some(url) = &details.icon_url {
        println!("  Icon:        {url}");
    }
    if let Some(desc) = &details.description {
        println!();
        println!("{desc}");
    }
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let cache = ParquetCache::new(cache_dir);
    let mut rows: Vec<(String, Option<CacheMeta>)> = Vec::new();
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(symbol) = name.strip_prefix("symbol=") else {
            continue;
        };
        rows.push((symbol.to_string(), cache.get_meta(symbol)));
    }

    if rows.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    println!("Cache: {}", cache_dir.display());
    println!("Symbols: {}", rows.len());
    println!();
    println!("{:<8} {:<25} {:>8} {:<10}", "Symbol", "Date Range", "Bars", "Source");
    println!("{}", "-".repeat(54));
    for (symbol, meta) in &rows {
        match meta {
            Some(m) => println!(
                "{:<8} {:<25} {:>8} {:<10}",
                symbol,
                format!("{} to {}", m.start_date, m.end_date),
                m.bar_count,
                format!("{:?}", m.source)
            ),
            None => println!("{symbol:<8} (no meta)"),
        }
    }
    Ok(())
}

// ─── Output ─────────────────────────────────────────────────────────

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!(
        "=== Backtest: {} SMA {}/{} ===",
        result.symbol, result.params.window_fast, result.params.window_slow
    );
    if result.has_synthetic {
        println!("  ** SYNTHETIC DATA **");
    }
    println!(
        "  Period:          {} to {} ({} bars)",
        result.start_date, result.end_date, m.bar_count
    );
    println!("  Initial capital: ${:.2}", result.params.initial_capital);
    println!("  Final equity:    ${:.2}", m.final_equity);
    println!("  Strategy return: {:.2}%", m.strategy_return * 100.0);
    println!("  Buy & hold:      {:.2}%", m.buy_and_hold_return * 100.0);
    println!("  Excess return:   {:.2}%", m.excess_return * 100.0);
    println!("  Sharpe:          {:.3}", m.sharpe);
    println!("  Max drawdown:    {:.2}%", m.max_drawdown * 100.0);
    println!(
        "  Entries:         {} ({} long, {} short)",
        m.entry_count, m.long_entries, m.short_entries
    );
    println!("  Run ID:          {}", result.run_id);

    if !result.marks.is_empty() {
        println!();
        println!("  {:<12} {:<5} {:>10}", "Date", "Side", "Price");
        for mark in &result.marks {
            let side = match mark.kind {
                MarkKind::Buy => "BUY",
                MarkKind::Sell => "SELL",
            };
            println!("  {:<12} {:<5} {:>10.2}", mark.date.to_string(), side, mark.price);
        }
    }
    println!();
}
