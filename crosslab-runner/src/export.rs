//! Reporting and export: JSON, CSV, and Markdown artifact generation.
//!
//! Provides three export formats for backtest results:
//! - **JSON**: full round-trip serialization with schema versioning
//! - **CSV**: signal table, portfolio table and buy/sell marks
//! - **Markdown**: a human-readable single-run report
//!
//! All persisted artifacts include a `schema_version` field. Unknown versions
//! are rejected on load. Undefined values are written as empty CSV cells.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crosslab_core::engine::PortfolioSnapshot;
use crosslab_core::indicators::SmaPair;
use crosslab_core::signals::{CrossoverState, MarkKind, SignalEvent, TradeMark};

use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(String::new, |v| format!("{v:.precision$}"))
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the per-bar signal table alongside both moving averages.
///
/// Columns: date, close, sma_fast, sma_slow, signal, state, buy_price, sell_price.
/// `signal` is empty on bars where either average is undefined.
pub fn export_signals_csv(events: &[SignalEvent], sma: &SmaPair) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "date",
        "close",
        "sma_fast",
        "sma_slow",
        "signal",
        "state",
        "buy_price",
        "sell_price",
    ])?;

    for (i, e) in events.iter().enumerate() {
        let state = match e.state {
            CrossoverState::Flat => "flat",
            CrossoverState::Long => "long",
            CrossoverState::Short => "short",
        }
        .to_string();
        wtr.write_record([
            &e.date.to_string(),
            &format!("{:.4}", e.close),
            &opt(sma.fast.get(i).copied().flatten(), 4),
            &opt(sma.slow.get(i).copied().flatten(), 4),
            &e.signal.map_or_else(String::new, |s| s.value().to_string()),
            &state,
            &opt(e.buy_price, 4),
            &opt(e.sell_price, 4),
        ])?;
    }

    finish(wtr)
}

/// Export the portfolio table.
///
/// Columns: date, close, signal, cumulative_signal, shares_held,
/// position_value, cash, total_equity, strategy_return,
/// cumulative_strategy_return, cumulative_buy_and_hold_return.
pub fn export_portfolio_csv(snapshots: &[PortfolioSnapshot]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "date",
        "close",
        "signal",
        "cumulative_signal",
        "shares_held",
        "position_value",
        "cash",
        "total_equity",
        "strategy_return",
        "cumulative_strategy_return",
        "cumulative_buy_and_hold_return",
    ])?;

    for s in snapshots {
        wtr.write_record([
            &s.date.to_string(),
            &format!("{:.4}", s.close),
            &s.signal.to_string(),
            &s.cumulative_signal.to_string(),
            &s.shares_held.to_string(),
            &format!("{:.2}", s.position_value),
            &format!("{:.2}", s.cash),
            &format!("{:.2}", s.total_equity),
            &opt(s.strategy_return, 8),
            &opt(s.cumulative_strategy_return, 8),
            &opt(s.cumulative_buy_and_hold_return, 8),
        ])?;
    }

    finish(wtr)
}

/// Export the buy/sell marks table: date, kind, price.
pub fn export_marks_csv(marks: &[TradeMark]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["date", "kind", "price"])?;
    for m in marks {
        let kind = match m.kind {
            MarkKind::Buy => "buy",
            MarkKind::Sell => "sell",
        }
        .to_string();
        wtr.write_record([&m.date.to_string(), &kind, &format!("{:.4}", m.price)])?;
    }
    finish(wtr)
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a single backtest run.
///
/// Creates a directory named `{symbol}_{fast}_{slow}_{run_id prefix}/` under
/// `output_dir` containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `signals.csv`: per-bar signal table
/// - `portfolio.csv`: per-bar portfolio table
/// - `marks.csv`: buy/sell marks
/// - `report.md`: Markdown summary
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let id_prefix = result.run_id.get(..12).unwrap_or(result.run_id.as_str());
    let dirname = format!(
        "{}_{}_{}_{}",
        result.symbol, result.params.window_fast, result.params.window_slow, id_prefix
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;
    std::fs::write(
        run_dir.join("signals.csv"),
        export_signals_csv(&result.events, &result.sma)?,
    )?;
    std::fs::write(
        run_dir.join("portfolio.csv"),
        export_portfolio_csv(&result.snapshots)?,
    )?;
    std::fs::write(run_dir.join("marks.csv"), export_marks_csv(&result.marks)?)?;
    std::fs::write(run_dir.join("report.md"), generate_report(result))?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
///
/// Rejects unknown schema versions.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate a Markdown report for a single backtest run.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(2048);
    let m = &result.metrics;

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Symbol | {} |\n", result.symbol));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        result.start_date, result.end_date
    ));
    md.push_str(&format!(
        "| SMA Windows | {} / {} |\n",
        result.params.window_fast, result.params.window_slow
    ));
    md.push_str(&format!(
        "| Initial Capital | ${:.0} |\n",
        result.params.initial_capital
    ));
    md.push_str(&format!("| Bars | {} |\n", m.bar_count));
    md.push_str(&format!("| Dataset Hash | {} |\n", result.dataset_hash));
    if result.has_synthetic {
        md.push_str("| Data | **SYNTHETIC** |\n");
    }
    md.push('\n');

    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!(
        "| Strategy Return | {:.2}% |\n",
        m.strategy_return * 100.0
    ));
    md.push_str(&format!(
        "| Buy & Hold Return | {:.2}% |\n",
        m.buy_and_hold_return * 100.0
    ));
    md.push_str(&format!(
        "| Excess Return | {:.2}% |\n",
        m.excess_return * 100.0
    ));
    md.push_str(&format!("| CAGR | {:.2}% |\n", m.cagr * 100.0));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!(
        "| Max Drawdown | {:.2}% |\n",
        m.max_drawdown * 100.0
    ));
    md.push_str(&format!(
        "| Entries | {} ({} long, {} short) |\n",
        m.entry_count, m.long_entries, m.short_entries
    ));
    md.push_str(&format!("| Exposure | {:.1}% |\n", m.exposure * 100.0));
    md.push_str(&format!("| Final Equity | ${:.2} |\n", m.final_equity));
    md.push('\n');

    if !result.marks.is_empty() {
        md.push_str("## Trade Marks\n\n");
        md.push_str("| Date | Side | Price |\n");
        md.push_str("| --- | --- | ---: |\n");
        for mark in &result.marks {
            let side = match mark.kind {
                MarkKind::Buy => "Buy",
                MarkKind::Sell => "Sell",
            };
            md.push_str(&format!("| {} | {} | {:.2} |\n", mark.date, side, mark.price));
        }
        md.push('\n');
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestConfig, Lookback};
    use crate::data_loader::LoadedSeries;
    use crate::runner::run_backtest_on_series;
    use crosslab_core::data::DataSource;
    use crosslab_core::domain::{Bar, Series};
    use crosslab_core::engine::StrategyParams;

    fn fixture() -> BacktestResult {
        let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let closes = [10.0, 10.0, 10.0, 12.0, 12.0, 12.0, 8.0, 8.0, 8.0];
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(base + chrono::Duration::days(i as i64), c, c, c, c))
            .collect();
        let series = Series::with_symbol("TEST", bars).unwrap();
        let loaded = LoadedSeries::from_series(series, DataSource::Synthetic);
        let config = BacktestConfig::new(
            "TEST",
            StrategyParams::new(2, 3, 100_000.0),
            Lookback::FiveYears,
        );
        run_backtest_on_series(&config, &loaded).unwrap()
    }

    #[test]
    fn json_roundtrip_preserves_tables() {
        let result = fixture();
        let json = export_json(&result).unwrap();
        let back = import_json(&json).unwrap();
        assert_eq!(back.run_id, result.run_id);
        assert_eq!(back.events, result.events);
        assert_eq!(back.marks, result.marks);
        assert_eq!(back.snapshots.len(), result.snapshots.len());
        assert_eq!(back.snapshots[0].strategy_return, None);
    }

    #[test]
    fn import_rejects_future_schema() {
        let result = fixture();
        let mut value: serde_json::Value = serde_json::from_str(&export_json(&result).unwrap()).unwrap();
        value["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);
        let err = import_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn import_defaults_missing_schema_version() {
        let result = fixture();
        let mut value: serde_json::Value = serde_json::from_str(&export_json(&result).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("schema_version");
        let back = import_json(&value.to_string()).unwrap();
        assert_eq!(back.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn signals_csv_leaves_undefined_cells_empty() {
        let result = fixture();
        let csv = export_signals_csv(&result.events, &result.sma).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(
            lines[0],
            "date,close,sma_fast,sma_slow,signal,state,buy_price,sell_price"
        );
        assert_eq!(lines[1], "2024-01-02,10.0000,,,,flat,,");
        assert_eq!(lines[4], "2024-01-05,12.0000,11.0000,10.6667,1,long,12.0000,");
        assert_eq!(lines[7], "2024-01-08,8.0000,10.0000,10.6667,-1,short,,8.0000");
    }

    #[test]
    fn portfolio_csv_has_one_row_per_bar() {
        let result = fixture();
        let csv = export_portfolio_csv(&result.snapshots).unwrap();
        let mut rdr = csv::Reader::from_reader(csv.as_bytes());
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 9);
        assert_eq!(&rows[0][8], "");
        assert_eq!(&rows[3][4], "8333");
    }

    #[test]
    fn marks_csv_lists_entries() {
        let result = fixture();
        let csv = export_marks_csv(&result.marks).unwrap();
        assert_eq!(
            csv,
            "date,kind,price\n2024-01-05,buy,12.0000\n2024-01-08,sell,8.0000\n"
        );
    }

    #[test]
    fn report_flags_synthetic_data() {
        let result = fixture();
        let md = generate_report(&result);
        assert!(md.contains("**SYNTHETIC**"));
        assert!(md.contains("| SMA Windows | 2 / 3 |"));
        assert!(md.contains("## Trade Marks"));
    }

    #[test]
    fn save_and_load_artifacts() {
        let result = fixture();
        let dir = tempfile::tempdir().unwrap();
        let run_dir = save_artifacts(&result, dir.path()).unwrap();

        for name in ["manifest.json", "signals.csv", "portfolio.csv", "marks.csv", "report.md"] {
            assert!(run_dir.join(name).exists(), "missing {name}");
        }
        let loaded = load_artifacts(&run_dir).unwrap();
        assert_eq!(loaded.run_id, result.run_id);
        assert!(loaded.has_synthetic);
    }
}
