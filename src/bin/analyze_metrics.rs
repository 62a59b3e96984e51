//! Runs the analytics pass over a merged metrics CSV and writes the report.
//!
//! Usage: analyze-metrics --input data/universal_metrics.csv --output-dir data/analytics

use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info};
use onchain_analytics::alignment::{attach_daily_metric, join_on_timestamp, null_value_check, DailyPoint, DEFAULT_NULL_THRESHOLD};
use onchain_analytics::preprocess::{normalize_timestamps, parse_utc_datetime};
use onchain_analytics::time_range::resolve_time_range;
use onchain_analytics::{
    analyze_metrics, read_table_csv, write_report, AnalyticsConfig, AnalyticsError, ColumnData,
    ImputeMethod, Result, TimeSeriesTable,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Clean, denoise and diagnose merged hourly metrics")]
struct Args {
    /// Merged metrics CSV (overrides `input_csv` from the config file)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory for the report artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cumulative explained-variance target in (0, 1]
    #[arg(long)]
    variance_threshold: Option<f64>,

    /// Winsorization quantile; 0 disables clipping
    #[arg(long)]
    winsorize_limits: Option<f64>,

    /// ffill, bfill, interpolate or none
    #[arg(long)]
    impute_method: Option<String>,

    /// Longest run of consecutive gaps to fill
    #[arg(long)]
    impute_limit: Option<usize>,

    /// Verbose logging and missing-schema report
    #[arg(long)]
    debug: bool,

    /// Start of the analysed range (UTC)
    #[arg(long, conflicts_with = "period")]
    start: Option<String>,

    /// End of the analysed range (UTC, defaults to now)
    #[arg(long)]
    end: Option<String>,

    /// Look-back from the end, e.g. 30d or 12h
    #[arg(long)]
    period: Option<String>,

    /// Extra hourly table joined by timestamp, as FILE or FILE:PREFIX
    #[arg(long = "join", value_name = "FILE[:PREFIX]")]
    joins: Vec<String>,

    /// Daily metric attached by as-of lookup, as FILE:COLUMN
    #[arg(long = "daily", value_name = "FILE:COLUMN")]
    daily: Vec<String>,
}

fn parse_instant(raw: &str, flag: &str) -> Result<DateTime<Utc>> {
    parse_utc_datetime(raw).ok_or_else(|| {
        AnalyticsError::InvalidConfig(format!("--{}: cannot parse '{}' as a date/time", flag, raw))
    })
}

fn build_config(args: &Args) -> Result<AnalyticsConfig> {
    let mut config = match &args.config {
        Some(path) => AnalyticsConfig::from_json_file(path)?,
        None => AnalyticsConfig::default(),
    };
    if let Some(input) = &args.input {
        config.input_csv = Some(input.clone());
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(threshold) = args.variance_threshold {
        config.pca_variance_threshold = threshold;
    }
    if let Some(limits) = args.winsorize_limits {
        config.winsorize_limits = limits;
    }
    if let Some(method) = &args.impute_method {
        config.impute_method = method.parse::<ImputeMethod>()?;
    }
    if args.impute_limit.is_some() {
        config.impute_limit = args.impute_limit;
    }
    config.debug |= args.debug;
    config.validate()?;
    Ok(config)
}

fn load_side_table(path: &str, timestamp_column: &str) -> Result<TimeSeriesTable> {
    let mut table = read_table_csv(path)?;
    normalize_timestamps(&mut table, timestamp_column);
    Ok(table)
}

fn daily_points(table: &TimeSeriesTable, timestamp_column: &str, column: &str) -> Result<Vec<DailyPoint>> {
    let stamps = table
        .column(timestamp_column)
        .and_then(ColumnData::as_timestamps)
        .ok_or_else(|| AnalyticsError::InvalidConfig(format!("daily table has no '{}' column", timestamp_column)))?;
    let values = table
        .float_column(column)
        .ok_or_else(|| AnalyticsError::InvalidConfig(format!("daily table has no numeric '{}' column", column)))?;
    Ok(stamps
        .iter()
        .zip(values)
        .filter_map(|(ts, v)| ts.map(|t| (t, *v)))
        .collect())
}

fn run(args: Args) -> Result<()> {
    let config = build_config(&args)?;
    let input = config.input_csv.clone().ok_or(AnalyticsError::MissingInput)?;
    let ts = config.timestamp_column.clone();

    let mut table = read_table_csv(&input)?;
    normalize_timestamps(&mut table, &ts);

    for arg in &args.joins {
        let (path, prefix) = match arg.rsplit_once(':') {
            Some((path, prefix)) if !prefix.is_empty() => (path, Some(prefix)),
            _ => (arg.as_str(), None),
        };
        let right = load_side_table(path, &ts)?;
        join_on_timestamp(&mut table, &right, &ts, &config.identifier_columns, prefix)?;
    }

    for arg in &args.daily {
        let (path, column) = arg.rsplit_once(':').ok_or_else(|| {
            AnalyticsError::InvalidConfig(format!("--daily expects FILE:COLUMN, got '{}'", arg))
        })?;
        let daily = load_side_table(path, &ts)?;
        let points = daily_points(&daily, &ts, column)?;
        table = attach_daily_metric(&table, &ts, &points, column)?;
    }

    if args.start.is_some() || args.end.is_some() || args.period.is_some() {
        let start = args.start.as_deref().map(|s| parse_instant(s, "start")).transpose()?;
        let end = args.end.as_deref().map(|s| parse_instant(s, "end")).transpose()?;
        let (from, to) = resolve_time_range(start, end, args.period.as_deref(), Utc::now())?;
        table = table.filter_time_range(&ts, from, to);
        info!("Restricted to {} .. {} ({} rows).", from, to, table.n_rows());
    }

    null_value_check(&table, DEFAULT_NULL_THRESHOLD);

    let report = analyze_metrics(table, &config)?;
    let written = write_report(&report, &config.output_dir)?;
    info!(
        "Wrote {} artifacts to {:?} ({} rows, {} PCA components).",
        written.len(),
        config.output_dir,
        report.summary.row_count,
        report.summary.pca_components_used
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
