// Schema validation and cleaning stages for raw metric tables.
//
// Every stage accepts an empty table and leaves it empty. Values that cannot be
// parsed become missing instead of raising.

use crate::config::{DerivedFeature, ImputeMethod, Transform};
use crate::error::Result;
use crate::stats::{covariance, nan_quantile};
use crate::table::{Column, ColumnData, FeatureMatrix, TimeSeriesTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, trace};
use ndarray::Array2;
use serde::Serialize;

const DATETIME_WITH_OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Converts Unix epoch seconds (fractional allowed) to a UTC instant.
pub fn epoch_seconds_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let mut nanos = ((seconds - whole) * 1e9).round() as i64;
    let mut whole = whole as i64;
    if nanos >= 1_000_000_000 {
        whole += 1;
        nanos -= 1_000_000_000;
    }
    DateTime::from_timestamp(whole, nanos as u32)
}

/// Parses a date/time string as a UTC instant. Strings without an offset are taken as UTC.
pub fn parse_utc_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_WITH_OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Some(dt.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(naive, format) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// Parses a cell as a float; empty or malformed cells become `NaN`.
pub fn parse_float(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Rewrites the timestamp column as UTC instants.
///
/// A numeric column (or a text column whose every present value is numeric) is
/// read as Unix epoch seconds; anything else is parsed as a date/time string.
/// Unparseable entries become missing.
pub fn normalize_timestamps(table: &mut TimeSeriesTable, column: &str) {
    let Some(data) = table.column_mut(column) else {
        trace!("No '{}' column; timestamp normalization skipped.", column);
        return;
    };
    let normalized: Vec<Option<DateTime<Utc>>> = match data {
        ColumnData::Timestamp(_) => return,
        ColumnData::Float(values) => values.iter().map(|&v| epoch_seconds_to_utc(v)).collect(),
        ColumnData::Text(values) => {
            let all_numeric = values
                .iter()
                .flatten()
                .all(|v| v.trim().parse::<f64>().is_ok());
            if all_numeric {
                values
                    .iter()
                    .map(|v| v.as_deref().and_then(|s| epoch_seconds_to_utc(parse_float(s))))
                    .collect()
            } else {
                values
                    .iter()
                    .map(|v| v.as_deref().and_then(parse_utc_datetime))
                    .collect()
            }
        }
    };
    *data = ColumnData::Timestamp(normalized);
    debug!(
        "Normalized '{}': {} of {} timestamps missing.",
        column,
        data.missing_count(),
        data.len()
    );
}

/// Sorts rows ascending by timestamp and keeps the last row (in original order)
/// of each group sharing a timestamp. Missing timestamps sort last and are
/// treated as equal to one another.
pub fn sort_dedup(table: &mut TimeSeriesTable, column: &str) {
    let Some(stamps) = table.column(column).and_then(ColumnData::as_timestamps) else {
        trace!("No timestamp-typed '{}' column; sort/dedup skipped.", column);
        return;
    };
    let mut order: Vec<usize> = (0..stamps.len()).collect();
    // Stable sort keeps original order within equal timestamps; None sorts after Some.
    order.sort_by_key(|&i| (stamps[i].is_none(), stamps[i]));

    let mut keep = Vec::with_capacity(order.len());
    for (pos, &row) in order.iter().enumerate() {
        let is_last_of_group = order
            .get(pos + 1)
            .map_or(true, |&next| stamps[next] != stamps[row]);
        if is_last_of_group {
            keep.push(row);
        }
    }
    let dropped = order.len() - keep.len();
    if dropped > 0 {
        debug!("Dropped {} rows with duplicate timestamps.", dropped);
    }
    *table = table.take_rows(&keep);
}

/// Coerces every text column not listed in `exclude` to floats.
pub fn coerce_numeric(table: &mut TimeSeriesTable, exclude: &[String]) {
    for column in table.columns_mut() {
        if exclude.iter().any(|e| *e == column.name) {
            continue;
        }
        if let ColumnData::Text(values) = &column.data {
            let coerced: Vec<f64> = values
                .iter()
                .map(|v| v.as_deref().map_or(f64::NAN, parse_float))
                .collect();
            trace!("Coerced '{}' to numeric.", column.name);
            column.data = ColumnData::Float(coerced);
        }
    }
}

/// First difference of the natural logarithm; the first entry is missing.
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    let logs: Vec<f64> = values.iter().map(|v| v.ln()).collect();
    let mut out = vec![f64::NAN; values.len()];
    for i in 1..logs.len() {
        out[i] = logs[i] - logs[i - 1];
    }
    out
}

/// Rolling beta of `asset` returns on `benchmark` returns.
///
/// Each window of `window` consecutive rows must be fully observed; otherwise the
/// entry is missing. Both covariance and variance use an N - 1 denominator.
pub fn rolling_beta(asset_returns: &[f64], benchmark_returns: &[f64], window: usize) -> Vec<f64> {
    let n = asset_returns.len().min(benchmark_returns.len());
    let mut out = vec![f64::NAN; n];
    if window == 0 {
        return out;
    }
    for end in window.saturating_sub(1)..n {
        let start = end + 1 - window;
        let a = &asset_returns[start..=end];
        let b = &benchmark_returns[start..=end];
        if a.iter().chain(b).any(|v| v.is_nan()) {
            continue;
        }
        out[end] = covariance(a, b) / covariance(b, b);
    }
    out
}

/// Evaluates the derived-feature rule list once, in order.
///
/// A rule whose source (or benchmark) column is absent or not numeric is skipped.
pub fn add_derived_features(table: &mut TimeSeriesTable, rules: &[DerivedFeature]) -> Result<()> {
    for rule in rules {
        let Some(source) = table.float_column(&rule.source) else {
            debug!(
                "Skipping derived feature '{}': source '{}' not present.",
                rule.target, rule.source
            );
            continue;
        };
        let derived = match &rule.transform {
            Transform::LogReturn => log_returns(source),
            Transform::RollingBeta { benchmark, window } => {
                let Some(bench) = table.float_column(benchmark) else {
                    debug!(
                        "Skipping derived feature '{}': benchmark '{}' not present.",
                        rule.target, benchmark
                    );
                    continue;
                };
                rolling_beta(&log_returns(source), &log_returns(bench), *window)
            }
        };
        table.push_column(Column::new(rule.target.clone(), ColumnData::Float(derived)))?;
    }
    Ok(())
}

/// Clips `values` to its `[limits, 1 - limits]` empirical quantiles, ignoring
/// missing values. `limits <= 0` leaves the slice untouched.
pub fn winsorize_column(values: &mut [f64], limits: f64) {
    if limits <= 0.0 {
        return;
    }
    let lower = nan_quantile(values, limits);
    let upper = nan_quantile(values, 1.0 - limits);
    for v in values.iter_mut().filter(|v| !v.is_nan()) {
        if !lower.is_nan() && *v < lower {
            *v = lower;
        }
        if !upper.is_nan() && *v > upper {
            *v = upper;
        }
    }
}

/// Winsorizes every float column independently.
pub fn winsorize(table: &mut TimeSeriesTable, limits: f64) {
    if limits <= 0.0 {
        debug!("Winsorization disabled (limits = {}).", limits);
        return;
    }
    for column in table.columns_mut() {
        if let ColumnData::Float(values) = &mut column.data {
            winsorize_column(values, limits);
        }
    }
}

/// Propagates the last known value forward over at most `limit` consecutive gaps.
pub fn forward_fill<T: Clone>(values: &mut [T], is_missing: impl Fn(&T) -> bool, limit: Option<usize>) {
    let mut last: Option<T> = None;
    let mut run = 0usize;
    for v in values.iter_mut() {
        if !is_missing(v) {
            last = Some(v.clone());
            run = 0;
            continue;
        }
        if let Some(known) = &last {
            if limit.map_or(true, |l| run < l) {
                *v = known.clone();
            }
            run += 1;
        }
    }
}

/// Mirror image of [`forward_fill`].
pub fn backward_fill<T: Clone>(values: &mut [T], is_missing: impl Fn(&T) -> bool, limit: Option<usize>) {
    values.reverse();
    forward_fill(values, is_missing, limit);
    values.reverse();
}

/// Linear interpolation by row position.
///
/// Leading gaps stay missing; trailing gaps take the last known value. At most
/// `limit` entries of each gap, counted from its start, are filled.
pub fn interpolate_linear(values: &mut [f64], limit: Option<usize>) {
    let mut prev_valid: Option<usize> = None;
    let mut i = 0;
    while i < values.len() {
        if !values[i].is_nan() {
            prev_valid = Some(i);
            i += 1;
            continue;
        }
        let gap_start = i;
        while i < values.len() && values[i].is_nan() {
            i += 1;
        }
        let Some(left) = prev_valid else {
            continue;
        };
        let fill_end = limit.map_or(i, |l| (gap_start + l).min(i));
        let left_value = values[left];
        if i < values.len() {
            let right_value = values[i];
            let span = (i - left) as f64;
            for k in gap_start..fill_end {
                let t = (k - left) as f64 / span;
                values[k] = left_value + (right_value - left_value) * t;
            }
        } else {
            for v in &mut values[gap_start..fill_end] {
                *v = left_value;
            }
        }
    }
}

/// Fills gaps in every column except the timestamp column.
///
/// Text columns are forward/backward filled like floats; interpolation only
/// touches float columns.
pub fn impute_missing(
    table: &mut TimeSeriesTable,
    method: ImputeMethod,
    limit: Option<usize>,
    timestamp_column: &str,
) {
    if method == ImputeMethod::None {
        return;
    }
    for column in table.columns_mut() {
        if column.name == timestamp_column {
            continue;
        }
        match (&mut column.data, method) {
            (ColumnData::Float(v), ImputeMethod::ForwardFill) => forward_fill(v, |x| x.is_nan(), limit),
            (ColumnData::Float(v), ImputeMethod::BackwardFill) => backward_fill(v, |x| x.is_nan(), limit),
            (ColumnData::Float(v), ImputeMethod::Interpolate) => interpolate_linear(v, limit),
            (ColumnData::Text(v), ImputeMethod::ForwardFill) => forward_fill(v, Option::is_none, limit),
            (ColumnData::Text(v), ImputeMethod::BackwardFill) => backward_fill(v, Option::is_none, limit),
            _ => {}
        }
    }
    debug!("Imputed missing values with {} (limit {:?}).", method, limit);
}

/// Required columns absent from the table. Reported, never enforced.
pub fn validate_schema(table: &TimeSeriesTable, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|c| !table.has_column(c))
        .cloned()
        .collect()
}

/// Missing-value statistics for one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingnessEntry {
    pub column: String,
    pub missing_ratio: f64,
    pub missing_count: usize,
}

/// Per-column missingness, in table column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingnessReport {
    pub entries: Vec<MissingnessEntry>,
}

impl MissingnessReport {
    pub fn get(&self, column: &str) -> Option<&MissingnessEntry> {
        self.entries.iter().find(|e| e.column == column)
    }
}

/// Counts missing values per column. The ratio is 0 for an empty table.
pub fn missingness_report(table: &TimeSeriesTable) -> MissingnessReport {
    let n_rows = table.n_rows();
    let entries = table
        .columns()
        .iter()
        .map(|c| {
            let missing_count = c.data.missing_count();
            MissingnessEntry {
                column: c.name.clone(),
                missing_ratio: if n_rows == 0 {
                    0.0
                } else {
                    missing_count as f64 / n_rows as f64
                },
                missing_count,
            }
        })
        .collect();
    MissingnessReport { entries }
}

/// Projects the float columns, minus the timestamp and identifier columns, into
/// a feature matrix indexed by the table's timestamps.
pub fn prepare_features(
    table: &TimeSeriesTable,
    timestamp_column: &str,
    identifiers: &[String],
) -> FeatureMatrix {
    let selected: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|c| c.name != timestamp_column && !identifiers.iter().any(|i| *i == c.name))
        .filter(|c| matches!(c.data, ColumnData::Float(_)))
        .collect();
    let n_rows = table.n_rows();
    let mut values = Array2::<f64>::from_elem((n_rows, selected.len()), f64::NAN);
    for (j, column) in selected.iter().enumerate() {
        if let ColumnData::Float(v) = &column.data {
            for (i, x) in v.iter().enumerate() {
                values[[i, j]] = *x;
            }
        }
    }
    let index = match table.column(timestamp_column).and_then(ColumnData::as_timestamps) {
        Some(stamps) => stamps.to_vec(),
        None => vec![None; n_rows],
    };
    FeatureMatrix {
        names: selected.iter().map(|c| c.name.clone()).collect(),
        index,
        values,
    }
}
