// Alignment of metrics sampled on different clocks onto one hourly table.

use crate::error::{AnalyticsError, Result};
use crate::preprocess::{forward_fill, parse_float};
use crate::table::{Column, ColumnData, TimeSeriesTable};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Missing-ratio above which [`null_value_check`] warns by default.
pub const DEFAULT_NULL_THRESHOLD: f64 = 0.05;

/// One observation of a metric published once per day.
pub type DailyPoint = (DateTime<Utc>, f64);

fn floor_to(ts: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    let t = ts.timestamp();
    DateTime::from_timestamp(t - t.rem_euclid(seconds), 0)
}

/// Midnight UTC of the instant's day.
pub fn floor_day(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    floor_to(ts, SECONDS_PER_DAY)
}

/// Start of the instant's hour.
pub fn floor_hour(ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    floor_to(ts, SECONDS_PER_HOUR)
}

/// Stable sort of the rows by timestamp; missing timestamps go last.
fn sort_by_timestamp(table: &TimeSeriesTable, timestamp_column: &str) -> TimeSeriesTable {
    let Some(stamps) = table.column(timestamp_column).and_then(ColumnData::as_timestamps) else {
        return table.clone();
    };
    let mut order: Vec<usize> = (0..stamps.len()).collect();
    order.sort_by_key(|&i| (stamps[i].is_none(), stamps[i]));
    table.take_rows(&order)
}

/// A constant series with one point per UTC day from `start`'s day to `end`'s
/// day inclusive. An absent value gives an empty series.
pub fn build_daily_series(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    value: Option<f64>,
) -> Vec<DailyPoint> {
    let (Some(value), Some(first), Some(last)) = (value, floor_day(start), floor_day(end)) else {
        return Vec::new();
    };
    let mut series = Vec::new();
    let mut day = first;
    while day <= last {
        series.push((day, value));
        day += chrono::Duration::days(1);
    }
    series
}

/// Attaches a daily metric to an hourly table as column `name`.
///
/// The table is sorted by timestamp. Daily points are floored to their UTC day,
/// sorted, and de-duplicated keeping the last point of each day. Each row
/// takes the latest daily value at or before its floored hour; the column is
/// then forward-filled. An empty daily series yields an all-missing column.
pub fn attach_daily_metric(
    table: &TimeSeriesTable,
    timestamp_column: &str,
    daily: &[DailyPoint],
    name: &str,
) -> Result<TimeSeriesTable> {
    let mut out = sort_by_timestamp(table, timestamp_column);
    let n_rows = out.n_rows();
    if daily.is_empty() {
        warn!("No daily values for '{}'; column left missing.", name);
        out.push_column(Column::new(name, ColumnData::Float(vec![f64::NAN; n_rows])))?;
        return Ok(out);
    }

    let mut points: Vec<DailyPoint> = daily
        .iter()
        .filter_map(|&(ts, v)| floor_day(ts).map(|day| (day, v)))
        .collect();
    points.sort_by_key(|&(day, _)| day);
    let before = points.len();
    // sort_by_key is stable, so the last of each run is the last in input order
    let mut deduped: Vec<DailyPoint> = Vec::with_capacity(points.len());
    for point in points {
        match deduped.last_mut() {
            Some(last) if last.0 == point.0 => *last = point,
            _ => deduped.push(point),
        }
    }
    if deduped.len() < before {
        warn!(
            "Deduplicated {} duplicate daily timestamps for '{}'.",
            before - deduped.len(),
            name
        );
    }

    let stamps: Vec<Option<DateTime<Utc>>> = match out
        .column(timestamp_column)
        .and_then(ColumnData::as_timestamps)
    {
        Some(s) => s.to_vec(),
        None => vec![None; n_rows],
    };
    let mut values: Vec<f64> = stamps
        .iter()
        .map(|ts| {
            let Some(hour) = ts.and_then(floor_hour) else {
                return f64::NAN;
            };
            let after = deduped.partition_point(|&(day, _)| day <= hour);
            if after == 0 {
                f64::NAN
            } else {
                deduped[after - 1].1
            }
        })
        .collect();
    forward_fill(&mut values, |v| v.is_nan(), None);
    debug!("Attached daily metric '{}' from {} days.", name, deduped.len());
    out.push_column(Column::new(name, ColumnData::Float(values)))?;
    Ok(out)
}

/// Left-joins `right` onto `left` by exact timestamp.
///
/// Every column of `right` except the timestamp and identifier columns is
/// added, renamed `{prefix}_{name}` when a prefix is given. Unmatched rows are
/// missing. When `right` has several rows with the same timestamp the last one
/// is used. A joined name that already exists in `left` is an error and
/// leaves `left` untouched.
pub fn join_on_timestamp(
    left: &mut TimeSeriesTable,
    right: &TimeSeriesTable,
    timestamp_column: &str,
    identifiers: &[String],
    prefix: Option<&str>,
) -> Result<()> {
    let right_index: HashMap<DateTime<Utc>, usize> = right
        .column(timestamp_column)
        .and_then(ColumnData::as_timestamps)
        .map(|stamps| {
            stamps
                .iter()
                .enumerate()
                .filter_map(|(i, ts)| ts.map(|t| (t, i)))
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Option<usize>> = match left
        .column(timestamp_column)
        .and_then(ColumnData::as_timestamps)
    {
        Some(stamps) => stamps
            .iter()
            .map(|ts| ts.and_then(|t| right_index.get(&t).copied()))
            .collect(),
        None => vec![None; left.n_rows()],
    };
    let matched = rows.iter().filter(|r| r.is_some()).count();

    let joined: Vec<(String, &ColumnData)> = right
        .columns()
        .iter()
        .filter(|c| c.name != timestamp_column && !identifiers.iter().any(|i| *i == c.name))
        .map(|c| {
            let name = match prefix {
                Some(p) => format!("{}_{}", p, c.name),
                None => c.name.clone(),
            };
            (name, &c.data)
        })
        .collect();
    let overlapping: Vec<&str> = joined
        .iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| left.has_column(name))
        .collect();
    if !overlapping.is_empty() {
        return Err(AnalyticsError::InvalidConfig(format!(
            "joined columns overlap existing columns {:?}; join with a prefix",
            overlapping
        )));
    }

    for (name, data) in joined {
        left.push_column(Column::new(name, data.take_optional(&rows)))?;
    }
    info!(
        "Joined {} columns; {} of {} rows matched.",
        right.n_columns(),
        matched,
        left.n_rows()
    );
    Ok(())
}

/// Warns for every column whose missing ratio exceeds `threshold` and returns
/// the offending column names.
pub fn null_value_check(table: &TimeSeriesTable, threshold: f64) -> Vec<String> {
    let n_rows = table.n_rows();
    if n_rows == 0 {
        return Vec::new();
    }
    let mut flagged = Vec::new();
    for column in table.columns() {
        let ratio = column.data.missing_count() as f64 / n_rows as f64;
        if ratio > threshold {
            warn!("{} has {:.2}% null values", column.name, ratio * 100.0);
            flagged.push(column.name.clone());
        }
    }
    debug!("Null value check done; {} columns flagged.", flagged.len());
    flagged
}

/// Rewrites the timestamp column as whole Unix epoch seconds. Text is parsed as
/// a number; float columns are left as they are.
pub fn to_unix_timestamp(table: &mut TimeSeriesTable, timestamp_column: &str) {
    let Some(data) = table.column_mut(timestamp_column) else {
        return;
    };
    let seconds: Vec<f64> = match data {
        ColumnData::Float(_) => return,
        ColumnData::Timestamp(stamps) => stamps
            .iter()
            .map(|ts| ts.map_or(f64::NAN, |t| t.timestamp() as f64))
            .collect(),
        ColumnData::Text(values) => values
            .iter()
            .map(|v| v.as_deref().map_or(f64::NAN, parse_float))
            .collect(),
    };
    *data = ColumnData::Float(seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    fn hourly(stamps: Vec<DateTime<Utc>>) -> TimeSeriesTable {
        let close = (0..stamps.len()).map(|i| i as f64).collect();
        TimeSeriesTable::from_columns(vec![
            Column::new(
                "timestamp",
                ColumnData::Timestamp(stamps.into_iter().map(Some).collect()),
            ),
            Column::new("close", ColumnData::Float(close)),
        ])
        .unwrap()
    }

    #[test]
    fn daily_series_covers_day_range() {
        let series = build_daily_series(at(1, 13), at(3, 2), Some(7.0));
        assert_eq!(series.len(), 3);
        assert_eq!(series[0], (at(1, 0), 7.0));
        assert_eq!(series[2].0, at(3, 0));
        assert!(build_daily_series(at(1, 0), at(3, 0), None).is_empty());
    }

    #[test]
    fn attach_uses_as_of_lookup_and_forward_fill() {
        let table = hourly(vec![at(2, 5), at(1, 23), at(3, 1), at(4, 0)]);
        let daily = vec![(at(1, 12), 10.0), (at(3, 0), 30.0), (at(1, 18), 11.0)];
        let out = attach_daily_metric(&table, "timestamp", &daily, "supply").unwrap();
        // rows are sorted: day1 23h, day2 5h, day3 1h, day4 0h
        assert_eq!(out.float_column("close").unwrap(), &[1.0, 0.0, 2.0, 3.0]);
        assert_eq!(out.float_column("supply").unwrap(), &[11.0, 11.0, 30.0, 30.0]);
    }

    #[test]
    fn rows_before_first_daily_value_stay_missing() {
        let table = hourly(vec![at(1, 0), at(2, 0)]);
        let out = attach_daily_metric(&table, "timestamp", &[(at(2, 6), 5.0)], "tx").unwrap();
        let tx = out.float_column("tx").unwrap();
        assert!(tx[0].is_nan());
        assert_eq!(tx[1], 5.0);
    }

    #[test]
    fn empty_daily_series_gives_missing_column() {
        let table = hourly(vec![at(1, 0), at(1, 1)]);
        let out = attach_daily_metric(&table, "timestamp", &[], "tx").unwrap();
        assert_eq!(out.column("tx").unwrap().missing_count(), 2);
    }

    #[test]
    fn join_prefixes_and_skips_identifiers() {
        let mut left = hourly(vec![at(1, 0), at(1, 1), at(1, 2)]);
        let right = TimeSeriesTable::from_columns(vec![
            Column::new(
                "timestamp",
                ColumnData::Timestamp(vec![Some(at(1, 2)), Some(at(1, 0))]),
            ),
            Column::new("ticker", ColumnData::Text(vec![Some("BTC".into()), Some("BTC".into())])),
            Column::new("close", ColumnData::Float(vec![42.0, 40.0])),
        ])
        .unwrap();
        let identifiers = vec!["ticker".to_string(), "timestamp".to_string()];
        join_on_timestamp(&mut left, &right, "timestamp", &identifiers, Some("btc")).unwrap();
        assert_eq!(left.names(), vec!["timestamp", "close", "btc_close"]);
        let joined = left.float_column("btc_close").unwrap();
        assert_eq!(joined[0], 40.0);
        assert!(joined[1].is_nan());
        assert_eq!(joined[2], 42.0);
    }

    #[test]
    fn join_without_prefix_rejects_overlapping_columns() {
        let mut left = TimeSeriesTable::from_columns(vec![
            Column::new("timestamp", ColumnData::Timestamp(vec![Some(at(1, 0)), Some(at(1, 1))])),
            Column::new("close", ColumnData::Float(vec![2000.0, 2010.0])),
        ])
        .unwrap();
        let right = TimeSeriesTable::from_columns(vec![
            Column::new("timestamp", ColumnData::Timestamp(vec![Some(at(1, 0)), Some(at(1, 1))])),
            Column::new("close", ColumnData::Float(vec![40000.0, 40100.0])),
            Column::new("hashrate", ColumnData::Float(vec![1.0, 2.0])),
        ])
        .unwrap();
        let identifiers = vec!["timestamp".to_string()];

        let err = join_on_timestamp(&mut left, &right, "timestamp", &identifiers, None).unwrap_err();
        assert!(matches!(err, AnalyticsError::InvalidConfig(_)));
        assert_eq!(left.names(), vec!["timestamp", "close"]);
        assert_eq!(left.float_column("close").unwrap(), &[2000.0, 2010.0]);

        join_on_timestamp(&mut left, &right, "timestamp", &identifiers, Some("btc")).unwrap();
        assert_eq!(left.float_column("close").unwrap(), &[2000.0, 2010.0]);
        assert_eq!(left.float_column("btc_close").unwrap(), &[40000.0, 40100.0]);
    }

    #[test]
    fn null_check_flags_sparse_columns() {
        let table = TimeSeriesTable::from_columns(vec![
            Column::new("dense", ColumnData::Float(vec![1.0; 20])),
            Column::new(
                "sparse",
                ColumnData::Float((0..20).map(|i| if i < 2 { f64::NAN } else { 1.0 }).collect()),
            ),
        ])
        .unwrap();
        assert_eq!(null_value_check(&table, DEFAULT_NULL_THRESHOLD), vec!["sparse".to_string()]);
        assert!(null_value_check(&TimeSeriesTable::new(), DEFAULT_NULL_THRESHOLD).is_empty());
    }

    #[test]
    fn unix_timestamp_export() {
        let mut table = hourly(vec![at(1, 1)]);
        to_unix_timestamp(&mut table, "timestamp");
        assert_eq!(table.float_column("timestamp").unwrap(), &[1_704_070_800.0]);
    }
}
