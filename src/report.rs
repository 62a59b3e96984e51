// CSV ingestion and the on-disk report layout.

use crate::diagnostics::CorrelationMatrix;
use crate::error::{AnalyticsError, Result};
use crate::pipeline::AnalysisReport;
use crate::table::{Column, ColumnData, FeatureMatrix, TimeSeriesTable};
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

pub const CLEANED_FILE: &str = "metrics_cleaned.csv";
pub const DENOISED_FILE: &str = "metrics_denoised.csv";
pub const MISSINGNESS_FILE: &str = "missingness_report.csv";
pub const PEARSON_FILE: &str = "correlation_pearson.csv";
pub const SPEARMAN_FILE: &str = "correlation_spearman.csv";
pub const VIF_FILE: &str = "vif_scores.csv";
pub const EXPLAINED_VARIANCE_FILE: &str = "pca_explained_variance.csv";
pub const RECONSTRUCTION_ERROR_FILE: &str = "pca_reconstruction_error.csv";
pub const SUMMARY_FILE: &str = "summary.json";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Reads a CSV with a header row into a table.
///
/// A column whose non-empty cells all parse as numbers becomes a float column
/// (empty cells are `NaN`); any other column is kept as text.
pub fn read_table_csv<P: AsRef<Path>>(path: P) -> Result<TimeSeriesTable> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for result in reader.records() {
        let record = result?;
        for (j, field) in record.iter().enumerate().take(headers.len()) {
            cells[j].push(field.trim().to_string());
        }
    }

    let mut table = TimeSeriesTable::new();
    for (name, values) in headers.into_iter().zip(cells) {
        let numeric = values
            .iter()
            .filter(|v| !v.is_empty())
            .all(|v| v.parse::<f64>().is_ok());
        let data = if numeric {
            ColumnData::Float(
                values
                    .iter()
                    .map(|v| v.parse::<f64>().unwrap_or(f64::NAN))
                    .collect(),
            )
        } else {
            ColumnData::Text(
                values
                    .into_iter()
                    .map(|v| if v.is_empty() { None } else { Some(v) })
                    .collect(),
            )
        };
        table.push_column(Column::new(name, data))?;
    }
    info!(
        "Loaded {} rows x {} columns from {:?}.",
        table.n_rows(),
        table.n_columns(),
        path.as_ref()
    );
    Ok(table)
}

fn format_float(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn format_cell(data: &ColumnData, row: usize) -> String {
    match data {
        ColumnData::Float(v) => format_float(v[row]),
        ColumnData::Text(v) => v[row].clone().unwrap_or_default(),
        ColumnData::Timestamp(v) => format_timestamp(v[row]),
    }
}

fn writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    Ok(csv::Writer::from_path(path)?)
}

fn flush(mut w: csv::Writer<fs::File>, path: &Path) -> Result<()> {
    w.flush().map_err(|e| AnalyticsError::io(path, e))
}

/// Writes every column of `table`, missing values as empty cells.
pub fn write_table_csv(table: &TimeSeriesTable, path: &Path) -> Result<()> {
    let mut w = writer(path)?;
    w.write_record(table.names())?;
    for row in 0..table.n_rows() {
        w.write_record(table.columns().iter().map(|c| format_cell(&c.data, row)))?;
    }
    flush(w, path)
}

/// Writes a feature matrix with its timestamp index as the first column.
pub fn write_features_csv(features: &FeatureMatrix, path: &Path) -> Result<()> {
    let mut w = writer(path)?;
    let mut header = vec!["timestamp".to_string()];
    header.extend(features.names.iter().cloned());
    w.write_record(&header)?;
    for (i, row) in features.values.rows().into_iter().enumerate() {
        let mut record = vec![format_timestamp(features.index.get(i).copied().flatten())];
        record.extend(row.iter().map(|v| format_float(*v)));
        w.write_record(&record)?;
    }
    flush(w, path)
}

fn write_correlation_csv(corr: &CorrelationMatrix, path: &Path) -> Result<()> {
    let mut w = writer(path)?;
    let mut header = vec!["index".to_string()];
    header.extend(corr.names.iter().cloned());
    w.write_record(&header)?;
    for (name, row) in corr.names.iter().zip(corr.values.rows()) {
        let mut record = vec![name.clone()];
        record.extend(row.iter().map(|v| format_float(*v)));
        w.write_record(&record)?;
    }
    flush(w, path)
}

/// Writes a two-column `(label, value)` table.
fn write_pairs_csv<'a>(
    path: &Path,
    header: [&str; 2],
    rows: impl Iterator<Item = (&'a str, f64)>,
) -> Result<()> {
    let mut w = writer(path)?;
    w.write_record(header)?;
    for (label, value) in rows {
        w.write_record([label.to_string(), format_float(value)])?;
    }
    flush(w, path)
}

/// Writes all artifacts of a run into `output_dir`, creating it if needed.
/// Returns the paths written, in a fixed order.
pub fn write_report<P: AsRef<Path>>(report: &AnalysisReport, output_dir: P) -> Result<Vec<PathBuf>> {
    let dir = output_dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| AnalyticsError::io(dir, e))?;
    let path = |name: &str| dir.join(name);

    write_table_csv(&report.cleaned, &path(CLEANED_FILE))?;
    write_features_csv(&report.denoised, &path(DENOISED_FILE))?;

    let mut w = writer(&path(MISSINGNESS_FILE))?;
    w.write_record(["column", "missing_ratio", "missing_count"])?;
    for entry in &report.missingness.entries {
        w.write_record([
            entry.column.clone(),
            format_float(entry.missing_ratio),
            entry.missing_count.to_string(),
        ])?;
    }
    flush(w, &path(MISSINGNESS_FILE))?;

    write_correlation_csv(&report.diagnostics.pearson, &path(PEARSON_FILE))?;
    write_correlation_csv(&report.diagnostics.spearman, &path(SPEARMAN_FILE))?;
    write_pairs_csv(
        &path(VIF_FILE),
        ["feature", "vif"],
        report
            .diagnostics
            .vif
            .iter()
            .map(|s| (s.feature.as_str(), s.vif)),
    )?;

    let mut w = writer(&path(EXPLAINED_VARIANCE_FILE))?;
    w.write_record(["explained_variance_ratio"])?;
    for ratio in report.decomposition.explained_variance_ratio() {
        w.write_record([format_float(*ratio)])?;
    }
    flush(w, &path(EXPLAINED_VARIANCE_FILE))?;

    write_pairs_csv(
        &path(RECONSTRUCTION_ERROR_FILE),
        ["feature", "reconstruction_mse"],
        report
            .decomposition
            .reconstruction_error
            .iter()
            .map(|e| (e.feature.as_str(), e.mse)),
    )?;

    let summary_path = path(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(&report.summary)?;
    fs::write(&summary_path, json).map_err(|e| AnalyticsError::io(&summary_path, e))?;

    let written: Vec<PathBuf> = [
        CLEANED_FILE,
        DENOISED_FILE,
        MISSINGNESS_FILE,
        PEARSON_FILE,
        SPEARMAN_FILE,
        VIF_FILE,
        EXPLAINED_VARIANCE_FILE,
        RECONSTRUCTION_ERROR_FILE,
        SUMMARY_FILE,
    ]
    .iter()
    .map(|&name| path(name))
    .collect();
    debug!("Wrote {} report files to {:?}.", written.len(), dir);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn infers_column_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "ticker,timestamp,close,volume").unwrap();
        writeln!(file, "ETH,2024-01-01 00:00:00,100.5,").unwrap();
        writeln!(file, "ETH,2024-01-01 01:00:00,abc,7").unwrap();
        drop(file);

        let table = read_table_csv(&path).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert!(matches!(table.column("ticker"), Some(ColumnData::Text(_))));
        assert!(matches!(table.column("close"), Some(ColumnData::Text(_))));
        let volume = table.float_column("volume").unwrap();
        assert!(volume[0].is_nan());
        assert_eq!(volume[1], 7.0);
    }

    #[test]
    fn missing_values_are_written_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let stamp = DateTime::from_timestamp(3600, 0);
        let table = TimeSeriesTable::from_columns(vec![
            Column::new("timestamp", ColumnData::Timestamp(vec![stamp, None])),
            Column::new("close", ColumnData::Float(vec![1.5, f64::NAN])),
            Column::new("ticker", ColumnData::Text(vec![None, Some("ETH".into())])),
        ])
        .unwrap();
        write_table_csv(&table, &path).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,close,ticker");
        assert_eq!(lines[1], "1970-01-01 01:00:00+00:00,1.5,");
        assert_eq!(lines[2], ",,ETH");
    }

    #[test]
    fn missing_file_is_a_csv_error() {
        let err = read_table_csv("/nonexistent/metrics.csv").unwrap_err();
        assert!(matches!(err, AnalyticsError::Csv(_)));
    }
}
