// Tabular time series threaded through the pipeline

use crate::error::{AnalyticsError, Result};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::Serialize;

/// Values held by one column. Missing entries are `NaN` for floats and `None`
/// for the other variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Text(Vec<Option<String>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the entry at `row` is missing.
    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            ColumnData::Float(v) => v[row].is_nan(),
            ColumnData::Text(v) => v[row].is_none(),
            ColumnData::Timestamp(v) => v[row].is_none(),
        }
    }

    pub fn missing_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_missing(row)).count()
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamps(&self) -> Option<&[Option<DateTime<Utc>>]> {
        match self {
            ColumnData::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    /// A column of the same variant with every entry missing.
    pub fn missing_like(&self, n_rows: usize) -> ColumnData {
        match self {
            ColumnData::Float(_) => ColumnData::Float(vec![f64::NAN; n_rows]),
            ColumnData::Text(_) => ColumnData::Text(vec![None; n_rows]),
            ColumnData::Timestamp(_) => ColumnData::Timestamp(vec![None; n_rows]),
        }
    }

    /// Gathers the given rows, in order. Used by sorting and filtering.
    pub fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&r| v[r].clone()).collect()),
            ColumnData::Timestamp(v) => {
                ColumnData::Timestamp(rows.iter().map(|&r| v[r]).collect())
            }
        }
    }

    /// Gathers rows by optional index; `None` yields a missing entry.
    pub fn take_optional(&self, rows: &[Option<usize>]) -> ColumnData {
        match self {
            ColumnData::Float(v) => ColumnData::Float(
                rows.iter().map(|r| r.map_or(f64::NAN, |r| v[r])).collect(),
            ),
            ColumnData::Text(v) => ColumnData::Text(
                rows.iter().map(|r| r.and_then(|r| v[r].clone())).collect(),
            ),
            ColumnData::Timestamp(v) => {
                ColumnData::Timestamp(rows.iter().map(|r| r.and_then(|r| v[r])).collect())
            }
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Ordered collection of equally long columns, one of which is normally the
/// timestamp column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeriesTable {
    columns: Vec<Column>,
}

impl TimeSeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from columns, checking that every column has the same length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut table = Self::new();
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    /// Appends a column, or replaces the existing column with the same name in place.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.data.len() != self.n_rows() {
            return Err(AnalyticsError::Shape(format!(
                "column '{}' has {} rows, table has {}",
                column.name,
                column.data.len(),
                self.n_rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => existing.data = column.data,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnData> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.data)
    }

    /// Float values of a column, if it exists and is numeric.
    pub fn float_column(&self, name: &str) -> Option<&[f64]> {
        self.column(name).and_then(ColumnData::as_float)
    }

    /// Keeps the given rows, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> TimeSeriesTable {
        TimeSeriesTable {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.take(rows)))
                .collect(),
        }
    }

    /// Keeps rows whose timestamp lies in `[start, end]`. Rows with a missing
    /// timestamp are dropped. A table without a timestamp column is returned unchanged.
    pub fn filter_time_range(
        &self,
        timestamp_column: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TimeSeriesTable {
        let Some(stamps) = self.column(timestamp_column).and_then(ColumnData::as_timestamps)
        else {
            return self.clone();
        };
        let rows: Vec<usize> = stamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| matches!(ts, Some(t) if *t >= start && *t <= end))
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&rows)
    }
}

/// Numeric-only projection of a [`TimeSeriesTable`].
///
/// Missing values are `NaN`. The index carries the row timestamps of the table
/// it was drawn from (all `None` when the table had no timestamp column).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub index: Vec<Option<DateTime<Utc>>>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    /// Builds a matrix, checking that names and index agree with the value shape.
    pub fn new(
        names: Vec<String>,
        index: Vec<Option<DateTime<Utc>>>,
        values: Array2<f64>,
    ) -> Result<Self> {
        if names.len() != values.ncols() || index.len() != values.nrows() {
            return Err(AnalyticsError::Shape(format!(
                "feature matrix has shape {:?} but {} names and {} index entries",
                values.dim(),
                names.len(),
                index.len()
            )));
        }
        Ok(Self {
            names,
            index,
            values,
        })
    }

    pub fn empty() -> Self {
        Self {
            names: Vec::new(),
            index: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// True when there are no rows or no features.
    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0 || self.n_features() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_table() -> TimeSeriesTable {
        let stamps = (0..4)
            .map(|h| Some(Utc.timestamp_opt(h * 3600, 0).unwrap()))
            .collect();
        TimeSeriesTable::from_columns(vec![
            Column::new("timestamp", ColumnData::Timestamp(stamps)),
            Column::new("close", ColumnData::Float(vec![1.0, f64::NAN, 3.0, 4.0])),
            Column::new(
                "ticker",
                ColumnData::Text(vec![Some("ETH".into()), None, Some("ETH".into()), None]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn push_column_rejects_mismatched_lengths() {
        let mut table = sample_table();
        let err = table
            .push_column(Column::new("short", ColumnData::Float(vec![1.0])))
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Shape(_)));
    }

    #[test]
    fn push_column_replaces_in_place() {
        let mut table = sample_table();
        table
            .push_column(Column::new("close", ColumnData::Float(vec![0.0; 4])))
            .unwrap();
        assert_eq!(table.names(), vec!["timestamp", "close", "ticker"]);
        assert_eq!(table.float_column("close").unwrap(), &[0.0; 4]);
    }

    #[test]
    fn missing_counts_cover_all_variants() {
        let table = sample_table();
        assert_eq!(table.column("close").unwrap().missing_count(), 1);
        assert_eq!(table.column("ticker").unwrap().missing_count(), 2);
        assert_eq!(table.column("timestamp").unwrap().missing_count(), 0);
    }

    #[test]
    fn filter_time_range_is_inclusive() {
        let table = sample_table();
        let start = Utc.timestamp_opt(3600, 0).unwrap();
        let end = Utc.timestamp_opt(2 * 3600, 0).unwrap();
        let filtered = table.filter_time_range("timestamp", start, end);
        assert_eq!(filtered.n_rows(), 2);
        assert!(filtered.float_column("close").unwrap()[0].is_nan());
        assert_eq!(filtered.float_column("close").unwrap()[1], 3.0);
    }

    #[test]
    fn feature_matrix_checks_shape() {
        let err = FeatureMatrix::new(vec!["a".into()], vec![None], Array2::zeros((1, 2)));
        assert!(err.is_err());
        assert!(FeatureMatrix::empty().is_empty());
    }
}
