use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Errors surfaced to callers of the analytics pipeline.
///
/// Numerical degeneracies are never reported through this type; they are
/// recovered inside the PCA engine and the diagnostics.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Rejected configuration value or conflicting parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Neither a table nor an input CSV path was supplied.
    #[error("input_csv must be provided when no table is given")]
    MissingInput,

    /// A table operation broke the column contract (e.g. mismatched row counts).
    #[error("Table shape error: {0}")]
    Shape(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnalyticsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnalyticsError::Io {
            path: path.into(),
            source,
        }
    }
}
