// End-to-end analytics pass: clean, denoise, diagnose, summarize.

use crate::config::AnalyticsConfig;
use crate::diagnostics::{linearity_report, DiagnosticsReport};
use crate::error::{AnalyticsError, Result};
use crate::pca::{pca_denoise, DecompositionResult};
use crate::preprocess::{
    add_derived_features, coerce_numeric, impute_missing, missingness_report,
    normalize_timestamps, prepare_features, sort_dedup, validate_schema, winsorize,
    MissingnessReport,
};
use crate::report::read_table_csv;
use crate::table::{FeatureMatrix, TimeSeriesTable};
use log::{debug, info, warn};
use serde::Serialize;

/// The summary document written next to the other artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub row_count: usize,
    pub feature_names: Vec<String>,
    pub pca_components_used: usize,
}

/// Everything one run produces. Handed to [`crate::report::write_report`] as is.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub cleaned: TimeSeriesTable,
    pub denoised: FeatureMatrix,
    pub missingness: MissingnessReport,
    pub diagnostics: DiagnosticsReport,
    pub decomposition: DecompositionResult,
    pub summary: Summary,
    /// Required columns that were absent from the input.
    pub missing_columns: Vec<String>,
}

/// Runs every stage over `table`.
///
/// Stages, in order: timestamp normalization, sort/dedup, numeric coercion,
/// derived features, winsorization, imputation, schema check, missingness,
/// feature extraction, then PCA denoising and diagnostics over the same
/// feature matrix. An empty table flows through and yields empty artifacts.
pub fn analyze_metrics(mut table: TimeSeriesTable, config: &AnalyticsConfig) -> Result<AnalysisReport> {
    config.validate()?;
    info!(
        "Analyzing {} rows x {} columns.",
        table.n_rows(),
        table.n_columns()
    );

    let ts = config.timestamp_column.as_str();
    normalize_timestamps(&mut table, ts);
    sort_dedup(&mut table, ts);
    coerce_numeric(&mut table, &config.identifier_columns);
    add_derived_features(&mut table, &config.derived_features)?;
    winsorize(&mut table, config.winsorize_limits);
    impute_missing(&mut table, config.impute_method, config.impute_limit, ts);
    debug!("Cleaning stages done; {} rows remain.", table.n_rows());

    let missing_columns = validate_schema(&table, &config.required_columns);
    if !missing_columns.is_empty() {
        if config.debug {
            warn!("Missing columns: {:?}", missing_columns);
        } else {
            debug!("Missing columns: {:?}", missing_columns);
        }
    }

    let missingness = missingness_report(&table);
    let features = prepare_features(&table, ts, &config.identifier_columns);

    let (denoised, decomposition) = if features.is_empty() {
        warn!(
            "Feature matrix is empty ({} x {}); skipping PCA.",
            features.n_samples(),
            features.n_features()
        );
        (
            features.clone(),
            DecompositionResult::empty(features.n_samples(), features.n_features()),
        )
    } else {
        pca_denoise(&features, config.pca_variance_threshold)
    };
    let diagnostics = linearity_report(&features);

    let summary = Summary {
        row_count: table.n_rows(),
        feature_names: features.names.clone(),
        pca_components_used: decomposition.components_used,
    };
    info!(
        "Analysis done: {} rows, {} features, {} PCA components.",
        summary.row_count,
        summary.feature_names.len(),
        summary.pca_components_used
    );

    Ok(AnalysisReport {
        cleaned: table,
        denoised,
        missingness,
        diagnostics,
        decomposition,
        summary,
        missing_columns,
    })
}

/// Loads `config.input_csv` and runs [`analyze_metrics`] on it.
pub fn analyze_csv(config: &AnalyticsConfig) -> Result<AnalysisReport> {
    let path = config.input_csv.as_ref().ok_or(AnalyticsError::MissingInput)?;
    let table = read_table_csv(path)?;
    analyze_metrics(table, config)
}
