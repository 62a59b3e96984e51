// Analytics over merged hourly market and on-chain metrics

#![doc = include_str!("../README.md")]

pub mod alignment;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod linalg_backends;
pub mod pca;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod stats;
pub mod table;
pub mod time_range;

pub use config::{AnalyticsConfig, DerivedFeature, ImputeMethod, Transform};
pub use diagnostics::{linearity_report, CorrelationMatrix, CorrelationMethod, DiagnosticsReport, VifScore};
pub use error::{AnalyticsError, Result};
pub use pca::{pca_denoise, DecompositionPath, DecompositionResult, PcaEngine};
pub use pipeline::{analyze_csv, analyze_metrics, AnalysisReport, Summary};
pub use report::{read_table_csv, write_report};
pub use table::{Column, ColumnData, FeatureMatrix, TimeSeriesTable};
