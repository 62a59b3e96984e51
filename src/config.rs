use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Columns of the merged universal metrics table, in export order.
pub const UNIVERSAL_METRIC_COLUMNS: [&str; 16] = [
    "ticker",
    "caller",
    "timestamp",
    "Open",
    "high",
    "close",
    "low",
    "supply",
    "eth_daily_tx",
    "market_cap",
    "volume",
    "btc_open",
    "btc_high",
    "btc_low",
    "btc_close",
    "btc_volume",
];

/// Gap-filling strategy applied after winsorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ImputeMethod {
    #[default]
    #[serde(rename = "ffill", alias = "forward-fill")]
    ForwardFill,
    #[serde(rename = "bfill", alias = "backward-fill")]
    BackwardFill,
    #[serde(rename = "interpolate")]
    Interpolate,
    #[serde(rename = "none")]
    None,
}

impl FromStr for ImputeMethod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffill" | "forward-fill" | "forward_fill" => Ok(ImputeMethod::ForwardFill),
            "bfill" | "backward-fill" | "backward_fill" => Ok(ImputeMethod::BackwardFill),
            "interpolate" | "linear" => Ok(ImputeMethod::Interpolate),
            "none" => Ok(ImputeMethod::None),
            other => Err(AnalyticsError::InvalidConfig(format!(
                "unknown impute method '{}' (expected ffill, bfill, interpolate or none)",
                other
            ))),
        }
    }
}

impl fmt::Display for ImputeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImputeMethod::ForwardFill => "ffill",
            ImputeMethod::BackwardFill => "bfill",
            ImputeMethod::Interpolate => "interpolate",
            ImputeMethod::None => "none",
        };
        f.write_str(name)
    }
}

/// How a derived column is computed from its source column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    /// First difference of the natural logarithm.
    LogReturn,
    /// Rolling beta of the source's log returns against a benchmark's log returns.
    RollingBeta { benchmark: String, window: usize },
}

/// One entry of the derived-feature rule list, evaluated once per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeature {
    pub source: String,
    pub target: String,
    pub transform: Transform,
}

impl DerivedFeature {
    pub fn log_return(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            transform: Transform::LogReturn,
        }
    }
}

/// The return features computed when no rule list is configured.
pub fn default_derived_features() -> Vec<DerivedFeature> {
    vec![
        DerivedFeature::log_return("close", "eth_return"),
        DerivedFeature::log_return("btc_close", "btc_return"),
    ]
}

/// Options for one analytics run.
///
/// Every call site builds or loads its own value; nothing here is shared
/// between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// CSV to load when the pipeline is not handed a table.
    pub input_csv: Option<PathBuf>,
    /// Directory the report writer puts artifacts in.
    pub output_dir: PathBuf,
    /// Cumulative explained-variance target for component selection, in (0, 1].
    pub pca_variance_threshold: f64,
    /// Symmetric quantile clip fraction; `<= 0` disables winsorization.
    pub winsorize_limits: f64,
    pub impute_method: ImputeMethod,
    /// Maximum number of consecutive gaps filled from one known value.
    pub impute_limit: Option<usize>,
    /// Report missing schema columns.
    pub debug: bool,
    pub timestamp_column: String,
    /// Columns never coerced to numbers nor used as features.
    pub identifier_columns: Vec<String>,
    pub required_columns: Vec<String>,
    pub derived_features: Vec<DerivedFeature>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            input_csv: None,
            output_dir: PathBuf::from("data/analytics"),
            pca_variance_threshold: 0.95,
            winsorize_limits: 0.01,
            impute_method: ImputeMethod::ForwardFill,
            impute_limit: None,
            debug: false,
            timestamp_column: "timestamp".to_string(),
            identifier_columns: vec![
                "ticker".to_string(),
                "caller".to_string(),
                "timestamp".to_string(),
            ],
            required_columns: UNIVERSAL_METRIC_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            derived_features: default_derived_features(),
        }
    }
}

impl AnalyticsConfig {
    /// Loads a (possibly partial) JSON document over the defaults and validates it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AnalyticsError::io(path.as_ref(), e))?;
        let config: AnalyticsConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks option ranges. Called by the pipeline before any stage runs.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.pca_variance_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "pca_variance_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if !self.winsorize_limits.is_finite() || self.winsorize_limits >= 0.5 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "winsorize_limits must be finite and below 0.5, got {}",
                self.winsorize_limits
            )));
        }
        if self.impute_limit == Some(0) {
            return Err(AnalyticsError::InvalidConfig(
                "impute_limit must be greater than 0".to_string(),
            ));
        }
        if self.timestamp_column.is_empty() {
            return Err(AnalyticsError::InvalidConfig(
                "timestamp_column must not be empty".to_string(),
            ));
        }
        for rule in &self.derived_features {
            if self.is_identifier(&rule.target) {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "derived feature '{}' would overwrite an identifier column",
                    rule.target
                )));
            }
            if let Transform::RollingBeta { window, .. } = rule.transform {
                if window < 2 {
                    return Err(AnalyticsError::InvalidConfig(format!(
                        "rolling beta window for '{}' must be at least 2, got {}",
                        rule.target, window
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_identifier(&self, column: &str) -> bool {
        column == self.timestamp_column || self.identifier_columns.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AnalyticsConfig::default();
        config.validate().unwrap();
        assert_eq!(config.impute_method, ImputeMethod::ForwardFill);
        assert_eq!(config.required_columns.len(), 16);
    }

    #[test]
    fn rejects_out_of_range_options() {
        let mut config = AnalyticsConfig::default();
        config.pca_variance_threshold = 0.0;
        assert!(config.validate().is_err());
        config.pca_variance_threshold = 1.0;
        config.validate().unwrap();
        config.pca_variance_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AnalyticsConfig::default();
        config.impute_limit = Some(0);
        assert!(config.validate().is_err());

        let mut config = AnalyticsConfig::default();
        config.winsorize_limits = -1.0;
        config.validate().unwrap();
        config.winsorize_limits = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_rule_targeting_identifier() {
        let mut config = AnalyticsConfig::default();
        config
            .derived_features
            .push(DerivedFeature::log_return("close", "ticker"));
        assert!(matches!(
            config.validate(),
            Err(AnalyticsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn impute_method_parses_aliases() {
        assert_eq!("ffill".parse::<ImputeMethod>().unwrap(), ImputeMethod::ForwardFill);
        assert_eq!("Backward-Fill".parse::<ImputeMethod>().unwrap(), ImputeMethod::BackwardFill);
        assert_eq!("interpolate".parse::<ImputeMethod>().unwrap(), ImputeMethod::Interpolate);
        assert!("spline".parse::<ImputeMethod>().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AnalyticsConfig = serde_json::from_str(
            r#"{"impute_method": "interpolate", "impute_limit": 3,
                "derived_features": [
                  {"source": "close", "target": "eth_beta",
                   "transform": {"kind": "rolling_beta", "benchmark": "btc_close", "window": 24}}
                ]}"#,
        )
        .unwrap();
        assert_eq!(config.impute_method, ImputeMethod::Interpolate);
        assert_eq!(config.impute_limit, Some(3));
        assert_eq!(config.pca_variance_threshold, 0.95);
        assert_eq!(
            config.derived_features[0].transform,
            Transform::RollingBeta {
                benchmark: "btc_close".to_string(),
                window: 24
            }
        );
    }
}
