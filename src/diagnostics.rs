// src/diagnostics.rs
// Linear-dependency diagnostics over a feature matrix: correlation and VIF.

use crate::linalg_backends::{pinv, BackendEigh, BackendSVD, NdarrayLinAlgBackend};
use crate::stats::{average_ranks, nan_std, pairwise_complete, pearson};
use crate::table::FeatureMatrix;
use log::{debug, warn};
use ndarray::{Array2, ArrayView1};
use serde::Serialize;

/// Correlation coefficient family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationMethod {
    Pearson,
    /// Pearson correlation of average ranks.
    Spearman,
}

/// Square, symmetric correlation matrix labelled by feature name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub method: CorrelationMethod,
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl CorrelationMatrix {
    pub fn empty(method: CorrelationMethod) -> Self {
        Self {
            method,
            names: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Coefficient between two features by name.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.names.iter().position(|n| n == a)?;
        let j = self.names.iter().position(|n| n == b)?;
        Some(self.values[[i, j]])
    }
}

/// Variance inflation factor of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VifScore {
    pub feature: String,
    pub vif: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticsReport {
    pub pearson: CorrelationMatrix,
    pub spearman: CorrelationMatrix,
    pub vif: Vec<VifScore>,
}

impl DiagnosticsReport {
    pub fn empty() -> Self {
        Self {
            pearson: CorrelationMatrix::empty(CorrelationMethod::Pearson),
            spearman: CorrelationMatrix::empty(CorrelationMethod::Spearman),
            vif: Vec::new(),
        }
    }
}

fn column_values(column: ArrayView1<f64>) -> Vec<f64> {
    column.iter().copied().collect()
}

/// Correlation of two columns over the rows where both are observed.
fn pairwise_coefficient(x: &[f64], y: &[f64], method: CorrelationMethod) -> f64 {
    let (x, y) = pairwise_complete(x, y);
    match method {
        CorrelationMethod::Pearson => pearson(&x, &y),
        CorrelationMethod::Spearman => pearson(&average_ranks(&x), &average_ranks(&y)),
    }
}

/// Pairwise-complete correlation matrix without any post-processing.
/// Undefined coefficients (constant or nearly empty columns) are `NaN`.
fn raw_correlation(features: &FeatureMatrix, method: CorrelationMethod) -> Array2<f64> {
    let p = features.n_features();
    let columns: Vec<Vec<f64>> = features
        .values
        .columns()
        .into_iter()
        .map(column_values)
        .collect();
    let mut corr = Array2::from_elem((p, p), f64::NAN);
    for i in 0..p {
        for j in i..p {
            let r = pairwise_coefficient(&columns[i], &columns[j], method);
            corr[[i, j]] = r;
            corr[[j, i]] = r;
        }
    }
    corr
}

/// Correlation matrix of the features.
///
/// A column whose sample standard deviation is zero or undefined has its row
/// and column set to zero with 1.0 on the diagonal. The diagonal of every other
/// column is 1.0 as well. Pairs with fewer than two common observations stay
/// `NaN`. Empty input gives an empty matrix.
pub fn correlation_matrix(features: &FeatureMatrix, method: CorrelationMethod) -> CorrelationMatrix {
    if features.is_empty() {
        return CorrelationMatrix::empty(method);
    }
    let mut values = raw_correlation(features, method);
    let p = features.n_features();
    for j in 0..p {
        let sd = nan_std(features.values.column(j).iter().copied(), 1);
        if sd.is_nan() || sd == 0.0 {
            debug!(
                "Feature '{}' has no variance; overriding its {:?} correlations.",
                features.names[j], method
            );
            for k in 0..p {
                values[[j, k]] = 0.0;
                values[[k, j]] = 0.0;
            }
        }
        values[[j, j]] = 1.0;
    }
    CorrelationMatrix {
        method,
        names: features.names.clone(),
        values,
    }
}

/// VIF scores from the diagonal of the pseudo-inverse of the Pearson
/// correlation matrix, with undefined coefficients treated as zero.
///
/// Exact collinearity still yields finite scores. If the pseudo-inverse
/// cannot be computed every score is `NaN`.
pub fn vif_scores_with<B: BackendSVD + BackendEigh>(
    backend: &B,
    features: &FeatureMatrix,
) -> Vec<VifScore> {
    if features.is_empty() {
        return Vec::new();
    }
    let corr = raw_correlation(features, CorrelationMethod::Pearson).mapv(|v| if v.is_nan() { 0.0 } else { v });
    let diagonal: Vec<f64> = match pinv(backend, &corr) {
        Ok(inverse) => inverse.diag().to_vec(),
        Err(e) => {
            warn!("Pseudo-inverse of the correlation matrix failed ({}); VIF scores are undefined.", e);
            vec![f64::NAN; features.n_features()]
        }
    };
    features
        .names
        .iter()
        .zip(diagonal)
        .map(|(name, vif)| VifScore {
            feature: name.clone(),
            vif,
        })
        .collect()
}

pub fn vif_scores(features: &FeatureMatrix) -> Vec<VifScore> {
    vif_scores_with(&NdarrayLinAlgBackend, features)
}

/// Pearson and Spearman correlation matrices plus VIF scores.
pub fn linearity_report(features: &FeatureMatrix) -> DiagnosticsReport {
    if features.is_empty() {
        warn!("No feature data for linearity diagnostics; returning empty report.");
        return DiagnosticsReport::empty();
    }
    debug!(
        "Computing linearity diagnostics over {} features and {} rows.",
        features.n_features(),
        features.n_samples()
    );
    DiagnosticsReport {
        pearson: correlation_matrix(features, CorrelationMethod::Pearson),
        spearman: correlation_matrix(features, CorrelationMethod::Spearman),
        vif: vif_scores(features),
    }
}
