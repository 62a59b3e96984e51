// Principal component analysis (PCA) denoising of feature matrices

use crate::linalg_backends::{
    BackendEigh, BackendSVD, EighOutput, NdarrayLinAlgBackend, SVDOutput,
};
use crate::stats::{nan_mean, nan_std};
use crate::table::FeatureMatrix;
use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, Axis};
use serde::Serialize;

/// Slack allowed when comparing a cumulative explained-variance ratio with the
/// threshold, so that a threshold of exactly 1.0 is reachable despite rounding.
const CUMULATIVE_RATIO_TOLERANCE: f64 = 1e-12;

/// Which branch of the decomposition produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecompositionPath {
    /// Thin SVD of the standardized matrix.
    Svd,
    /// Eigendecomposition of the sample covariance matrix, used when the SVD fails.
    CovarianceEigh,
    /// All-zero arrays: empty input, a single sample whose SVD failed, or both
    /// factorizations failed.
    Zeros,
}

/// Raw factorization of a standardized matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decomposition {
    /// Left singular vectors, shape (n_samples, n_components).
    pub u: Array2<f64>,
    /// Singular values, shape (n_components), descending.
    pub singular_values: Array1<f64>,
    /// Right singular vectors (loadings) as rows, shape (n_components, n_features).
    pub vt: Array2<f64>,
    /// Variance captured by each component.
    pub explained_variance: Array1<f64>,
    /// `explained_variance` normalized by its sum (left as-is when the sum is exactly zero).
    pub explained_variance_ratio: Array1<f64>,
    pub path: DecompositionPath,
}

/// Mean squared reconstruction error of one feature, in standardized units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReconstructionError {
    pub feature: String,
    pub mse: f64,
}

/// Complete output of [`PcaEngine::denoise`]. Owned by the caller; nothing is cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecompositionResult {
    pub decomposition: Decomposition,
    /// Number of leading components used for the reconstruction.
    pub components_used: usize,
    /// Per-feature MSE between the standardized input and its reconstruction,
    /// in feature order.
    pub reconstruction_error: Vec<FeatureReconstructionError>,
}

impl DecompositionResult {
    pub fn explained_variance_ratio(&self) -> &Array1<f64> {
        &self.decomposition.explained_variance_ratio
    }

    /// Reconstruction error of a single feature by name.
    pub fn error_for(&self, feature: &str) -> Option<f64> {
        self.reconstruction_error
            .iter()
            .find(|e| e.feature == feature)
            .map(|e| e.mse)
    }

    /// Result for an empty feature matrix: no components, no errors.
    pub fn empty(n_samples: usize, n_features: usize) -> Self {
        Self {
            decomposition: zero_decomposition(n_samples, n_features),
            components_used: 0,
            reconstruction_error: Vec::new(),
        }
    }
}

/// Standardizes each column to zero mean and unit population standard deviation.
///
/// Missing values (`NaN`) are ignored when computing the statistics and stay
/// missing in the output. A column whose standard deviation is exactly zero is
/// divided by 1 instead.
///
/// Returns `(scaled, mean, std)` where `std` is the divisor actually used.
pub fn standardize(values: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
    let mean = values.map_axis(Axis(0), |column| nan_mean(column.iter().copied()));
    let std = values.map_axis(Axis(0), |column| {
        let sd = nan_std(column.iter().copied(), 0);
        if sd == 0.0 {
            1.0
        } else {
            sd
        }
    });
    let mut scaled = values.clone();
    for mut row in scaled.axis_iter_mut(Axis(0)) {
        ndarray::Zip::from(&mut row)
            .and(&mean)
            .and(&std)
            .for_each(|v, &m, &sd| *v = (*v - m) / sd);
    }
    (scaled, mean, std)
}

/// Replaces NaN and ±infinity with zero.
pub fn sanitize_matrix(x: &Array2<f64>) -> Array2<f64> {
    x.mapv(|v| if v.is_finite() { v } else { 0.0 })
}

/// All-zero factorization with thin-SVD shapes for an (n × p) input.
pub fn zero_decomposition(n_samples: usize, n_features: usize) -> Decomposition {
    let rank = n_samples.min(n_features);
    Decomposition {
        u: Array2::zeros((n_samples, rank)),
        singular_values: Array1::zeros(rank),
        vt: Array2::zeros((rank, n_features)),
        explained_variance: Array1::zeros(rank),
        explained_variance_ratio: Array1::zeros(rank),
        path: DecompositionPath::Zeros,
    }
}

/// Normalizes explained variance to ratios. A zero total leaves the values untouched.
pub fn explained_ratio(explained_variance: &Array1<f64>) -> Array1<f64> {
    let total = explained_variance.sum();
    if total != 0.0 {
        explained_variance / total
    } else {
        explained_variance.clone()
    }
}

/// Smallest component count whose cumulative explained ratio reaches `threshold`.
///
/// Returns 0 for an empty ratio sequence. If the threshold is never reached the
/// count of all available components is returned.
pub fn choose_components(explained_ratio: &Array1<f64>, threshold: f64) -> usize {
    if explained_ratio.is_empty() {
        return 0;
    }
    let mut cumulative = 0.0;
    for (i, ratio) in explained_ratio.iter().enumerate() {
        cumulative += ratio;
        if cumulative + CUMULATIVE_RATIO_TOLERANCE >= threshold {
            return i + 1;
        }
    }
    explained_ratio.len()
}

/// Rank-`k` reconstruction `(U[:, :k] * S[:k]) @ Vt[:k, :]`.
///
/// `k = 0` yields an all-zero (n_samples × n_features) matrix; `k` larger than
/// the number of available components is clamped.
pub fn reconstruct(u: &Array2<f64>, s: &Array1<f64>, vt: &Array2<f64>, k: usize) -> Array2<f64> {
    let k = k.min(s.len()).min(u.ncols()).min(vt.nrows());
    if k == 0 {
        return Array2::zeros((u.nrows(), vt.ncols()));
    }
    let u_k = u.slice(s![.., ..k]);
    let s_k = s.slice(s![..k]);
    let vt_k = vt.slice(s![..k, ..]);
    (&u_k * &s_k.insert_axis(Axis(0))).dot(&vt_k)
}

/// Stateless PCA denoiser over a linear-algebra backend.
///
/// The backend is a seam: production code uses [`NdarrayLinAlgBackend`], tests
/// can inject a backend whose SVD fails to exercise the covariance fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcaEngine<B = NdarrayLinAlgBackend> {
    backend: B,
}

impl PcaEngine {
    pub fn new() -> Self {
        Self {
            backend: NdarrayLinAlgBackend,
        }
    }
}

impl<B: BackendSVD + BackendEigh> PcaEngine<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Factorizes an already standardized, finite (n_samples × n_features) matrix.
    ///
    /// Three branches, chosen explicitly:
    /// 1. Thin SVD. Explained variance is `s² / (n - 1)`, or `s²` for a single sample.
    /// 2. SVD failed with more than one sample: eigendecomposition of the sample
    ///    covariance `XᵀX / (n - 1)`, eigenvalues sorted descending. Singular values
    ///    are `sqrt(max(λ (n - 1), 0))`, loadings are the eigenvectors, and
    ///    `U = X V / s` (dividing by 1 where `s` is zero).
    /// 3. SVD failed with at most one sample, or the eigendecomposition failed
    ///    too: all-zero arrays.
    ///
    /// Empty input goes straight to branch 3.
    pub fn decompose(&self, x: &Array2<f64>) -> Decomposition {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return zero_decomposition(n_samples, n_features);
        }

        match self.backend.thin_svd(x.clone()) {
            Ok(SVDOutput { u, s, vt }) => {
                let explained_variance = if n_samples > 1 {
                    s.mapv(|v| v * v / (n_samples - 1) as f64)
                } else {
                    s.mapv(|v| v * v)
                };
                let explained_variance_ratio = explained_ratio(&explained_variance);
                Decomposition {
                    u,
                    singular_values: s,
                    vt,
                    explained_variance,
                    explained_variance_ratio,
                    path: DecompositionPath::Svd,
                }
            }
            Err(e) if n_samples <= 1 => {
                warn!("SVD failed on a single-sample matrix ({}); using zero decomposition.", e);
                zero_decomposition(n_samples, n_features)
            }
            Err(e) => {
                warn!(
                    "SVD failed on {}x{} matrix ({}); falling back to covariance eigendecomposition.",
                    n_samples, n_features, e
                );
                self.covariance_eigh(x).unwrap_or_else(|| zero_decomposition(n_samples, n_features))
            }
        }
    }

    fn covariance_eigh(&self, x: &Array2<f64>) -> Option<Decomposition> {
        let n_samples = x.nrows();
        let dof = (n_samples - 1) as f64;
        let cov = x.t().dot(x) / dof;

        let EighOutput {
            eigenvalues,
            eigenvectors,
        } = match self.backend.eigh_upper(&cov) {
            Ok(out) => out,
            Err(e) => {
                warn!("Covariance eigendecomposition failed too ({}); using zero decomposition.", e);
                return None;
            }
        };

        // Sort descending by eigenvalue
        let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
        order.sort_by(|&a, &b| {
            eigenvalues[b]
                .partial_cmp(&eigenvalues[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let sorted_values: Array1<f64> = order.iter().map(|&i| eigenvalues[i]).collect();
        let sorted_vectors = eigenvectors.select(Axis(1), &order);

        let singular_values = sorted_values.mapv(|lam| (lam * dof).max(0.0).sqrt());
        let denom = singular_values.mapv(|sv| if sv > 0.0 { sv } else { 1.0 });
        let u = x.dot(&sorted_vectors) / &denom.view().insert_axis(Axis(0));
        let vt = sorted_vectors.t().to_owned();
        let explained_variance_ratio = explained_ratio(&sorted_values);

        Some(Decomposition {
            u,
            singular_values,
            vt,
            explained_variance: sorted_values,
            explained_variance_ratio,
            path: DecompositionPath::CovarianceEigh,
        })
    }

    /// Denoises a feature matrix by low-rank PCA reconstruction.
    ///
    /// The features are standardized, non-finite entries are zeroed, the matrix is
    /// decomposed, and the smallest number of components whose cumulative
    /// explained-variance ratio reaches `variance_threshold` is used to rebuild it.
    /// The reconstruction is scaled back to the original units; column names and
    /// row index are carried over. `features` is only read.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ndarray::array;
    /// use onchain_analytics::pca::PcaEngine;
    /// use onchain_analytics::table::FeatureMatrix;
    ///
    /// let features = FeatureMatrix::new(
    ///     vec!["close".into(), "volume".into()],
    ///     vec![None; 3],
    ///     array![[1.0, 10.0], [2.0, 19.0], [3.0, 31.0]],
    /// ).unwrap();
    /// let (denoised, result) = PcaEngine::new().denoise(&features, 0.95);
    /// assert_eq!(denoised.values.dim(), (3, 2));
    /// assert!(result.components_used >= 1);
    /// ```
    pub fn denoise(
        &self,
        features: &FeatureMatrix,
        variance_threshold: f64,
    ) -> (FeatureMatrix, DecompositionResult) {
        let (n_samples, n_features) = features.values.dim();
        let (scaled, mean, std) = standardize(&features.values);
        let sanitized = sanitize_matrix(&scaled);
        debug!(
            "Standardized {}x{} feature matrix; {} non-finite entries zeroed.",
            n_samples,
            n_features,
            scaled.iter().filter(|v| !v.is_finite()).count()
        );

        let decomposition = self.decompose(&sanitized);
        let components_used =
            choose_components(&decomposition.explained_variance_ratio, variance_threshold);
        let reconstruction = reconstruct(
            &decomposition.u,
            &decomposition.singular_values,
            &decomposition.vt,
            components_used,
        );
        info!(
            "PCA kept {} of {} components (threshold {}, {:?}).",
            components_used,
            decomposition.singular_values.len(),
            variance_threshold,
            decomposition.path
        );

        let reconstruction_error = features
            .names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let mse = nan_mean(
                    scaled
                        .column(j)
                        .iter()
                        .zip(reconstruction.column(j).iter())
                        .map(|(a, b)| (a - b).powi(2)),
                );
                FeatureReconstructionError {
                    feature: name.clone(),
                    mse,
                }
            })
            .collect();

        let mut denoised_values = reconstruction;
        for mut row in denoised_values.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(&mut row)
                .and(&mean)
                .and(&std)
                .for_each(|v, &m, &sd| *v = *v * sd + m);
        }
        let denoised = FeatureMatrix {
            names: features.names.clone(),
            index: features.index.clone(),
            values: denoised_values,
        };

        (
            denoised,
            DecompositionResult {
                decomposition,
                components_used,
                reconstruction_error,
            },
        )
    }
}

/// [`PcaEngine::denoise`] with the default LAPACK backend.
pub fn pca_denoise(
    features: &FeatureMatrix,
    variance_threshold: f64,
) -> (FeatureMatrix, DecompositionResult) {
    PcaEngine::new().denoise(features, variance_threshold)
}
