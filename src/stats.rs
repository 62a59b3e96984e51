// NaN-aware column statistics shared by preprocessing, PCA and diagnostics.
// Every helper here treats NaN as "missing" and skips it.

/// Mean of the non-missing values, `NaN` if there are none.
pub fn nan_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Standard deviation of the non-missing values with `ddof` delta degrees of freedom.
///
/// Returns `NaN` when fewer than `ddof + 1` values are present.
pub fn nan_std(values: impl IntoIterator<Item = f64> + Clone, ddof: usize) -> f64 {
    let mean = nan_mean(values.clone());
    let (sum_sq, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + (v - mean).powi(2), c + 1));
    if count <= ddof {
        return f64::NAN;
    }
    (sum_sq / (count - ddof) as f64).sqrt()
}

/// Empirical quantile with linear interpolation between order statistics
/// (position `q * (n - 1)`), ignoring missing values. `NaN` for an all-missing input.
pub fn nan_quantile(values: &[f64], q: f64) -> f64 {
    let mut valid: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let position = q.clamp(0.0, 1.0) * (valid.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    if lower == upper {
        valid[lower]
    } else {
        valid[lower] + (valid[upper] - valid[lower]) * fraction
    }
}

/// Ranks starting at 1, ties receiving the average of the ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end share the mean of ranks start+1..=end
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation of two equally long, fully observed series.
/// `NaN` when fewer than two points or either side has zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    if denom == 0.0 {
        return f64::NAN;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

/// Sample covariance (N - 1 denominator) of two fully observed series.
pub fn covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;
    x.iter()
        .zip(y)
        .map(|(a, b)| (a - mean_x) * (b - mean_y))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Rows where both series are observed.
pub fn pairwise_complete(x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mean_and_std_skip_missing() {
        let v = [1.0, f64::NAN, 3.0];
        assert_abs_diff_eq!(nan_mean(v.iter().copied()), 2.0);
        assert_abs_diff_eq!(nan_std(v.iter().copied(), 0), 1.0);
        assert_abs_diff_eq!(nan_std(v.iter().copied(), 1), 2.0_f64.sqrt());
        assert!(nan_std([5.0].iter().copied(), 1).is_nan());
        assert!(nan_mean(std::iter::empty()).is_nan());
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let v = [4.0, 1.0, f64::NAN, 3.0, 2.0];
        assert_abs_diff_eq!(nan_quantile(&v, 0.0), 1.0);
        assert_abs_diff_eq!(nan_quantile(&v, 1.0), 4.0);
        assert_abs_diff_eq!(nan_quantile(&v, 0.5), 2.5);
        assert_abs_diff_eq!(nan_quantile(&v, 0.1), 1.3, epsilon = 1e-12);
        assert!(nan_quantile(&[f64::NAN], 0.5).is_nan());
    }

    #[test]
    fn ties_share_average_rank() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn pearson_of_linear_series_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert_abs_diff_eq!(pearson(&x, &y), 1.0, epsilon = 1e-12);
        assert!(pearson(&x, &[1.0; 4]).is_nan());
        assert_abs_diff_eq!(covariance(&x, &y), 10.0 / 3.0, epsilon = 1e-12);
    }
}
