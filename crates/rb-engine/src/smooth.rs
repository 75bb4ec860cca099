//! Smoothing strategies for systematic-shape ratio series.
//!
//! Three interchangeable smoothers over a (bin center, ratio) scatter:
//! lowess, normal-kernel regression, and a fixed-span super-smoother.
//! All are deterministic, length-preserving, and never extrapolate beyond
//! the input x-range.

use crate::config::SmoothingAlgo;

/// Bandwidth of the normal-kernel smoother, in x units.
const KERNEL_BANDWIDTH: f64 = 5.0;

/// Robustness iterations of the lowess smoother.
const LOWESS_ITERATIONS: usize = 3;

/// Fixed spans tried by the super-smoother (tweeter, midrange, woofer).
const SUPER_SPANS: [f64; 3] = [0.05, 0.2, 0.5];

/// Smooth `y` over `x` with the selected strategy.
///
/// `lowess_fraction` is the neighbor fraction used by the lowess strategy
/// only. Series shorter than 3 points are returned unchanged.
pub fn smooth_series(algo: SmoothingAlgo, x: &[f64], y: &[f64], lowess_fraction: f64) -> Vec<f64> {
    debug_assert_eq!(x.len(), y.len());
    if x.len() < 3 {
        return y.to_vec();
    }
    match algo {
        SmoothingAlgo::Lowess => lowess(x, y, lowess_fraction),
        SmoothingAlgo::Kern => kernel_normal(x, y, KERNEL_BANDWIDTH),
        SmoothingAlgo::Super => super_smooth(x, y),
    }
}

/// Locally-weighted linear regression with tricube distance weights and
/// bisquare robustness reweighting.
fn lowess(x: &[f64], y: &[f64], fraction: f64) -> Vec<f64> {
    let n = x.len();
    let k = ((fraction * n as f64).ceil() as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = y.to_vec();

    for iteration in 0..=LOWESS_ITERATIONS {
        for i in 0..n {
            let mut distances: Vec<f64> = x.iter().map(|&xj| (xj - x[i]).abs()).collect();
            distances.sort_by(|a, b| a.total_cmp(b));
            let d_max = distances[k - 1].max(1e-30);
            let weights: Vec<f64> = (0..n)
                .map(|j| {
                    let u = (x[j] - x[i]).abs() / d_max;
                    if u >= 1.0 { 0.0 } else { (1.0 - u.powi(3)).powi(3) * robustness[j] }
                })
                .collect();
            fitted[i] = weighted_linear_fit(x, y, &weights, x[i]);
        }
        if iteration == LOWESS_ITERATIONS {
            break;
        }
        let mut residuals: Vec<f64> = y.iter().zip(&fitted).map(|(yi, fi)| (yi - fi).abs()).collect();
        residuals.sort_by(|a, b| a.total_cmp(b));
        let s = residuals[n / 2];
        if s < 1e-12 {
            break;
        }
        for j in 0..n {
            let u = ((y[j] - fitted[j]).abs() / (6.0 * s)).min(1.0);
            robustness[j] = (1.0 - u * u).powi(2);
        }
    }
    fitted
}

/// Nadaraya-Watson regression with a normal kernel of fixed bandwidth.
fn kernel_normal(x: &[f64], y: &[f64], bandwidth: f64) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            let mut num = 0.0;
            let mut den = 0.0;
            for j in 0..n {
                let u = (x[j] - x[i]) / bandwidth;
                let w = (-0.5 * u * u).exp();
                num += w * y[j];
                den += w;
            }
            if den > 0.0 { num / den } else { y[i] }
        })
        .collect()
}

/// Fixed-span super-smoother: fit each span, score by smoothed absolute
/// residual, and take the best span per point.
fn super_smooth(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let fits: Vec<Vec<f64>> = SUPER_SPANS.iter().map(|&span| span_fit(x, y, span)).collect();
    let scores: Vec<Vec<f64>> = fits
        .iter()
        .map(|fit| {
            let resid: Vec<f64> = y.iter().zip(fit).map(|(yi, fi)| (yi - fi).abs()).collect();
            span_fit(x, &resid, SUPER_SPANS[1])
        })
        .collect();
    (0..n)
        .map(|i| {
            let mut best = 0;
            for s in 1..SUPER_SPANS.len() {
                if scores[s][i] < scores[best][i] {
                    best = s;
                }
            }
            fits[best][i]
        })
        .collect()
}

/// Local linear fit over the `ceil(span * n)` nearest neighbors with
/// uniform weights.
fn span_fit(x: &[f64], y: &[f64], span: f64) -> Vec<f64> {
    let n = x.len();
    let k = ((span * n as f64).ceil() as usize).clamp(2, n);
    (0..n)
        .map(|i| {
            let mut distances: Vec<f64> = x.iter().map(|&xj| (xj - x[i]).abs()).collect();
            distances.sort_by(|a, b| a.total_cmp(b));
            let d_max = distances[k - 1].max(1e-30);
            let weights: Vec<f64> =
                (0..n).map(|j| if (x[j] - x[i]).abs() <= d_max { 1.0 } else { 0.0 }).collect();
            weighted_linear_fit(x, y, &weights, x[i])
        })
        .collect()
}

/// Weighted least-squares line through the points, evaluated at `x0`.
/// Falls back to the weighted mean when the x-spread degenerates.
fn weighted_linear_fit(x: &[f64], y: &[f64], weights: &[f64], x0: f64) -> f64 {
    let w_sum: f64 = weights.iter().sum();
    if w_sum <= 0.0 {
        return 0.0;
    }
    let x_mean: f64 = x.iter().zip(weights).map(|(xi, wi)| xi * wi).sum::<f64>() / w_sum;
    let y_mean: f64 = y.iter().zip(weights).map(|(yi, wi)| yi * wi).sum::<f64>() / w_sum;
    let mut cov = 0.0;
    let mut var = 0.0;
    for j in 0..x.len() {
        let dx = x[j] - x_mean;
        cov += weights[j] * dx * (y[j] - y_mean);
        var += weights[j] * dx * dx;
    }
    if var <= 1e-30 {
        return y_mean;
    }
    y_mean + cov / var * (x0 - x_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn centers(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64 + 0.5).collect()
    }

    #[test]
    fn output_length_matches_input() {
        let x = centers(12);
        let y: Vec<f64> = (0..12).map(|i| 1.0 + 0.01 * (i as f64).sin()).collect();
        for algo in [SmoothingAlgo::Lowess, SmoothingAlgo::Kern, SmoothingAlgo::Super] {
            assert_eq!(smooth_series(algo, &x, &y, 0.3).len(), 12);
        }
    }

    #[test]
    fn constant_series_is_preserved() {
        let x = centers(10);
        let y = vec![1.05; 10];
        for algo in [SmoothingAlgo::Lowess, SmoothingAlgo::Kern, SmoothingAlgo::Super] {
            let s = smooth_series(algo, &x, &y, 0.3);
            for v in s {
                assert_relative_eq!(v, 1.05, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn lowess_reproduces_a_straight_line() {
        let x = centers(15);
        let y: Vec<f64> = x.iter().map(|xi| 0.9 + 0.02 * xi).collect();
        let s = smooth_series(SmoothingAlgo::Lowess, &x, &y, 0.3);
        for (si, yi) in s.iter().zip(&y) {
            assert_relative_eq!(si, yi, max_relative = 1e-9);
        }
    }

    #[test]
    fn smoothing_is_deterministic() {
        let x = centers(20);
        let y: Vec<f64> = (0..20).map(|i| 1.0 + 0.1 * ((i * 7 % 5) as f64 - 2.0)).collect();
        for algo in [SmoothingAlgo::Lowess, SmoothingAlgo::Kern, SmoothingAlgo::Super] {
            let a = smooth_series(algo, &x, &y, 0.3);
            let b = smooth_series(algo, &x, &y, 0.3);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn short_series_pass_through() {
        let x = [0.5, 1.5];
        let y = [1.1, 0.9];
        let s = smooth_series(SmoothingAlgo::Lowess, &x, &y, 0.3);
        assert_eq!(s, y);
    }

    #[test]
    fn lowess_damps_a_single_outlier() {
        let x = centers(11);
        let mut y = vec![1.0; 11];
        y[5] = 2.0;
        let s = smooth_series(SmoothingAlgo::Lowess, &x, &y, 0.4);
        assert!(s[5] < 1.8, "outlier not damped: {}", s[5]);
    }
}
