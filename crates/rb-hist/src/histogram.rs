//! 1D histogram value type used throughout the rebinning pipeline.

use rb_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A 1D count histogram with per-bin uncertainties and explicit
/// under/overflow accumulators.
///
/// Invariant: `contents.len() == errors.len() == edges.len() - 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges, strictly increasing (length = n_bins + 1).
    pub edges: Vec<f64>,
    /// Bin contents (length = n_bins). May be negative transiently;
    /// never negative after [`Histogram::negative_bin_correction`].
    pub contents: Vec<f64>,
    /// Per-bin uncertainties (length = n_bins, non-negative).
    pub errors: Vec<f64>,
    /// Underflow content.
    #[serde(default)]
    pub underflow: f64,
    /// Overflow content.
    #[serde(default)]
    pub overflow: f64,
    /// Underflow uncertainty.
    #[serde(default)]
    pub underflow_err: f64,
    /// Overflow uncertainty.
    #[serde(default)]
    pub overflow_err: f64,
}

impl Histogram {
    /// Create an empty histogram over the given edges.
    pub fn new(edges: Vec<f64>) -> Result<Histogram> {
        if edges.len() < 2 {
            return Err(Error::Validation(format!(
                "histogram needs at least 2 edges, got {}",
                edges.len()
            )));
        }
        if edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("histogram edges must be strictly increasing".into()));
        }
        let n = edges.len() - 1;
        Ok(Histogram {
            edges,
            contents: vec![0.0; n],
            errors: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            underflow_err: 0.0,
            overflow_err: 0.0,
        })
    }

    /// Create a histogram with the given contents and errors.
    pub fn with_bins(edges: Vec<f64>, contents: Vec<f64>, errors: Vec<f64>) -> Result<Histogram> {
        let mut h = Histogram::new(edges)?;
        if contents.len() != h.n_bins() || errors.len() != h.n_bins() {
            return Err(Error::Validation(format!(
                "bin arrays ({}, {}) do not match {} edges",
                contents.len(),
                errors.len(),
                h.edges.len()
            )));
        }
        h.contents = contents;
        h.errors = errors;
        Ok(h)
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Center of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// Sum of bin contents (excluding under/overflow).
    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    /// Quadrature sum of bin errors (excluding under/overflow).
    pub fn integral_error(&self) -> f64 {
        self.errors.iter().map(|e| e * e).sum::<f64>().sqrt()
    }

    /// Multiply all contents, errors and flow accumulators by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.contents {
            *c *= factor;
        }
        for e in &mut self.errors {
            *e *= factor.abs();
        }
        self.underflow *= factor;
        self.overflow *= factor;
        self.underflow_err *= factor.abs();
        self.overflow_err *= factor.abs();
    }

    /// Add `other` bin-for-bin, summing errors in quadrature.
    ///
    /// Fails when the two histograms are not defined on identical edges.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        if self.edges.len() != other.edges.len()
            || self
                .edges
                .iter()
                .zip(&other.edges)
                .any(|(a, b)| (a - b).abs() > 1e-9)
        {
            return Err(Error::Validation("cannot add histograms with different edges".into()));
        }
        for (c, o) in self.contents.iter_mut().zip(&other.contents) {
            *c += o;
        }
        for (e, o) in self.errors.iter_mut().zip(&other.errors) {
            *e = (*e * *e + o * o).sqrt();
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.underflow_err = (self.underflow_err.powi(2) + other.underflow_err.powi(2)).sqrt();
        self.overflow_err = (self.overflow_err.powi(2) + other.overflow_err.powi(2)).sqrt();
        Ok(())
    }

    /// Rebin onto a coarser edge array consistent with the current edges.
    ///
    /// Each original bin is assigned to the new bin containing its center;
    /// contents sum, errors sum in quadrature. Bins falling outside the new
    /// range accumulate into under/overflow (fold them afterwards with
    /// [`Histogram::fold_flows`]).
    pub fn rebin(&self, new_edges: &[f64]) -> Result<Histogram> {
        let mut out = Histogram::new(new_edges.to_vec())?;
        out.underflow = self.underflow;
        out.overflow = self.overflow;
        out.underflow_err = self.underflow_err;
        out.overflow_err = self.overflow_err;
        let lo = new_edges[0];
        let hi = new_edges[new_edges.len() - 1];
        for i in 0..self.n_bins() {
            let x = self.bin_center(i);
            let c = self.contents[i];
            let e2 = self.errors[i] * self.errors[i];
            if x < lo {
                out.underflow += c;
                out.underflow_err = (out.underflow_err.powi(2) + e2).sqrt();
            } else if x >= hi {
                out.overflow += c;
                out.overflow_err = (out.overflow_err.powi(2) + e2).sqrt();
            } else {
                // partition_point: first new edge > x, minus one.
                let j = new_edges.partition_point(|&edge| edge <= x) - 1;
                out.contents[j] += c;
                out.errors[j] = (out.errors[j].powi(2) + e2).sqrt();
            }
        }
        Ok(out)
    }

    /// Fold overflow into the last bin and underflow into the first bin,
    /// summing errors in quadrature, then zero the flow accumulators.
    pub fn fold_flows(&mut self) {
        let n = self.n_bins();
        self.contents[n - 1] += self.overflow;
        self.errors[n - 1] = (self.errors[n - 1].powi(2) + self.overflow_err.powi(2)).sqrt();
        self.overflow = 0.0;
        self.overflow_err = 0.0;
        self.contents[0] += self.underflow;
        self.errors[0] = (self.errors[0].powi(2) + self.underflow_err.powi(2)).sqrt();
        self.underflow = 0.0;
        self.underflow_err = 0.0;
    }

    /// Replace every non-positive bin with `epsilon` (content and error),
    /// then rescale so the integral matches the pre-correction integral.
    ///
    /// No rescale is applied when the pre-correction integral was itself
    /// non-positive. Idempotent; the downstream fitting tool requires
    /// strictly positive expectations in every bin.
    pub fn negative_bin_correction(&mut self, epsilon: f64) {
        let before = self.integral();
        for i in 0..self.n_bins() {
            if self.contents[i] <= 0.0 {
                self.contents[i] = epsilon;
                self.errors[i] = epsilon;
            }
        }
        let after = self.integral();
        if after != 0.0 && before > 0.0 {
            self.scale(before / after);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hist(contents: &[f64], errors: &[f64]) -> Histogram {
        let n = contents.len();
        let edges: Vec<f64> = (0..=n).map(|i| i as f64).collect();
        Histogram::with_bins(edges, contents.to_vec(), errors.to_vec()).unwrap()
    }

    #[test]
    fn rejects_bad_edges() {
        assert!(Histogram::new(vec![0.0]).is_err());
        assert!(Histogram::new(vec![0.0, 1.0, 1.0]).is_err());
        assert!(Histogram::new(vec![0.0, 2.0, 1.0]).is_err());
    }

    #[test]
    fn add_sums_contents_and_errors_in_quadrature() {
        let mut a = hist(&[1.0, 2.0], &[3.0, 4.0]);
        let b = hist(&[5.0, 6.0], &[4.0, 3.0]);
        a.add(&b).unwrap();
        assert_relative_eq!(a.contents[0], 6.0);
        assert_relative_eq!(a.contents[1], 8.0);
        assert_relative_eq!(a.errors[0], 5.0);
        assert_relative_eq!(a.errors[1], 5.0);
    }

    #[test]
    fn add_rejects_mismatched_edges() {
        let mut a = hist(&[1.0], &[0.0]);
        let b = hist(&[1.0, 1.0], &[0.0, 0.0]);
        assert!(a.add(&b).is_err());
    }

    #[test]
    fn rebin_conserves_total_content() {
        let h = hist(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1.0; 6]);
        let mut r = h.rebin(&[0.0, 2.0, 4.0, 6.0]).unwrap();
        r.fold_flows();
        assert_relative_eq!(r.integral(), h.integral());
        assert_relative_eq!(r.contents[0], 3.0);
        assert_relative_eq!(r.contents[1], 7.0);
        assert_relative_eq!(r.contents[2], 11.0);
        assert_relative_eq!(r.errors[0], 2f64.sqrt());
    }

    #[test]
    fn rebin_folds_out_of_range_bins_into_flows() {
        let h = hist(&[1.0, 2.0, 3.0, 4.0], &[0.5; 4]);
        // new range covers only the middle two bins
        let mut r = h.rebin(&[1.0, 3.0]).unwrap();
        assert_relative_eq!(r.underflow, 1.0);
        assert_relative_eq!(r.overflow, 4.0);
        r.fold_flows();
        assert_relative_eq!(r.integral(), h.integral());
        assert_relative_eq!(r.overflow, 0.0);
        assert_relative_eq!(r.underflow, 0.0);
    }

    #[test]
    fn negative_bin_correction_preserves_integral() {
        let mut h = hist(&[5.0, -1.0, 6.0], &[1.0, 1.0, 1.0]);
        h.negative_bin_correction(1e-12);
        assert!(h.contents.iter().all(|&c| c > 0.0));
        assert_relative_eq!(h.integral(), 10.0, max_relative = 1e-9);
    }

    #[test]
    fn negative_bin_correction_is_a_fixpoint() {
        let mut h = hist(&[5.0, -1.0, 0.0, 6.0], &[1.0; 4]);
        h.negative_bin_correction(1e-12);
        let once = h.clone();
        h.negative_bin_correction(1e-12);
        for i in 0..h.n_bins() {
            assert_relative_eq!(h.contents[i], once.contents[i], max_relative = 1e-12);
            assert_relative_eq!(h.errors[i], once.errors[i], max_relative = 1e-12);
        }
    }

    #[test]
    fn negative_bin_correction_skips_rescale_for_nonpositive_integral() {
        let mut h = hist(&[-1.0, -2.0], &[1.0, 1.0]);
        h.negative_bin_correction(1e-12);
        assert_relative_eq!(h.contents[0], 1e-12);
        assert_relative_eq!(h.contents[1], 1e-12);
    }
}
