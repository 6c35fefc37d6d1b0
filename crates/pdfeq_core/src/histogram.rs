//! Equal-width histograms and the density estimates built on them.
//!
//! Binning follows the usual convention: bins are half open `[e_i, e_{i+1})`
//! except the last, which also includes the upper edge. Samples outside the
//! range or not finite are dropped. A degenerate range `lo == hi` is widened
//! to `[lo - 0.5, hi + 0.5]`.

use anyhow::{anyhow, bail, Result};
use serde::Serialize;

/// Finite minimum and maximum of a sample set.
pub fn sample_range(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct Axis {
    lo: f64,
    hi: f64,
    bins: usize,
}

impl Axis {
    fn new(range: (f64, f64), bins: usize) -> Result<Self> {
        if bins == 0 {
            bail!("Histogram requires at least one bin.");
        }
        let (mut lo, mut hi) = range;
        if !lo.is_finite() || !hi.is_finite() {
            bail!("Histogram range must be finite.");
        }
        if lo > hi {
            bail!("Histogram range is inverted: ({}, {}).", lo, hi);
        }
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        Ok(Self { lo, hi, bins })
    }

    fn width(&self) -> f64 {
        (self.hi - self.lo) / self.bins as f64
    }

    fn index(&self, value: f64) -> Option<usize> {
        if !value.is_finite() || value < self.lo || value > self.hi {
            return None;
        }
        if value == self.hi {
            return Some(self.bins - 1);
        }
        let idx = ((value - self.lo) / (self.hi - self.lo) * self.bins as f64) as usize;
        Some(idx.min(self.bins - 1))
    }

    fn edges(&self) -> Vec<f64> {
        let w = self.width();
        (0..=self.bins).map(|i| self.lo + w * i as f64).collect()
    }

    fn centers(&self) -> Vec<f64> {
        let w = self.width();
        (0..self.bins)
            .map(|i| self.lo + w * (i as f64 + 0.5))
            .collect()
    }
}

/// One dimensional histogram.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    axis: Axis,
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    pub fn new(range: (f64, f64), bins: usize) -> Result<Self> {
        let axis = Axis::new(range, bins)?;
        Ok(Self {
            axis,
            counts: vec![0; bins],
            total: 0,
        })
    }

    /// Bins `samples` over `range`, or over their own finite range when
    /// `range` is `None`.
    pub fn from_samples(samples: &[f64], range: Option<(f64, f64)>, bins: usize) -> Result<Self> {
        let range = match range {
            Some(r) => r,
            None => match sample_range(samples) {
                Some(r) => r,
                None => bail!("Cannot infer a histogram range from an empty sample set."),
            },
        };
        let mut hist = Self::new(range, bins)?;
        hist.extend(samples);
        Ok(hist)
    }

    pub fn add(&mut self, value: f64) {
        if let Some(i) = self.axis.index(value) {
            self.counts[i] += 1;
            self.total += 1;
        }
    }

    pub fn extend(&mut self, values: &[f64]) {
        for &v in values {
            self.add(v);
        }
    }

    pub fn bins(&self) -> usize {
        self.axis.bins
    }

    pub fn range(&self) -> (f64, f64) {
        (self.axis.lo, self.axis.hi)
    }

    pub fn width(&self) -> f64 {
        self.axis.width()
    }

    pub fn edges(&self) -> Vec<f64> {
        self.axis.edges()
    }

    pub fn centers(&self) -> Vec<f64> {
        self.axis.centers()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of samples that fell inside the range.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Probability density; all zeros when no sample landed in range.
    pub fn density(&self) -> Vec<f64> {
        if self.total == 0 {
            return vec![0.0; self.axis.bins];
        }
        let norm = self.total as f64 * self.width();
        self.counts.iter().map(|&c| c as f64 / norm).collect()
    }
}

/// Joint histogram of `(x, y)` pairs, stored row-major with `x` as the row.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram2d {
    x_axis: Axis,
    y_axis: Axis,
    counts: Vec<u64>,
    total: u64,
}

impl Histogram2d {
    pub fn new(x_range: (f64, f64), y_range: (f64, f64), x_bins: usize, y_bins: usize) -> Result<Self> {
        let x_axis = Axis::new(x_range, x_bins)?;
        let y_axis = Axis::new(y_range, y_bins)?;
        Ok(Self {
            x_axis,
            y_axis,
            counts: vec![0; x_bins * y_bins],
            total: 0,
        })
    }

    /// Bins paired samples. Missing ranges default to the finite sample range.
    pub fn from_samples(
        x: &[f64],
        y: &[f64],
        x_range: Option<(f64, f64)>,
        y_range: Option<(f64, f64)>,
        bins: usize,
    ) -> Result<Self> {
        if x.len() != y.len() {
            bail!(
                "Joint histogram samples differ in length: {} vs {}.",
                x.len(),
                y.len()
            );
        }
        let infer = |values: &[f64], range: Option<(f64, f64)>| {
            range
                .or_else(|| sample_range(values))
                .ok_or_else(|| anyhow!("Cannot infer a histogram range from an empty sample set."))
        };
        let mut hist = Self::new(infer(x, x_range)?, infer(y, y_range)?, bins, bins)?;
        for (&a, &b) in x.iter().zip(y) {
            hist.add(a, b);
        }
        Ok(hist)
    }

    pub fn add(&mut self, x: f64, y: f64) {
        if let (Some(i), Some(j)) = (self.x_axis.index(x), self.y_axis.index(y)) {
            self.counts[i * self.y_axis.bins + j] += 1;
            self.total += 1;
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.x_axis.bins, self.y_axis.bins)
    }

    pub fn x_centers(&self) -> Vec<f64> {
        self.x_axis.centers()
    }

    pub fn y_centers(&self) -> Vec<f64> {
        self.y_axis.centers()
    }

    pub fn x_edges(&self) -> Vec<f64> {
        self.x_axis.edges()
    }

    pub fn y_edges(&self) -> Vec<f64> {
        self.y_axis.edges()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Joint density `f(x_i, y_j)`, row-major.
    pub fn density(&self) -> Vec<f64> {
        if self.total == 0 {
            return vec![0.0; self.counts.len()];
        }
        let norm = self.total as f64 * self.x_axis.width() * self.y_axis.width();
        self.counts.iter().map(|&c| c as f64 / norm).collect()
    }

    /// `f_X(x_i) = sum_j f(x_i, y_j) dy`.
    pub fn marginal_x_density(&self) -> Vec<f64> {
        let dy = self.y_axis.width();
        self.density()
            .chunks(self.y_axis.bins)
            .map(|row| row.iter().sum::<f64>() * dy)
            .collect()
    }

    /// `sum_j y_j f(x_i, y_j) dy`, i.e. `E[Y | X = x_i] f_X(x_i)`.
    pub fn first_moment_y(&self) -> Vec<f64> {
        let dy = self.y_axis.width();
        let centers = self.y_axis.centers();
        self.density()
            .chunks(self.y_axis.bins)
            .map(|row| row.iter().zip(&centers).map(|(f, y)| f * y).sum::<f64>() * dy)
            .collect()
    }

    /// `E[Y | X = x_i]`; `NaN` where no sample has `X` in bin `i`.
    pub fn conditional_mean_y(&self) -> Vec<f64> {
        self.first_moment_y()
            .into_iter()
            .zip(self.marginal_x_density())
            .map(|(m, f)| if f > 0.0 { m / f } else { f64::NAN })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_and_last_bin_closure() {
        let hist = Histogram::from_samples(&[0.0, 0.5, 1.0, 1.0, 2.0], Some((0.0, 1.0)), 2)
            .expect("histogram");
        assert_eq!(hist.edges(), vec![0.0, 0.5, 1.0]);
        assert_eq!(hist.counts(), &[1, 3]);
        assert_eq!(hist.total(), 4);
        assert_eq!(hist.centers(), vec![0.25, 0.75]);
    }

    #[test]
    fn density_integrates_to_one() {
        let samples: Vec<f64> = (0..1000).map(|i| ((i as f64) * 0.37).sin()).collect();
        let hist = Histogram::from_samples(&samples, None, 37).expect("histogram");
        let integral: f64 = hist.density().iter().sum::<f64>() * hist.width();
        assert!((integral - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_range_is_widened() {
        let hist = Histogram::from_samples(&[2.0, 2.0], None, 4).expect("histogram");
        assert_eq!(hist.range(), (1.5, 2.5));
        assert_eq!(hist.counts(), &[0, 0, 2, 0]);
    }

    #[test]
    fn non_finite_samples_are_ignored() {
        let hist = Histogram::from_samples(&[f64::NAN, 0.2, f64::INFINITY], Some((0.0, 1.0)), 1)
            .expect("histogram");
        assert_eq!(hist.total(), 1);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(Histogram::new((0.0, 1.0), 0).is_err());
        assert!(Histogram::new((1.0, 0.0), 4).is_err());
        assert!(Histogram::from_samples(&[], None, 4).is_err());
        assert!(Histogram2d::from_samples(&[1.0], &[], None, None, 4).is_err());
    }

    #[test]
    fn joint_density_marginal_matches_one_dimensional() {
        let x: Vec<f64> = (0..500).map(|i| (i as f64 * 0.013).cos()).collect();
        let y: Vec<f64> = (0..500).map(|i| (i as f64 * 0.029).sin()).collect();
        let joint = Histogram2d::from_samples(&x, &y, Some((-1.0, 1.0)), None, 16).expect("joint");
        let single = Histogram::from_samples(&x, Some((-1.0, 1.0)), 16).expect("single");
        for (a, b) in joint.marginal_x_density().iter().zip(single.density()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn conditional_mean_recovers_linear_relation() {
        // y = 3x exactly; the conditional mean is 3x up to the y bin width.
        let x: Vec<f64> = (0..4000).map(|i| i as f64 / 4000.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v).collect();
        let joint = Histogram2d::from_samples(&x, &y, None, None, 20).expect("joint");
        let dy = 3.0 / 20.0;
        for (xc, m) in joint.x_centers().iter().zip(joint.conditional_mean_y()) {
            assert!((m - 3.0 * xc).abs() <= dy, "E[Y|x={xc}] = {m}");
        }
    }

    #[test]
    fn conditional_mean_is_nan_for_empty_rows() {
        let joint = Histogram2d::from_samples(&[0.0, 1.0], &[1.0, 2.0], Some((0.0, 1.0)), None, 3)
            .expect("joint");
        let mean = joint.conditional_mean_y();
        assert!(mean[1].is_nan());
        assert!(mean[0].is_finite());
    }
}
