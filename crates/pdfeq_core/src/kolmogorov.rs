//! Estimators for the terms of the forward Kolmogorov equation (FKE).
//!
//! For a scalar `Y` with density `f(y, t)` the equation reads
//!
//! `df/dt = -d/dy (D1 f) + d^2/dy^2 (D2 f)`
//!
//! where the drift `D1` and diffusion `D2` are conditional expectations of
//! quantities sampled alongside `Y`. Everything here works on histogram
//! estimates over a common set of bins.

use crate::histogram::{sample_range, Histogram, Histogram2d};
use anyhow::{bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct KolmogorovSettings {
    pub bins: usize,
    /// Fixed range for the scalar axis; inferred from the data when absent.
    pub range: Option<(f64, f64)>,
}

impl Default for KolmogorovSettings {
    fn default() -> Self {
        Self {
            bins: 64,
            range: None,
        }
    }
}

impl KolmogorovSettings {
    pub fn validate(&self) -> Result<()> {
        if self.bins < 3 {
            bail!("At least three bins are required to estimate derivatives.");
        }
        if let Some((lo, hi)) = self.range {
            if lo.is_nan() || hi.is_nan() || lo >= hi {
                bail!("Scalar range must satisfy lo < hi, got ({}, {}).", lo, hi);
            }
        }
        Ok(())
    }

    /// Range used for the scalar axis given every sample that will be binned.
    pub fn resolve_range<'a>(&self, samples: impl IntoIterator<Item = &'a [f64]>) -> Result<(f64, f64)> {
        if let Some(range) = self.range {
            return Ok(range);
        }
        let mut bounds: Option<(f64, f64)> = None;
        for chunk in samples {
            if let Some((lo, hi)) = sample_range(chunk) {
                bounds = Some(match bounds {
                    None => (lo, hi),
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                });
            }
        }
        match bounds {
            Some(r) => Ok(r),
            None => bail!("No finite samples available to estimate a density."),
        }
    }
}

/// Fourth-order centred time derivative from the four snapshots surrounding
/// the evaluation time, spaced `dt` apart.
pub fn time_derivative_4th(f_nm2: &[f64], f_nm1: &[f64], f_np1: &[f64], f_np2: &[f64], dt: f64) -> Result<Vec<f64>> {
    if dt <= 0.0 {
        bail!("Snapshot spacing dt must be positive.");
    }
    let n = f_nm2.len();
    if f_nm1.len() != n || f_np1.len() != n || f_np2.len() != n {
        bail!("Densities used in the time derivative differ in length.");
    }
    Ok((0..n)
        .map(|i| {
            ((-1.0 / 12.0) * f_np2[i] + (2.0 / 3.0) * f_np1[i] - (2.0 / 3.0) * f_nm1[i]
                + (1.0 / 12.0) * f_nm2[i])
                / dt
        })
        .collect())
}

/// Centred first derivative; values beyond either end are taken as zero.
pub fn central_derivative(values: &[f64], dx: f64) -> Vec<f64> {
    let n = values.len();
    let at = |i: isize| -> f64 {
        if i < 0 || i as usize >= n {
            0.0
        } else {
            values[i as usize]
        }
    };
    (0..n as isize)
        .map(|i| (at(i + 1) - at(i - 1)) * 0.5 / dx)
        .collect()
}

/// Three-point second derivative; values beyond either end are taken as zero.
pub fn second_derivative(values: &[f64], dx: f64) -> Vec<f64> {
    let n = values.len();
    let at = |i: isize| -> f64 {
        if i < 0 || i as usize >= n {
            0.0
        } else {
            values[i as usize]
        }
    };
    (0..n as isize)
        .map(|i| (at(i + 1) - 2.0 * at(i) + at(i - 1)) / (dx * dx))
        .collect()
}

/// Density of `samples` over `range`: returns `(bin centres, f)`.
pub fn density(samples: &[f64], range: (f64, f64), bins: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let hist = Histogram::from_samples(samples, Some(range), bins)?;
    Ok((hist.centers(), hist.density()))
}

/// Conditional expectation `E[Phi | Y = y]` over the bins of `range`.
pub fn conditional_expectation(y: &[f64], phi: &[f64], range: (f64, f64), bins: usize) -> Result<Vec<f64>> {
    let joint = Histogram2d::from_samples(y, phi, Some(range), None, bins)?;
    let mean = joint.conditional_mean_y();
    let empty = mean.iter().filter(|v| v.is_nan()).count();
    if empty > 0 {
        warn!("{} of {} bins hold no samples; E[Phi|Y] undefined there", empty, bins);
    }
    Ok(mean)
}

/// Diffusion coefficient for a scalar whose dissipation is `Phi = |grad Y|^2`:
/// `-E[Phi | Y = y]`.
pub fn diffusion_coefficient(y: &[f64], phi: &[f64], range: (f64, f64), bins: usize) -> Result<Vec<f64>> {
    Ok(conditional_expectation(y, phi, range, bins)?
        .into_iter()
        .map(|e| -e)
        .collect())
}

/// Boundary flux term `E[Phi | Y = y] f(y)` from samples taken on a boundary.
pub fn boundary_expectation(y_b: &[f64], phi_b: &[f64], range: (f64, f64), bins: usize) -> Result<Vec<f64>> {
    let joint = Histogram2d::from_samples(y_b, phi_b, Some(range), None, bins)?;
    Ok(joint.first_moment_y())
}

/// Drift generated by boundary fluxes: `(E_top - E_bottom) / f`.
pub fn drift_coefficient(f: &[f64], top: &[f64], bottom: &[f64]) -> Result<Vec<f64>> {
    if top.len() != f.len() || bottom.len() != f.len() {
        bail!("Boundary expectations and density differ in length.");
    }
    Ok(f.iter()
        .zip(top.iter().zip(bottom))
        .map(|(&f, (&t, &b))| if f > 0.0 { (t - b) / f } else { f64::NAN })
        .collect())
}

/// Pointwise product that maps undefined coefficients in empty bins to zero.
pub fn weighted(coefficient: &[f64], f: &[f64]) -> Vec<f64> {
    coefficient
        .iter()
        .zip(f)
        .map(|(&c, &f)| if f > 0.0 && c.is_finite() { c * f } else { 0.0 })
        .collect()
}

/// Comparison of the estimated `df/dt` with the right-hand side of an FKE.
#[derive(Debug, Clone, Serialize)]
pub struct FkeBalance {
    pub lhs: Vec<f64>,
    pub rhs: Vec<f64>,
    /// `||lhs - rhs||_2 / ||lhs||_2` over the interior bins (absolute norm
    /// when `lhs` vanishes there).
    pub relative_residual: f64,
}

impl FkeBalance {
    /// Both terms are kept in full, but the outermost bin at each end is left
    /// out of the residual: the spatial stencils reach past the range there.
    pub fn new(lhs: Vec<f64>, rhs: Vec<f64>) -> Result<Self> {
        if lhs.len() != rhs.len() {
            bail!("FKE balance terms differ in length.");
        }
        let interior = if lhs.len() > 2 { 1..lhs.len() - 1 } else { 0..lhs.len() };
        let (lhs_in, rhs_in) = (&lhs[interior.clone()], &rhs[interior]);
        let diff: f64 = lhs_in
            .iter()
            .zip(rhs_in)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt();
        let scale: f64 = lhs_in.iter().map(|a| a * a).sum::<f64>().sqrt();
        let relative_residual = if scale > 0.0 { diff / scale } else { diff };
        Ok(Self {
            lhs,
            rhs,
            relative_residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourth_order_stencil_is_exact_for_cubics() {
        let dt = 0.1;
        let f = |t: f64| vec![t.powi(3) - 2.0 * t, 0.5 * t * t];
        let df = |t: f64| vec![3.0 * t * t - 2.0, t];
        let t0 = 0.7;
        let result = time_derivative_4th(&f(t0 - 2.0 * dt), &f(t0 - dt), &f(t0 + dt), &f(t0 + 2.0 * dt), dt)
            .expect("derivative");
        for (a, b) in result.iter().zip(df(t0)) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn time_derivative_rejects_mismatched_inputs() {
        assert!(time_derivative_4th(&[1.0], &[1.0], &[1.0], &[1.0, 2.0], 0.1).is_err());
        assert!(time_derivative_4th(&[1.0], &[1.0], &[1.0], &[1.0], 0.0).is_err());
    }

    #[test]
    fn central_derivative_of_quadratic_interior() {
        let dx = 0.1;
        let values: Vec<f64> = (0..10).map(|i| (i as f64 * dx).powi(2)).collect();
        let d = central_derivative(&values, dx);
        for i in 1..9 {
            assert!((d[i] - 2.0 * i as f64 * dx).abs() < 1e-12);
        }
        // Zero padding at the ends.
        assert!((d[0] - values[1] / (2.0 * dx)).abs() < 1e-12);
    }

    #[test]
    fn second_derivative_of_quadratic_interior() {
        let dx = 0.05;
        let values: Vec<f64> = (0..12).map(|i| 3.0 * (i as f64 * dx).powi(2)).collect();
        let d2 = second_derivative(&values, dx);
        for v in &d2[1..11] {
            assert!((v - 6.0).abs() < 1e-9);
        }
    }

    #[test]
    fn diffusion_coefficient_negates_conditional_mean() {
        let y: Vec<f64> = (0..2000).map(|i| i as f64 / 2000.0).collect();
        let phi: Vec<f64> = y.iter().map(|v| 2.0 * v).collect();
        let d2 = diffusion_coefficient(&y, &phi, (0.0, 1.0), 10).expect("d2");
        let expected = conditional_expectation(&y, &phi, (0.0, 1.0), 10).expect("e");
        for (a, b) in d2.iter().zip(expected) {
            assert_eq!(*a, -b);
        }
        assert!(d2.iter().all(|v| *v <= 0.0));
    }

    #[test]
    fn drift_from_symmetric_boundaries_vanishes() {
        let y: Vec<f64> = (0..500).map(|i| (i as f64 * 0.1).sin()).collect();
        let phi: Vec<f64> = y.iter().map(|v| v * v).collect();
        let (_, f) = density(&y, (-1.0, 1.0), 8).expect("density");
        let top = boundary_expectation(&y, &phi, (-1.0, 1.0), 8).expect("top");
        let bottom = top.clone();
        let drift = drift_coefficient(&f, &top, &bottom).expect("drift");
        for (d, f) in drift.iter().zip(&f) {
            if *f > 0.0 {
                assert_eq!(*d, 0.0);
            } else {
                assert!(d.is_nan());
            }
        }
    }

    #[test]
    fn weighted_zeroes_undefined_bins() {
        let out = weighted(&[f64::NAN, 2.0, 3.0], &[0.0, 0.5, 0.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn settings_resolve_range_over_all_chunks() {
        let settings = KolmogorovSettings::default();
        let a = [0.0, 1.0];
        let b = [-2.0, 0.5];
        let range = settings
            .resolve_range([a.as_slice(), b.as_slice()])
            .expect("range");
        assert_eq!(range, (-2.0, 1.0));
        let fixed = KolmogorovSettings {
            bins: 8,
            range: Some((-1.0, 1.0)),
        };
        assert_eq!(fixed.resolve_range([a.as_slice()]).expect("range"), (-1.0, 1.0));
        assert!(KolmogorovSettings { bins: 2, range: None }.validate().is_err());
    }

    #[test]
    fn balance_reports_relative_residual() {
        let balance = FkeBalance::new(vec![3.0, 4.0], vec![3.0, 4.0]).expect("balance");
        assert_eq!(balance.relative_residual, 0.0);
        let off = FkeBalance::new(vec![3.0, 4.0], vec![0.0, 0.0]).expect("balance");
        assert!((off.relative_residual - 1.0).abs() < 1e-12);
    }

    #[test]
    fn balance_residual_skips_outermost_bins() {
        let lhs = vec![-2.0, 1.0, 2.0, 1.0, -4.0];
        let rhs = vec![20.0, 1.0, 2.0, 1.0, 15.0];
        let balance = FkeBalance::new(lhs.clone(), rhs.clone()).expect("balance");
        assert_eq!(balance.relative_residual, 0.0);
        assert_eq!(balance.lhs, lhs);
        assert_eq!(balance.rhs, rhs);

        let interior = FkeBalance::new(vec![0.0, 3.0, 4.0, 0.0], vec![9.0, 0.0, 0.0, 9.0]).expect("balance");
        assert!((interior.relative_residual - 1.0).abs() < 1e-12);
    }
}
