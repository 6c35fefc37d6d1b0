//! Triply periodic Fourier basis on a cube.
//!
//! Real fields are stored on an `n^3` grid in row-major `(x, y, z)` order,
//! so `z` is the contiguous axis. Spectral coefficients use the same layout
//! with the unnormalised DFT convention of `rustfft`; `inverse` applies the
//! `1/n^3` factor.

use anyhow::{bail, Result};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

pub struct FourierGrid3 {
    n: usize,
    bounds: (f64, f64),
    forward: Arc<dyn Fft<f64>>,
    backward: Arc<dyn Fft<f64>>,
    /// Integer mode number for each index along an axis.
    modes: Vec<i64>,
}

impl std::fmt::Debug for FourierGrid3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FourierGrid3")
            .field("n", &self.n)
            .field("bounds", &self.bounds)
            .finish()
    }
}

impl FourierGrid3 {
    pub fn new(n: usize, bounds: (f64, f64)) -> Result<Self> {
        if n < 4 || n % 2 != 0 {
            bail!("Fourier resolution must be an even number >= 4, got {}.", n);
        }
        if bounds.0.is_nan() || bounds.1.is_nan() || bounds.1 <= bounds.0 {
            bail!("Domain bounds must satisfy lo < hi.");
        }
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(n);
        let backward = planner.plan_fft_inverse(n);
        let half = (n / 2) as i64;
        let modes = (0..n as i64)
            .map(|i| if i < half { i } else if i == half { half } else { i - n as i64 })
            .collect();
        Ok(Self {
            n,
            bounds,
            forward,
            backward,
            modes,
        })
    }

    /// The `[-pi, pi)^3` box used by the ABC flow.
    pub fn periodic_box(n: usize) -> Result<Self> {
        Self::new(n, (-PI, PI))
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.n * self.n * self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn length(&self) -> f64 {
        self.bounds.1 - self.bounds.0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.n + j) * self.n + k
    }

    /// Grid coordinates along one axis.
    pub fn coordinates(&self) -> Vec<f64> {
        let h = self.length() / self.n as f64;
        (0..self.n).map(|i| self.bounds.0 + h * i as f64).collect()
    }

    /// Every grid point in storage order.
    pub fn points(&self) -> Vec<[f64; 3]> {
        let c = self.coordinates();
        let mut out = Vec::with_capacity(self.len());
        for &x in &c {
            for &y in &c {
                for &z in &c {
                    out.push([x, y, z]);
                }
            }
        }
        out
    }

    /// Physical wavenumber of mode index `i`.
    pub fn wavenumber(&self, i: usize) -> f64 {
        2.0 * PI / self.length() * self.modes[i] as f64
    }

    fn is_nyquist(&self, i: usize) -> bool {
        self.modes[i] == (self.n / 2) as i64
    }

    fn transform_axis(&self, data: &mut [Complex64], axis: usize, fft: &dyn Fft<f64>) {
        let n = self.n;
        let stride = match axis {
            0 => n * n,
            1 => n,
            _ => 1,
        };
        let mut line = vec![Complex64::new(0.0, 0.0); n];
        let mut scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        for outer in 0..n * n {
            let (a, b) = (outer / n, outer % n);
            let base = match axis {
                0 => a * n + b,
                1 => a * n * n + b,
                _ => outer * n,
            };
            for (m, slot) in line.iter_mut().enumerate() {
                *slot = data[base + m * stride];
            }
            fft.process_with_scratch(&mut line, &mut scratch);
            for (m, value) in line.iter().enumerate() {
                data[base + m * stride] = *value;
            }
        }
    }

    pub fn forward(&self, grid: &[f64]) -> Vec<Complex64> {
        let mut data: Vec<Complex64> = grid.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        for axis in 0..3 {
            self.transform_axis(&mut data, axis, self.forward.as_ref());
        }
        data
    }

    pub fn inverse(&self, spectral: &[Complex64]) -> Vec<f64> {
        let mut data = spectral.to_vec();
        for axis in 0..3 {
            self.transform_axis(&mut data, axis, self.backward.as_ref());
        }
        let norm = 1.0 / self.len() as f64;
        data.iter().map(|c| c.re * norm).collect()
    }

    /// Spectral derivative along `axis`; the Nyquist mode is dropped.
    pub fn derivative(&self, spectral: &[Complex64], axis: usize) -> Vec<Complex64> {
        let n = self.n;
        let mut out = vec![Complex64::new(0.0, 0.0); spectral.len()];
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let m = [i, j, k][axis];
                    if self.is_nyquist(m) {
                        continue;
                    }
                    let idx = self.index(i, j, k);
                    out[idx] = spectral[idx] * Complex64::new(0.0, self.wavenumber(m));
                }
            }
        }
        out
    }

    /// Gradient evaluated on the grid.
    pub fn gradient(&self, spectral: &[Complex64]) -> [Vec<f64>; 3] {
        [0, 1, 2].map(|axis| self.inverse(&self.derivative(spectral, axis)))
    }

    /// Symbol of the Laplacian, `-(kx^2 + ky^2 + kz^2)`, in storage order.
    pub fn laplacian_symbol(&self) -> Vec<f64> {
        let n = self.n;
        let k2: Vec<f64> = (0..n).map(|i| self.wavenumber(i).powi(2)).collect();
        let mut out = Vec::with_capacity(self.len());
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    out.push(-(k2[i] + k2[j] + k2[k]));
                }
            }
        }
        out
    }

    /// 2/3-rule mask: keeps modes with every `|m| < n/3`.
    pub fn dealias_mask(&self) -> Vec<bool> {
        let n = self.n;
        let cutoff = n as f64 / 3.0;
        let keep: Vec<bool> = self.modes.iter().map(|m| (m.abs() as f64) < cutoff).collect();
        let mut out = Vec::with_capacity(self.len());
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    out.push(keep[i] && keep[j] && keep[k]);
                }
            }
        }
        out
    }

    /// Spectral interpolation of a field onto an `m^3` grid over the same box.
    /// Modes that do not fit on the target grid, and Nyquist modes, are dropped.
    pub fn resample(&self, spectral: &[Complex64], m: usize) -> Result<Vec<f64>> {
        if m == self.n {
            return Ok(self.inverse(spectral));
        }
        let target = FourierGrid3::new(m, self.bounds)?;
        let limit = (self.n.min(m) / 2) as i64;
        let scale = (m as f64 / self.n as f64).powi(3);
        let slot = |mode: i64| -> usize {
            if mode >= 0 {
                mode as usize
            } else {
                (m as i64 + mode) as usize
            }
        };
        let mut padded = vec![Complex64::new(0.0, 0.0); target.len()];
        let n = self.n;
        for i in 0..n {
            let mi = self.modes[i];
            if mi.abs() >= limit {
                continue;
            }
            for j in 0..n {
                let mj = self.modes[j];
                if mj.abs() >= limit {
                    continue;
                }
                for k in 0..n {
                    let mk = self.modes[k];
                    if mk.abs() >= limit {
                        continue;
                    }
                    padded[target.index(slot(mi), slot(mj), slot(mk))] = spectral[self.index(i, j, k)] * scale;
                }
            }
        }
        Ok(target.inverse(&padded))
    }

    /// Output resolution for a dealias scale such as `3/2`, rounded up to even.
    pub fn scaled_resolution(&self, scale: f64) -> usize {
        let m = (self.n as f64 * scale).round() as usize;
        m + m % 2
    }
}

/// Volume average of a grid field.
pub fn grid_average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(grid: &FourierGrid3, f: impl Fn(f64, f64, f64) -> f64) -> Vec<f64> {
        grid.points().iter().map(|p| f(p[0], p[1], p[2])).collect()
    }

    fn max_diff(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
    }

    #[test]
    fn rejects_odd_or_tiny_resolution() {
        assert!(FourierGrid3::periodic_box(7).is_err());
        assert!(FourierGrid3::periodic_box(2).is_err());
        assert!(FourierGrid3::new(8, (1.0, 1.0)).is_err());
    }

    #[test]
    fn forward_inverse_roundtrip() {
        let grid = FourierGrid3::periodic_box(8).expect("grid");
        let values = field(&grid, |x, y, z| (x + 2.0 * y).sin() * z.cos() + 0.3);
        let back = grid.inverse(&grid.forward(&values));
        assert!(max_diff(&values, &back) < 1e-12);
    }

    #[test]
    fn gradient_is_spectrally_exact() {
        let grid = FourierGrid3::periodic_box(16).expect("grid");
        let values = field(&grid, |x, y, z| (2.0 * x).sin() + (3.0 * y).cos() * z.sin());
        let [gx, gy, gz] = grid.gradient(&grid.forward(&values));
        assert!(max_diff(&gx, &field(&grid, |x, _, _| 2.0 * (2.0 * x).cos())) < 1e-10);
        assert!(max_diff(&gy, &field(&grid, |_, y, z| -3.0 * (3.0 * y).sin() * z.sin())) < 1e-10);
        assert!(max_diff(&gz, &field(&grid, |_, y, z| (3.0 * y).cos() * z.cos())) < 1e-10);
    }

    #[test]
    fn wavenumbers_follow_domain_length() {
        let grid = FourierGrid3::new(8, (0.0, 1.0)).expect("grid");
        assert!((grid.wavenumber(1) - 2.0 * PI).abs() < 1e-12);
        assert!((grid.wavenumber(7) + 2.0 * PI).abs() < 1e-12);
        let values = field(&grid, |x, _, _| (2.0 * PI * x).sin());
        let lap: Vec<Complex64> = grid
            .forward(&values)
            .iter()
            .zip(grid.laplacian_symbol())
            .map(|(c, l)| *c * l)
            .collect();
        let expected: Vec<f64> = values.iter().map(|v| -4.0 * PI * PI * v).collect();
        assert!(max_diff(&grid.inverse(&lap), &expected) < 1e-9);
    }

    #[test]
    fn dealias_mask_drops_high_modes() {
        let grid = FourierGrid3::periodic_box(12).expect("grid");
        let mask = grid.dealias_mask();
        assert!(mask[grid.index(0, 0, 0)]);
        assert!(mask[grid.index(3, 0, 11)]);
        assert!(!mask[grid.index(4, 0, 0)]);
        assert!(!mask[grid.index(0, 8, 0)]);
    }

    #[test]
    fn resample_interpolates_band_limited_fields() {
        let grid = FourierGrid3::periodic_box(8).expect("grid");
        let f = |x: f64, y: f64, z: f64| x.sin() * (2.0 * y).cos() + (z + 0.4).cos();
        let values = field(&grid, f);
        let m = grid.scaled_resolution(1.5);
        assert_eq!(m, 12);
        let fine = grid.resample(&grid.forward(&values), m).expect("resample");
        let target = FourierGrid3::periodic_box(m).expect("target");
        assert!(max_diff(&fine, &field(&target, f)) < 1e-12);
    }

    #[test]
    fn grid_average_of_constant() {
        assert_eq!(grid_average(&[2.0; 8]), 2.0);
        assert_eq!(grid_average(&[]), 0.0);
    }
}
