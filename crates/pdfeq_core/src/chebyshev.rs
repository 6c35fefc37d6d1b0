//! Chebyshev-Gauss-Lobatto collocation on a bounded interval.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use std::f64::consts::PI;

#[derive(Debug, Clone)]
pub struct ChebyshevGrid {
    bounds: (f64, f64),
    /// Collocation nodes in ascending order.
    nodes: Vec<f64>,
    /// Barycentric weights matching `nodes`.
    weights: Vec<f64>,
    diff: DMatrix<f64>,
}

impl ChebyshevGrid {
    /// `size` Gauss-Lobatto points on `[a, b]`, endpoints included.
    pub fn new(size: usize, bounds: (f64, f64)) -> Result<Self> {
        if size < 3 {
            bail!("Chebyshev grid needs at least 3 points, got {}.", size);
        }
        let (a, b) = bounds;
        if a.is_nan() || b.is_nan() || b <= a {
            bail!("Chebyshev bounds must satisfy a < b.");
        }
        let n = size - 1;
        // x_j = -cos(pi j / n) runs from -1 to 1.
        let reference: Vec<f64> = (0..size).map(|j| -(PI * j as f64 / n as f64).cos()).collect();
        let nodes: Vec<f64> = reference.iter().map(|x| a + (b - a) * (x + 1.0) / 2.0).collect();

        let weights: Vec<f64> = (0..size)
            .map(|j| {
                let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                if j == 0 || j == n {
                    0.5 * sign
                } else {
                    sign
                }
            })
            .collect();

        // Off-diagonal entries from the barycentric weights, diagonal by the
        // negative-sum rule so constants are differentiated exactly.
        let mut diff = DMatrix::<f64>::zeros(size, size);
        for i in 0..size {
            let mut row_sum = 0.0;
            for j in 0..size {
                if i != j {
                    let value = (weights[j] / weights[i]) / (nodes[i] - nodes[j]);
                    diff[(i, j)] = value;
                    row_sum += value;
                }
            }
            diff[(i, i)] = -row_sum;
        }

        Ok(Self {
            bounds,
            nodes,
            weights,
            diff,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn differentiation_matrix(&self) -> &DMatrix<f64> {
        &self.diff
    }

    pub fn second_differentiation_matrix(&self) -> DMatrix<f64> {
        &self.diff * &self.diff
    }

    pub fn derivative(&self, values: &[f64]) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .map(|i| (0..n).map(|j| self.diff[(i, j)] * values[j]).sum())
            .collect()
    }

    /// Evaluates the interpolating polynomial through `values` at `x`.
    pub fn interpolate(&self, values: &[f64], x: f64) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for ((&node, &w), &v) in self.nodes.iter().zip(&self.weights).zip(values) {
            let dx = x - node;
            if dx == 0.0 {
                return v;
            }
            let t = w / dx;
            numerator += t * v;
            denominator += t;
        }
        numerator / denominator
    }

    pub fn interpolate_many(&self, values: &[f64], points: &[f64]) -> Vec<f64> {
        points.iter().map(|&x| self.interpolate(values, x)).collect()
    }

    /// `m` evenly spaced points spanning the interval, endpoints included.
    pub fn uniform(&self, m: usize) -> Vec<f64> {
        let (a, b) = self.bounds;
        if m < 2 {
            return vec![a; m];
        }
        let h = (b - a) / (m - 1) as f64;
        (0..m).map(|i| a + h * i as f64).collect()
    }
}
