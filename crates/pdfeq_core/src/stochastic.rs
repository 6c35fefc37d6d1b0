//! Stochastic forcing: Euler-Maruyama Ornstein-Uhlenbeck updates and seeded
//! standard normal noise.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Mean-reverting Ornstein-Uhlenbeck process `dY = a (mu - Y) dt + sigma dW`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrnsteinUhlenbeck {
    pub mean: f64,
    pub rate: f64,
    pub sigma: f64,
}

impl OrnsteinUhlenbeck {
    pub fn new(mean: f64, rate: f64, sigma: f64) -> Self {
        Self { mean, rate, sigma }
    }

    /// Euler-Maruyama update driven by a standard normal draw `w`.
    pub fn step(&self, y: f64, w: f64, dt: f64) -> f64 {
        y + self.rate * (self.mean - y) * dt + self.sigma * dt.sqrt() * w
    }

    /// Stationary variance `sigma^2 / (2 a)`.
    pub fn stationary_variance(&self) -> f64 {
        self.sigma * self.sigma / (2.0 * self.rate)
    }
}

/// Row-major `rows x cols` matrix of standard normal draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl NoiseMatrix {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R, rows: usize, cols: usize) -> Self {
        let values: Vec<f64> = (0..rows * cols)
            .map(|_| StandardNormal.sample(rng))
            .collect();
        Self { rows, cols, values }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    #[test]
    fn noiseless_process_relaxes_to_mean() {
        let process = OrnsteinUhlenbeck::new(1.0, 10.0, 0.0);
        let mut y = 0.0;
        for _ in 0..200 {
            y = process.step(y, 0.0, 0.01);
        }
        assert!((y - 1.0).abs() < 1e-8);
    }

    #[test]
    fn noise_matrix_is_reproducible_and_standardised() {
        let mut a = ChaChaRng::seed_from_u64(42);
        let mut b = ChaChaRng::seed_from_u64(42);
        let first = NoiseMatrix::sample(&mut a, 5000, 2);
        let second = NoiseMatrix::sample(&mut b, 5000, 2);
        assert_eq!(first, second);

        let n = first.values.len() as f64;
        let mean = first.values.iter().sum::<f64>() / n;
        let var = first.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 0.05);
        assert!((var - 1.0).abs() < 0.05);
        assert_eq!(first.get(3, 1), first.values[7]);
    }

    #[test]
    fn ensemble_matches_stationary_variance() {
        let process = OrnsteinUhlenbeck::new(0.0, 10.0, 0.25);
        let mut rng = ChaChaRng::seed_from_u64(7);
        let paths = 4000;
        let dt = 1e-3;
        let noise = NoiseMatrix::sample(&mut rng, 1000, paths);
        let mut state = vec![0.0; paths];
        for step in 0..1000 {
            for (p, y) in state.iter_mut().enumerate() {
                *y = process.step(*y, noise.get(step, p), dt);
            }
        }
        let var = state.iter().map(|y| y * y).sum::<f64>() / paths as f64;
        let expected = process.stationary_variance();
        assert!((var - expected).abs() < 0.15 * expected, "var {var} vs {expected}");
    }
}
