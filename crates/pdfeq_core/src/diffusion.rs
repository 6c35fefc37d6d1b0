//! One dimensional diffusion `dt(Y) = Yzz` on `z in [0, 1]` whose boundary
//! values follow Ornstein-Uhlenbeck processes.
//!
//! Space is discretised by Chebyshev collocation and time by Crank-Nicolson,
//! with the first and last rows of the implicit matrix replaced by Dirichlet
//! conditions. The matrix is factorised once per solver.

use crate::chebyshev::ChebyshevGrid;
use crate::equation_engine::ScalarField;
use crate::histogram::Histogram2d;
use crate::kolmogorov::{self, FkeBalance, KolmogorovSettings};
use crate::stochastic::{NoiseMatrix, OrnsteinUhlenbeck};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, Dyn, LU};
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use serde::{Deserialize, Serialize};

/// Bins used for the boundary joint densities of `(Y, Yz)`.
pub const BOUNDARY_BINS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    /// Number of points of the time grid, endpoints included.
    pub n_time: usize,
    pub t_end: f64,
    /// Chebyshev collocation points.
    pub nz: usize,
    /// Mean reversion rate of the boundary processes.
    pub rate: f64,
    pub sigma: f64,
    pub bottom_mean: f64,
    pub top_mean: f64,
    pub snapshots: usize,
    /// Points of the uniform grid snapshots are interpolated onto.
    pub uniform_points: usize,
    pub record_history: bool,
    pub initial_condition: String,
    pub seed: u64,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            n_time: 1000,
            t_end: 10.0,
            nz: 24,
            rate: 10.0,
            sigma: 0.25,
            bottom_mean: 0.0,
            top_mean: 1.0,
            snapshots: 5,
            uniform_points: 64,
            record_history: true,
            initial_condition: "z".to_string(),
            seed: 42,
        }
    }
}

impl DiffusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_time < 2 {
            bail!("The time grid needs at least 2 points.");
        }
        if self.t_end <= 0.0 {
            bail!("t_end must be positive.");
        }
        if self.nz < 3 {
            bail!("nz must be at least 3.");
        }
        if self.rate < 0.0 || self.sigma < 0.0 {
            bail!("Boundary process rate and sigma must be non-negative.");
        }
        if self.snapshots == 0 || self.snapshots > self.steps() {
            bail!(
                "snapshots must lie in 1..={}, got {}.",
                self.steps(),
                self.snapshots
            );
        }
        if self.uniform_points < 2 {
            bail!("uniform_points must be at least 2.");
        }
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.t_end / (self.n_time - 1) as f64
    }

    pub fn steps(&self) -> usize {
        self.n_time.saturating_sub(1)
    }

    /// Times at which the trailing snapshots are taken.
    pub fn snapshot_times(&self) -> Vec<f64> {
        let steps = self.steps();
        let dt = self.dt();
        (steps + 1 - self.snapshots.min(steps)..=steps)
            .map(|n| n as f64 * dt)
            .collect()
    }

    pub fn bottom_process(&self) -> OrnsteinUhlenbeck {
        OrnsteinUhlenbeck::new(self.bottom_mean, self.rate, self.sigma)
    }

    pub fn top_process(&self) -> OrnsteinUhlenbeck {
        OrnsteinUhlenbeck::new(self.top_mean, self.rate, self.sigma)
    }

    /// Seeded `(n_time, 2)` noise for a single run.
    pub fn noise(&self) -> NoiseMatrix {
        let mut rng = ChaChaRng::seed_from_u64(self.seed);
        NoiseMatrix::sample(&mut rng, self.n_time, 2)
    }
}

/// `Y` and `Yz` on the uniform grid at one time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub time: f64,
    pub y: Vec<f64>,
    pub yz: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionRun {
    pub z_nodes: Vec<f64>,
    /// Empty unless the history was requested.
    pub history_times: Vec<f64>,
    /// `Y` on the collocation nodes, one row per entry of `history_times`.
    pub history: Vec<Vec<f64>>,
    pub z_uniform: Vec<f64>,
    pub snapshots: Vec<ProfileSnapshot>,
}

pub struct DiffusionSolver {
    config: DiffusionConfig,
    grid: ChebyshevGrid,
    explicit: DMatrix<f64>,
    implicit: LU<f64, Dyn, Dyn>,
    initial: DVector<f64>,
    z_uniform: Vec<f64>,
}

impl DiffusionSolver {
    pub fn new(config: &DiffusionConfig) -> Result<Self> {
        config.validate()?;
        let grid = ChebyshevGrid::new(config.nz, (0.0, 1.0))?;
        let n = grid.len();
        let half = 0.5 * config.dt();
        let d2 = grid.second_differentiation_matrix();
        let identity = DMatrix::<f64>::identity(n, n);

        let mut implicit = &identity - &d2 * half;
        let explicit = &identity + &d2 * half;
        for row in [0, n - 1] {
            implicit.row_mut(row).fill(0.0);
            implicit[(row, row)] = 1.0;
        }
        let implicit = implicit.lu();
        if !implicit.is_invertible() {
            bail!("Crank-Nicolson matrix is singular.");
        }

        let field = ScalarField::compile(&config.initial_condition, &["z"], &[], &[])
            .with_context(|| format!("Invalid initial condition '{}'", config.initial_condition))?;
        let mut stack = Vec::new();
        let initial = DVector::from_iterator(n, grid.nodes().iter().map(|&z| field.eval(&[z], &mut stack)));
        let z_uniform = grid.uniform(config.uniform_points);
        debug!(
            "Diffusion solver: nz = {}, dt = {:e}, steps = {}",
            config.nz,
            config.dt(),
            config.steps()
        );

        Ok(Self {
            config: config.clone(),
            grid,
            explicit,
            implicit,
            initial,
            z_uniform,
        })
    }

    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }

    pub fn grid(&self) -> &ChebyshevGrid {
        &self.grid
    }

    pub fn z_uniform(&self) -> &[f64] {
        &self.z_uniform
    }

    /// Advances `y` by one step with boundary values `g0` at `z = 0` and `g1`
    /// at `z = 1`.
    pub fn step(&self, y: &DVector<f64>, g0: f64, g1: f64) -> Result<DVector<f64>> {
        let mut rhs = &self.explicit * y;
        let last = rhs.len() - 1;
        rhs[0] = g0;
        rhs[last] = g1;
        self.implicit
            .solve(&rhs)
            .ok_or_else(|| anyhow!("Crank-Nicolson solve failed"))
    }

    /// Integrates to `t_end` with boundary noise `noise[n, 0]` (bottom) and
    /// `noise[n, 1]` (top) used on step `n`.
    pub fn solve(&self, noise: &NoiseMatrix) -> Result<DiffusionRun> {
        let config = &self.config;
        let steps = config.steps();
        if noise.cols != 2 || noise.rows < steps {
            bail!(
                "Boundary noise must have shape ({}, 2) or more rows, got ({}, {}).",
                steps,
                noise.rows,
                noise.cols
            );
        }
        let dt = config.dt();
        let bottom = config.bottom_process();
        let top = config.top_process();

        let mut y = self.initial.clone();
        let last = y.len() - 1;
        let mut history_times = Vec::new();
        let mut history = Vec::new();
        if config.record_history {
            history_times.push(0.0);
            history.push(y.as_slice().to_vec());
        }
        let mut snapshots = Vec::with_capacity(config.snapshots);

        for n in 0..steps {
            let g0 = bottom.step(y[0], noise.get(n, 0), dt);
            let g1 = top.step(y[last], noise.get(n, 1), dt);
            y = self.step(&y, g0, g1)?;
            let iteration = n + 1;
            let time = iteration as f64 * dt;

            if config.record_history {
                history_times.push(time);
                history.push(y.as_slice().to_vec());
            }
            if iteration + config.snapshots > steps {
                snapshots.push(self.profile(&y, time));
            }
        }

        Ok(DiffusionRun {
            z_nodes: self.grid.nodes().to_vec(),
            history_times,
            history,
            z_uniform: self.z_uniform.clone(),
            snapshots,
        })
    }

    fn profile(&self, y: &DVector<f64>, time: f64) -> ProfileSnapshot {
        let values = y.as_slice();
        let yz = self.grid.derivative(values);
        ProfileSnapshot {
            time,
            y: self.grid.interpolate_many(values, &self.z_uniform),
            yz: self.grid.interpolate_many(&yz, &self.z_uniform),
        }
    }
}

/// Single run with the seeded noise of `config`.
pub fn run_diffusion(config: &DiffusionConfig) -> Result<DiffusionRun> {
    DiffusionSolver::new(config)?.solve(&config.noise())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub paths: usize,
    pub diffusion: DiffusionConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            paths: 500,
            diffusion: DiffusionConfig {
                n_time: 100,
                t_end: 1.0,
                record_history: false,
                ..DiffusionConfig::default()
            },
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.paths == 0 {
            bail!("The ensemble needs at least one path.");
        }
        self.diffusion.validate()
    }
}

/// Trailing snapshots of every path.
///
/// Interior fields are stored `[time][z][path]`, boundary series
/// `[time][path]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionEnsemble {
    pub z: Vec<f64>,
    pub times: Vec<f64>,
    pub paths: usize,
    pub y: Vec<f64>,
    /// `|Yz|^2`
    pub gradient_square: Vec<f64>,
    pub bottom_y: Vec<f64>,
    pub top_y: Vec<f64>,
    pub bottom_yz: Vec<f64>,
    pub top_yz: Vec<f64>,
}

impl DiffusionEnsemble {
    fn empty(z: Vec<f64>, times: Vec<f64>, paths: usize) -> Self {
        let interior = times.len() * z.len() * paths;
        let boundary = times.len() * paths;
        Self {
            z,
            times,
            paths,
            y: vec![0.0; interior],
            gradient_square: vec![0.0; interior],
            bottom_y: vec![0.0; boundary],
            top_y: vec![0.0; boundary],
            bottom_yz: vec![0.0; boundary],
            top_yz: vec![0.0; boundary],
        }
    }

    #[inline]
    pub fn index(&self, time: usize, z: usize, path: usize) -> usize {
        (time * self.z.len() + z) * self.paths + path
    }

    fn insert(&mut self, path: usize, run: &DiffusionRun) -> Result<()> {
        if run.snapshots.len() != self.times.len() {
            bail!(
                "Path {} kept {} snapshots, expected {}.",
                path,
                run.snapshots.len(),
                self.times.len()
            );
        }
        let last = self.z.len() - 1;
        for (t, snap) in run.snapshots.iter().enumerate() {
            for (k, (y, yz)) in snap.y.iter().zip(&snap.yz).enumerate() {
                let idx = self.index(t, k, path);
                self.y[idx] = *y;
                self.gradient_square[idx] = yz * yz;
            }
            let b = t * self.paths + path;
            self.bottom_y[b] = snap.y[0];
            self.top_y[b] = snap.y[last];
            self.bottom_yz[b] = snap.yz[0];
            self.top_yz[b] = snap.yz[last];
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleProgress {
    pub completed_paths: usize,
    pub paths: usize,
    pub done: bool,
}

/// Solves the paths of an ensemble in batches.
///
/// Noise for each path is drawn in path order from one generator, so the
/// ensemble does not depend on the batch sizes used.
pub struct DiffusionEnsembleRunner {
    paths: usize,
    solver: DiffusionSolver,
    rng: ChaChaRng,
    completed: usize,
    ensemble: DiffusionEnsemble,
}

impl DiffusionEnsembleRunner {
    pub fn new(config: EnsembleConfig) -> Result<Self> {
        config.validate()?;
        let solver = DiffusionSolver::new(&config.diffusion)?;
        let ensemble = DiffusionEnsemble::empty(
            solver.z_uniform().to_vec(),
            config.diffusion.snapshot_times(),
            config.paths,
        );
        info!(
            "Generating ensemble: {} paths, {} steps each",
            config.paths,
            config.diffusion.steps()
        );
        Ok(Self {
            paths: config.paths,
            rng: ChaChaRng::seed_from_u64(config.diffusion.seed),
            solver,
            completed: 0,
            ensemble,
        })
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.paths
    }

    pub fn progress(&self) -> EnsembleProgress {
        EnsembleProgress {
            completed_paths: self.completed,
            paths: self.paths,
            done: self.is_done(),
        }
    }

    pub fn run_steps(&mut self, batch: usize) -> Result<EnsembleProgress> {
        let start = self.completed;
        let end = (start + batch).min(self.paths);
        let rows = self.solver.config().n_time;
        let noises: Vec<NoiseMatrix> = (start..end)
            .map(|_| NoiseMatrix::sample(&mut self.rng, rows, 2))
            .collect();

        #[cfg(feature = "parallel")]
        let runs = {
            use rayon::prelude::*;
            let solver = &self.solver;
            noises
                .par_iter()
                .map(|w| solver.solve(w))
                .collect::<Result<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let runs = noises
            .iter()
            .map(|w| self.solver.solve(w))
            .collect::<Result<Vec<_>>>()?;

        let milestone = (self.paths / 5).max(1);
        for (offset, run) in runs.iter().enumerate() {
            let path = start + offset;
            self.ensemble.insert(path, run)?;
            if path % milestone == 0 {
                info!("Path = {}", path);
            }
        }
        self.completed = end;
        Ok(self.progress())
    }

    pub fn run_to_completion(mut self) -> Result<DiffusionEnsemble> {
        let batch = (self.paths / 5).max(1);
        while !self.is_done() {
            self.run_steps(batch)?;
        }
        self.take_result()
    }

    pub fn take_result(self) -> Result<DiffusionEnsemble> {
        if !self.is_done() {
            bail!(
                "Ensemble is incomplete: {} of {} paths solved.",
                self.completed,
                self.paths
            );
        }
        Ok(self.ensemble)
    }
}

/// Joint density of `(Y, Yz)` sampled on one boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointDensity {
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
    /// Row-major over `(x, y)` bins.
    pub density: Vec<f64>,
}

impl JointDensity {
    fn from_samples(x: &[f64], y: &[f64], bins: usize) -> Result<Self> {
        let hist = Histogram2d::from_samples(x, y, None, None, bins)?;
        Ok(Self {
            x_edges: hist.x_edges(),
            y_edges: hist.y_edges(),
            density: hist.density(),
        })
    }
}

/// Coefficients of `df/dt = -d/dy (D1 f) + d^2/dy^2 (D2 f)` for the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffusionReport {
    pub y: Vec<f64>,
    pub f: Vec<f64>,
    pub d1: Vec<f64>,
    pub d2: Vec<f64>,
    /// `D1 f`
    pub d1_f: Vec<f64>,
    /// `d/dy (D2 f)`
    pub d_d2_f: Vec<f64>,
    /// Relative mismatch between the two fluxes above.
    pub flux_residual: f64,
    pub bottom: JointDensity,
    pub top: JointDensity,
}

pub fn analyse_diffusion(ensemble: &DiffusionEnsemble, settings: &KolmogorovSettings) -> Result<DiffusionReport> {
    settings.validate()?;
    let bins = settings.bins;
    let range = settings.resolve_range([ensemble.y.as_slice()])?;

    let (y, f) = kolmogorov::density(&ensemble.y, range, bins)?;
    let d2 = kolmogorov::diffusion_coefficient(&ensemble.y, &ensemble.gradient_square, range, bins)?;
    let top = kolmogorov::boundary_expectation(&ensemble.top_y, &ensemble.top_yz, range, bins)?;
    let bottom = kolmogorov::boundary_expectation(&ensemble.bottom_y, &ensemble.bottom_yz, range, bins)?;
    let d1 = kolmogorov::drift_coefficient(&f, &top, &bottom)?;

    let dy = y[1] - y[0];
    let d1_f = kolmogorov::weighted(&d1, &f);
    let d_d2_f = kolmogorov::central_derivative(&kolmogorov::weighted(&d2, &f), dy);
    let balance = FkeBalance::new(d1_f, d_d2_f)?;

    Ok(DiffusionReport {
        y,
        f,
        d1,
        d2,
        d1_f: balance.lhs,
        d_d2_f: balance.rhs,
        flux_residual: balance.relative_residual,
        bottom: JointDensity::from_samples(&ensemble.bottom_y, &ensemble.bottom_yz, BOUNDARY_BINS)?,
        top: JointDensity::from_samples(&ensemble.top_y, &ensemble.top_yz, BOUNDARY_BINS)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_ensemble() -> EnsembleConfig {
        EnsembleConfig {
            paths: 4,
            diffusion: DiffusionConfig {
                n_time: 20,
                t_end: 0.2,
                nz: 8,
                uniform_points: 9,
                record_history: false,
                ..DiffusionConfig::default()
            },
        }
    }

    fn assert_err_contains<T>(result: Result<T>, needle: &str) {
        let message = match result {
            Ok(_) => panic!("expected error containing \"{needle}\""),
            Err(err) => format!("{err:#}"),
        };
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn time_grid_matches_linspace() {
        let config = DiffusionConfig::default();
        assert_eq!(config.steps(), 999);
        assert!((config.dt() - 10.0 / 999.0).abs() < 1e-15);
        let times = config.snapshot_times();
        assert_eq!(times.len(), 5);
        assert!((times[4] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn fixed_boundaries_relax_to_linear_profile() {
        let config = DiffusionConfig {
            n_time: 1000,
            t_end: 2.0,
            sigma: 0.0,
            initial_condition: "z*z".into(),
            ..DiffusionConfig::default()
        };
        let solver = DiffusionSolver::new(&config).expect("solver");
        let run = solver.solve(&NoiseMatrix::zeros(config.n_time, 2)).expect("run");
        let last = run.history.last().expect("history");
        for (z, y) in run.z_nodes.iter().zip(last) {
            assert!((y - z).abs() < 1e-6, "Y({z}) = {y}");
        }
        assert_eq!(run.history.len(), config.n_time);
        let snap = run.snapshots.last().expect("snapshot");
        for (z, (y, yz)) in run.z_uniform.iter().zip(snap.y.iter().zip(&snap.yz)) {
            assert!((y - z).abs() < 1e-6);
            assert!((yz - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn boundary_values_follow_the_ou_update() {
        let config = DiffusionConfig {
            n_time: 3,
            t_end: 0.02,
            snapshots: 1,
            ..DiffusionConfig::default()
        };
        let noise = NoiseMatrix {
            rows: 3,
            cols: 2,
            values: vec![1.0, -1.0, 0.5, 0.5, 0.0, 0.0],
        };
        let run = DiffusionSolver::new(&config).expect("solver").solve(&noise).expect("run");
        let dt = config.dt();
        let bottom = config.bottom_process();
        let top = config.top_process();
        let g0 = bottom.step(bottom.step(0.0, 1.0, dt), 0.5, dt);
        let g1 = top.step(top.step(1.0, -1.0, dt), 0.5, dt);
        let last = run.history.last().expect("history");
        assert!((last[0] - g0).abs() < 1e-12);
        assert!((last[last.len() - 1] - g1).abs() < 1e-12);
    }

    #[test]
    fn rejects_short_noise_and_bad_config() {
        let config = DiffusionConfig {
            n_time: 10,
            t_end: 1.0,
            ..DiffusionConfig::default()
        };
        let solver = DiffusionSolver::new(&config).expect("solver");
        assert_err_contains(solver.solve(&NoiseMatrix::zeros(4, 2)), "Boundary noise");
        assert_err_contains(solver.solve(&NoiseMatrix::zeros(10, 3)), "Boundary noise");

        let mut bad = config.clone();
        bad.nz = 2;
        assert_err_contains(bad.validate(), "nz");
        let mut bad = config.clone();
        bad.snapshots = 20;
        assert_err_contains(bad.validate(), "snapshots");
        let mut bad = config;
        bad.initial_condition = "q".into();
        assert_err_contains(DiffusionSolver::new(&bad).map(|_| ()), "Invalid initial condition");
    }

    #[test]
    fn ensemble_is_reproducible_across_batch_sizes() {
        let config = small_ensemble();
        let whole = DiffusionEnsembleRunner::new(config.clone())
            .expect("runner")
            .run_to_completion()
            .expect("ensemble");

        let mut runner = DiffusionEnsembleRunner::new(config).expect("runner");
        assert_err_contains(
            DiffusionEnsembleRunner::new(small_ensemble()).expect("runner").take_result(),
            "incomplete",
        );
        let progress = runner.run_steps(1).expect("batch");
        assert_eq!(progress.completed_paths, 1);
        runner.run_steps(10).expect("batch");
        assert!(runner.is_done());
        let stepped = runner.take_result().expect("ensemble");

        assert_eq!(whole.y, stepped.y);
        assert_eq!(whole.times.len(), 5);
        assert_eq!(whole.y.len(), 5 * 9 * 4);
        assert_eq!(whole.bottom_y.len(), 5 * 4);
        let idx = whole.index(2, 0, 3);
        assert_eq!(whole.y[idx], whole.bottom_y[2 * 4 + 3]);
        assert!(whole.gradient_square.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn analysis_produces_consistent_terms() {
        let ensemble = DiffusionEnsembleRunner::new(small_ensemble())
            .expect("runner")
            .run_to_completion()
            .expect("ensemble");
        let settings = KolmogorovSettings {
            bins: 12,
            range: None,
        };
        let report = analyse_diffusion(&ensemble, &settings).expect("report");
        assert_eq!(report.y.len(), 12);
        assert_eq!(report.d1_f.len(), 12);
        assert_eq!(report.d_d2_f.len(), 12);
        let dy = report.y[1] - report.y[0];
        let mass: f64 = report.f.iter().sum::<f64>() * dy;
        assert!((mass - 1.0).abs() < 1e-9);
        assert!(report.d2.iter().filter(|v| v.is_finite()).all(|v| *v <= 0.0));
        assert_eq!(report.bottom.density.len(), BOUNDARY_BINS * BOUNDARY_BINS);
        assert_eq!(report.top.x_edges.len(), BOUNDARY_BINS + 1);
        assert!(report.flux_residual.is_finite());
    }
}
