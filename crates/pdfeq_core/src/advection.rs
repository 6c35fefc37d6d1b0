//! Passive scalar in a steady ABC flow.
//!
//! Solves `dt(S) - kappa lap(S) = -U . grad(S)` in a triply periodic box
//! with the Fourier basis, treating diffusion implicitly and advection
//! explicitly (IMEX RK222). Products are formed on the grid and truncated
//! with the 2/3 rule.

use crate::equation_engine::ScalarField;
use crate::fourier::{grid_average, FourierGrid3};
use crate::histogram::Histogram;
use crate::kolmogorov::{self, FkeBalance, KolmogorovSettings};
use crate::solvers::ImexRk222;
use crate::traits::SplitSystem;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbcFlowConfig {
    /// Diffusivity (inverse Peclet number).
    pub kappa: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    /// Modes per direction.
    pub n: usize,
    pub dt: f64,
    pub stop_time: f64,
    /// Iterations between flow-property reports.
    pub cadence: usize,
    /// Number of trailing states kept for analysis.
    pub snapshots: usize,
    /// Output grid scale relative to `n`.
    pub output_scale: f64,
    /// Velocity components in terms of `x, y, z` and parameters `A, B, C`.
    pub velocity: [String; 3],
    pub initial_condition: String,
}

impl Default for AbcFlowConfig {
    fn default() -> Self {
        Self {
            kappa: 0.1,
            a: 1.0,
            b: 1.0,
            c: 1.0,
            n: 32,
            dt: 1e-3,
            stop_time: 1.0,
            cadence: 100,
            snapshots: 5,
            output_scale: 1.5,
            velocity: [
                "A*sin(z) + C*cos(y)".to_string(),
                "B*sin(x) + A*cos(z)".to_string(),
                "C*sin(y) + B*cos(x)".to_string(),
            ],
            initial_condition: "tanh(10*(x + y + z))".to_string(),
        }
    }
}

impl AbcFlowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kappa < 0.0 {
            bail!("Diffusivity kappa must be non-negative.");
        }
        if self.dt <= 0.0 {
            bail!("Step size dt must be positive.");
        }
        if self.stop_time <= 0.0 {
            bail!("stop_time must be positive.");
        }
        if self.n < 4 || self.n % 2 != 0 {
            bail!("Resolution n must be an even number >= 4.");
        }
        if self.cadence == 0 {
            bail!("cadence must be at least 1.");
        }
        if self.snapshots == 0 {
            bail!("At least one snapshot must be kept.");
        }
        if self.snapshots > self.total_steps() {
            bail!(
                "Requested {} snapshots but the run only has {} steps.",
                self.snapshots,
                self.total_steps()
            );
        }
        if self.output_scale < 1.0 {
            bail!("output_scale must be at least 1.");
        }
        Ok(())
    }

    pub fn total_steps(&self) -> usize {
        (self.stop_time / self.dt).round() as usize
    }

    fn compile(&self, source: &str) -> Result<ScalarField> {
        ScalarField::compile(source, &["x", "y", "z"], &["A", "B", "C"], &[self.a, self.b, self.c])
            .with_context(|| format!("Invalid field expression '{}'", source))
    }
}

/// Volume averages reported while the solver runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowProperties {
    pub iteration: usize,
    pub time: f64,
    /// `<S^2>`
    pub mean_square: f64,
    /// `<|grad S|^2>`
    pub mean_gradient_square: f64,
}

/// Scalar and its gradient on the output grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub iteration: usize,
    pub time: f64,
    pub scalar: Vec<f64>,
    pub gradient: [Vec<f64>; 3],
}

impl FieldSnapshot {
    /// `|grad S|^2` pointwise.
    pub fn gradient_square(&self) -> Vec<f64> {
        let [gx, gy, gz] = &self.gradient;
        gx.iter()
            .zip(gy)
            .zip(gz)
            .map(|((x, y), z)| x * x + y * y + z * z)
            .collect()
    }
}

struct AdvectionOperator {
    grid: FourierGrid3,
    velocity: [Vec<f64>; 3],
    diag: Vec<f64>,
    mask: Vec<bool>,
}

impl SplitSystem for AdvectionOperator {
    fn len(&self) -> usize {
        self.grid.len()
    }

    fn linear_diagonal(&self) -> &[f64] {
        &self.diag
    }

    fn nonlinear(&mut self, state: &[Complex64], out: &mut [Complex64]) {
        let grad = self.grid.gradient(state);
        let mut advection = vec![0.0; self.grid.len()];
        for (axis, g) in grad.iter().enumerate() {
            for ((a, u), dg) in advection.iter_mut().zip(&self.velocity[axis]).zip(g) {
                *a -= u * dg;
            }
        }
        let spectral = self.grid.forward(&advection);
        for ((o, s), keep) in out.iter_mut().zip(spectral).zip(&self.mask) {
            *o = if *keep { s } else { Complex64::new(0.0, 0.0) };
        }
    }
}

pub struct AdvectionDiffusion {
    operator: AdvectionOperator,
    stepper: ImexRk222,
    state: Vec<Complex64>,
    dt: f64,
    time: f64,
    iteration: usize,
    output_n: usize,
}

impl AdvectionDiffusion {
    pub fn new(config: &AbcFlowConfig) -> Result<Self> {
        config.validate()?;
        let grid = FourierGrid3::periodic_box(config.n)?;
        let points = grid.points();

        let mut velocity: [Vec<f64>; 3] = Default::default();
        for (component, source) in velocity.iter_mut().zip(&config.velocity) {
            *component = config.compile(source)?.eval_points(&points, 3);
        }
        let initial = config.compile(&config.initial_condition)?.eval_points(&points, 3);

        let diag = grid
            .laplacian_symbol()
            .into_iter()
            .map(|l| config.kappa * l)
            .collect();
        let mask = grid.dealias_mask();
        let state = grid.forward(&initial);
        let output_n = grid.scaled_resolution(config.output_scale);
        debug!(
            "ABC flow solver: n = {}, output n = {}, kappa = {}, dt = {}",
            config.n, output_n, config.kappa, config.dt
        );

        Ok(Self {
            stepper: ImexRk222::new(grid.len()),
            operator: AdvectionOperator {
                grid,
                velocity,
                diag,
                mask,
            },
            state,
            dt: config.dt,
            time: 0.0,
            iteration: 0,
            output_n,
        })
    }

    pub fn grid(&self) -> &FourierGrid3 {
        &self.operator.grid
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn velocity(&self) -> &[Vec<f64>; 3] {
        &self.operator.velocity
    }

    pub fn step(&mut self) {
        self.stepper.step(&mut self.operator, &mut self.state, self.dt);
        self.iteration += 1;
        self.time = self.iteration as f64 * self.dt;
    }

    /// Scalar on the solver grid.
    pub fn scalar(&self) -> Vec<f64> {
        self.operator.grid.inverse(&self.state)
    }

    pub fn flow_properties(&self) -> FlowProperties {
        let grid = &self.operator.grid;
        let scalar = grid.inverse(&self.state);
        let grad = grid.gradient(&self.state);
        let squares: Vec<f64> = scalar.iter().map(|s| s * s).collect();
        let grad_squares: Vec<f64> = (0..grid.len())
            .map(|i| grad.iter().map(|g| g[i] * g[i]).sum())
            .collect();
        FlowProperties {
            iteration: self.iteration,
            time: self.time,
            mean_square: grid_average(&squares),
            mean_gradient_square: grid_average(&grad_squares),
        }
    }

    pub fn snapshot(&self) -> Result<FieldSnapshot> {
        let grid = &self.operator.grid;
        let m = self.output_n;
        let scalar = grid.resample(&self.state, m)?;
        let mut gradient: [Vec<f64>; 3] = Default::default();
        for (axis, slot) in gradient.iter_mut().enumerate() {
            *slot = grid.resample(&grid.derivative(&self.state, axis), m)?;
        }
        Ok(FieldSnapshot {
            iteration: self.iteration,
            time: self.time,
            scalar,
            gradient,
        })
    }

    pub fn output_coordinates(&self) -> Result<Vec<f64>> {
        Ok(FourierGrid3::new(self.output_n, self.operator.grid.bounds())?.coordinates())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcFlowProgress {
    pub iteration: usize,
    pub total_steps: usize,
    pub time: f64,
    pub done: bool,
}

/// Output of a complete ABC flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcFlowRun {
    pub config: AbcFlowConfig,
    /// Coordinates of the output grid along each axis.
    pub coordinates: Vec<f64>,
    pub history: Vec<FlowProperties>,
    pub snapshots: Vec<FieldSnapshot>,
}

/// Stepped driver that records flow properties and the trailing snapshots.
pub struct AbcFlowRunner {
    config: AbcFlowConfig,
    solver: AdvectionDiffusion,
    total_steps: usize,
    history: Vec<FlowProperties>,
    snapshots: Vec<FieldSnapshot>,
}

impl AbcFlowRunner {
    pub fn new(config: AbcFlowConfig) -> Result<Self> {
        let solver = AdvectionDiffusion::new(&config)?;
        let total_steps = config.total_steps();
        info!("Starting main loop: {} steps to t = {}", total_steps, config.stop_time);
        Ok(Self {
            config,
            solver,
            total_steps,
            history: Vec::new(),
            snapshots: Vec::new(),
        })
    }

    pub fn is_done(&self) -> bool {
        self.solver.iteration() >= self.total_steps
    }

    pub fn progress(&self) -> AbcFlowProgress {
        AbcFlowProgress {
            iteration: self.solver.iteration(),
            total_steps: self.total_steps,
            time: self.solver.time(),
            done: self.is_done(),
        }
    }

    pub fn run_steps(&mut self, batch: usize) -> Result<AbcFlowProgress> {
        for _ in 0..batch {
            if self.is_done() {
                break;
            }
            self.solver.step();
            let iteration = self.solver.iteration();

            if (iteration - 1) % self.config.cadence == 0 {
                let props = self.solver.flow_properties();
                info!(
                    "Iteration={}, Time={:e}, dt={:e}",
                    iteration, props.time, self.config.dt
                );
                info!(
                    "<S^2>={:.6}, <dS^2>={:.6}",
                    props.mean_square, props.mean_gradient_square
                );
                if !props.mean_square.is_finite() {
                    bail!("Solution blew up at iteration {}.", iteration);
                }
                self.history.push(props);
            }

            if iteration + self.config.snapshots > self.total_steps {
                self.snapshots.push(self.solver.snapshot()?);
            }
        }
        Ok(self.progress())
    }

    pub fn run_to_completion(mut self) -> Result<AbcFlowRun> {
        while !self.is_done() {
            self.run_steps(self.config.cadence)?;
        }
        self.take_result()
    }

    pub fn take_result(self) -> Result<AbcFlowRun> {
        if !self.is_done() {
            bail!(
                "Run is incomplete: {} of {} steps taken.",
                self.solver.iteration(),
                self.total_steps
            );
        }
        let coordinates = self.solver.output_coordinates()?;
        Ok(AbcFlowRun {
            config: self.config,
            coordinates,
            history: self.history,
            snapshots: self.snapshots,
        })
    }
}

/// Terms of `df/dt = -kappa d^2/ds^2 (E[|grad S|^2 | S = s] f)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcFlowReport {
    pub time: f64,
    pub s: Vec<f64>,
    pub density: Vec<f64>,
    /// `E[|grad S|^2 | S = s]`
    pub conditional_dissipation: Vec<f64>,
    pub dfdt: Vec<f64>,
    pub rhs: Vec<f64>,
    pub relative_residual: f64,
    pub history: Vec<FlowProperties>,
    /// Coordinates of the slice axes.
    pub slice_coordinates: Vec<f64>,
    /// Final scalar on the first `z` plane, indexed `[x][y]`.
    pub slice: Vec<Vec<f64>>,
}

pub fn analyse_abc(run: &AbcFlowRun, settings: &KolmogorovSettings) -> Result<AbcFlowReport> {
    settings.validate()?;
    if run.snapshots.len() < 5 {
        bail!(
            "The FKE analysis needs five snapshots, the run kept {}.",
            run.snapshots.len()
        );
    }
    let window = &run.snapshots[run.snapshots.len() - 5..];
    let bins = settings.bins;
    let range = settings.resolve_range(window.iter().map(|s| s.scalar.as_slice()))?;

    let densities = window
        .iter()
        .map(|s| Histogram::from_samples(&s.scalar, Some(range), bins).map(|h| h.density()))
        .collect::<Result<Vec<_>>>()?;
    let dt = window[4].time - window[3].time;
    let dfdt = kolmogorov::time_derivative_4th(&densities[0], &densities[1], &densities[3], &densities[4], dt)?;

    let centre = &window[2];
    let (s, density) = kolmogorov::density(&centre.scalar, range, bins)?;
    let conditional_dissipation =
        kolmogorov::conditional_expectation(&centre.scalar, &centre.gradient_square(), range, bins)?;
    let ds = s[1] - s[0];
    let rhs: Vec<f64> = kolmogorov::second_derivative(
        &kolmogorov::weighted(&conditional_dissipation, &density),
        ds,
    )
    .into_iter()
    .map(|v| -run.config.kappa * v)
    .collect();
    let balance = FkeBalance::new(dfdt, rhs)?;

    let last = &window[4];
    let m = run.coordinates.len();
    let slice = (0..m)
        .map(|i| (0..m).map(|j| last.scalar[(i * m + j) * m]).collect())
        .collect();

    Ok(AbcFlowReport {
        time: centre.time,
        s,
        density,
        conditional_dissipation,
        dfdt: balance.lhs,
        rhs: balance.rhs,
        relative_residual: balance.relative_residual,
        history: run.history.clone(),
        slice_coordinates: run.coordinates.clone(),
        slice,
    })
}
