//! Ensembles of the Lorenz system and the FKE of a single component.
//!
//! Members start from a Gaussian cloud around `centre` and are advanced with
//! an explicit Runge-Kutta step, optionally followed by an additive noise
//! increment `noise * sqrt(dt) * W`. For component `k` with density `f(x)`
//!
//! `df/dt = -d/dx (E[F_k | X_k = x] f) + (noise^2 / 2) d^2 f/dx^2`.

use crate::equation_engine::{EquationError, EquationSystem};
use crate::histogram::Histogram;
use crate::kolmogorov::{self, FkeBalance, KolmogorovSettings};
use crate::solvers::{ExplicitRungeKutta, OdeStepper};
use crate::traits::{DynamicalSystem, Steppable};
use anyhow::{anyhow, bail, Result};
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lorenz {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for Lorenz {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl Lorenz {
    pub const EQUATIONS: [&'static str; 3] = ["sigma*(y - x)", "x*(rho - z) - y", "x*y - beta*z"];

    pub fn new(sigma: f64, rho: f64, beta: f64) -> Self {
        Self { sigma, rho, beta }
    }

    /// Same vector field compiled through the expression engine.
    pub fn from_equations(&self) -> Result<EquationSystem<f64>, EquationError> {
        let owned = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        EquationSystem::from_strings(
            &owned(&Self::EQUATIONS),
            &owned(&["x", "y", "z"]),
            &owned(&["sigma", "rho", "beta"]),
            vec![self.sigma, self.rho, self.beta],
        )
    }
}

impl DynamicalSystem<f64> for Lorenz {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        out[0] = self.sigma * (x[1] - x[0]);
        out[1] = x[0] * (self.rho - x[2]) - x[1];
        out[2] = x[0] * x[1] - self.beta * x[2];
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LorenzConfig {
    pub system: Lorenz,
    pub members: usize,
    pub centre: Vec<f64>,
    /// Standard deviation of the initial cloud in every direction.
    pub spread: f64,
    /// Additive noise amplitude.
    pub noise: f64,
    pub dt: f64,
    pub t_end: f64,
    pub snapshots: usize,
    /// State component whose density is analysed.
    pub component: usize,
    pub stepper: OdeStepper,
    pub seed: u64,
}

impl Default for LorenzConfig {
    fn default() -> Self {
        Self {
            system: Lorenz::default(),
            members: 4000,
            centre: vec![1.0, 1.0, 1.0],
            spread: 0.5,
            noise: 0.0,
            dt: 1e-3,
            t_end: 2.0,
            snapshots: 5,
            component: 2,
            stepper: OdeStepper::Rk4,
            seed: 42,
        }
    }
}

impl LorenzConfig {
    pub fn validate(&self) -> Result<()> {
        if self.members == 0 {
            bail!("The ensemble needs at least one member.");
        }
        if self.dt <= 0.0 {
            bail!("Step size dt must be positive.");
        }
        if self.t_end <= 0.0 {
            bail!("t_end must be positive.");
        }
        if self.spread < 0.0 || self.noise < 0.0 {
            bail!("spread and noise must be non-negative.");
        }
        if self.snapshots == 0 || self.snapshots > self.total_steps() {
            bail!(
                "snapshots must lie in 1..={}, got {}.",
                self.total_steps(),
                self.snapshots
            );
        }
        if self.component >= self.centre.len() {
            bail!(
                "Component {} is out of range for a {}-dimensional state.",
                self.component,
                self.centre.len()
            );
        }
        Ok(())
    }

    pub fn total_steps(&self) -> usize {
        (self.t_end / self.dt).round() as usize
    }
}

/// One component of every member at one time, with the matching component
/// of the vector field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeSnapshot {
    pub time: f64,
    pub values: Vec<f64>,
    pub field: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeEnsemble {
    pub config: LorenzConfig,
    pub dimension: usize,
    pub snapshots: Vec<OdeSnapshot>,
    /// Final states, member-major.
    pub final_states: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeProgress {
    pub iteration: usize,
    pub total_steps: usize,
    pub time: f64,
    pub done: bool,
}

/// Steps every member of an ensemble in lockstep.
pub struct OdeEnsembleRunner<S: DynamicalSystem<f64>> {
    system: S,
    config: LorenzConfig,
    stepper: ExplicitRungeKutta<f64>,
    rng: ChaChaRng,
    states: Vec<f64>,
    field: Vec<f64>,
    time: f64,
    iteration: usize,
    total_steps: usize,
    snapshots: Vec<OdeSnapshot>,
}

impl<S: DynamicalSystem<f64>> OdeEnsembleRunner<S> {
    pub fn new(system: S, config: LorenzConfig) -> Result<Self> {
        config.validate()?;
        let dim = system.dimension();
        if config.centre.len() != dim {
            bail!(
                "Initial centre has {} components but the system has dimension {}.",
                config.centre.len(),
                dim
            );
        }
        let mut rng = ChaChaRng::seed_from_u64(config.seed);
        let cloud = Normal::new(0.0, config.spread)
            .map_err(|e| anyhow!("Invalid spread {}: {}", config.spread, e))?;
        let mut states = Vec::with_capacity(config.members * dim);
        for _ in 0..config.members {
            for c in &config.centre {
                states.push(c + cloud.sample(&mut rng));
            }
        }
        let total_steps = config.total_steps();
        debug!(
            "ODE ensemble: {} members, dimension {}, {:?} stepping",
            config.members, dim, config.stepper
        );
        info!("Integrating ensemble: {} steps to t = {}", total_steps, config.t_end);

        Ok(Self {
            stepper: config.stepper.build(dim),
            field: vec![0.0; dim],
            system,
            config,
            rng,
            states,
            time: 0.0,
            iteration: 0,
            total_steps,
            snapshots: Vec::new(),
        })
    }

    pub fn is_done(&self) -> bool {
        self.iteration >= self.total_steps
    }

    pub fn progress(&self) -> OdeProgress {
        OdeProgress {
            iteration: self.iteration,
            total_steps: self.total_steps,
            time: self.time,
            done: self.is_done(),
        }
    }

    pub fn states(&self) -> &[f64] {
        &self.states
    }

    pub fn run_steps(&mut self, batch: usize) -> Result<OdeProgress> {
        let dim = self.system.dimension();
        let dt = self.config.dt;
        let kick = self.config.noise * dt.sqrt();
        for _ in 0..batch {
            if self.is_done() {
                break;
            }
            for member in self.states.chunks_mut(dim) {
                let mut t = self.time;
                self.stepper.step(&self.system, &mut t, member, dt);
                if kick > 0.0 {
                    for x in member.iter_mut() {
                        let w: f64 = StandardNormal.sample(&mut self.rng);
                        *x += kick * w;
                    }
                }
            }
            self.iteration += 1;
            self.time = self.iteration as f64 * dt;

            if self.states.iter().any(|x| !x.is_finite()) {
                bail!("Ensemble blew up at iteration {}.", self.iteration);
            }
            if self.iteration + self.config.snapshots > self.total_steps {
                let snapshot = self.snapshot();
                self.snapshots.push(snapshot);
            }
        }
        Ok(self.progress())
    }

    fn snapshot(&mut self) -> OdeSnapshot {
        let dim = self.system.dimension();
        let k = self.config.component;
        let mut values = Vec::with_capacity(self.config.members);
        let mut field = Vec::with_capacity(self.config.members);
        for member in self.states.chunks(dim) {
            self.system.apply(self.time, member, &mut self.field);
            values.push(member[k]);
            field.push(self.field[k]);
        }
        OdeSnapshot {
            time: self.time,
            values,
            field,
        }
    }

    pub fn run_to_completion(mut self) -> Result<OdeEnsemble> {
        let batch = (self.total_steps / 10).max(1);
        while !self.is_done() {
            self.run_steps(batch)?;
        }
        self.take_result()
    }

    pub fn take_result(self) -> Result<OdeEnsemble> {
        if !self.is_done() {
            bail!(
                "Run is incomplete: {} of {} steps taken.",
                self.iteration,
                self.total_steps
            );
        }
        Ok(OdeEnsemble {
            dimension: self.system.dimension(),
            config: self.config,
            snapshots: self.snapshots,
            final_states: self.states,
        })
    }
}

pub fn run_ensemble<S: DynamicalSystem<f64>>(system: S, config: &LorenzConfig) -> Result<OdeEnsemble> {
    OdeEnsembleRunner::new(system, config.clone())?.run_to_completion()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdeReport {
    pub time: f64,
    pub component: usize,
    pub x: Vec<f64>,
    pub density: Vec<f64>,
    /// `E[F_k | X_k = x]`
    pub drift: Vec<f64>,
    pub dfdt: Vec<f64>,
    pub rhs: Vec<f64>,
    pub relative_residual: f64,
}

pub fn analyse_ode(ensemble: &OdeEnsemble, settings: &KolmogorovSettings) -> Result<OdeReport> {
    settings.validate()?;
    if ensemble.snapshots.len() < 5 {
        bail!(
            "The FKE analysis needs five snapshots, the run kept {}.",
            ensemble.snapshots.len()
        );
    }
    let window = &ensemble.snapshots[ensemble.snapshots.len() - 5..];
    let bins = settings.bins;
    let range = settings.resolve_range(window.iter().map(|s| s.values.as_slice()))?;

    let densities = window
        .iter()
        .map(|s| Histogram::from_samples(&s.values, Some(range), bins).map(|h| h.density()))
        .collect::<Result<Vec<_>>>()?;
    let dt = window[4].time - window[3].time;
    let dfdt = kolmogorov::time_derivative_4th(&densities[0], &densities[1], &densities[3], &densities[4], dt)?;

    let centre = &window[2];
    let (x, density) = kolmogorov::density(&centre.values, range, bins)?;
    let drift = kolmogorov::conditional_expectation(&centre.values, &centre.field, range, bins)?;
    let dx = x[1] - x[0];
    let advection = kolmogorov::central_derivative(&kolmogorov::weighted(&drift, &density), dx);
    let diffusivity = 0.5 * ensemble.config.noise * ensemble.config.noise;
    let curvature = kolmogorov::second_derivative(&density, dx);
    let rhs = advection
        .iter()
        .zip(&curvature)
        .map(|(a, c)| -a + diffusivity * c)
        .collect();
    let balance = FkeBalance::new(dfdt, rhs)?;

    Ok(OdeReport {
        time: centre.time,
        component: ensemble.config.component,
        x,
        density,
        drift,
        dfdt: balance.lhs,
        rhs: balance.rhs,
        relative_residual: balance.relative_residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> LorenzConfig {
        LorenzConfig {
            members: 200,
            dt: 1e-3,
            t_end: 0.05,
            ..LorenzConfig::default()
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
    fn equation_system_matches_the_direct_field() {
        let lorenz = Lorenz::new(10.0, 28.0, 8.0 / 3.0);
        let compiled = lorenz.from_equations().expect("equations");
        let x = [1.5, -2.0, 20.0];
        let mut direct = [0.0; 3];
        let mut via_vm = [0.0; 3];
        lorenz.apply(0.0, &x, &mut direct);
        compiled.apply(0.0, &x, &mut via_vm);
        for (a, b) in direct.iter().zip(&via_vm) {
            assert!((a - b).abs() < 1e-12);
        }
        assert_eq!(compiled.param_index("rho"), Some(1));
    }

    #[test]
    fn zero_spread_members_follow_one_trajectory() {
        let config = LorenzConfig {
            members: 3,
            spread: 0.0,
            ..small_config()
        };
        let ensemble = run_ensemble(Lorenz::default(), &config).expect("ensemble");

        let mut reference = config.centre.clone();
        let mut stepper: ExplicitRungeKutta<f64> = config.stepper.build(3);
        let mut t = 0.0;
        for _ in 0..config.total_steps() {
            stepper.step(&Lorenz::default(), &mut t, &mut reference, config.dt);
        }
        for member in ensemble.final_states.chunks(3) {
            for (a, b) in member.iter().zip(&reference) {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn runner_keeps_trailing_snapshots() {
        let config = small_config();
        let mut runner = OdeEnsembleRunner::new(Lorenz::default(), config.clone()).expect("runner");
        assert_eq!(runner.states().len(), 600);
        runner.run_steps(7).expect("steps");
        assert_eq!(runner.progress().iteration, 7);
        let ensemble = runner.run_to_completion().expect("ensemble");
        assert_eq!(ensemble.snapshots.len(), 5);
        let last = ensemble.snapshots.last().expect("snapshot");
        assert!((last.time - config.t_end).abs() < 1e-12);
        assert_eq!(last.values.len(), config.members);
        assert_eq!(last.values[0], ensemble.final_states[2]);
    }

    #[test]
    fn noise_changes_the_ensemble_reproducibly() {
        let noisy = LorenzConfig {
            noise: 0.5,
            ..small_config()
        };
        let a = run_ensemble(Lorenz::default(), &noisy).expect("a");
        let b = run_ensemble(Lorenz::default(), &noisy).expect("b");
        let quiet = run_ensemble(Lorenz::default(), &small_config()).expect("quiet");
        assert_eq!(a.final_states, b.final_states);
        assert_ne!(a.final_states, quiet.final_states);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let mut config = small_config();
        config.component = 3;
        assert_err_contains(config.validate(), "out of range");

        let mut config = small_config();
        config.members = 0;
        assert_err_contains(config.validate(), "member");

        let config = LorenzConfig {
            centre: vec![1.0, 1.0],
            component: 0,
            ..small_config()
        };
        assert_err_contains(
            OdeEnsembleRunner::new(Lorenz::default(), config).map(|_| ()),
            "dimension 3",
        );
    }

    #[test]
    fn analysis_produces_consistent_terms() {
        let config = LorenzConfig {
            noise: 0.2,
            ..small_config()
        };
        let ensemble = run_ensemble(Lorenz::default(), &config).expect("ensemble");
        let settings = KolmogorovSettings {
            bins: 16,
            range: None,
        };
        let report = analyse_ode(&ensemble, &settings).expect("report");
        assert_eq!(report.component, 2);
        assert_eq!(report.x.len(), 16);
        assert_eq!(report.rhs.len(), report.dfdt.len());
        let dx = report.x[1] - report.x[0];
        let mass: f64 = report.density.iter().sum::<f64>() * dx;
        assert!((mass - 1.0).abs() < 1e-9);
        assert!(report.relative_residual.is_finite());
    }

    #[test]
    fn deterministic_ensemble_closes_the_fke_balance() {
        let config = LorenzConfig {
            members: 40_000,
            dt: 1e-2,
            t_end: 0.5,
            ..LorenzConfig::default()
        };
        let ensemble = run_ensemble(Lorenz::default(), &config).expect("ensemble");
        let report = analyse_ode(&ensemble, &KolmogorovSettings { bins: 64, range: None }).expect("report");
        assert!(
            report.relative_residual < 0.2,
            "relative residual {}",
            report.relative_residual
        );
    }
}
