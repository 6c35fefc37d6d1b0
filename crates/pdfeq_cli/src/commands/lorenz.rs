//! Lorenz ensembles.

use super::{load_config, write_report, CommonArgs};
use anyhow::Result;
use clap::Args;
use log::info;
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::lorenz::{analyse_ode, run_ensemble, LorenzConfig};
use pdfeq_core::report::Report;
use pdfeq_core::solvers::OdeStepper;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LorenzFile {
    pub ensemble: LorenzConfig,
    pub analysis: KolmogorovSettings,
}

#[derive(Args, Debug)]
pub struct LorenzArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Ensemble members
    #[arg(long)]
    pub members: Option<usize>,

    #[arg(long)]
    pub t_end: Option<f64>,

    #[arg(long)]
    pub dt: Option<f64>,

    /// Additive noise amplitude
    #[arg(long)]
    pub noise: Option<f64>,

    /// Standard deviation of the initial cloud
    #[arg(long)]
    pub spread: Option<f64>,

    /// State component to analyse (0, 1 or 2)
    #[arg(long)]
    pub component: Option<usize>,

    /// Integrator (rk4, tsit5)
    #[arg(long)]
    pub stepper: Option<String>,

    #[arg(long)]
    pub seed: Option<u64>,
}

impl LorenzArgs {
    pub fn apply(&self, file: &mut LorenzFile) -> Result<()> {
        let config = &mut file.ensemble;
        if let Some(members) = self.members {
            config.members = members;
        }
        if let Some(t) = self.t_end {
            config.t_end = t;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(noise) = self.noise {
            config.noise = noise;
        }
        if let Some(spread) = self.spread {
            config.spread = spread;
        }
        if let Some(component) = self.component {
            config.component = component;
        }
        if let Some(name) = &self.stepper {
            config.stepper = OdeStepper::from_name(name)?;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        self.common.apply(&mut file.analysis);
        Ok(())
    }
}

pub fn execute(args: LorenzArgs) -> Result<()> {
    let mut file: LorenzFile = load_config(args.common.config.as_deref())?;
    args.apply(&mut file)?;
    file.analysis.validate()?;

    let config = &file.ensemble;
    info!(
        "Lorenz ensemble: {} members, noise = {}, t_end = {}",
        config.members, config.noise, config.t_end
    );
    let start = Instant::now();
    let ensemble = run_ensemble(config.system, config)?;
    info!("Ensemble finished in {:.2} s", start.elapsed().as_secs_f64());

    let report = analyse_ode(&ensemble, &file.analysis)?;
    info!("FKE relative residual: {:.3e}", report.relative_residual);
    write_report(
        &args.common.output_path("lorenz"),
        &Report::new("lorenz", file.analysis, report),
    )
}
