//! Diffusion with Ornstein-Uhlenbeck boundary values.

use super::{load_config, write_report, CommonArgs};
use anyhow::Result;
use clap::Args;
use log::info;
use pdfeq_core::diffusion::{
    analyse_diffusion, run_diffusion, DiffusionConfig, DiffusionEnsembleRunner, DiffusionReport, DiffusionRun,
    EnsembleConfig,
};
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::report::Report;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionFile {
    /// Single long run recorded in full.
    pub space_time: DiffusionConfig,
    pub ensemble: EnsembleConfig,
    pub analysis: KolmogorovSettings,
}

#[derive(Debug, Serialize)]
pub struct DiffusionResults {
    pub space_time: Option<DiffusionRun>,
    pub ensemble: DiffusionReport,
}

#[derive(Args, Debug)]
pub struct DiffusionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Ensemble paths
    #[arg(long)]
    pub paths: Option<usize>,

    /// Time grid points per ensemble path
    #[arg(long)]
    pub n_time: Option<usize>,

    /// Final time of each ensemble path
    #[arg(long)]
    pub t_end: Option<f64>,

    /// Chebyshev points
    #[arg(long)]
    pub nz: Option<usize>,

    /// Seed for the boundary noise
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip the single space-time run
    #[arg(long)]
    pub no_space_time: bool,
}

impl DiffusionArgs {
    pub fn apply(&self, file: &mut DiffusionFile) {
        let ensemble = &mut file.ensemble;
        if let Some(paths) = self.paths {
            ensemble.paths = paths;
        }
        if let Some(n) = self.n_time {
            ensemble.diffusion.n_time = n;
        }
        if let Some(t) = self.t_end {
            ensemble.diffusion.t_end = t;
        }
        if let Some(nz) = self.nz {
            ensemble.diffusion.nz = nz;
            file.space_time.nz = nz;
        }
        if let Some(seed) = self.seed {
            ensemble.diffusion.seed = seed;
            file.space_time.seed = seed;
        }
        self.common.apply(&mut file.analysis);
    }
}

pub fn execute(args: DiffusionArgs) -> Result<()> {
    let mut file: DiffusionFile = load_config(args.common.config.as_deref())?;
    args.apply(&mut file);
    file.analysis.validate()?;

    let space_time = if args.no_space_time {
        None
    } else {
        info!(
            "Space-time run: {} steps to t = {}",
            file.space_time.steps(),
            file.space_time.t_end
        );
        Some(run_diffusion(&file.space_time)?)
    };

    let start = Instant::now();
    let ensemble = DiffusionEnsembleRunner::new(file.ensemble)?.run_to_completion()?;
    info!("Ensemble finished in {:.2} s", start.elapsed().as_secs_f64());

    let report = analyse_diffusion(&ensemble, &file.analysis)?;
    info!("Flux balance residual: {:.3e}", report.flux_residual);
    write_report(
        &args.common.output_path("diffusion"),
        &Report::new(
            "diffusion",
            file.analysis,
            DiffusionResults {
                space_time,
                ensemble: report,
            },
        ),
    )
}
