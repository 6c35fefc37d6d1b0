//! Passive scalar in an ABC flow.

use super::{load_config, write_report, CommonArgs};
use anyhow::Result;
use clap::Args;
use log::info;
use pdfeq_core::advection::{analyse_abc, AbcFlowConfig, AbcFlowRunner};
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::report::Report;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Bins used for the ABC flow densities unless the file or `--bins` says otherwise.
pub const ABC_FLOW_BINS: usize = 128;

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AbcFlowFile {
    pub solver: AbcFlowConfig,
    pub analysis: KolmogorovSettings,
    /// One run per entry; empty runs once to `solver.stop_time`.
    pub stop_times: Vec<f64>,
}

impl Default for AbcFlowFile {
    fn default() -> Self {
        Self {
            solver: AbcFlowConfig::default(),
            analysis: KolmogorovSettings {
                bins: ABC_FLOW_BINS,
                range: None,
            },
            stop_times: Vec::new(),
        }
    }
}

impl AbcFlowFile {
    /// Solver configuration for each requested stop time.
    pub fn runs(&self) -> Vec<AbcFlowConfig> {
        if self.stop_times.is_empty() {
            return vec![self.solver.clone()];
        }
        self.stop_times
            .iter()
            .map(|&stop_time| AbcFlowConfig {
                stop_time,
                ..self.solver.clone()
            })
            .collect()
    }
}

#[derive(Args, Debug)]
pub struct AbcFlowArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Simulation stop time
    #[arg(long, conflicts_with = "stop_times")]
    pub stop_time: Option<f64>,

    /// Comma separated stop times, one run each (e.g. 0.05,0.5,1,2)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub stop_times: Option<Vec<f64>>,

    /// Fourier modes per direction
    #[arg(long)]
    pub n: Option<usize>,

    /// Time step
    #[arg(long)]
    pub dt: Option<f64>,

    /// Diffusivity
    #[arg(long)]
    pub kappa: Option<f64>,
}

impl AbcFlowArgs {
    pub fn apply(&self, file: &mut AbcFlowFile) {
        let solver = &mut file.solver;
        if let Some(t) = self.stop_time {
            solver.stop_time = t;
            file.stop_times.clear();
        }
        if let Some(n) = self.n {
            solver.n = n;
        }
        if let Some(dt) = self.dt {
            solver.dt = dt;
        }
        if let Some(kappa) = self.kappa {
            solver.kappa = kappa;
        }
        if let Some(times) = &self.stop_times {
            file.stop_times = times.clone();
        }
        self.common.apply(&mut file.analysis);
    }
}

pub fn execute(args: AbcFlowArgs) -> Result<()> {
    let mut file: AbcFlowFile = load_config(args.common.config.as_deref())?;
    args.apply(&mut file);
    file.analysis.validate()?;

    let mut reports = Vec::new();
    for config in file.runs() {
        info!(
            "ABC flow: n = {}, kappa = {}, dt = {}, stop time = {}",
            config.n, config.kappa, config.dt, config.stop_time
        );
        let start = Instant::now();
        let run = AbcFlowRunner::new(config)?.run_to_completion()?;
        info!("Main loop finished in {:.2} s", start.elapsed().as_secs_f64());

        let report = analyse_abc(&run, &file.analysis)?;
        info!("FKE relative residual: {:.3e}", report.relative_residual);
        reports.push(report);
    }
    write_report(
        &args.common.output_path("abc-flow"),
        &Report::new("abc-flow", file.analysis, reports),
    )
}
