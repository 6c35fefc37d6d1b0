//! Command line driver for the forward Kolmogorov equation experiments.
//!
//! Each subcommand integrates one problem, estimates the FKE terms from the
//! trailing snapshots and writes the report as pretty JSON.

mod commands;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pdfeq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Forward Kolmogorov equation experiments", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); falls back to RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Passive scalar advected by an ABC flow
    AbcFlow(commands::abc_flow::AbcFlowArgs),
    /// 1D diffusion with Ornstein-Uhlenbeck boundary values
    Diffusion(commands::diffusion::DiffusionArgs),
    /// Ensemble of the Lorenz system
    Lorenz(commands::lorenz::LorenzArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::AbcFlow(args) => commands::abc_flow::execute(args),
        Commands::Diffusion(args) => commands::diffusion::execute(args),
        Commands::Lorenz(args) => commands::lorenz::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::abc_flow::AbcFlowFile;
    use commands::lorenz::LorenzFile;
    use std::path::PathBuf;

    #[test]
    fn parses_abc_flow_overrides() {
        let cli = Cli::try_parse_from(["pdfeq", "abc-flow", "--n", "16", "--stop-time", "0.5", "--bins", "32"])
            .expect("parse");
        let Commands::AbcFlow(args) = cli.command else {
            panic!("expected abc-flow");
        };
        assert_eq!(args.n, Some(16));
        assert_eq!(args.stop_time, Some(0.5));
        assert_eq!(args.common.output_path("abc-flow"), PathBuf::from("abc-flow.json"));
    }

    #[test]
    fn parses_abc_flow_stop_time_sweep() {
        let cli = Cli::try_parse_from(["pdfeq", "abc-flow", "--stop-times", "0.05,0.5,1,2"]).expect("parse");
        let Commands::AbcFlow(args) = cli.command else {
            panic!("expected abc-flow");
        };
        let mut file = AbcFlowFile::default();
        args.apply(&mut file);
        assert_eq!(file.stop_times, vec![0.05, 0.5, 1.0, 2.0]);
        assert_eq!(file.runs().len(), 4);
        assert_eq!(file.analysis.bins, 128);

        assert!(Cli::try_parse_from(["pdfeq", "abc-flow", "--stop-time", "1", "--stop-times", "0.5"]).is_err());
    }

    #[test]
    fn parses_global_log_level_and_output() {
        let cli = Cli::try_parse_from([
            "pdfeq",
            "--log-level",
            "debug",
            "diffusion",
            "--paths",
            "10",
            "--no-space-time",
            "-o",
            "out.json",
        ])
        .expect("parse");
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Diffusion(args) = cli.command else {
            panic!("expected diffusion");
        };
        assert_eq!(args.paths, Some(10));
        assert!(args.no_space_time);
        assert_eq!(args.common.output_path("diffusion"), PathBuf::from("out.json"));
    }

    #[test]
    fn lorenz_overrides_apply_to_the_config() {
        let cli = Cli::try_parse_from(["pdfeq", "lorenz", "--members", "50", "--stepper", "tsit5", "--noise", "0.1"])
            .expect("parse");
        let Commands::Lorenz(args) = cli.command else {
            panic!("expected lorenz");
        };
        let mut file = LorenzFile::default();
        args.apply(&mut file).expect("apply");
        assert_eq!(file.ensemble.members, 50);
        assert_eq!(file.ensemble.noise, 0.1);
        assert_eq!(file.ensemble.stepper, pdfeq_core::solvers::OdeStepper::Tsit5);
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["pdfeq", "heat"]).is_err());
    }
}
