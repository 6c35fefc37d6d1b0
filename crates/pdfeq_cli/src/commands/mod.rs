pub mod abc_flow;
pub mod diffusion;
pub mod lorenz;

use anyhow::{Context, Result};
use clap::Args;
use log::info;
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::report::Report;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Options shared by every experiment.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// JSON experiment file; omitted fields keep their defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report path [default: <experiment>.json]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Histogram bins for the FKE estimates
    #[arg(long)]
    pub bins: Option<usize>,
}

impl CommonArgs {
    pub fn output_path(&self, experiment: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.json", experiment)))
    }

    pub fn apply(&self, settings: &mut KolmogorovSettings) {
        if let Some(bins) = self.bins {
            settings.bins = bins;
        }
    }
}

pub fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn write_report<T: Serialize>(path: &Path, report: &Report<T>) -> Result<()> {
    let json = report.to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_defaults_to_experiment_name() {
        let args = CommonArgs {
            config: None,
            output: None,
            bins: Some(32),
        };
        assert_eq!(args.output_path("lorenz"), PathBuf::from("lorenz.json"));
        let mut settings = KolmogorovSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.bins, 32);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let result: Result<KolmogorovSettings> = load_config(Some(Path::new("/nonexistent/pdfeq.json")));
        let message = format!("{:#}", result.err().expect("error"));
        assert!(message.contains("Failed to read config file"));
        let defaults: KolmogorovSettings = load_config(None).expect("defaults");
        assert_eq!(defaults.bins, 64);
    }
}
