//! Serialisable envelope for analysis results.

use crate::kolmogorov::KolmogorovSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report<T> {
    pub experiment: String,
    pub version: String,
    pub settings: KolmogorovSettings,
    pub results: T,
}

impl<T: Serialize> Report<T> {
    pub fn new(experiment: &str, settings: KolmogorovSettings, results: T) -> Self {
        Self {
            experiment: experiment.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            settings,
            results,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        to_json_pretty(self)
    }
}

/// Pretty JSON; non-finite floats become `null`.
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialise report")
}
