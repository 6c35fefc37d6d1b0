//! Stepped ensemble runner for diffusion with stochastic boundaries.

use super::shared::{config_or_default, js_error, not_initialized, to_js};
use pdfeq_core::diffusion::{analyse_diffusion, DiffusionEnsembleRunner, EnsembleConfig};
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::report::Report;
use wasm_bindgen::prelude::*;

/// WASM-exported ensemble runner; each batch solves `batch_size` paths.
#[wasm_bindgen]
pub struct WasmDiffusionEnsembleRunner {
    runner: Option<DiffusionEnsembleRunner>,
    settings: KolmogorovSettings,
}

#[wasm_bindgen]
impl WasmDiffusionEnsembleRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(config_val: JsValue, settings_val: JsValue) -> Result<WasmDiffusionEnsembleRunner, JsValue> {
        console_error_panic_hook::set_once();

        let config: EnsembleConfig = config_or_default(config_val, "ensemble config")?;
        let settings: KolmogorovSettings = config_or_default(settings_val, "analysis settings")?;
        settings
            .validate()
            .map_err(|e| js_error("Invalid analysis settings", e))?;

        let runner = DiffusionEnsembleRunner::new(config).map_err(|e| js_error("Solver init failed", e))?;

        Ok(WasmDiffusionEnsembleRunner {
            runner: Some(runner),
            settings,
        })
    }

    pub fn is_done(&self) -> bool {
        self.runner.as_ref().map_or(true, |runner| runner.is_done())
    }

    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let runner = self.runner.as_mut().ok_or_else(not_initialized)?;
        let progress = runner
            .run_steps(batch_size as usize)
            .map_err(|e| js_error("Ensemble step failed", e))?;
        to_js(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let runner = self.runner.as_ref().ok_or_else(not_initialized)?;
        to_js(&runner.progress())
    }

    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let runner = self.runner.take().ok_or_else(not_initialized)?;
        let ensemble = runner.take_result().map_err(|e| js_error("Run failed", e))?;
        let report = analyse_diffusion(&ensemble, &self.settings).map_err(|e| js_error("Analysis failed", e))?;
        to_js(&Report::new("diffusion", self.settings, report))
    }
}
