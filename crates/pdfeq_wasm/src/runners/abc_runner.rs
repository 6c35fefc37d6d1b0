//! Stepped ABC flow runner.

use super::shared::{config_or_default, js_error, not_initialized, to_js};
use pdfeq_core::advection::{analyse_abc, AbcFlowConfig, AbcFlowRunner};
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::report::Report;
use wasm_bindgen::prelude::*;

/// WASM-exported runner for the passive scalar in an ABC flow.
/// Runs batches of solver iterations so the caller can report progress.
#[wasm_bindgen]
pub struct WasmAbcFlowRunner {
    runner: Option<AbcFlowRunner>,
    settings: KolmogorovSettings,
}

#[wasm_bindgen]
impl WasmAbcFlowRunner {
    /// `config_val` and `settings_val` may be `undefined` for the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_val: JsValue, settings_val: JsValue) -> Result<WasmAbcFlowRunner, JsValue> {
        console_error_panic_hook::set_once();

        let config: AbcFlowConfig = config_or_default(config_val, "ABC flow config")?;
        let settings: KolmogorovSettings = config_or_default(settings_val, "analysis settings")?;
        settings
            .validate()
            .map_err(|e| js_error("Invalid analysis settings", e))?;

        let runner = AbcFlowRunner::new(config).map_err(|e| js_error("Solver init failed", e))?;

        Ok(WasmAbcFlowRunner {
            runner: Some(runner),
            settings,
        })
    }

    pub fn is_done(&self) -> bool {
        self.runner.as_ref().map_or(true, |runner| runner.is_done())
    }

    /// Run a batch of solver iterations and return progress.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let runner = self.runner.as_mut().ok_or_else(not_initialized)?;
        let progress = runner
            .run_steps(batch_size as usize)
            .map_err(|e| js_error("Solver step failed", e))?;
        to_js(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let runner = self.runner.as_ref().ok_or_else(not_initialized)?;
        to_js(&runner.progress())
    }

    /// Consumes the runner and returns the FKE report.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let runner = self.runner.take().ok_or_else(not_initialized)?;
        let run = runner.take_result().map_err(|e| js_error("Run failed", e))?;
        let report = analyse_abc(&run, &self.settings).map_err(|e| js_error("Analysis failed", e))?;
        to_js(&Report::new("abc-flow", self.settings, report))
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use serde_wasm_bindgen::to_value;

    fn small_config() -> JsValue {
        let config = AbcFlowConfig {
            n: 8,
            dt: 1e-2,
            stop_time: 0.1,
            cadence: 2,
            output_scale: 1.0,
            ..AbcFlowConfig::default()
        };
        to_value(&config).expect("config")
    }

    #[test]
    fn abc_runner_completes_and_reports() {
        let settings = to_value(&KolmogorovSettings { bins: 8, range: None }).expect("settings");
        let mut runner = WasmAbcFlowRunner::new(small_config(), settings).expect("runner");
        assert!(!runner.is_done());
        while !runner.is_done() {
            runner.run_steps(4).expect("run steps");
        }
        assert!(runner.get_result().is_ok());
        let message = runner.get_result().err().and_then(|e| e.as_string()).unwrap_or_default();
        assert!(message.contains("Runner not initialized"));
    }

    #[test]
    fn abc_runner_rejects_bad_config() {
        let config = to_value(&AbcFlowConfig {
            n: 7,
            ..AbcFlowConfig::default()
        })
        .expect("config");
        let result = WasmAbcFlowRunner::new(config, JsValue::UNDEFINED);
        let message = result.err().and_then(|e| e.as_string()).unwrap_or_default();
        assert!(message.contains("Solver init failed"));
    }
}
