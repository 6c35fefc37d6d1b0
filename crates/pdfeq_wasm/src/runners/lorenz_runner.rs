//! Stepped Lorenz ensemble runner.

use super::shared::{config_or_default, js_error, not_initialized, to_js};
use js_sys::Float64Array;
use pdfeq_core::kolmogorov::KolmogorovSettings;
use pdfeq_core::lorenz::{analyse_ode, Lorenz, LorenzConfig, OdeEnsembleRunner};
use pdfeq_core::report::Report;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmLorenzRunner {
    runner: Option<OdeEnsembleRunner<Lorenz>>,
    settings: KolmogorovSettings,
}

#[wasm_bindgen]
impl WasmLorenzRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(config_val: JsValue, settings_val: JsValue) -> Result<WasmLorenzRunner, JsValue> {
        console_error_panic_hook::set_once();

        let config: LorenzConfig = config_or_default(config_val, "Lorenz config")?;
        let settings: KolmogorovSettings = config_or_default(settings_val, "analysis settings")?;
        settings
            .validate()
            .map_err(|e| js_error("Invalid analysis settings", e))?;

        let runner =
            OdeEnsembleRunner::new(config.system, config).map_err(|e| js_error("Solver init failed", e))?;

        Ok(WasmLorenzRunner {
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

    /// Member states, flattened member-major.
    pub fn get_states(&self) -> Result<Float64Array, JsValue> {
        let runner = self.runner.as_ref().ok_or_else(not_initialized)?;
        Ok(Float64Array::from(runner.states()))
    }

    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let runner = self.runner.take().ok_or_else(not_initialized)?;
        let ensemble = runner.take_result().map_err(|e| js_error("Run failed", e))?;
        let report = analyse_ode(&ensemble, &self.settings).map_err(|e| js_error("Analysis failed", e))?;
        to_js(&Report::new("lorenz", self.settings, report))
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use serde_wasm_bindgen::to_value;

    #[test]
    fn lorenz_runner_reports_after_completion() {
        let config = LorenzConfig {
            members: 100,
            t_end: 0.02,
            ..LorenzConfig::default()
        };
        let mut runner =
            WasmLorenzRunner::new(to_value(&config).expect("config"), JsValue::UNDEFINED).expect("runner");
        assert_eq!(runner.get_states().expect("states").length(), 300);
        while !runner.is_done() {
            runner.run_steps(5).expect("run steps");
        }
        assert!(runner.get_result().is_ok());
    }

    #[test]
    fn lorenz_runner_rejects_component_out_of_range() {
        let config = LorenzConfig {
            component: 5,
            ..LorenzConfig::default()
        };
        let result = WasmLorenzRunner::new(to_value(&config).expect("config"), JsValue::UNDEFINED);
        let message = result.err().and_then(|e| e.as_string()).unwrap_or_default();
        assert!(message.contains("out of range"));
    }
}
