//! Equation-defined ODE system stepped from JavaScript.

use pdfeq_core::equation_engine::EquationSystem;
use pdfeq_core::solvers::{ExplicitRungeKutta, OdeStepper};
use pdfeq_core::traits::{DynamicalSystem, Steppable};
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmOdeSystem {
    pub(crate) system: EquationSystem<f64>,
    state: Vec<f64>,
    t: f64,
    solver: ExplicitRungeKutta<f64>,
}

pub(crate) fn build_system(
    equations: &[String],
    params: Vec<f64>,
    param_names: &[String],
    var_names: &[String],
) -> Result<EquationSystem<f64>, JsValue> {
    if equations.len() != var_names.len() {
        return Err(JsValue::from_str(&format!(
            "Expected one equation per variable: {} equations, {} variables",
            equations.len(),
            var_names.len()
        )));
    }
    EquationSystem::from_strings(equations, var_names, param_names, params)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
impl WasmOdeSystem {
    #[wasm_bindgen(constructor)]
    pub fn new(
        equations: Vec<String>,
        params: Vec<f64>,
        param_names: Vec<String>,
        var_names: Vec<String>,
        solver_name: &str,
    ) -> Result<WasmOdeSystem, JsValue> {
        console_error_panic_hook::set_once();

        let system = build_system(&equations, params, &param_names, &var_names)?;
        let stepper = OdeStepper::from_name(solver_name).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let dim = system.dimension();

        Ok(WasmOdeSystem {
            system,
            state: vec![0.0; dim],
            t: 0.0,
            solver: stepper.build(dim),
        })
    }

    pub fn set_state(&mut self, state: &[f64]) -> Result<(), JsValue> {
        let dim = self.system.dimension();
        if state.len() != dim {
            return Err(JsValue::from_str(&format!(
                "State has {} components but the system has dimension {}",
                state.len(),
                dim
            )));
        }
        self.state.copy_from_slice(state);
        Ok(())
    }

    pub fn get_state(&self) -> Vec<f64> {
        self.state.clone()
    }

    pub fn set_t(&mut self, t: f64) {
        self.t = t;
    }

    pub fn get_t(&self) -> f64 {
        self.t
    }

    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), JsValue> {
        let index = self
            .system
            .param_index(name)
            .ok_or_else(|| JsValue::from_str(&format!("Unknown parameter: {}", name)))?;
        self.system.params[index] = value;
        Ok(())
    }

    pub fn step(&mut self, dt: f64) {
        self.solver.step(&self.system, &mut self.t, &mut self.state, dt);
    }

    /// Vector field at the current state.
    pub fn vector_field(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.system.dimension()];
        self.system.apply(self.t, &self.state, &mut out);
        out
    }
}
