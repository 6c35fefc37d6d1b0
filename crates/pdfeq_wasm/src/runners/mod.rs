//! Experiment runners exported to JavaScript.
//!
//! Each runner wraps a stepped core driver so long runs can be split into
//! batches, with the FKE analysis performed when the result is requested.

mod abc_runner;
mod diffusion_runner;
mod lorenz_runner;
mod shared;

pub use abc_runner::WasmAbcFlowRunner;
pub use diffusion_runner::WasmDiffusionEnsembleRunner;
pub use lorenz_runner::WasmLorenzRunner;

#[cfg(test)]
mod tests {
    use super::{WasmAbcFlowRunner, WasmDiffusionEnsembleRunner, WasmLorenzRunner};

    #[test]
    fn runner_reexports_are_wired() {
        assert!(std::any::type_name::<WasmAbcFlowRunner>().ends_with("WasmAbcFlowRunner"));
        assert!(std::any::type_name::<WasmDiffusionEnsembleRunner>()
            .ends_with("WasmDiffusionEnsembleRunner"));
        assert!(std::any::type_name::<WasmLorenzRunner>().ends_with("WasmLorenzRunner"));
    }
}
