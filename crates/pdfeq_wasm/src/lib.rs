//! WASM bindings for the pdfeq core library.

mod runners;
mod system;

pub use runners::{WasmAbcFlowRunner, WasmDiffusionEnsembleRunner, WasmLorenzRunner};
pub use system::WasmOdeSystem;
