/// The `pdfeq_core` crate holds the numerics behind the forward Kolmogorov
/// equation (FKE) experiments: solvers that generate sample fields, and the
/// histogram estimators that turn those samples into the terms of the FKE.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem` (ODEs), `Steppable` and `SplitSystem` (stiff/non-stiff split).
/// - **Equation Engine**: bytecode VM for user-supplied vector fields and initial conditions.
/// - **Solvers**: explicit Runge-Kutta (RK4, Tsit5) and the IMEX RK222 scheme.
/// - **Spectral bases**: triply periodic Fourier and Chebyshev collocation.
/// - **Experiments**: ABC flow advection, 1D diffusion with OU boundaries, Lorenz ensembles.
/// - **Estimators**: histograms, conditional expectations and FKE balances.
pub mod advection;
pub mod chebyshev;
pub mod diffusion;
pub mod equation_engine;
pub mod fourier;
pub mod histogram;
pub mod kolmogorov;
pub mod lorenz;
pub mod report;
pub mod solvers;
pub mod stochastic;
pub mod traits;
