use num_complex::Complex64;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Numeric type the ODE machinery and expression VM are generic over.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Right-hand side of an ODE `dx/dt = F(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// x: current state
    /// t: current time
    /// out: buffer receiving dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// A spectral evolution problem `du/dt = L u + N(u)` whose stiff part `L`
/// is diagonal in the chosen basis.
///
/// `nonlinear` takes `&mut self` so implementations can keep transform
/// buffers without reallocating every stage.
pub trait SplitSystem {
    /// Number of spectral coefficients.
    fn len(&self) -> usize;

    /// Diagonal entries of the implicit operator `L`.
    fn linear_diagonal(&self) -> &[f64];

    /// Evaluates the explicit term `N(u)` into `out`.
    fn nonlinear(&mut self, state: &[Complex64], out: &mut [Complex64]);
}
