use crate::traits::{DynamicalSystem, Scalar, SplitSystem, Steppable};
use anyhow::{bail, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Explicit Butcher tableau. `a` is stored as the strictly lower triangle,
/// row `i` holding the `i` coefficients of stage `i`.
#[derive(Debug, Clone)]
pub struct ButcherTableau {
    pub c: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
}

impl ButcherTableau {
    /// Classic Runge-Kutta 4th order.
    pub fn rk4() -> Self {
        Self {
            c: vec![0.0, 0.5, 0.5, 1.0],
            a: vec![vec![], vec![0.5], vec![0.0, 0.5], vec![0.0, 0.0, 1.0]],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
        }
    }

    /// Tsitouras 5(4), used here at fixed step with the 5th order weights.
    pub fn tsit5() -> Self {
        let b = vec![
            0.09646076681806523,
            0.01,
            0.4798896504144996,
            1.379008574103742,
            -3.290069515436081,
            2.324710524099774,
        ];
        Self {
            c: vec![0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
            a: vec![
                vec![],
                vec![0.161],
                vec![-0.008480655492356989, 0.335480655492357],
                vec![2.897153057105493, -6.359448489975075, 4.3622954328695815],
                vec![
                    5.325864828439257,
                    -11.748883564062828,
                    7.4955393428898365,
                    -0.09249506636175525,
                ],
                vec![
                    5.86145544294642,
                    -12.92096931784711,
                    8.159367898576159,
                    -0.071584973281401,
                    -0.028269050394068383,
                ],
            ],
            b,
        }
    }

    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

/// Fixed-step explicit Runge-Kutta integrator with preallocated stage buffers.
pub struct ExplicitRungeKutta<T: Scalar> {
    tableau: ButcherTableau,
    k: Vec<Vec<T>>,
    tmp: Vec<T>,
}

impl<T: Scalar> ExplicitRungeKutta<T> {
    pub fn new(tableau: ButcherTableau, dim: usize) -> Self {
        let zero = T::zero();
        let k = vec![vec![zero; dim]; tableau.stages()];
        Self {
            tableau,
            k,
            tmp: vec![zero; dim],
        }
    }

    pub fn rk4(dim: usize) -> Self {
        Self::new(ButcherTableau::rk4(), dim)
    }

    pub fn tsit5(dim: usize) -> Self {
        Self::new(ButcherTableau::tsit5(), dim)
    }
}

fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

impl<T: Scalar> Steppable<T> for ExplicitRungeKutta<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        let dim = state.len();

        for stage in 0..self.tableau.stages() {
            self.tmp[..dim].copy_from_slice(state);
            for (j, &a_ij) in self.tableau.a[stage].iter().enumerate() {
                if a_ij == 0.0 {
                    continue;
                }
                let coeff = dt * lift::<T>(a_ij);
                for i in 0..dim {
                    self.tmp[i] = self.tmp[i] + coeff * self.k[j][i];
                }
            }
            let stage_time = t0 + dt * lift::<T>(self.tableau.c[stage]);
            system.apply(stage_time, &self.tmp[..dim], &mut self.k[stage][..dim]);
        }

        for (stage, &b) in self.tableau.b.iter().enumerate() {
            let coeff = dt * lift::<T>(b);
            for i in 0..dim {
                state[i] = state[i] + coeff * self.k[stage][i];
            }
        }

        *t = t0 + dt;
    }
}

/// Named choice of explicit ODE integrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OdeStepper {
    #[default]
    Rk4,
    Tsit5,
}

impl OdeStepper {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rk4" => Ok(OdeStepper::Rk4),
            "tsit5" => Ok(OdeStepper::Tsit5),
            other => bail!("Unknown solver: {}", other),
        }
    }

    pub fn build<T: Scalar>(self, dim: usize) -> ExplicitRungeKutta<T> {
        match self {
            OdeStepper::Rk4 => ExplicitRungeKutta::rk4(dim),
            OdeStepper::Tsit5 => ExplicitRungeKutta::tsit5(dim),
        }
    }
}

/// Ascher-Ruuth-Spiteri (2,2,2) implicit-explicit Runge-Kutta scheme.
///
/// Treats the diagonal operator `L` of a [`SplitSystem`] implicitly and
/// `N(u)` explicitly. The scheme is stiffly accurate, so the last stage is
/// the new state.
pub struct ImexRk222 {
    f1: Vec<Complex64>,
    f2: Vec<Complex64>,
    stage: Vec<Complex64>,
}

impl ImexRk222 {
    pub const GAMMA: f64 = 1.0 - std::f64::consts::FRAC_1_SQRT_2;

    pub fn delta() -> f64 {
        1.0 - 1.0 / (2.0 * Self::GAMMA)
    }

    pub fn new(len: usize) -> Self {
        let zero = Complex64::new(0.0, 0.0);
        Self {
            f1: vec![zero; len],
            f2: vec![zero; len],
            stage: vec![zero; len],
        }
    }

    pub fn step(&mut self, system: &mut impl SplitSystem, state: &mut [Complex64], dt: f64) {
        let gamma = Self::GAMMA;
        let delta = Self::delta();
        let len = state.len();

        // Stage 1 is explicit: U1 = u^n.
        system.nonlinear(state, &mut self.f1);

        // (1 - dt gamma L) U2 = u^n + dt gamma N(U1)
        {
            let diag = system.linear_diagonal();
            for i in 0..len {
                let rhs = state[i] + self.f1[i] * (dt * gamma);
                self.stage[i] = rhs / (1.0 - dt * gamma * diag[i]);
            }
        }
        system.nonlinear(&self.stage, &mut self.f2);

        // (1 - dt gamma L) U3 = u^n + dt [delta N1 + (1 - delta) N2] + dt (1 - gamma) L U2
        let diag = system.linear_diagonal();
        for i in 0..len {
            let explicit = self.f1[i] * delta + self.f2[i] * (1.0 - delta);
            let implicit = self.stage[i] * ((1.0 - gamma) * diag[i]);
            let rhs = state[i] + (explicit + implicit) * dt;
            state[i] = rhs / (1.0 - dt * gamma * diag[i]);
        }
    }
}
