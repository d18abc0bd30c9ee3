//! Objective and equality constraints of the tracking problem.
//!
//! Cost over the horizon:
//!
//! ```text
//!   sum_t  w_cte (cte_t - ref_cte)^2 + w_epsi (epsi_t - ref_epsi)^2 + w_v (v_t - ref_v)^2
//! + sum_t  w_delta delta_t^2 + w_a a_t^2
//! + sum_t  w_ddelta (delta_t+1 - delta_t)^2 + w_da (a_t+1 - a_t)^2
//! ```
//!
//! Constraints: entry `start + 0` of every state block is the variable itself
//! (pinned through the constraint bounds), entry `start + t + 1` is the defect
//! `state_t+1 - step(state_t, actuation_t)`.
//!
//! All evaluation is generic over [`Real`]. Derivatives are forward mode with
//! `Dual64`, either over the whole vector or block by block.

use nalgebra::{DMatrix, SVector};
use named_vec_ops::NamedVecOps;
use num_dual::Dual64;
use serde::{Deserialize, Serialize};

use crate::config::{CostWeights, HorizonConfig, ReferenceTargets};
use crate::layout::{ACTUATION_SIZE, Layout, STATE_SIZE};
use crate::model::{self, Actuation, PathCoefficients, Real, State};

/// How the evaluator differentiates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivativeMode {
    /// Seed every decision variable and run the full evaluator each time.
    Dense,
    /// Differentiate each cost term and each step block on its own inputs.
    #[default]
    Sparse,
}

const STEP_INPUTS: usize = STATE_SIZE + ACTUATION_SIZE;

/// Evaluator for one cycle. Built fresh each cycle and never mutated.
#[derive(Debug, Clone)]
pub struct Formulation {
    layout: Layout,
    horizon: HorizonConfig,
    weights: CostWeights,
    targets: ReferenceTargets,
    path: PathCoefficients,
}

impl Formulation {
    pub fn new(
        layout: Layout,
        horizon: HorizonConfig,
        weights: CostWeights,
        targets: ReferenceTargets,
        path: PathCoefficients,
    ) -> Self {
        debug_assert_eq!(layout.horizon(), horizon.steps);
        Self {
            layout,
            horizon,
            weights,
            targets,
            path,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn n_vars(&self) -> usize {
        self.layout.n_vars()
    }

    pub fn n_constraints(&self) -> usize {
        self.layout.n_constraints()
    }

    fn tracking_cost<T: Real>(&self, cte: T, epsi: T, v: T) -> T {
        let w = &self.weights;
        let r = &self.targets;
        square(cte - T::from(r.cte)) * w.tracking_cte
            + square(epsi - T::from(r.epsi)) * w.tracking_epsi
            + square(v - T::from(r.v)) * w.tracking_v
    }

    fn effort_cost<T: Real>(&self, delta: T, a: T) -> T {
        square(delta) * self.weights.effort_delta + square(a) * self.weights.effort_a
    }

    fn smoothness_cost<T: Real>(&self, delta0: T, delta1: T, a0: T, a1: T) -> T {
        square(delta1 - delta0) * self.weights.smoothness_delta
            + square(a1 - a0) * self.weights.smoothness_a
    }

    fn step<T: Real>(&self, state: &State<T>, actuation: &Actuation<T>) -> State<T> {
        model::step(state, actuation, &self.path, self.horizon.dt, self.horizon.lf)
    }

    fn tracking_indices(&self, t: usize) -> [usize; 3] {
        let [_, _, _, v, cte, epsi] = self.layout.state_indices(t);
        [cte, epsi, v]
    }

    fn smoothness_indices(&self, t: usize) -> [usize; 4] {
        let [delta0, a0] = self.layout.actuation_indices(t);
        let [delta1, a1] = self.layout.actuation_indices(t + 1);
        [delta0, delta1, a0, a1]
    }

    fn step_indices(&self, t: usize) -> [usize; STEP_INPUTS] {
        let s = self.layout.state_indices(t);
        let [delta, a] = self.layout.actuation_indices(t);
        [s[0], s[1], s[2], s[3], s[4], s[5], delta, a]
    }

    /// Objective value at `vars`.
    pub fn cost<T: Real>(&self, vars: &[T]) -> T {
        let mut cost = T::zero();

        for t in 0..self.layout.horizon() {
            let [cte, epsi, v] = self.tracking_indices(t).map(|i| vars[i]);
            cost = cost + self.tracking_cost(cte, epsi, v);
        }

        for t in 0..self.layout.steps() {
            let [delta, a] = self.layout.actuation_indices(t).map(|i| vars[i]);
            cost = cost + self.effort_cost(delta, a);
        }

        for t in 0..self.layout.steps() - 1 {
            let [delta0, delta1, a0, a1] = self.smoothness_indices(t).map(|i| vars[i]);
            cost = cost + self.smoothness_cost(delta0, delta1, a0, a1);
        }

        cost
    }

    /// Constraint vector at `vars`, written into `out` (length `N * 6`).
    pub fn constraints<T: Real>(&self, vars: &[T], out: &mut [T]) {
        debug_assert_eq!(out.len(), self.n_constraints());

        for start in self.layout.state_starts() {
            out[start] = vars[start];
        }

        for t in 0..self.layout.steps() {
            let here = self.layout.state_at(vars, t);
            let actuation = self.layout.actuation_at(vars, t);
            let next = self.layout.state_at(vars, t + 1);

            let defect = (next - self.step(&here, &actuation)).to_svector();
            for (row, value) in self.layout.state_indices(t + 1).into_iter().zip(defect.iter()) {
                out[row] = *value;
            }
        }
    }

    /// Cost and constraints together, the shape the solver consumes.
    pub fn evaluate<T: Real>(&self, vars: &[T]) -> (T, Vec<T>) {
        let mut constraints = vec![T::zero(); self.n_constraints()];
        self.constraints(vars, &mut constraints);
        (self.cost(vars), constraints)
    }

    /// Gradient of the cost at `vars`.
    pub fn cost_gradient(&self, vars: &[f64], grad: &mut [f64], mode: DerivativeMode) {
        match mode {
            DerivativeMode::Dense => {
                let mut seeded = lift(vars);
                for (i, g) in grad.iter_mut().enumerate() {
                    seeded[i].eps = 1.0;
                    *g = self.cost(&seeded).eps;
                    seeded[i].eps = 0.0;
                }
            }
            DerivativeMode::Sparse => {
                grad.fill(0.0);

                for t in 0..self.layout.horizon() {
                    accumulate_gradient(vars, self.tracking_indices(t), grad, |[cte, epsi, v]| {
                        self.tracking_cost(cte, epsi, v)
                    });
                }
                for t in 0..self.layout.steps() {
                    accumulate_gradient(vars, self.layout.actuation_indices(t), grad, |[delta, a]| {
                        self.effort_cost(delta, a)
                    });
                }
                for t in 0..self.layout.steps() - 1 {
                    accumulate_gradient(vars, self.smoothness_indices(t), grad, |[d0, d1, a0, a1]| {
                        self.smoothness_cost(d0, d1, a0, a1)
                    });
                }
            }
        }
    }

    /// `J(vars)^T d`, with `J` the Jacobian of [`Formulation::constraints`].
    pub fn constraints_jacobian_trans(
        &self,
        vars: &[f64],
        d: &[f64],
        out: &mut [f64],
        mode: DerivativeMode,
    ) {
        debug_assert_eq!(d.len(), self.n_constraints());

        match mode {
            DerivativeMode::Dense => {
                let mut seeded = lift(vars);
                let mut g = vec![Dual64::from(0.0); self.n_constraints()];
                for (i, o) in out.iter_mut().enumerate() {
                    seeded[i].eps = 1.0;
                    self.constraints(&seeded, &mut g);
                    *o = g.iter().zip(d).map(|(gj, dj)| gj.eps * dj).sum();
                    seeded[i].eps = 0.0;
                }
            }
            DerivativeMode::Sparse => {
                out.fill(0.0);

                // initial-state rows are the identity
                for start in self.layout.state_starts() {
                    out[start] += d[start];
                }

                for t in 0..self.layout.steps() {
                    let rows = self.layout.state_indices(t + 1);
                    let inputs = self.step_indices(t);

                    // defect = next - step(here): +1 on next
                    for row in rows {
                        out[row] += d[row];
                    }

                    for k in 0..STEP_INPUTS {
                        let mut local = inputs.map(|i| Dual64::from(vars[i]));
                        local[k].eps = 1.0;
                        let sensitivity = self.step_block(&local).to_svector();
                        out[inputs[k]] -= rows
                            .iter()
                            .zip(sensitivity.iter())
                            .map(|(&row, s)| s.eps * d[row])
                            .sum::<f64>();
                    }
                }
            }
        }
    }

    /// Dense constraint Jacobian (rows: constraints, columns: variables).
    pub fn constraints_jacobian(&self, vars: &[f64]) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.n_constraints(), self.n_vars());
        let mut seeded = lift(vars);
        let mut g = vec![Dual64::from(0.0); self.n_constraints()];

        for i in 0..self.n_vars() {
            seeded[i].eps = 1.0;
            self.constraints(&seeded, &mut g);
            for (j, gj) in g.iter().enumerate() {
                jacobian[(j, i)] = gj.eps;
            }
            seeded[i].eps = 0.0;
        }

        jacobian
    }

    fn step_block(&self, inputs: &[Dual64; STEP_INPUTS]) -> State<Dual64> {
        let state = State::from_svector(&SVector::from_fn(|i, _| inputs[i]));
        let actuation = Actuation {
            delta: inputs[STATE_SIZE],
            a: inputs[STATE_SIZE + 1],
        };
        self.step(&state, &actuation)
    }
}

#[inline(always)]
fn square<T: Real>(value: T) -> T {
    value * value
}

fn lift(vars: &[f64]) -> Vec<Dual64> {
    vars.iter().map(|&v| Dual64::from(v)).collect()
}

/// Add the gradient of a cost term over `K` variables into `grad`.
fn accumulate_gradient<const K: usize>(
    vars: &[f64],
    indices: [usize; K],
    grad: &mut [f64],
    term: impl Fn([Dual64; K]) -> Dual64,
) {
    for k in 0..K {
        let mut args = indices.map(|i| Dual64::from(vars[i]));
        args[k].eps = 1.0;
        grad[indices[k]] += term(args).eps;
    }
}
