//! Variable and constraint bounds, and the initial guess.

use crate::config::ActuatorLimits;
use crate::layout::Layout;
use crate::model::State64;

/// A bound pair that no point can satisfy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BoundConflict {
    Variable(usize),
    Constraint(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub vars_lower: Vec<f64>,
    pub vars_upper: Vec<f64>,
    pub constraints_lower: Vec<f64>,
    pub constraints_upper: Vec<f64>,
}

impl Bounds {
    pub fn new(layout: &Layout, limits: &ActuatorLimits, state: &State64) -> Self {
        let (vars_lower, vars_upper) = variable_bounds(layout, limits);
        let (constraints_lower, constraints_upper) = constraint_bounds(layout, state);
        Self {
            vars_lower,
            vars_upper,
            constraints_lower,
            constraints_upper,
        }
    }

    /// First bound pair that is NaN or has `lower > upper`.
    pub fn first_conflict(&self) -> Option<BoundConflict> {
        let conflict = |lower: &[f64], upper: &[f64]| {
            lower
                .iter()
                .zip(upper)
                .position(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi)
        };

        conflict(&self.vars_lower, &self.vars_upper)
            .map(BoundConflict::Variable)
            .or_else(|| {
                conflict(&self.constraints_lower, &self.constraints_upper)
                    .map(BoundConflict::Constraint)
            })
    }
}

/// States are free, steering and throttle are boxed by the actuator limits.
pub fn variable_bounds(layout: &Layout, limits: &ActuatorLimits) -> (Vec<f64>, Vec<f64>) {
    let n = layout.n_vars();
    let mut lower = vec![-limits.unbounded; n];
    let mut upper = vec![limits.unbounded; n];

    let delta = layout.delta_start();
    let a = layout.a_start();

    lower[delta..a].fill(-limits.max_steer);
    upper[delta..a].fill(limits.max_steer);
    lower[a..n].fill(-limits.max_throttle);
    upper[a..n].fill(limits.max_throttle);

    (lower, upper)
}

/// Defects must vanish; the t = 0 rows pin the current state.
pub fn constraint_bounds(layout: &Layout, state: &State64) -> (Vec<f64>, Vec<f64>) {
    let mut lower = vec![0.0; layout.n_constraints()];
    layout.set_state(&mut lower, 0, state);
    let upper = lower.clone();
    (lower, upper)
}

/// Zeros everywhere except the current state at t = 0.
pub fn initial_guess(layout: &Layout, state: &State64) -> Vec<f64> {
    let mut vars = vec![0.0; layout.n_vars()];
    layout.set_state(&mut vars, 0, state);
    vars
}
