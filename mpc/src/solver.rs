//! Bridge to the nonlinear programming back-end.
//!
//! The problem handed over is
//!
//! ```text
//! min  cost(z)   s.t.   z in [vars_lower, vars_upper]
//!                       g(z) in [constraints_lower, constraints_upper]
//! ```
//!
//! [`AlmSolver`] runs an augmented Lagrangian outer loop around the PANOC
//! optimizer of `optimization_engine`. Each inner problem keeps the variable
//! box U as a hard set and moves `g(z) in C` into the objective:
//!
//! ```text
//! psi(z) = cost(z) + rho/2 * dist(g(z) + y/rho, C)^2
//! ```
//!
//! After every inner solve the multipliers become `y = rho (w - proj_C(w))`
//! with `w = g(z) + y/rho`, and `rho` grows while the constraint violation
//! stalls.

use std::fmt;
use std::time::{Duration, Instant};

use optimization_engine::constraints::Rectangle;
use optimization_engine::core::ExitStatus;
use optimization_engine::panoc::{PANOCCache, PANOCOptimizer};
use optimization_engine::{FunctionCallResult, Optimizer, Problem};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::bounds::Bounds;
use crate::config::{ConfigError, check, positive};
use crate::formulation::{DerivativeMode, Formulation};

/// Required shrink of the constraint violation per outer iteration before
/// the penalty is raised.
const SUFFICIENT_DECREASE: f64 = 0.25;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    Success,
    /// No point satisfies the constraints within tolerance.
    Infeasible,
    /// Time budget elapsed before convergence.
    TimeLimitExceeded,
    /// Non-finite values, a breakdown inside the back-end, or iterations
    /// exhausted without a converged inner solve.
    NumericalFailure,
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SolveStatus::Success => "success",
            SolveStatus::Infeasible => "infeasible",
            SolveStatus::TimeLimitExceeded => "time limit exceeded",
            SolveStatus::NumericalFailure => "numerical failure",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub objective: f64,
    pub x: Vec<f64>, // full decision vector
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub solve_time: Duration,
}

impl SolveResult {
    pub fn is_success(&self) -> bool {
        self.status == SolveStatus::Success
    }
}

/// Everything the back-end needs for one cycle.
#[derive(Debug, Clone)]
pub struct NlpProblem {
    pub initial_guess: Vec<f64>,
    pub bounds: Bounds,
    pub formulation: Formulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_time: f64, // wall-clock budget per solve [s]
    pub derivatives: DerivativeMode,
    pub tolerance: f64,            // inner (PANOC) fixed-point residual
    pub constraint_tolerance: f64, // outer constraint violation, infinity norm
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize, // per inner solve
    pub lbfgs_memory: usize,
    pub initial_penalty: f64,
    pub penalty_update_factor: f64,
    pub max_penalty: f64,
    pub multiplier_bound: f64, // multipliers are clamped to [-bound, bound]
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_time: 0.5,
            derivatives: DerivativeMode::Sparse,
            tolerance: 1e-5,
            constraint_tolerance: 1e-6,
            max_outer_iterations: 50,
            max_inner_iterations: 2000,
            lbfgs_memory: 10,
            initial_penalty: 10.0,
            penalty_update_factor: 5.0,
            max_penalty: 1e9,
            multiplier_bound: 1e12,
        }
    }
}

impl SolverOptions {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs_f64(self.max_time)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check(
            positive(self.max_time),
            format!("solver.max_time must be positive, got {}", self.max_time),
        )?;
        check(
            positive(self.tolerance),
            format!("solver.tolerance must be positive, got {}", self.tolerance),
        )?;
        check(
            positive(self.constraint_tolerance),
            format!(
                "solver.constraint_tolerance must be positive, got {}",
                self.constraint_tolerance
            ),
        )?;
        check(
            self.max_outer_iterations > 0,
            "solver.max_outer_iterations must be positive".to_string(),
        )?;
        check(
            self.max_inner_iterations > 0,
            "solver.max_inner_iterations must be positive".to_string(),
        )?;
        check(self.lbfgs_memory > 0, "solver.lbfgs_memory must be positive".to_string())?;
        check(
            positive(self.initial_penalty),
            "solver.initial_penalty must be positive".to_string(),
        )?;
        check(
            self.penalty_update_factor > 1.0,
            "solver.penalty_update_factor must exceed 1".to_string(),
        )?;
        check(
            self.max_penalty >= self.initial_penalty,
            "solver.max_penalty must not be below solver.initial_penalty".to_string(),
        )?;
        check(
            positive(self.multiplier_bound),
            "solver.multiplier_bound must be positive".to_string(),
        )
    }
}

/// A constrained nonlinear solver.
///
/// Implementations must leave the problem untouched and always return a
/// result; failure is reported through `SolveResult::status`.
pub trait NonlinearSolver {
    fn solve(&self, problem: &NlpProblem, options: &SolverOptions) -> SolveResult;
}

/// Augmented Lagrangian around PANOC from `optimization_engine`.
#[derive(Debug, Copy, Clone, Default)]
pub struct AlmSolver;

impl NonlinearSolver for AlmSolver {
    fn solve(&self, problem: &NlpProblem, options: &SolverOptions) -> SolveResult {
        let started = Instant::now();
        let budget = options.max_duration();
        let formulation = &problem.formulation;
        let bounds = &problem.bounds;

        if let Some(conflict) = bounds.first_conflict() {
            warn!(?conflict, "Inconsistent bounds, not invoking the solver");
            return rejected(problem, SolveStatus::Infeasible, started);
        }

        let set_u = Rectangle::new(
            Some(bounds.vars_lower.as_slice()),
            Some(bounds.vars_upper.as_slice()),
        );
        let mut panoc_cache =
            PANOCCache::new(formulation.n_vars(), options.tolerance, options.lbfgs_memory);

        let mut x = problem.initial_guess.clone();
        let mut multipliers = vec![0.0; formulation.n_constraints()];
        let mut penalty = options.initial_penalty;
        let mut violation = constraint_violation(formulation, bounds, &x);
        let mut inner_converged = false;
        let mut outer_iterations = 0;
        let mut inner_iterations = 0;

        let status = loop {
            if outer_iterations == options.max_outer_iterations {
                break exhausted_status(inner_converged, violation, options.constraint_tolerance);
            }
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break SolveStatus::TimeLimitExceeded;
            }
            outer_iterations += 1;

            let lagrangian = Lagrangian {
                formulation,
                bounds,
                multipliers: &multipliers,
                penalty,
                mode: options.derivatives,
            };
            let psi = |u: &[f64], cost: &mut f64| -> FunctionCallResult {
                *cost = lagrangian.value(u);
                Ok(())
            };
            let d_psi = |u: &[f64], grad: &mut [f64]| -> FunctionCallResult {
                lagrangian.gradient(u, grad);
                Ok(())
            };

            let inner = Problem::new(&set_u, d_psi, psi);
            let outcome = PANOCOptimizer::new(inner, &mut panoc_cache)
                .with_max_iter(options.max_inner_iterations)
                .with_max_duration(remaining)
                .solve(&mut x);

            let inner_status = match outcome {
                Ok(report) => {
                    inner_iterations += report.iterations();
                    report.exit_status()
                }
                Err(e) => {
                    warn!(error = ?e, "Inner solve raised an error");
                    break SolveStatus::NumericalFailure;
                }
            };

            let updated = lagrangian.multipliers_at(&x, options.multiplier_bound);
            multipliers = updated;

            let previous = violation;
            violation = constraint_violation(formulation, bounds, &x);
            inner_converged = matches!(inner_status, ExitStatus::Converged);
            trace!(
                outer = outer_iterations,
                ?inner_status,
                penalty,
                violation,
                "Outer iteration"
            );

            if matches!(inner_status, ExitStatus::NotConvergedOutOfTime) {
                break SolveStatus::TimeLimitExceeded;
            }
            if !violation.is_finite() {
                break SolveStatus::NumericalFailure;
            }
            if inner_converged && violation <= options.constraint_tolerance {
                break SolveStatus::Success;
            }
            if violation > SUFFICIENT_DECREASE * previous {
                penalty = (penalty * options.penalty_update_factor).min(options.max_penalty);
            }
        };
        let solve_time = started.elapsed();

        let objective = formulation.cost(&x);
        let finite = objective.is_finite() && x.iter().all(|v| v.is_finite());
        let status = if status == SolveStatus::Success && !finite {
            SolveStatus::NumericalFailure
        } else {
            status
        };

        debug!(
            %status,
            cost = objective,
            violation,
            outer_iterations,
            inner_iterations,
            solve_ms = solve_time.as_secs_f64() * 1e3,
            "Solve finished"
        );

        SolveResult {
            status,
            objective,
            x,
            outer_iterations,
            inner_iterations,
            solve_time,
        }
    }
}

/// Status once the outer iterations run out. Only a converged inner solve
/// that still violates the constraints counts as evidence of infeasibility.
fn exhausted_status(inner_converged: bool, violation: f64, tolerance: f64) -> SolveStatus {
    if inner_converged && violation > tolerance {
        SolveStatus::Infeasible
    } else {
        SolveStatus::NumericalFailure
    }
}

/// Inner objective of one outer iteration.
struct Lagrangian<'a> {
    formulation: &'a Formulation,
    bounds: &'a Bounds,
    multipliers: &'a [f64],
    penalty: f64,
    mode: DerivativeMode,
}

impl Lagrangian<'_> {
    /// `w - proj_C(w)` with `w = g(u) + y / rho`.
    fn shifted_residual(&self, u: &[f64]) -> Vec<f64> {
        let mut g = vec![0.0; self.formulation.n_constraints()];
        self.formulation.constraints(u, &mut g);

        for (i, gi) in g.iter_mut().enumerate() {
            let w = *gi + self.multipliers[i] / self.penalty;
            let lower = self.bounds.constraints_lower[i];
            let upper = self.bounds.constraints_upper[i];
            *gi = w - project(w, lower, upper);
        }
        g
    }

    fn value(&self, u: &[f64]) -> f64 {
        let residual = self.shifted_residual(u);
        let dist_sq: f64 = residual.iter().map(|r| r * r).sum();
        self.formulation.cost(u) + 0.5 * self.penalty * dist_sq
    }

    fn gradient(&self, u: &[f64], grad: &mut [f64]) {
        self.formulation.cost_gradient(u, grad, self.mode);

        let weighted: Vec<f64> =
            self.shifted_residual(u).iter().map(|r| self.penalty * r).collect();
        let mut penalty_grad = vec![0.0; grad.len()];
        self.formulation
            .constraints_jacobian_trans(u, &weighted, &mut penalty_grad, self.mode);

        for (g, p) in grad.iter_mut().zip(&penalty_grad) {
            *g += p;
        }
    }

    fn multipliers_at(&self, u: &[f64], bound: f64) -> Vec<f64> {
        self.shifted_residual(u)
            .iter()
            .map(|r| project(self.penalty * r, -bound, bound))
            .collect()
    }
}

/// Infinity-norm distance of `g(x)` from the constraint box.
fn constraint_violation(formulation: &Formulation, bounds: &Bounds, x: &[f64]) -> f64 {
    let mut g = vec![0.0; formulation.n_constraints()];
    formulation.constraints(x, &mut g);

    g.iter()
        .zip(bounds.constraints_lower.iter().zip(&bounds.constraints_upper))
        .map(|(&gi, (&lo, &hi))| (gi - project(gi, lo, hi)).abs())
        .fold(0.0, |worst, v| if v.is_nan() || v > worst { v } else { worst })
}

fn project(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

fn rejected(problem: &NlpProblem, status: SolveStatus, started: Instant) -> SolveResult {
    SolveResult {
        status,
        objective: problem.formulation.cost(&problem.initial_guess),
        x: problem.initial_guess.clone(),
        outer_iterations: 0,
        inner_iterations: 0,
        solve_time: started.elapsed(),
    }
}
