//! One control cycle: predict, formulate, solve, extract.

use tracing::{debug, warn};

use crate::bounds::{Bounds, initial_guess};
use crate::config::{MpcConfig, ReferenceTargets};
use crate::error::MpcError;
use crate::formulation::Formulation;
use crate::layout::Layout;
use crate::model::{self, Actuation64, PathCoefficients, Pose, State64};
use crate::solver::{AlmSolver, NlpProblem, NonlinearSolver, SolveResult};

/// First actuation of a successful solve. The rest of the plan is dropped;
/// the next cycle replans from fresh sensing.
pub fn first_actuation(result: &SolveResult, layout: &Layout) -> Result<Actuation64, MpcError> {
    if !result.is_success() {
        return Err(MpcError::SolverFailed(result.status));
    }
    Ok(layout.actuation_at(&result.x, 0))
}

/// A solved horizon, decoded step by step.
#[derive(Debug, Clone)]
pub struct Plan {
    pub result: SolveResult,
    pub states: Vec<State64>,         // N states, index 0 is the pinned current state
    pub actuations: Vec<Actuation64>, // N - 1 actuations
}

impl Plan {
    pub fn decode(result: SolveResult, layout: &Layout) -> Result<Self, MpcError> {
        if !result.is_success() {
            return Err(MpcError::SolverFailed(result.status));
        }
        let states = (0..layout.horizon()).map(|t| layout.state_at(&result.x, t)).collect();
        let actuations = (0..layout.steps()).map(|t| layout.actuation_at(&result.x, t)).collect();
        Ok(Self {
            result,
            states,
            actuations,
        })
    }

    pub fn first_actuation(&self) -> Actuation64 {
        self.actuations[0]
    }
}

pub struct Controller<S = AlmSolver> {
    config: MpcConfig,
    layout: Layout,
    targets: Option<ReferenceTargets>,
    solver: S,
}

impl Controller<AlmSolver> {
    pub fn new(config: MpcConfig) -> Result<Self, MpcError> {
        Self::with_solver(config, AlmSolver)
    }
}

impl<S: NonlinearSolver> Controller<S> {
    pub fn with_solver(config: MpcConfig, solver: S) -> Result<Self, MpcError> {
        config.validate()?;
        let layout = Layout::new(config.horizon.steps);
        Ok(Self {
            config,
            layout,
            targets: None,
            solver,
        })
    }

    /// Set the tracking targets. Must be called before any solve.
    pub fn init(&mut self, targets: ReferenceTargets) {
        debug!(?targets, "Reference targets set");
        self.targets = Some(targets);
    }

    pub fn config(&self) -> &MpcConfig {
        &self.config
    }

    /// Optimal steering and throttle for the first step from `state`.
    pub fn solve(
        &self,
        state: &State64,
        coeffs: &PathCoefficients,
    ) -> Result<Actuation64, MpcError> {
        let result = self.optimise(state, coeffs)?;
        first_actuation(&result, &self.layout)
    }

    /// Like [`Controller::solve`] but keeps the whole planned horizon.
    pub fn solve_full(&self, state: &State64, coeffs: &PathCoefficients) -> Result<Plan, MpcError> {
        let result = self.optimise(state, coeffs)?;
        Plan::decode(result, &self.layout)
    }

    /// Latency compensation: advance a measured pose by `dt`.
    pub fn predict(&self, pose: &Pose<f64>, actuation: &Actuation64, dt: f64) -> Pose<f64> {
        model::predict(pose, actuation, dt, self.config.horizon.lf)
    }

    /// Full cycle: predict over the configured latency, recompute the path
    /// errors at the predicted pose, then solve from there.
    pub fn cycle(
        &self,
        measured: &State64,
        last_actuation: &Actuation64,
        coeffs: &PathCoefficients,
    ) -> Result<Actuation64, MpcError> {
        let pose = self.predict(&measured.pose(), last_actuation, self.config.latency);
        let (f, heading_des) = model::evaluate_path(coeffs, pose.x);
        let predicted = pose.with_errors(f - pose.y, pose.psi - heading_des);
        self.solve(&predicted, coeffs)
    }

    fn optimise(
        &self,
        state: &State64,
        coeffs: &PathCoefficients,
    ) -> Result<SolveResult, MpcError> {
        let targets = self.targets.ok_or(MpcError::NotInitialised)?;

        let problem = NlpProblem {
            initial_guess: initial_guess(&self.layout, state),
            bounds: Bounds::new(&self.layout, &self.config.limits, state),
            formulation: Formulation::new(
                self.layout,
                self.config.horizon,
                self.config.weights,
                targets,
                *coeffs,
            ),
        };

        let result = self.solver.solve(&problem, &self.config.solver);
        if result.is_success() {
            debug!(cost = result.objective, "Cycle solved");
        } else {
            warn!(status = %result.status, cost = result.objective, "Cycle failed, no actuation");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{SolveStatus, SolverOptions};
    use std::cell::Cell;
    use std::time::Duration;

    /// Returns a canned status and counts calls.
    struct Scripted {
        status: SolveStatus,
        calls: Cell<usize>,
    }

    impl NonlinearSolver for Scripted {
        fn solve(&self, problem: &NlpProblem, _options: &SolverOptions) -> SolveResult {
            self.calls.set(self.calls.get() + 1);
            let mut x = problem.initial_guess.clone();
            let layout = problem.formulation.layout();
            x[layout.delta_start()] = 0.2;
            x[layout.a_start()] = -0.4;
            SolveResult {
                status: self.status,
                objective: 1.0,
                x,
                outer_iterations: 1,
                inner_iterations: 1,
                solve_time: Duration::ZERO,
            }
        }
    }

    fn scripted(status: SolveStatus) -> Controller<Scripted> {
        let solver = Scripted { status, calls: Cell::new(0) };
        Controller::with_solver(MpcConfig::default(), solver).unwrap()
    }

    fn state() -> State64 {
        State64 { x: 0.0, y: 0.0, psi: 0.0, v: 10.0, cte: 0.0, epsi: 0.0 }
    }

    #[test]
    fn solve_without_init_fails_fast() {
        let controller = scripted(SolveStatus::Success);

        let err = controller.solve(&state(), &PathCoefficients::default()).unwrap_err();

        assert!(matches!(err, MpcError::NotInitialised));
        assert_eq!(controller.solver.calls.get(), 0);
    }

    #[test]
    fn success_yields_first_actuation() {
        let mut controller = scripted(SolveStatus::Success);
        controller.init(ReferenceTargets::new(0.0, 0.0, 10.0));

        let u = controller.solve(&state(), &PathCoefficients::default()).unwrap();

        assert_eq!(u, Actuation64 { delta: 0.2, a: -0.4 });
    }

    #[test]
    fn failed_status_yields_no_actuation() {
        for status in [
            SolveStatus::Infeasible,
            SolveStatus::TimeLimitExceeded,
            SolveStatus::NumericalFailure,
        ] {
            let mut controller = scripted(status);
            controller.init(ReferenceTargets::new(0.0, 0.0, 10.0));

            match controller.solve(&state(), &PathCoefficients::default()) {
                Err(MpcError::SolverFailed(s)) => assert_eq!(s, status),
                other => panic!("expected SolverFailed({status}), got {other:?}"),
            }
            assert!(controller.solve_full(&state(), &PathCoefficients::default()).is_err());
        }
    }

    #[test]
    fn plan_decodes_every_step() {
        let mut controller = scripted(SolveStatus::Success);
        controller.init(ReferenceTargets::new(0.0, 0.0, 10.0));

        let plan = controller.solve_full(&state(), &PathCoefficients::default()).unwrap();

        assert_eq!(plan.states.len(), 11);
        assert_eq!(plan.actuations.len(), 10);
        assert_eq!(plan.states[0], state());
        assert_eq!(plan.first_actuation(), Actuation64 { delta: 0.2, a: -0.4 });
    }

    #[test]
    fn cycle_recomputes_errors_at_predicted_pose() {
        let mut config = MpcConfig::default();
        config.latency = 0.0;
        let mut controller = Controller::with_solver(config, Echo).unwrap();
        controller.init(ReferenceTargets::default());

        // measured errors are stale; the path says cte = 1 - 0.5 at x = 0
        let measured = State64 { x: 0.0, y: 0.5, psi: 0.1, v: 4.0, cte: 9.0, epsi: 9.0 };
        let coeffs = PathCoefficients::new([1.0, 0.0, 0.0, 0.0]).unwrap();
        let u = controller.cycle(&measured, &Actuation64::zero(), &coeffs).unwrap();

        assert_eq!(u.delta, 0.5);
        assert_eq!(u.a, 0.1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = MpcConfig::default();
        config.horizon.dt = 0.0;
        assert!(matches!(Controller::new(config), Err(MpcError::Config(_))));
    }

    /// Writes the pinned cte and epsi into the first actuation slot.
    struct Echo;

    impl NonlinearSolver for Echo {
        fn solve(&self, problem: &NlpProblem, _options: &SolverOptions) -> SolveResult {
            let layout = problem.formulation.layout();
            let lower = &problem.bounds.constraints_lower;
            let mut x = problem.initial_guess.clone();
            x[layout.delta_start()] = lower[layout.state_starts()[4]];
            x[layout.a_start()] = lower[layout.state_starts()[5]];
            SolveResult {
                status: SolveStatus::Success,
                objective: 0.0,
                x,
                outer_iterations: 0,
                inner_iterations: 0,
                solve_time: Duration::ZERO,
            }
        }
    }
}
