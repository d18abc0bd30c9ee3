//! Receding-horizon path tracking for a kinematic bicycle.
//!
//! Each cycle the controller builds a finite-horizon nonlinear program over
//! states and actuations, hands it to a constrained solver and applies only
//! the first steering/throttle pair.

pub mod bounds;
pub mod config;
pub mod controller;
pub mod error;
pub mod formulation;
pub mod layout;
pub mod model;
pub mod solver;

pub use config::{
    ActuatorLimits, ConfigError, CostWeights, HorizonConfig, MpcConfig, ReferenceTargets,
};
pub use controller::{Controller, Plan, first_actuation};
pub use error::MpcError;
pub use formulation::{DerivativeMode, Formulation};
pub use layout::Layout;
pub use model::{Actuation, Actuation64, PathCoefficients, Pose, State, State64};
pub use solver::{AlmSolver, NlpProblem, NonlinearSolver, SolveResult, SolveStatus, SolverOptions};
