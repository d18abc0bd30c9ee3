use thiserror::Error;

use crate::config::ConfigError;
use crate::solver::SolveStatus;

#[derive(Debug, Error)]
pub enum MpcError {
    #[error("Reference targets not set, call `init` before solving")]
    NotInitialised,

    #[error("Solver did not succeed: {0}")]
    SolverFailed(SolveStatus),

    #[error("Expected 4 path coefficients, got {0} values")]
    InvalidCoefficients(usize),

    #[error("Path coefficients must be finite, got {0:?}")]
    NonFiniteCoefficients([f64; 4]),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
