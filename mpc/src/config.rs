//! Controller parameters, loadable from TOML.
//!
//! Every section falls back to the calibrated defaults, so a file only needs
//! to name the values it overrides:
//!
//! ```toml
//! latency = 0.1
//!
//! [horizon]
//! steps = 11
//!
//! [weights]
//! smoothness_delta = 300.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::solver::SolverOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot load the config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse the config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Discretisation of the prediction horizon.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    pub steps: usize, // N, number of states in the horizon
    pub dt: f64,      // step duration [s]
    pub lf: f64,      // front axle to centre of gravity [m]
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            steps: 11,
            dt: 0.1,
            lf: 2.67,
        }
    }
}

/// Relative priority of tracking accuracy against actuator use.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    pub tracking_cte: f64,
    pub tracking_epsi: f64,
    pub tracking_v: f64,
    pub effort_delta: f64,
    pub effort_a: f64,
    pub smoothness_delta: f64,
    pub smoothness_a: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            tracking_cte: 16.0,
            tracking_epsi: 12.0,
            tracking_v: 1.0,
            effort_delta: 8.0,
            effort_a: 6.0,
            smoothness_delta: 400.0,
            smoothness_a: 10.0,
        }
    }
}

/// Steady-state values the controller tracks.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceTargets {
    pub cte: f64,
    pub epsi: f64,
    pub v: f64,
}

impl ReferenceTargets {
    pub fn new(cte: f64, epsi: f64, v: f64) -> Self {
        Self { cte, epsi, v }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorLimits {
    pub max_steer: f64,    // |delta| limit [rad], 25 deg
    pub max_throttle: f64, // |a| limit
    pub unbounded: f64,    // stands in for +/- infinity on state variables
}

impl Default for ActuatorLimits {
    fn default() -> Self {
        Self {
            max_steer: 0.436332,
            max_throttle: 1.0,
            unbounded: 1.0e19,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpcConfig {
    pub horizon: HorizonConfig,
    pub weights: CostWeights,
    pub limits: ActuatorLimits,
    pub solver: SolverOptions,

    /// Delay between sensing and actuation [s], compensated in `cycle`.
    pub latency: f64,
}

impl Default for MpcConfig {
    fn default() -> Self {
        Self {
            horizon: HorizonConfig::default(),
            weights: CostWeights::default(),
            limits: ActuatorLimits::default(),
            solver: SolverOptions::default(),
            latency: 0.1,
        }
    }
}

impl MpcConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.horizon;
        check(h.steps >= 2, format!("horizon.steps must be at least 2, got {}", h.steps))?;
        check(positive(h.dt), format!("horizon.dt must be positive, got {}", h.dt))?;
        check(positive(h.lf), format!("horizon.lf must be positive, got {}", h.lf))?;

        let l = &self.limits;
        check(
            positive(l.max_steer),
            format!("limits.max_steer must be positive, got {}", l.max_steer),
        )?;
        check(
            positive(l.max_throttle),
            format!("limits.max_throttle must be positive, got {}", l.max_throttle),
        )?;
        check(
            l.unbounded.is_finite() && l.unbounded > l.max_steer.max(l.max_throttle),
            format!("limits.unbounded must be a large finite value, got {}", l.unbounded),
        )?;

        let w = &self.weights;
        let weights = [
            ("tracking_cte", w.tracking_cte),
            ("tracking_epsi", w.tracking_epsi),
            ("tracking_v", w.tracking_v),
            ("effort_delta", w.effort_delta),
            ("effort_a", w.effort_a),
            ("smoothness_delta", w.smoothness_delta),
            ("smoothness_a", w.smoothness_a),
        ];
        for (name, value) in weights {
            check(
                value.is_finite() && value >= 0.0,
                format!("weights.{name} must be non-negative, got {value}"),
            )?;
        }

        check(
            self.latency.is_finite() && self.latency >= 0.0,
            format!("latency must be non-negative, got {}", self.latency),
        )?;

        self.solver.validate()
    }
}

pub(crate) fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

pub(crate) fn check(ok: bool, message: String) -> Result<(), ConfigError> {
    if ok { Ok(()) } else { Err(ConfigError::Invalid(message)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formulation::DerivativeMode;

    #[test]
    fn defaults_match_calibration() {
        let config = MpcConfig::default();

        assert_eq!(config.horizon.steps, 11);
        assert_eq!(config.horizon.dt, 0.1);
        assert_eq!(config.horizon.lf, 2.67);
        assert_eq!(config.weights.smoothness_delta, 400.0);
        assert_eq!(config.limits.max_steer, 0.436332);
        assert_eq!(config.solver.max_time, 0.5);
        assert_eq!(config.solver.derivatives, DerivativeMode::Sparse);
        assert_eq!(config.latency, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = MpcConfig::from_toml_str(
            r#"
            latency = 0.05

            [horizon]
            steps = 8

            [weights]
            tracking_v = 2.5

            [solver]
            derivatives = "dense"
            "#,
        )
        .unwrap();

        assert_eq!(config.latency, 0.05);
        assert_eq!(config.horizon.steps, 8);
        assert_eq!(config.horizon.dt, 0.1);
        assert_eq!(config.weights.tracking_v, 2.5);
        assert_eq!(config.weights.tracking_cte, 16.0);
        assert_eq!(config.solver.derivatives, DerivativeMode::Dense);
    }

    #[test]
    fn rejects_short_horizon() {
        let err = MpcConfig::from_toml_str("[horizon]\nsteps = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_weight() {
        let mut config = MpcConfig::default();
        config.weights.effort_a = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = MpcConfig::from_toml_str("horizon = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
