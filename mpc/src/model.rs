//! Kinematic bicycle model and the cubic reference path it tracks.
//!
//! Everything here is generic over [`Real`], so the same code computes plain
//! values with `f64` and forward derivatives with `Dual64`.

use nalgebra::Scalar;
use named_vec_ops_derive::NamedVecOps;
use num_dual::DualNum;

use crate::error::MpcError;

/// Scalar type the model and the evaluator are written against.
pub trait Real: DualNum<f64> + Scalar + Copy {}

impl<T: DualNum<f64> + Scalar + Copy> Real for T {}

/// Full vehicle state. Field order is the block order of the decision vector.
#[derive(Debug, Copy, Clone, PartialEq, NamedVecOps)]
pub struct State<T> {
    pub x: T,    // position [m], vehicle frame
    pub y: T,    // position [m], vehicle frame
    pub psi: T,  // heading [rad]
    pub v: T,    // speed [m/s]
    pub cte: T,  // cross-track error [m]
    pub epsi: T, // heading error [rad]
}

pub type State64 = State<f64>;

/// Steering and throttle applied over one step.
#[derive(Debug, Copy, Clone, PartialEq, NamedVecOps)]
pub struct Actuation<T> {
    pub delta: T, // steering angle [rad]
    pub a: T,     // throttle / brake, unitless
}

pub type Actuation64 = Actuation<f64>;

/// The part of the state the latency predictor advances.
#[derive(Debug, Copy, Clone, PartialEq, NamedVecOps)]
pub struct Pose<T> {
    pub x: T,
    pub y: T,
    pub psi: T,
    pub v: T,
}

impl<T: Copy> State<T> {
    pub fn pose(&self) -> Pose<T> {
        Pose {
            x: self.x,
            y: self.y,
            psi: self.psi,
            v: self.v,
        }
    }
}

impl<T: Copy> Pose<T> {
    pub fn with_errors(&self, cte: T, epsi: T) -> State<T> {
        State {
            x: self.x,
            y: self.y,
            psi: self.psi,
            v: self.v,
            cte,
            epsi,
        }
    }
}

impl Actuation64 {
    pub fn zero() -> Self {
        Self { delta: 0.0, a: 0.0 }
    }
}

/// Coefficients `c0 + c1 x + c2 x^2 + c3 x^3` of the path fitted in the
/// vehicle frame. Owned by the caller, read-only here.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct PathCoefficients([f64; 4]);

impl PathCoefficients {
    pub fn new(coeffs: [f64; 4]) -> Result<Self, MpcError> {
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(MpcError::NonFiniteCoefficients(coeffs));
        }
        Ok(Self(coeffs))
    }

    pub fn from_slice(coeffs: &[f64]) -> Result<Self, MpcError> {
        let coeffs: [f64; 4] = coeffs
            .try_into()
            .map_err(|_| MpcError::InvalidCoefficients(coeffs.len()))?;
        Self::new(coeffs)
    }
}

/// Path height `f(x)` and desired heading at `x`.
///
/// The heading slope uses `c3` in both the linear and quadratic terms. This is
/// not the derivative of the cubic, but deployed controllers were tuned
/// against it, so it is kept as is.
pub fn evaluate_path<T: Real>(coeffs: &PathCoefficients, x: T) -> (T, T) {
    let [c0, c1, c2, c3] = coeffs.0;
    let x2 = x * x;
    let f = T::from(c0) + x * c1 + x2 * c2 + x2 * x * c3;
    let slope = T::from(c1) + x * (2.0 * c3) + x2 * (3.0 * c3);
    (f, slope.atan())
}

/// Advance position, heading and speed by `dt`.
pub fn predict<T: Real>(pose: &Pose<T>, actuation: &Actuation<T>, dt: f64, lf: f64) -> Pose<T> {
    Pose {
        x: pose.x + pose.v * pose.psi.cos() * dt,
        y: pose.y + pose.v * pose.psi.sin() * dt,
        psi: pose.psi + yaw_increment(pose.v, actuation.delta, dt, lf),
        v: pose.v + actuation.a * dt,
    }
}

/// One discrete step of the kinematic bicycle, including the path errors.
///
/// No clamping happens here; actuator limits are the solver's business.
pub fn step<T: Real>(
    state: &State<T>,
    actuation: &Actuation<T>,
    coeffs: &PathCoefficients,
    dt: f64,
    lf: f64,
) -> State<T> {
    let (f, heading_des) = evaluate_path(coeffs, state.x);
    let next = predict(&state.pose(), actuation, dt, lf);

    next.with_errors(
        (f - state.y) + state.v * state.epsi.sin() * dt,
        (state.psi - heading_des) + yaw_increment(state.v, actuation.delta, dt, lf),
    )
}

#[inline(always)]
fn yaw_increment<T: Real>(v: T, delta: T, dt: f64, lf: f64) -> T {
    v * delta / lf * dt
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_dual::Dual64;

    const LF: f64 = 2.67;

    fn moving_state() -> State64 {
        State {
            x: 1.5,
            y: -0.4,
            psi: 0.2,
            v: 7.0,
            cte: 0.3,
            epsi: -0.05,
        }
    }

    #[test]
    fn path_uses_cubic_coefficient_in_heading_slope() {
        let coeffs = PathCoefficients::new([1.0, 0.5, 0.25, 0.1]).unwrap();
        let (f, heading) = evaluate_path(&coeffs, 2.0);

        assert_relative_eq!(f, 1.0 + 1.0 + 1.0 + 0.8);
        assert_relative_eq!(heading, (0.5_f64 + 0.4 + 1.2).atan());
    }

    #[test]
    fn step_is_deterministic() {
        let coeffs = PathCoefficients::new([0.1, -0.2, 0.03, 0.004]).unwrap();
        let u = Actuation { delta: 0.1, a: -0.3 };
        let a = step(&moving_state(), &u, &coeffs, 0.1, LF);
        let b = step(&moving_state(), &u, &coeffs, 0.1, LF);

        assert_eq!(a.x.to_bits(), b.x.to_bits());
        assert_eq!(a.y.to_bits(), b.y.to_bits());
        assert_eq!(a.psi.to_bits(), b.psi.to_bits());
        assert_eq!(a.v.to_bits(), b.v.to_bits());
        assert_eq!(a.cte.to_bits(), b.cte.to_bits());
        assert_eq!(a.epsi.to_bits(), b.epsi.to_bits());
    }

    #[test]
    fn predict_matches_step() {
        let coeffs = PathCoefficients::new([0.5, 0.1, -0.01, 0.002]).unwrap();
        let u = Actuation { delta: -0.2, a: 0.7 };
        let state = moving_state();

        let next = step(&state, &u, &coeffs, 0.1, LF);
        let pose = predict(&state.pose(), &u, 0.1, LF);

        assert_eq!(pose, next.pose());
    }

    #[test]
    fn straight_line_kinematics() {
        let state = State { x: 0.0, y: 0.0, psi: 0.0, v: 10.0, cte: 0.0, epsi: 0.0 };
        let next = step(&state, &Actuation64::zero(), &PathCoefficients::default(), 0.1, LF);

        assert_relative_eq!(next.x, 1.0);
        assert_relative_eq!(next.y, 0.0);
        assert_relative_eq!(next.psi, 0.0);
        assert_relative_eq!(next.v, 10.0);
        assert_relative_eq!(next.cte, 0.0);
        assert_relative_eq!(next.epsi, 0.0);
    }

    #[test]
    fn dual_step_carries_steering_derivative() {
        let state = State { x: 0.0, y: 0.0, psi: 0.0, v: 10.0, cte: 0.0, epsi: 0.0 }
            .to_dual();
        let u = Actuation { delta: Dual64::new(0.0, 1.0), a: Dual64::from(0.0) };
        let next = step(&state, &u, &PathCoefficients::default(), 0.1, LF);

        // d(psi')/d(delta) = v / Lf * dt
        assert_relative_eq!(next.psi.eps, 10.0 / LF * 0.1);
        assert_relative_eq!(next.epsi.eps, 10.0 / LF * 0.1);
        assert_relative_eq!(next.x.eps, 0.0);
    }

    #[test]
    fn states_combine_field_by_field() {
        let state = moving_state();
        let mut doubled = state * 2.0;

        assert_eq!(doubled - state, state);
        assert_eq!(doubled.v, 2.0 * state.v);

        doubled -= state;
        assert_eq!(doubled, state);
        doubled += state;
        assert_eq!(doubled, state + state);

        let mut u = Actuation64 { delta: 0.125, a: -0.5 };
        u += Actuation64 { delta: 0.25, a: 0.5 } * 0.5;
        assert_eq!(u, Actuation64 { delta: 0.25, a: -0.25 });
    }

    #[test]
    fn coefficients_from_slice() {
        assert!(PathCoefficients::from_slice(&[1.0, 2.0, 3.0, 4.0]).is_ok());
        assert!(matches!(
            PathCoefficients::from_slice(&[1.0, 2.0, 3.0]),
            Err(MpcError::InvalidCoefficients(3))
        ));
        assert!(matches!(
            PathCoefficients::from_slice(&[1.0, f64::NAN, 3.0, 4.0]),
            Err(MpcError::NonFiniteCoefficients(_))
        ));
    }

    #[test]
    fn non_finite_coefficients_are_rejected() {
        let err = PathCoefficients::new([0.0, f64::INFINITY, 0.0, 0.0]).unwrap_err();

        assert!(matches!(err, MpcError::NonFiniteCoefficients(_)));
        assert!(err.to_string().contains("finite"), "{err}");
        assert!(!err.to_string().contains("got 4 values"), "{err}");
        assert!(PathCoefficients::new([0.0, 1.0, 0.0, 0.0]).is_ok());
    }

    impl State64 {
        fn to_dual(self) -> State<Dual64> {
            State {
                x: self.x.into(),
                y: self.y.into(),
                psi: self.psi.into(),
                v: self.v.into(),
                cte: self.cte.into(),
                epsi: self.epsi.into(),
            }
        }
    }
}
