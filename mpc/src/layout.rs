//! Index map of the flat decision vector.
//!
//! ```text
//! [ x_0..x_N | y | psi | v | cte | epsi | delta_0..delta_N-1 | a ]
//! ```
//!
//! Six state blocks of length `N`, then two actuation blocks of length `N - 1`.
//! Index `t` of a block belongs to step `t`, so index 0 of every state block
//! is the current state. The constraint vector reuses the state block offsets.

use nalgebra::{SVector, Scalar};
use named_vec_ops::NamedVecOps;

use crate::model::{Actuation, State};

pub const STATE_SIZE: usize = 6;
pub const ACTUATION_SIZE: usize = 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    horizon: usize,
    state_starts: [usize; STATE_SIZE],
    actuation_starts: [usize; ACTUATION_SIZE],
    n_vars: usize,
}

impl Layout {
    pub fn new(horizon: usize) -> Self {
        assert!(horizon >= 2, "horizon must hold at least two states");

        let state_starts = std::array::from_fn(|i| i * horizon);
        let first_actuation = STATE_SIZE * horizon;
        let actuation_starts = std::array::from_fn(|i| first_actuation + i * (horizon - 1));

        Self {
            horizon,
            state_starts,
            actuation_starts,
            n_vars: STATE_SIZE * horizon + ACTUATION_SIZE * (horizon - 1),
        }
    }

    /// Number of states `N` in the horizon.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Number of actuation steps, `N - 1`.
    pub fn steps(&self) -> usize {
        self.horizon - 1
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn n_constraints(&self) -> usize {
        STATE_SIZE * self.horizon
    }

    /// Block offsets in `State` field order: x, y, psi, v, cte, epsi.
    pub fn state_starts(&self) -> [usize; STATE_SIZE] {
        self.state_starts
    }

    /// Block offsets in `Actuation` field order: delta, a.
    pub fn actuation_starts(&self) -> [usize; ACTUATION_SIZE] {
        self.actuation_starts
    }

    pub fn x_start(&self) -> usize {
        self.state_starts[0]
    }

    pub fn delta_start(&self) -> usize {
        self.actuation_starts[0]
    }

    pub fn a_start(&self) -> usize {
        self.actuation_starts[1]
    }

    /// Decision-vector indices of the state at step `t`.
    pub fn state_indices(&self, t: usize) -> [usize; STATE_SIZE] {
        debug_assert!(t < self.horizon);
        self.state_starts.map(|start| start + t)
    }

    /// Decision-vector indices of the actuation at step `t`.
    pub fn actuation_indices(&self, t: usize) -> [usize; ACTUATION_SIZE] {
        debug_assert!(t < self.horizon - 1);
        self.actuation_starts.map(|start| start + t)
    }

    pub fn state_at<T: Scalar + Copy>(&self, vars: &[T], t: usize) -> State<T> {
        let idx = self.state_indices(t);
        State::from_svector(&SVector::from_fn(|i, _| vars[idx[i]]))
    }

    pub fn actuation_at<T: Scalar + Copy>(&self, vars: &[T], t: usize) -> Actuation<T> {
        let idx = self.actuation_indices(t);
        Actuation::from_svector(&SVector::from_fn(|i, _| vars[idx[i]]))
    }

    pub fn set_state<T: Scalar + Copy>(&self, vars: &mut [T], t: usize, state: &State<T>) {
        for (i, value) in self.state_indices(t).into_iter().zip(state.to_svector().iter()) {
            vars[i] = *value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_horizon_offsets() {
        let layout = Layout::new(11);

        assert_eq!(layout.state_starts(), [0, 11, 22, 33, 44, 55]);
        assert_eq!(layout.actuation_starts(), [66, 76]);
        assert_eq!(layout.n_vars(), 86);
        assert_eq!(layout.n_constraints(), 66);
    }

    #[test]
    fn blocks_are_ordered_and_disjoint() {
        for n in 2..40 {
            let layout = Layout::new(n);
            let mut blocks: Vec<(usize, usize)> = layout
                .state_starts()
                .iter()
                .map(|&s| (s, n))
                .collect();
            blocks.extend(layout.actuation_starts().iter().map(|&s| (s, n - 1)));

            assert_eq!(blocks[0].0, 0);
            for pair in blocks.windows(2) {
                let (start, len) = pair[0];
                assert!(pair[1].0 > start);
                assert_eq!(pair[1].0, start + len, "gap or overlap at N = {n}");
            }
            let (last, len) = blocks[blocks.len() - 1];
            assert_eq!(last + len, layout.n_vars());
            assert_eq!(layout.n_vars(), n * 6 + (n - 1) * 2);
        }
    }

    #[test]
    fn state_round_trip_through_vector() {
        let layout = Layout::new(4);
        let mut vars = vec![0.0; layout.n_vars()];
        let state = State { x: 1.0, y: 2.0, psi: 3.0, v: 4.0, cte: 5.0, epsi: 6.0 };

        layout.set_state(&mut vars, 2, &state);

        assert_eq!(layout.state_at(&vars, 2), state);
        assert_eq!(vars[layout.x_start() + 2], 1.0);
        assert_eq!(vars[layout.state_starts()[5] + 2], 6.0);
        let zero = State { x: 0.0, y: 0.0, psi: 0.0, v: 0.0, cte: 0.0, epsi: 0.0 };
        assert_eq!(layout.state_at(&vars, 1), zero);
    }

    #[test]
    fn actuation_indices_follow_blocks() {
        let layout = Layout::new(5);
        assert_eq!(layout.actuation_indices(0), [layout.delta_start(), layout.a_start()]);
        assert_eq!(layout.actuation_indices(3), [30 + 3, 34 + 3]);
    }

    #[test]
    #[should_panic]
    fn single_state_horizon_is_rejected() {
        Layout::new(1);
    }
}
