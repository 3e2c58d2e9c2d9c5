//! Action sources for unattended runs.

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::actions::ActionSpace;
use crate::observation::Observation;

/// Chooses the action vector for the next step.
pub trait ActionPolicy: Send {
    /// Returns `None` to let the solver run without overrides.
    fn act(&mut self, observation: &Observation, space: &ActionSpace) -> Option<Vec<f64>>;
}

/// Samples every configured action uniformly within its bounds.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ActionPolicy for RandomPolicy {
    fn act(&mut self, _observation: &Observation, space: &ActionSpace) -> Option<Vec<f64>> {
        if space.is_empty() {
            return None;
        }
        Some(
            space
                .bounds()
                .into_iter()
                .map(|(lo, hi)| self.rng.random_range(lo..=hi))
                .collect(),
        )
    }
}

/// Never overrides the solver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActionPolicy;

impl ActionPolicy for NoActionPolicy {
    fn act(&mut self, _observation: &Observation, _space: &ActionSpace) -> Option<Vec<f64>> {
        None
    }
}

/// Replays a fixed list of actions, then stops overriding.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolicy {
    actions: std::collections::VecDeque<Vec<f64>>,
}

impl ScriptedPolicy {
    pub fn new(actions: impl IntoIterator<Item = Vec<f64>>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }
}

impl ActionPolicy for ScriptedPolicy {
    fn act(&mut self, _observation: &Observation, _space: &ActionSpace) -> Option<Vec<f64>> {
        self.actions.pop_front()
    }
}
