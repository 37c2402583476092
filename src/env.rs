//! Environment abstraction for SAC training.
//!
//! The trainer interacts with a single environment through the [`Environment`]
//! trait. Observations are flat `f32` vectors; actions are either discrete
//! indices or continuous vectors. The action-space shape is resolved once at
//! construction into an [`ActionSpace`] variant, and all downstream code
//! switches on that variant instead of inspecting types at call time.

use serde::{Deserialize, Serialize};

/// An action produced by the policy or consumed by an environment.
///
/// Continuous actions handed to [`Environment::step`] are already rescaled to
/// the environment's native bounds; continuous actions stored in the replay
/// buffer stay in the policy's squashed `[-1, 1]` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    /// Index into a discrete action set.
    Discrete(usize),
    /// Continuous action vector.
    Continuous(Vec<f32>),
}

/// Description of an environment's action space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionSpace {
    /// `n` mutually exclusive actions.
    Discrete { n: usize },
    /// A bounded box with per-dimension `low`/`high` bounds.
    Continuous { low: Vec<f32>, high: Vec<f32> },
}

impl ActionSpace {
    /// Number of action dimensions (1 for discrete spaces).
    pub fn dim(&self) -> usize {
        match self {
            ActionSpace::Discrete { .. } => 1,
            ActionSpace::Continuous { low, .. } => low.len(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, ActionSpace::Discrete { .. })
    }

    /// Default entropy target for automatic temperature tuning.
    ///
    /// Continuous spaces use `-dim(A)`; discrete spaces use `0.89 * ln(n)`.
    pub fn default_target_entropy(&self) -> f32 {
        match self {
            ActionSpace::Discrete { n } => 0.89 * (*n as f32).ln(),
            ActionSpace::Continuous { low, .. } => -(low.len() as f32),
        }
    }

    /// Rescale a squashed action from `[-1, 1]` to the native bounds:
    /// `scaled = low + 0.5 * (a + 1) * (high - low)`.
    ///
    /// # Panics
    /// Panics on a discrete space or a dimension mismatch.
    pub fn scale_action(&self, squashed: &[f32]) -> Vec<f32> {
        match self {
            ActionSpace::Discrete { .. } => {
                panic!("scale_action is only defined for continuous spaces")
            }
            ActionSpace::Continuous { low, high } => {
                assert_eq!(squashed.len(), low.len(), "action dimension mismatch");
                squashed
                    .iter()
                    .zip(low.iter().zip(high.iter()))
                    .map(|(&a, (&l, &h))| l + 0.5 * (a + 1.0) * (h - l))
                    .collect()
            }
        }
    }
}

/// Result of one environment step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Observation after the step, `observation_size` elements.
    pub observation: Vec<f32>,
    /// Scalar reward.
    pub reward: f32,
    /// Whether the episode terminated with this step.
    pub done: bool,
}

/// A single sequential environment.
///
/// Failures inside an environment are not part of this contract; an
/// implementation that can fail should panic, and the panic propagates to the
/// caller unchanged.
pub trait Environment {
    /// Size of the flat observation vector.
    fn observation_size(&self) -> usize;

    /// Action-space descriptor, stable for the lifetime of the environment.
    fn action_space(&self) -> ActionSpace;

    /// Reset to an initial state and return the first observation.
    fn reset(&mut self) -> Vec<f32>;

    /// Apply an action and advance one step.
    fn step(&mut self, action: &Action) -> StepOutcome;
}
