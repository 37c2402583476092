//! Trait seams between the trainer and its function approximators.
//!
//! The trainer is generic over three module roles: a stochastic [`Policy`], an
//! [`ActionCritic`] scoring observation-action pairs (instantiated twice for
//! the clipped double-Q estimate), and a [`StateCritic`] scoring observations
//! alone (instantiated once live, once as the slow target copy). Any Burn
//! module implementing the right trait can be plugged in; [`crate::nets`]
//! provides the stock MLP implementations.

use crate::env::Action;
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Distribution parameters emitted by a policy forward pass.
///
/// Kept on the graph so the policy loss can regularize them directly.
#[derive(Debug, Clone)]
pub enum DistParams<B: Backend> {
    /// Pre-squash Gaussian head: `[batch, action_dim]` each.
    Gaussian {
        mean: Tensor<B, 2>,
        log_std: Tensor<B, 2>,
    },
    /// Categorical head: `[batch, n_actions]`.
    Categorical { logits: Tensor<B, 2> },
}

/// One policy forward pass over a batch of observations.
pub struct PolicyOutput<B: Backend> {
    /// Sampled actions, `[batch, action_dim]`. Continuous actions live in
    /// `[-1, 1]`; discrete actions are indices stored as floats in a
    /// `[batch, 1]` column.
    pub action: Tensor<B, 2>,
    /// Log-density of each sampled action, `[batch]`.
    pub log_prob: Tensor<B, 1>,
    /// The distribution parameters behind the sample.
    pub params: DistParams<B>,
}

/// A batch of actions in the layout the critics consume.
#[derive(Debug, Clone)]
pub enum BatchedActions<B: Backend> {
    /// `[batch, action_dim]` in `[-1, 1]`.
    Continuous(Tensor<B, 2>),
    /// `[batch, 1]` indices.
    Discrete(Tensor<B, 2, Int>),
}

impl<B: Backend> BatchedActions<B> {
    /// Upload replayed actions as a critic-ready batch.
    ///
    /// # Panics
    /// Panics if the batch mixes discrete and continuous actions.
    pub fn from_actions(actions: &[Action], device: &B::Device) -> Self {
        match actions.first() {
            Some(Action::Discrete(_)) => {
                let indices: Vec<i32> = actions
                    .iter()
                    .map(|a| match a {
                        Action::Discrete(i) => *i as i32,
                        Action::Continuous(_) => panic!("mixed action batch"),
                    })
                    .collect();
                let n = indices.len();
                BatchedActions::Discrete(
                    Tensor::<B, 1, Int>::from_ints(indices.as_slice(), device).reshape([n, 1]),
                )
            }
            Some(Action::Continuous(first)) => {
                let dim = first.len();
                let mut flat = Vec::with_capacity(actions.len() * dim);
                for a in actions {
                    match a {
                        Action::Continuous(v) => flat.extend_from_slice(v),
                        Action::Discrete(_) => panic!("mixed action batch"),
                    }
                }
                let n = actions.len();
                BatchedActions::Continuous(
                    Tensor::<B, 1>::from_floats(flat.as_slice(), device).reshape([n, dim]),
                )
            }
            None => panic!("empty action batch"),
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            BatchedActions::Continuous(t) => t.dims()[0],
            BatchedActions::Discrete(t) => t.dims()[0],
        }
    }
}

/// A stochastic policy over batched observations.
pub trait Policy<B: AutodiffBackend>: AutodiffModule<B> {
    /// Sample actions for a `[batch, observation_size]` input.
    ///
    /// With `reparameterize` the sampled action carries pathwise gradients;
    /// without it the action is detached and only the log-density stays on
    /// the graph. `rng` drives any host-side sampling, so seeded callers get
    /// reproducible draws; policies sampling on the backend may ignore it.
    fn forward(
        &self,
        observations: Tensor<B, 2>,
        reparameterize: bool,
        rng: &mut fastrand::Rng,
    ) -> PolicyOutput<B>;
}

/// A critic scoring observation-action pairs, `[batch]` values out.
pub trait ActionCritic<B: AutodiffBackend>: AutodiffModule<B> {
    fn forward(&self, observations: Tensor<B, 2>, actions: &BatchedActions<B>) -> Tensor<B, 1>;
}

/// A critic scoring observations alone, `[batch]` values out.
pub trait StateCritic<B: AutodiffBackend>: AutodiffModule<B> {
    fn forward(&self, observations: Tensor<B, 2>) -> Tensor<B, 1>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_batched_actions_from_discrete() {
        let device = Default::default();
        let actions = vec![Action::Discrete(2), Action::Discrete(0), Action::Discrete(1)];
        let batch = BatchedActions::<TestBackend>::from_actions(&actions, &device);

        assert_eq!(batch.batch_size(), 3);
        match batch {
            BatchedActions::Discrete(t) => {
                assert_eq!(t.dims(), [3, 1]);
                let data = t.into_data();
                assert_eq!(data.as_slice::<i64>().unwrap(), &[2, 0, 1]);
            }
            BatchedActions::Continuous(_) => panic!("expected discrete batch"),
        }
    }

    #[test]
    fn test_batched_actions_from_continuous() {
        let device = Default::default();
        let actions = vec![
            Action::Continuous(vec![0.1, -0.2]),
            Action::Continuous(vec![0.5, 0.9]),
        ];
        let batch = BatchedActions::<TestBackend>::from_actions(&actions, &device);

        match batch {
            BatchedActions::Continuous(t) => {
                assert_eq!(t.dims(), [2, 2]);
                let data = t.into_data();
                let values = data.as_slice::<f32>().unwrap();
                assert!((values[0] - 0.1).abs() < 1e-6);
                assert!((values[3] - 0.9).abs() < 1e-6);
            }
            BatchedActions::Discrete(_) => panic!("expected continuous batch"),
        }
    }

    #[test]
    #[should_panic(expected = "mixed action batch")]
    fn test_mixed_batch_panics() {
        let device = Default::default();
        let actions = vec![Action::Discrete(0), Action::Continuous(vec![0.5])];
        let _ = BatchedActions::<TestBackend>::from_actions(&actions, &device);
    }
}
