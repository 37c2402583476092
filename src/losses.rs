//! The SAC loss pipeline.
//!
//! One call to [`compute_losses`] runs the full update order over a sampled
//! batch:
//!
//! 1. a fresh policy forward pass (new actions and log-densities),
//! 2. the temperature step, driven by the batch-mean log-density,
//! 3. both critic losses against the bootstrap target
//!    `reward_scale * r + (1 - done) * gamma * V_targ(next_ob)`,
//! 4. the value loss against `min(Q1, Q2)(ob, fresh_action) - alpha * log_pi`,
//! 5. the policy loss, when the policy-update gate is open.
//!
//! Critic losses score the *stored* actions; the value and policy losses use
//! the *fresh* actions. Bootstrap and value targets are detached, so each
//! loss only trains its own approximator.

use crate::approximators::{ActionCritic, BatchedActions, DistParams, Policy, StateCritic};
use crate::config::SacConfig;
use crate::core::replay_buffer::TransitionBatch;
use crate::temperature::TemperatureController;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// A transition batch uploaded to the training device.
pub struct LossBatch<B: AutodiffBackend> {
    pub observations: Tensor<B, 2>,
    pub actions: BatchedActions<B>,
    pub rewards: Tensor<B, 1>,
    pub next_observations: Tensor<B, 2>,
    /// `1 - done` per transition, masking the bootstrap on terminals.
    pub not_done: Tensor<B, 1>,
}

impl<B: AutodiffBackend> LossBatch<B> {
    pub fn from_transitions(batch: &TransitionBatch, device: &B::Device) -> Self {
        let n = batch.batch_size;
        let obs_size = batch.observation_size;

        let observations = Tensor::<B, 1>::from_floats(batch.observations.as_slice(), device)
            .reshape([n, obs_size]);
        let next_observations =
            Tensor::<B, 1>::from_floats(batch.next_observations.as_slice(), device)
                .reshape([n, obs_size]);
        let rewards = Tensor::<B, 1>::from_floats(batch.rewards.as_slice(), device);
        let not_done = Tensor::<B, 1>::from_floats(batch.dones.as_slice(), device)
            .neg()
            .add_scalar(1.0);
        let actions = BatchedActions::from_actions(&batch.actions, device);

        Self {
            observations,
            actions,
            rewards,
            next_observations,
            not_done,
        }
    }
}

/// Losses from one update, each a single-element tensor still on the graph.
pub struct SacLosses<B: AutodiffBackend> {
    pub qf1: Tensor<B, 1>,
    pub qf2: Tensor<B, 1>,
    pub vf: Tensor<B, 1>,
    /// `None` while the policy-update gate is closed.
    pub policy: Option<Tensor<B, 1>>,
    pub alpha_loss: f32,
    /// Temperature after this update's step.
    pub alpha: f32,
    pub mean_log_prob: f32,
    /// Batch-mean clipped double-Q estimate of the fresh actions.
    pub mean_q: f32,
}

pub(crate) fn scalar<B: AutodiffBackend>(t: Tensor<B, 1>) -> f32 {
    t.into_data().as_slice::<f32>().unwrap()[0]
}

fn mse<B: AutodiffBackend>(prediction: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
    (prediction - target).powf_scalar(2.0).mean()
}

/// Elementwise clipped double-Q estimate.
fn clipped_double_q<B: AutodiffBackend>(q1: Tensor<B, 1>, q2: Tensor<B, 1>) -> Tensor<B, 1> {
    q1.min_pair(q2)
}

/// Compute all losses for one gradient update.
///
/// `update_policy` opens the policy-update gate; the critic, value, and
/// temperature updates run unconditionally.
///
/// # Panics
/// Panics if the batch tensors disagree on batch size.
#[allow(clippy::too_many_arguments)]
pub fn compute_losses<B, P, Q, V>(
    policy: &P,
    qf1: &Q,
    qf2: &Q,
    vf: &V,
    target_vf: &V,
    temperature: &mut TemperatureController,
    batch: &LossBatch<B>,
    config: &SacConfig,
    rng: &mut fastrand::Rng,
    update_policy: bool,
) -> SacLosses<B>
where
    B: AutodiffBackend,
    P: Policy<B>,
    Q: ActionCritic<B>,
    V: StateCritic<B>,
{
    let n = batch.observations.dims()[0];
    assert_eq!(batch.rewards.dims()[0], n, "batch size mismatch");
    assert_eq!(batch.next_observations.dims()[0], n, "batch size mismatch");
    assert_eq!(batch.not_done.dims()[0], n, "batch size mismatch");
    assert_eq!(batch.actions.batch_size(), n, "batch size mismatch");

    // Fresh actions and their log-densities.
    let pi_out = policy.forward(batch.observations.clone(), config.reparameterization_trick, rng);
    let mean_log_prob = scalar(pi_out.log_prob.clone().mean().detach());

    // Temperature moves first; alpha is read after the step.
    let alpha_loss = temperature.step(mean_log_prob);
    let alpha = temperature.alpha();

    // Critic losses on the stored actions against the bootstrap target.
    let v_next = target_vf.forward(batch.next_observations.clone());
    let q_target = (batch.rewards.clone().mul_scalar(config.reward_scale)
        + batch.not_done.clone() * v_next.mul_scalar(config.gamma))
    .detach();

    let q1_pred = qf1.forward(batch.observations.clone(), &batch.actions);
    let q2_pred = qf2.forward(batch.observations.clone(), &batch.actions);
    let qf1_loss = mse(q1_pred, q_target.clone());
    let qf2_loss = mse(q2_pred, q_target);

    // Value loss on the fresh actions against the entropy-adjusted double-Q.
    let fresh_actions = match &pi_out.params {
        DistParams::Gaussian { .. } => BatchedActions::Continuous(pi_out.action.clone()),
        DistParams::Categorical { .. } => BatchedActions::Discrete(pi_out.action.clone().int()),
    };
    let q1_new = qf1.forward(batch.observations.clone(), &fresh_actions);
    let q2_new = qf2.forward(batch.observations.clone(), &fresh_actions);
    let q_min = clipped_double_q(q1_new, q2_new);
    let mean_q = scalar(q_min.clone().mean().detach());

    let v_target = (q_min.clone() - pi_out.log_prob.clone().mul_scalar(alpha)).detach();
    let v_pred = vf.forward(batch.observations.clone());
    let vf_loss = mse(v_pred, v_target);

    let policy_loss = if update_policy {
        let weighted_log_prob = pi_out.log_prob.clone().mul_scalar(alpha);
        let mut loss = if config.reparameterization_trick {
            (weighted_log_prob - q_min).mean()
        } else {
            let baseline = vf.forward(batch.observations.clone());
            let advantage = (weighted_log_prob - (q_min - baseline)).detach();
            (pi_out.log_prob.clone() * advantage).mean()
        };
        if let DistParams::Gaussian { mean, log_std } = &pi_out.params {
            loss = loss
                + mean
                    .clone()
                    .powf_scalar(2.0)
                    .mean()
                    .mul_scalar(config.policy_mean_reg_weight)
                + log_std
                    .clone()
                    .powf_scalar(2.0)
                    .mean()
                    .mul_scalar(config.policy_std_reg_weight);
        }
        Some(loss)
    } else {
        None
    };

    SacLosses {
        qf1: qf1_loss,
        qf2: qf2_loss,
        vf: vf_loss,
        policy: policy_loss,
        alpha_loss,
        alpha,
        mean_log_prob,
        mean_q,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Action;
    use crate::nets::{
        GaussianPolicyNet, GaussianPolicyNetConfig, QNet, QNetConfig, ValueNet, ValueNetConfig,
    };
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;

    type TestBackend = Autodiff<NdArray<f32>>;

    struct Fixture {
        policy: GaussianPolicyNet<TestBackend>,
        qf1: QNet<TestBackend>,
        qf2: QNet<TestBackend>,
        vf: ValueNet<TestBackend>,
        target_vf: ValueNet<TestBackend>,
        batch: LossBatch<TestBackend>,
        config: SacConfig,
    }

    fn continuous_fixture(batch_size: usize) -> Fixture {
        let device = Default::default();
        let obs_size = 4;
        let action_dim = 2;

        let policy = GaussianPolicyNetConfig::new(obs_size, action_dim)
            .with_hidden_size(16)
            .init(&device);
        let qf1 = QNetConfig::continuous(obs_size, action_dim)
            .with_hidden_size(16)
            .init(&device);
        let qf2 = QNetConfig::continuous(obs_size, action_dim)
            .with_hidden_size(16)
            .init(&device);
        let vf = ValueNetConfig::new(obs_size).with_hidden_size(16).init(&device);
        let target_vf = vf.clone();

        let transitions = TransitionBatch {
            observations: (0..batch_size * obs_size).map(|i| (i as f32 * 0.1).sin()).collect(),
            actions: (0..batch_size)
                .map(|i| Action::Continuous(vec![0.1 * i as f32 % 1.0 - 0.5, 0.3]))
                .collect(),
            rewards: (0..batch_size).map(|i| i as f32 * 0.01).collect(),
            next_observations: (0..batch_size * obs_size)
                .map(|i| (i as f32 * 0.1).cos())
                .collect(),
            dones: (0..batch_size).map(|i| if i % 4 == 0 { 1.0 } else { 0.0 }).collect(),
            batch_size,
            observation_size: obs_size,
        };
        let batch = LossBatch::from_transitions(&transitions, &device);

        let config = SacConfig::continuous(obs_size, vec![-1.0; action_dim], vec![1.0; action_dim]);

        Fixture {
            policy,
            qf1,
            qf2,
            vf,
            target_vf,
            batch,
            config,
        }
    }

    fn run(fixture: &Fixture, temperature: &mut TemperatureController, update_policy: bool) -> SacLosses<TestBackend> {
        let mut rng = fastrand::Rng::with_seed(13);
        compute_losses(
            &fixture.policy,
            &fixture.qf1,
            &fixture.qf2,
            &fixture.vf,
            &fixture.target_vf,
            temperature,
            &fixture.batch,
            &fixture.config,
            &mut rng,
            update_policy,
        )
    }

    #[test]
    fn test_clipped_double_q_is_elementwise_min() {
        let device = Default::default();
        let q1 = Tensor::<TestBackend, 1>::from_floats([1.0, -2.0, 3.0, 0.0], &device);
        let q2 = Tensor::<TestBackend, 1>::from_floats([0.5, -1.0, 4.0, 0.0], &device);

        let q_min = clipped_double_q(q1, q2);
        let data = q_min.into_data();
        let values = data.as_slice::<f32>().unwrap();
        assert_eq!(values, &[0.5, -2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_all_losses_finite() {
        let fixture = continuous_fixture(8);
        let mut temperature = TemperatureController::adaptive(1.0, -2.0, 1e-3);

        let losses = run(&fixture, &mut temperature, true);
        assert!(scalar(losses.qf1).is_finite());
        assert!(scalar(losses.qf2).is_finite());
        assert!(scalar(losses.vf).is_finite());
        assert!(scalar(losses.policy.unwrap()).is_finite());
        assert!(losses.alpha_loss.is_finite());
        assert!(losses.alpha > 0.0);
        assert!(losses.mean_log_prob.is_finite());
        assert!(losses.mean_q.is_finite());
    }

    #[test]
    fn test_policy_gate_closed() {
        let fixture = continuous_fixture(8);
        let mut temperature = TemperatureController::fixed(0.2);

        let losses = run(&fixture, &mut temperature, false);
        assert!(losses.policy.is_none());
        assert_eq!(losses.alpha_loss, 0.0);
        assert!((losses.alpha - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_likelihood_ratio_mode() {
        let mut fixture = continuous_fixture(8);
        fixture.config.reparameterization_trick = false;
        let mut temperature = TemperatureController::fixed(0.5);

        let losses = run(&fixture, &mut temperature, true);
        assert!(scalar(losses.policy.unwrap()).is_finite());
    }

    #[test]
    fn test_temperature_steps_every_update() {
        let fixture = continuous_fixture(8);
        let mut temperature = TemperatureController::adaptive(1.0, 10.0, 1e-2);

        // With a +10 entropy target the gap stays positive, so alpha must
        // move even while the policy gate is closed.
        let before = temperature.alpha();
        for _ in 0..10 {
            let _ = run(&fixture, &mut temperature, false);
        }
        assert!(temperature.alpha() > before);
    }

    #[test]
    fn test_losses_backprop_into_their_modules() {
        let fixture = continuous_fixture(4);
        let mut temperature = TemperatureController::fixed(0.2);

        let losses = run(&fixture, &mut temperature, true);

        let grads = losses.qf1.backward();
        let qf1_grads = GradientsParams::from_grads(grads, &fixture.qf1);
        assert!(qf1_grads.len() > 0, "critic loss must reach critic params");

        let grads = losses.vf.backward();
        let vf_grads = GradientsParams::from_grads(grads, &fixture.vf);
        assert!(vf_grads.len() > 0, "value loss must reach value params");

        let grads = losses.policy.unwrap().backward();
        let policy_grads = GradientsParams::from_grads(grads, &fixture.policy);
        assert!(policy_grads.len() > 0, "policy loss must reach policy params");
    }

    #[test]
    fn test_value_target_is_detached_from_critics() {
        let fixture = continuous_fixture(4);
        let mut temperature = TemperatureController::fixed(0.2);

        let losses = run(&fixture, &mut temperature, false);

        // The value loss flows into vf only; the critics entered through a
        // detached target.
        let grads = losses.vf.backward();
        let qf1_grads = GradientsParams::from_grads(grads, &fixture.qf1);
        assert_eq!(qf1_grads.len(), 0, "value loss must not train the critics");
    }

    #[test]
    #[should_panic(expected = "batch size mismatch")]
    fn test_shape_contract() {
        let fixture = continuous_fixture(8);
        let device = Default::default();
        let mut temperature = TemperatureController::fixed(0.2);

        let bad_batch = LossBatch {
            observations: fixture.batch.observations.clone(),
            actions: fixture.batch.actions.clone(),
            rewards: Tensor::<TestBackend, 1>::zeros([3], &device),
            next_observations: fixture.batch.next_observations.clone(),
            not_done: fixture.batch.not_done.clone(),
        };

        let mut rng = fastrand::Rng::with_seed(13);
        let _ = compute_losses(
            &fixture.policy,
            &fixture.qf1,
            &fixture.qf2,
            &fixture.vf,
            &fixture.target_vf,
            &mut temperature,
            &bad_batch,
            &fixture.config,
            &mut rng,
            true,
        );
    }
}
