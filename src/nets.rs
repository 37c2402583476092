//! Stock MLP approximators for the trainer's module roles.
//!
//! All nets are two hidden ReLU layers. The Gaussian policy emits a mean and
//! a clamped log-std per action dimension; the categorical policy emits
//! logits and samples on the host. The Q net comes in two wirings behind one
//! type: continuous critics concatenate the action onto the observation and
//! emit one value, discrete critics emit one value per action and gather the
//! taken one.

use crate::approximators::{ActionCritic, BatchedActions, DistParams, Policy, PolicyOutput, StateCritic};
use crate::distributions::{
    sample_categorical, sample_squashed_gaussian, sample_squashed_gaussian_detached, LOG_STD_MAX,
    LOG_STD_MIN,
};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::backend::AutodiffBackend;

const DEFAULT_HIDDEN: usize = 256;

/// Configuration for [`GaussianPolicyNet`].
#[derive(Debug, Clone)]
pub struct GaussianPolicyNetConfig {
    pub observation_size: usize,
    pub action_dim: usize,
    pub hidden_size: usize,
}

impl GaussianPolicyNetConfig {
    pub fn new(observation_size: usize, action_dim: usize) -> Self {
        Self {
            observation_size,
            action_dim,
            hidden_size: DEFAULT_HIDDEN,
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> GaussianPolicyNet<B> {
        GaussianPolicyNet {
            fc1: LinearConfig::new(self.observation_size, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            mean_head: LinearConfig::new(self.hidden_size, self.action_dim).init(device),
            log_std_head: LinearConfig::new(self.hidden_size, self.action_dim).init(device),
        }
    }
}

/// Tanh-squashed Gaussian policy over a continuous action space.
#[derive(Module, Debug)]
pub struct GaussianPolicyNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    mean_head: Linear<B>,
    log_std_head: Linear<B>,
}

impl<B: Backend> GaussianPolicyNet<B> {
    /// Pre-squash distribution parameters, log-std already clamped.
    pub fn dist_params(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = relu(self.fc1.forward(observations));
        let x = relu(self.fc2.forward(x));
        let mean = self.mean_head.forward(x.clone());
        let log_std = self.log_std_head.forward(x).clamp(LOG_STD_MIN, LOG_STD_MAX);
        (mean, log_std)
    }
}

impl<B: AutodiffBackend> Policy<B> for GaussianPolicyNet<B> {
    /// Samples on the backend, so `rng` is unused here.
    fn forward(
        &self,
        observations: Tensor<B, 2>,
        reparameterize: bool,
        _rng: &mut fastrand::Rng,
    ) -> PolicyOutput<B> {
        let (mean, log_std) = self.dist_params(observations);
        let (action, log_prob) = if reparameterize {
            sample_squashed_gaussian(mean.clone(), log_std.clone())
        } else {
            sample_squashed_gaussian_detached(mean.clone(), log_std.clone())
        };
        PolicyOutput {
            action,
            log_prob,
            params: DistParams::Gaussian { mean, log_std },
        }
    }
}

/// Configuration for [`CategoricalPolicyNet`].
#[derive(Debug, Clone)]
pub struct CategoricalPolicyNetConfig {
    pub observation_size: usize,
    pub n_actions: usize,
    pub hidden_size: usize,
}

impl CategoricalPolicyNetConfig {
    pub fn new(observation_size: usize, n_actions: usize) -> Self {
        Self {
            observation_size,
            n_actions,
            hidden_size: DEFAULT_HIDDEN,
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> CategoricalPolicyNet<B> {
        CategoricalPolicyNet {
            fc1: LinearConfig::new(self.observation_size, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            head: LinearConfig::new(self.hidden_size, self.n_actions).init(device),
        }
    }
}

/// Categorical policy over a discrete action space.
#[derive(Module, Debug)]
pub struct CategoricalPolicyNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
}

impl<B: Backend> CategoricalPolicyNet<B> {
    pub fn logits(&self, observations: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.fc1.forward(observations));
        let x = relu(self.fc2.forward(x));
        self.head.forward(x)
    }
}

impl<B: AutodiffBackend> Policy<B> for CategoricalPolicyNet<B> {
    /// Discrete sampling has no pathwise gradient; `reparameterize` only
    /// selects which estimator the caller uses downstream.
    fn forward(
        &self,
        observations: Tensor<B, 2>,
        _reparameterize: bool,
        rng: &mut fastrand::Rng,
    ) -> PolicyOutput<B> {
        let device = observations.device();
        let logits = self.logits(observations);

        let (indices, log_prob) = sample_categorical(logits.clone(), rng);

        let n = indices.len();
        let index_values: Vec<f32> = indices.iter().map(|&i| i as f32).collect();
        let action = Tensor::<B, 1>::from_floats(index_values.as_slice(), &device).reshape([n, 1]);

        PolicyOutput {
            action,
            log_prob,
            params: DistParams::Categorical { logits },
        }
    }
}

/// Configuration for [`QNet`].
#[derive(Debug, Clone)]
pub struct QNetConfig {
    input_size: usize,
    output_size: usize,
    hidden_size: usize,
}

impl QNetConfig {
    /// Critic over a continuous space: observation and action concatenated in,
    /// one value out.
    pub fn continuous(observation_size: usize, action_dim: usize) -> Self {
        Self {
            input_size: observation_size + action_dim,
            output_size: 1,
            hidden_size: DEFAULT_HIDDEN,
        }
    }

    /// Critic over a discrete space: observation in, one value per action out.
    pub fn discrete(observation_size: usize, n_actions: usize) -> Self {
        Self {
            input_size: observation_size,
            output_size: n_actions,
            hidden_size: DEFAULT_HIDDEN,
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> QNet<B> {
        QNet {
            fc1: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            head: LinearConfig::new(self.hidden_size, self.output_size).init(device),
        }
    }
}

/// Action-value network.
#[derive(Module, Debug)]
pub struct QNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
}

impl<B: Backend> QNet<B> {
    fn trunk(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.fc1.forward(input));
        let x = relu(self.fc2.forward(x));
        self.head.forward(x)
    }
}

impl<B: AutodiffBackend> ActionCritic<B> for QNet<B> {
    fn forward(&self, observations: Tensor<B, 2>, actions: &BatchedActions<B>) -> Tensor<B, 1> {
        match actions {
            BatchedActions::Continuous(a) => {
                let input = Tensor::cat(vec![observations, a.clone()], 1);
                self.trunk(input).flatten(0, 1)
            }
            BatchedActions::Discrete(indices) => {
                let values = self.trunk(observations);
                values.gather(1, indices.clone()).flatten(0, 1)
            }
        }
    }
}

/// Configuration for [`ValueNet`].
#[derive(Debug, Clone)]
pub struct ValueNetConfig {
    pub observation_size: usize,
    pub hidden_size: usize,
}

impl ValueNetConfig {
    pub fn new(observation_size: usize) -> Self {
        Self {
            observation_size,
            hidden_size: DEFAULT_HIDDEN,
        }
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ValueNet<B> {
        ValueNet {
            fc1: LinearConfig::new(self.observation_size, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            head: LinearConfig::new(self.hidden_size, 1).init(device),
        }
    }
}

/// State-value network.
#[derive(Module, Debug)]
pub struct ValueNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
}

impl<B: AutodiffBackend> StateCritic<B> for ValueNet<B> {
    fn forward(&self, observations: Tensor<B, 2>) -> Tensor<B, 1> {
        let x = relu(self.fc1.forward(observations));
        let x = relu(self.fc2.forward(x));
        self.head.forward(x).flatten(0, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_gaussian_policy_shapes_and_bounds() {
        let device = device();
        let policy = GaussianPolicyNetConfig::new(6, 2)
            .with_hidden_size(32)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([5, 6], Distribution::Default, &device);
        let mut rng = fastrand::Rng::with_seed(1);

        for reparameterize in [true, false] {
            let out = policy.forward(obs.clone(), reparameterize, &mut rng);
            assert_eq!(out.action.dims(), [5, 2]);
            assert_eq!(out.log_prob.dims(), [5]);

            let data = out.action.into_data();
            for &a in data.as_slice::<f32>().unwrap() {
                assert!((-1.0..=1.0).contains(&a));
            }
            match out.params {
                DistParams::Gaussian { mean, log_std } => {
                    assert_eq!(mean.dims(), [5, 2]);
                    let data = log_std.into_data();
                    for &s in data.as_slice::<f32>().unwrap() {
                        assert!((LOG_STD_MIN..=LOG_STD_MAX).contains(&s));
                    }
                }
                DistParams::Categorical { .. } => panic!("expected Gaussian params"),
            }
        }
    }

    #[test]
    fn test_categorical_policy_emits_valid_indices() {
        let device = device();
        let policy = CategoricalPolicyNetConfig::new(4, 3)
            .with_hidden_size(16)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([8, 4], Distribution::Default, &device);

        let mut rng = fastrand::Rng::with_seed(9);
        let out = policy.forward(obs, true, &mut rng);
        assert_eq!(out.action.dims(), [8, 1]);
        assert_eq!(out.log_prob.dims(), [8]);

        let data = out.action.into_data();
        for &a in data.as_slice::<f32>().unwrap() {
            assert!(a >= 0.0 && a <= 2.0 && a.fract() == 0.0);
        }
    }

    #[test]
    fn test_categorical_sampling_follows_caller_rng() {
        let device = device();
        let policy = CategoricalPolicyNetConfig::new(4, 3)
            .with_hidden_size(16)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([32, 4], Distribution::Default, &device);

        let mut rng_a = fastrand::Rng::with_seed(42);
        let mut rng_b = fastrand::Rng::with_seed(42);
        let a = policy.forward(obs.clone(), true, &mut rng_a);
        let b = policy.forward(obs, true, &mut rng_b);

        let a = a.action.into_data();
        let b = b.action.into_data();
        assert_eq!(
            a.as_slice::<f32>().unwrap(),
            b.as_slice::<f32>().unwrap(),
            "equal seeds must draw equal actions"
        );
    }

    #[test]
    fn test_continuous_q_shape() {
        let device = device();
        let qf = QNetConfig::continuous(6, 2)
            .with_hidden_size(16)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([4, 6], Distribution::Default, &device);
        let actions = BatchedActions::Continuous(Tensor::<TestBackend, 2>::random(
            [4, 2],
            Distribution::Default,
            &device,
        ));

        let q = qf.forward(obs, &actions);
        assert_eq!(q.dims(), [4]);
    }

    #[test]
    fn test_discrete_q_gathers_taken_action() {
        let device = device();
        let qf = QNetConfig::discrete(4, 3)
            .with_hidden_size(16)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([2, 4], Distribution::Default, &device);

        let all_values = qf.trunk(obs.clone());
        let indices = Tensor::<TestBackend, 1, Int>::from_ints([2, 0], &device).reshape([2, 1]);
        let q = qf.forward(obs, &BatchedActions::Discrete(indices));

        let all = all_values.into_data();
        let all = all.as_slice::<f32>().unwrap();
        let picked = q.into_data();
        let picked = picked.as_slice::<f32>().unwrap();
        assert!((picked[0] - all[2]).abs() < 1e-6);
        assert!((picked[1] - all[3]).abs() < 1e-6);
    }

    #[test]
    fn test_value_net_shape() {
        let device = device();
        let vf = ValueNetConfig::new(6)
            .with_hidden_size(16)
            .init::<TestBackend>(&device);
        let obs = Tensor::<TestBackend, 2>::random([7, 6], Distribution::Default, &device);

        let v = StateCritic::forward(&vf, obs);
        assert_eq!(v.dims(), [7]);
    }
}
