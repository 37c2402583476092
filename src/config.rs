//! Training configuration for the SAC orchestrator.

use crate::env::ActionSpace;

/// Configuration error raised by [`SacConfig::validate`].
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Hyperparameters for SAC training.
///
/// Defaults follow the standard continuous-control setup: Adam at 1e-3 for
/// every approximator, γ = 0.99, τ = 0.005, batch 256, replay capacity 1e6,
/// and 50k warmup transitions.
#[derive(Debug, Clone)]
pub struct SacConfig {
    /// Action-space descriptor, resolved once at construction.
    pub action_space: ActionSpace,
    /// Size of a single observation frame.
    pub observation_size: usize,

    /// Policy learning rate.
    pub policy_lr: f64,
    /// Critic learning rate (both critics).
    pub qf_lr: f64,
    /// Value-function learning rate.
    pub vf_lr: f64,
    /// Temperature learning rate.
    pub alpha_lr: f64,

    /// Discount factor, in (0, 1).
    pub gamma: f32,
    /// Batch size for gradient updates.
    pub batch_size: usize,
    /// Environment steps between gradient updates.
    pub update_period: usize,
    /// Gradient updates between policy updates.
    pub policy_update_period: usize,
    /// Environment steps between target-network soft updates.
    pub target_update_period: usize,
    /// Polyak coefficient τ, in (0, 1].
    pub target_smoothing_coef: f32,
    /// Transitions to collect before the first gradient update. The effective
    /// threshold is `min(learning_starts, buffer_size)`.
    pub learning_starts: usize,
    /// Multiplier applied to rewards inside the critic target.
    pub reward_scale: f32,

    /// Learn the entropy temperature instead of keeping it fixed.
    pub automatic_entropy_tuning: bool,
    /// Entropy target; `None` uses the action-space default.
    pub target_entropy: Option<f32>,
    /// Initial (or fixed, when tuning is off) temperature α.
    pub initial_alpha: f32,

    /// Use the reparameterized (pathwise) policy gradient instead of the
    /// likelihood-ratio estimator.
    pub reparameterization_trick: bool,
    /// Regularizer weight on the squared pre-tanh policy mean.
    pub policy_mean_reg_weight: f32,
    /// Regularizer weight on the squared log-std.
    pub policy_std_reg_weight: f32,

    /// Normalize observations with running statistics.
    pub normalize_observations: bool,
    /// Environment steps between normalizer updates.
    pub normalizer_update_period: usize,

    /// Replay buffer capacity in frames.
    pub buffer_size: usize,
    /// Frames stacked per encoded observation.
    pub frame_stack: usize,

    /// Steps between metric flushes.
    pub log_period: usize,
    /// Steps between checkpoint saves; `None` saves only at the end of
    /// training.
    pub save_period: Option<usize>,
}

impl SacConfig {
    fn with_space(observation_size: usize, action_space: ActionSpace) -> Self {
        Self {
            action_space,
            observation_size,
            policy_lr: 1e-3,
            qf_lr: 1e-3,
            vf_lr: 1e-3,
            alpha_lr: 1e-3,
            gamma: 0.99,
            batch_size: 256,
            update_period: 1,
            policy_update_period: 1,
            target_update_period: 1,
            target_smoothing_coef: 0.005,
            learning_starts: 50_000,
            reward_scale: 1.0,
            automatic_entropy_tuning: true,
            target_entropy: None,
            initial_alpha: 1.0,
            reparameterization_trick: true,
            policy_mean_reg_weight: 1e-3,
            policy_std_reg_weight: 1e-3,
            normalize_observations: false,
            normalizer_update_period: 128,
            buffer_size: 1_000_000,
            frame_stack: 1,
            log_period: 1000,
            save_period: None,
        }
    }

    /// Preset for a bounded continuous action space.
    pub fn continuous(observation_size: usize, low: Vec<f32>, high: Vec<f32>) -> Self {
        Self::with_space(observation_size, ActionSpace::Continuous { low, high })
    }

    /// Preset for a discrete action space with `n` actions.
    pub fn discrete(observation_size: usize, n: usize) -> Self {
        Self::with_space(observation_size, ActionSpace::Discrete { n })
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_starts(mut self, learning_starts: usize) -> Self {
        self.learning_starts = learning_starts;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_update_period(mut self, period: usize) -> Self {
        self.update_period = period;
        self
    }

    pub fn with_policy_update_period(mut self, period: usize) -> Self {
        self.policy_update_period = period;
        self
    }

    pub fn with_target_update_period(mut self, period: usize) -> Self {
        self.target_update_period = period;
        self
    }

    pub fn with_target_smoothing_coef(mut self, tau: f32) -> Self {
        self.target_smoothing_coef = tau;
        self
    }

    pub fn with_reward_scale(mut self, scale: f32) -> Self {
        self.reward_scale = scale;
        self
    }

    pub fn with_entropy_tuning(mut self, enabled: bool) -> Self {
        self.automatic_entropy_tuning = enabled;
        self
    }

    pub fn with_target_entropy(mut self, target: f32) -> Self {
        self.target_entropy = Some(target);
        self
    }

    pub fn with_initial_alpha(mut self, alpha: f32) -> Self {
        self.initial_alpha = alpha;
        self
    }

    pub fn with_reparameterization(mut self, enabled: bool) -> Self {
        self.reparameterization_trick = enabled;
        self
    }

    pub fn with_observation_normalization(mut self, enabled: bool) -> Self {
        self.normalize_observations = enabled;
        self
    }

    pub fn with_frame_stack(mut self, frames: usize) -> Self {
        self.frame_stack = frames;
        self
    }

    pub fn with_log_period(mut self, period: usize) -> Self {
        self.log_period = period;
        self
    }

    pub fn with_save_period(mut self, period: usize) -> Self {
        self.save_period = Some(period);
        self
    }

    /// Entropy target, falling back to the action-space default.
    pub fn resolved_target_entropy(&self) -> f32 {
        self.target_entropy
            .unwrap_or_else(|| self.action_space.default_target_entropy())
    }

    /// Size of one encoded (frame-stacked) observation.
    pub fn encoded_observation_size(&self) -> usize {
        self.observation_size * self.frame_stack
    }

    /// Check hyperparameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observation_size == 0 {
            return Err(ConfigError("observation_size must be positive".into()));
        }
        if self.action_space.dim() == 0 {
            return Err(ConfigError("action space must have at least one dimension".into()));
        }
        if !(self.gamma > 0.0 && self.gamma < 1.0) {
            return Err(ConfigError(format!("gamma must be in (0, 1), got {}", self.gamma)));
        }
        if !(self.target_smoothing_coef > 0.0 && self.target_smoothing_coef <= 1.0) {
            return Err(ConfigError(format!(
                "target_smoothing_coef must be in (0, 1], got {}",
                self.target_smoothing_coef
            )));
        }
        if self.batch_size == 0 {
            return Err(ConfigError("batch_size must be positive".into()));
        }
        if self.update_period == 0
            || self.policy_update_period == 0
            || self.target_update_period == 0
        {
            return Err(ConfigError("update periods must be positive".into()));
        }
        if self.buffer_size < 2 {
            return Err(ConfigError("buffer_size must hold at least two frames".into()));
        }
        if self.learning_starts.min(self.buffer_size) < 2 {
            return Err(ConfigError(
                "min(learning_starts, buffer_size) must be at least 2 so warmup leaves a sampleable buffer".into(),
            ));
        }
        if self.frame_stack == 0 {
            return Err(ConfigError("frame_stack must be positive".into()));
        }
        if self.initial_alpha <= 0.0 {
            return Err(ConfigError("initial_alpha must be positive".into()));
        }
        if self.normalize_observations && self.normalizer_update_period == 0 {
            return Err(ConfigError("normalizer_update_period must be positive".into()));
        }
        Ok(())
    }
}
