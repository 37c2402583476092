//! The SAC training loop.
//!
//! [`SacTrainer`] owns the environment, the five approximators (policy, twin
//! critics, value net and its slow target copy), their optimizers, the
//! temperature controller, the replay buffer, and the observation normalizer.
//! It is generic over all of them; [`crate::nets`] provides stock modules.
//!
//! The trainer moves through three phases. It starts in `Warmup`, where it
//! only collects transitions. Once the buffer reaches
//! `min(learning_starts, buffer_size)` frames it enters `Training`, where
//! every [`SacTrainer::step`] advances the environment once and runs the
//! gated update pipeline. [`SacTrainer::train`] drives `step` to a step
//! budget, then lands in `Stopped`.
//!
//! `step`, `train`, and `load` consume and return the trainer: optimizer
//! steps take their module by value, and the consuming style keeps those
//! moves out of borrow trouble.

use crate::approximators::{ActionCritic, Policy, StateCritic};
use crate::checkpoint::{
    load_module, save_module, CheckpointError, Checkpointer,
};
use crate::config::SacConfig;
use crate::core::replay_buffer::ReplayBuffer;
use crate::core::running_stats::{window_moments, RunningMeanStd};
use crate::core::target_network::soft_update;
use crate::env::{Action, ActionSpace, Environment};
use crate::losses::{compute_losses, scalar, LossBatch};
use crate::metrics::{LossAccumulator, MetricsLogger, NullLogger, SacSnapshot, UpdateStats};
use crate::temperature::TemperatureController;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const RETURN_WINDOW: usize = 100;

#[derive(Debug)]
pub enum TrainerError {
    Config(crate::config::ConfigError),
    Checkpoint(CheckpointError),
}

impl std::fmt::Display for TrainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainerError::Config(e) => write!(f, "{}", e),
            TrainerError::Checkpoint(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TrainerError {}

impl From<crate::config::ConfigError> for TrainerError {
    fn from(e: crate::config::ConfigError) -> Self {
        TrainerError::Config(e)
    }
}

impl From<CheckpointError> for TrainerError {
    fn from(e: CheckpointError) -> Self {
        TrainerError::Checkpoint(e)
    }
}

/// Where the trainer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Training,
    Stopped,
}

/// Scalar trainer state persisted next to the module weights.
#[derive(Serialize, Deserialize)]
struct TrainerMeta {
    step: usize,
    updates: usize,
    episodes: usize,
    temperature: TemperatureController,
    normalizer: RunningMeanStd,
    recent_returns: Vec<f32>,
}

pub struct SacTrainer<B, E, P, Q, V, OP, OQ, OV>
where
    B: AutodiffBackend,
    E: Environment,
    P: Policy<B>,
    Q: ActionCritic<B>,
    V: StateCritic<B>,
    OP: Optimizer<P, B>,
    OQ: Optimizer<Q, B>,
    OV: Optimizer<V, B>,
{
    config: SacConfig,
    env: E,
    policy: P,
    qf1: Q,
    qf2: Q,
    vf: V,
    target_vf: V,
    opt_policy: OP,
    opt_qf1: OQ,
    opt_qf2: OQ,
    opt_vf: OV,
    temperature: TemperatureController,
    buffer: ReplayBuffer,
    normalizer: RunningMeanStd,
    accumulator: LossAccumulator,
    logger: Box<dyn MetricsLogger>,
    checkpointer: Option<Checkpointer>,
    rng: fastrand::Rng,
    device: B::Device,
    phase: Phase,
    t: usize,
    updates: usize,
    episodes: usize,
    episode_return: f32,
    recent_returns: VecDeque<f32>,
    /// Observation waiting to be stored by the next act; `None` forces an
    /// environment reset.
    pending_obs: Option<Vec<f32>>,
}

impl<B, E, P, Q, V, OP, OQ, OV> SacTrainer<B, E, P, Q, V, OP, OQ, OV>
where
    B: AutodiffBackend,
    E: Environment,
    P: Policy<B>,
    Q: ActionCritic<B>,
    V: StateCritic<B>,
    OP: Optimizer<P, B>,
    OQ: Optimizer<Q, B>,
    OV: Optimizer<V, B>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SacConfig,
        env: E,
        policy: P,
        qf1: Q,
        qf2: Q,
        vf: V,
        opt_policy: OP,
        opt_qf1: OQ,
        opt_qf2: OQ,
        opt_vf: OV,
        device: B::Device,
    ) -> Result<Self, TrainerError> {
        config.validate()?;

        let temperature = if config.automatic_entropy_tuning {
            TemperatureController::adaptive(
                config.initial_alpha,
                config.resolved_target_entropy(),
                config.alpha_lr,
            )
        } else {
            TemperatureController::fixed(config.initial_alpha)
        };

        let buffer = ReplayBuffer::new(config.buffer_size, config.frame_stack);
        let normalizer = RunningMeanStd::new(config.observation_size);
        let target_vf = vf.clone();

        Ok(Self {
            config,
            env,
            policy,
            qf1,
            qf2,
            vf,
            target_vf,
            opt_policy,
            opt_qf1,
            opt_qf2,
            opt_vf,
            temperature,
            buffer,
            normalizer,
            accumulator: LossAccumulator::new(),
            logger: Box::new(NullLogger),
            checkpointer: None,
            rng: fastrand::Rng::new(),
            device,
            phase: Phase::Warmup,
            t: 0,
            updates: 0,
            episodes: 0,
            episode_return: 0.0,
            recent_returns: VecDeque::new(),
            pending_obs: None,
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricsLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn global_step(&self) -> usize {
        self.t
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    pub fn alpha(&self) -> f32 {
        self.temperature.alpha()
    }

    pub fn config(&self) -> &SacConfig {
        &self.config
    }

    fn warmup_threshold(&self) -> usize {
        self.config.learning_starts.min(self.config.buffer_size)
    }

    fn normalize_chunks(&self, encoded: &mut [f32]) {
        if !self.config.normalize_observations {
            return;
        }
        for chunk in encoded.chunks_mut(self.config.observation_size) {
            self.normalizer.normalize_inplace(chunk);
        }
    }

    /// Feed the normalizer the most recent frames.
    fn update_normalizer(&mut self) {
        let window = self.buffer.recent_window(self.config.normalizer_update_period);
        if window.is_empty() {
            return;
        }
        let dim = self.config.observation_size;
        let (mean, var) = window_moments(&window, dim);
        self.normalizer
            .update_moments(&mean, &var, (window.len() / dim) as f64);
    }

    /// Advance the environment one step, storing the transition.
    fn act(&mut self) {
        let frame = match self.pending_obs.take() {
            Some(frame) => frame,
            None => {
                self.buffer.begin_episode();
                self.env.reset()
            }
        };
        let handle = self.buffer.record_observation(&frame);

        if self.config.normalize_observations
            && self.t > 0
            && self.t % self.config.normalizer_update_period == 0
        {
            self.update_normalizer();
        }

        let mut encoded = self.buffer.recent_encoded_observation();
        self.normalize_chunks(&mut encoded);
        let size = encoded.len();
        let obs = Tensor::<B, 1>::from_floats(encoded.as_slice(), &self.device).reshape([1, size]);

        let output =
            self.policy
                .forward(obs, self.config.reparameterization_trick, &mut self.rng);
        let action_data = output.action.detach().into_data();
        let action_values = action_data.as_slice::<f32>().unwrap();

        let (stored, for_env) = match &self.config.action_space {
            ActionSpace::Discrete { .. } => {
                let index = action_values[0] as usize;
                (Action::Discrete(index), Action::Discrete(index))
            }
            space @ ActionSpace::Continuous { .. } => {
                let unscaled = action_values.to_vec();
                let scaled = space.scale_action(&unscaled);
                (Action::Continuous(unscaled), Action::Continuous(scaled))
            }
        };

        let outcome = self.env.step(&for_env);
        self.buffer
            .finalize(handle, stored, outcome.reward, outcome.done);

        self.episode_return += outcome.reward;
        if outcome.done {
            self.episodes += 1;
            self.recent_returns.push_back(self.episode_return);
            if self.recent_returns.len() > RETURN_WINDOW {
                self.recent_returns.pop_front();
            }
            self.episode_return = 0.0;
            self.pending_obs = None;
        } else {
            self.pending_obs = Some(outcome.observation);
        }
        self.t += 1;
    }

    /// One gradient update over a sampled batch.
    fn update(mut self) -> Self {
        let mut transitions = self.buffer.sample(self.config.batch_size, &mut self.rng);
        if self.config.normalize_observations {
            let mut observations = std::mem::take(&mut transitions.observations);
            self.normalize_chunks(&mut observations);
            transitions.observations = observations;
            let mut next_observations = std::mem::take(&mut transitions.next_observations);
            self.normalize_chunks(&mut next_observations);
            transitions.next_observations = next_observations;
        }
        let batch = LossBatch::from_transitions(&transitions, &self.device);

        let update_policy = self.t % self.config.policy_update_period == 0;
        let losses = compute_losses(
            &self.policy,
            &self.qf1,
            &self.qf2,
            &self.vf,
            &self.target_vf,
            &mut self.temperature,
            &batch,
            &self.config,
            &mut self.rng,
            update_policy,
        );

        let stats = UpdateStats {
            policy_loss: losses.policy.as_ref().map(|l| scalar(l.clone().detach())),
            qf1_loss: scalar(losses.qf1.clone().detach()),
            qf2_loss: scalar(losses.qf2.clone().detach()),
            vf_loss: scalar(losses.vf.clone().detach()),
            alpha_loss: losses.alpha_loss,
            alpha: losses.alpha,
            mean_log_prob: losses.mean_log_prob,
        };
        self.accumulator.record(stats);

        let grads = losses.qf1.backward();
        let grads = GradientsParams::from_grads(grads, &self.qf1);
        self.qf1 = self.opt_qf1.step(self.config.qf_lr, self.qf1, grads);

        let grads = losses.qf2.backward();
        let grads = GradientsParams::from_grads(grads, &self.qf2);
        self.qf2 = self.opt_qf2.step(self.config.qf_lr, self.qf2, grads);

        let grads = losses.vf.backward();
        let grads = GradientsParams::from_grads(grads, &self.vf);
        self.vf = self.opt_vf.step(self.config.vf_lr, self.vf, grads);

        if let Some(policy_loss) = losses.policy {
            let grads = policy_loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.policy);
            self.policy = self.opt_policy.step(self.config.policy_lr, self.policy, grads);
        }

        self.updates += 1;
        self
    }

    fn emit_log(&mut self) {
        let means = self.accumulator.drain().unwrap_or_default();
        let mean_return = if self.recent_returns.is_empty() {
            0.0
        } else {
            self.recent_returns.iter().sum::<f32>() / self.recent_returns.len() as f32
        };
        let snapshot = SacSnapshot {
            step: self.t,
            buffer_len: self.buffer.len(),
            episodes: self.episodes,
            mean_return,
            policy_loss: means.policy_loss,
            qf1_loss: means.qf1_loss,
            qf2_loss: means.qf2_loss,
            vf_loss: means.vf_loss,
            alpha_loss: means.alpha_loss,
            alpha: means.alpha,
            entropy: -means.mean_log_prob,
        };
        self.logger.log(&snapshot);
        self.logger.flush();
    }

    /// Collect one transition (more during warmup) and run the gated update
    /// pipeline.
    pub fn step(mut self) -> Result<Self, TrainerError> {
        if self.phase == Phase::Stopped {
            return Ok(self);
        }

        self.act();
        while self.buffer.len() < self.warmup_threshold() {
            self.act();
        }
        self.phase = Phase::Training;

        if self.t % self.config.target_update_period == 0 {
            self.target_vf = soft_update::<B, V>(
                &self.vf,
                self.target_vf,
                self.config.target_smoothing_coef,
            );
        }

        // Warmup already guaranteed the buffer can supply a batch.
        if self.t % self.config.update_period == 0 {
            self = self.update();
        }

        if self.t > 0 && self.t % self.config.log_period == 0 {
            self.emit_log();
        }

        if let Some(period) = self.config.save_period {
            if self.t % period == 0 {
                self.save()?;
            }
        }

        Ok(self)
    }

    /// Drive [`SacTrainer::step`] until `max_steps` environment steps.
    ///
    /// Resumes from the latest checkpoint when the checkpoint root already
    /// holds one, saves a final checkpoint, and stops.
    pub fn train(mut self, max_steps: usize) -> Result<Self, TrainerError> {
        if let Some(ckpt) = &self.checkpointer {
            if ckpt.latest()?.is_some() {
                self = self.load(None)?;
            }
        }

        while self.t < max_steps {
            self = self.step()?;
        }

        if self.accumulator.count() > 0 {
            self.emit_log();
        }
        if let Some(ckpt) = &self.checkpointer {
            if ckpt.latest()? != Some(self.t) {
                self.save()?;
            }
        }
        self.phase = Phase::Stopped;
        Ok(self)
    }

    /// Save everything needed to resume at the current step.
    pub fn save(&mut self) -> Result<(), TrainerError> {
        let Some(ckpt) = &self.checkpointer else {
            return Ok(());
        };
        let dir = ckpt.begin_save(self.t)?;

        save_module::<B, P>(&self.policy, &dir, "policy")?;
        save_module::<B, Q>(&self.qf1, &dir, "qf1")?;
        save_module::<B, Q>(&self.qf2, &dir, "qf2")?;
        save_module::<B, V>(&self.vf, &dir, "vf")?;

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        record_optimizer::<B, _>(&recorder, self.opt_policy.to_record(), &dir, "opt_policy")?;
        record_optimizer::<B, _>(&recorder, self.opt_qf1.to_record(), &dir, "opt_qf1")?;
        record_optimizer::<B, _>(&recorder, self.opt_qf2.to_record(), &dir, "opt_qf2")?;
        record_optimizer::<B, _>(&recorder, self.opt_vf.to_record(), &dir, "opt_vf")?;

        let meta = TrainerMeta {
            step: self.t,
            updates: self.updates,
            episodes: self.episodes,
            temperature: self.temperature.clone(),
            normalizer: self.normalizer.clone(),
            recent_returns: self.recent_returns.iter().copied().collect(),
        };
        let file = File::create(dir.join("meta.json")).map_err(CheckpointError::Io)?;
        serde_json::to_writer(BufWriter::new(file), &meta).map_err(CheckpointError::Meta)?;

        // The buffer lives at the root and always reflects the latest save.
        let file = File::create(ckpt.root().join("buffer.json")).map_err(CheckpointError::Io)?;
        serde_json::to_writer(BufWriter::new(file), &self.buffer).map_err(CheckpointError::Meta)?;

        ckpt.finish_save()?;
        Ok(())
    }

    /// Restore from a checkpoint, the latest when `step` is `None`.
    ///
    /// The target value net is rebuilt from the saved live value net.
    pub fn load(mut self, step: Option<usize>) -> Result<Self, TrainerError> {
        let Some(ckpt) = &self.checkpointer else {
            return Err(CheckpointError::NoCheckpoints.into());
        };
        let (_, dir) = ckpt.dir_for(step)?;
        let root = ckpt.root().to_path_buf();

        self.policy = load_module::<B, P>(self.policy, &dir, "policy", &self.device)?;
        self.qf1 = load_module::<B, Q>(self.qf1, &dir, "qf1", &self.device)?;
        self.qf2 = load_module::<B, Q>(self.qf2, &dir, "qf2", &self.device)?;
        self.vf = load_module::<B, V>(self.vf, &dir, "vf", &self.device)?;
        self.target_vf = load_module::<B, V>(self.target_vf, &dir, "vf", &self.device)?;

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let record = load_optimizer_record::<B, OP::Record>(&recorder, &dir, "opt_policy", &self.device)?;
        self.opt_policy = self.opt_policy.load_record(record);
        let record = load_optimizer_record::<B, OQ::Record>(&recorder, &dir, "opt_qf1", &self.device)?;
        self.opt_qf1 = self.opt_qf1.load_record(record);
        let record = load_optimizer_record::<B, OQ::Record>(&recorder, &dir, "opt_qf2", &self.device)?;
        self.opt_qf2 = self.opt_qf2.load_record(record);
        let record = load_optimizer_record::<B, OV::Record>(&recorder, &dir, "opt_vf", &self.device)?;
        self.opt_vf = self.opt_vf.load_record(record);

        let file = File::open(dir.join("meta.json")).map_err(CheckpointError::Io)?;
        let meta: TrainerMeta =
            serde_json::from_reader(BufReader::new(file)).map_err(CheckpointError::Meta)?;
        self.t = meta.step;
        self.updates = meta.updates;
        self.episodes = meta.episodes;
        self.temperature = meta.temperature;
        self.normalizer = meta.normalizer;
        self.recent_returns = meta.recent_returns.into_iter().collect();

        let buffer_path = root.join("buffer.json");
        if buffer_path.exists() {
            let file = File::open(buffer_path).map_err(CheckpointError::Io)?;
            self.buffer =
                serde_json::from_reader(BufReader::new(file)).map_err(CheckpointError::Meta)?;
        }

        self.phase = if self.buffer.len() >= self.warmup_threshold() {
            Phase::Training
        } else {
            Phase::Warmup
        };
        self.episode_return = 0.0;
        self.pending_obs = None;
        Ok(self)
    }
}

fn record_optimizer<B: AutodiffBackend, R: burn::record::Record<B>>(
    recorder: &BinFileRecorder<FullPrecisionSettings>,
    record: R,
    dir: &Path,
    name: &str,
) -> Result<(), CheckpointError> {
    recorder
        .record(record, dir.join(name))
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}

fn load_optimizer_record<B: AutodiffBackend, R: burn::record::Record<B>>(
    recorder: &BinFileRecorder<FullPrecisionSettings>,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<R, CheckpointError> {
    recorder
        .load(dir.join(name), device)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}
