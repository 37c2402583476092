//! Soft Actor-Critic training orchestrator built on Burn.
//!
//! This crate drives the 2018 value-network variant of SAC: a stochastic
//! policy, twin action-value critics, a state-value net, a slow target copy
//! of the value net, and an adaptive entropy temperature, all trained
//! off-policy from a frame-stacked replay buffer.
//!
//! The entry point is [`trainer::SacTrainer`], generic over the environment,
//! the approximators, and their optimizers. Stock MLP approximators live in
//! [`nets`], checkpointing in [`checkpoint`], and logging sinks in
//! [`metrics`].
//!
//! ```no_run
//! use burn::backend::{Autodiff, NdArray};
//! use burn::optim::AdamConfig;
//! use sac_rl::config::SacConfig;
//! use sac_rl::nets::{GaussianPolicyNetConfig, QNetConfig, ValueNetConfig};
//! use sac_rl::trainer::SacTrainer;
//! # use sac_rl::env::{Action, ActionSpace, Environment, StepOutcome};
//! # struct MyEnv;
//! # impl Environment for MyEnv {
//! #     fn observation_size(&self) -> usize { 3 }
//! #     fn action_space(&self) -> ActionSpace {
//! #         ActionSpace::Continuous { low: vec![-1.0], high: vec![1.0] }
//! #     }
//! #     fn reset(&mut self) -> Vec<f32> { vec![0.0; 3] }
//! #     fn step(&mut self, _action: &Action) -> StepOutcome {
//! #         StepOutcome { observation: vec![0.0; 3], reward: 0.0, done: false }
//! #     }
//! # }
//!
//! type Backend = Autodiff<NdArray<f32>>;
//!
//! let device = Default::default();
//! let config = SacConfig::continuous(3, vec![-1.0], vec![1.0])
//!     .with_learning_starts(1_000)
//!     .with_batch_size(64);
//!
//! let trainer = SacTrainer::<Backend, _, _, _, _, _, _, _>::new(
//!     config,
//!     MyEnv,
//!     GaussianPolicyNetConfig::new(3, 1).init(&device),
//!     QNetConfig::continuous(3, 1).init(&device),
//!     QNetConfig::continuous(3, 1).init(&device),
//!     ValueNetConfig::new(3).init(&device),
//!     AdamConfig::new().init(),
//!     AdamConfig::new().init(),
//!     AdamConfig::new().init(),
//!     AdamConfig::new().init(),
//!     device,
//! )
//! .unwrap();
//!
//! let trainer = trainer.train(100_000).unwrap();
//! # let _ = trainer;
//! ```

pub mod approximators;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod distributions;
pub mod env;
pub mod losses;
pub mod metrics;
pub mod nets;
pub mod temperature;
pub mod trainer;

pub use approximators::{ActionCritic, BatchedActions, DistParams, Policy, PolicyOutput, StateCritic};
pub use checkpoint::{CheckpointError, Checkpointer, CheckpointerConfig};
pub use config::SacConfig;
pub use crate::core::replay_buffer::{ReplayBuffer, TransitionBatch};
pub use env::{Action, ActionSpace, Environment, StepOutcome};
pub use metrics::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, NullLogger};
pub use temperature::TemperatureController;
pub use trainer::{Phase, SacTrainer, TrainerError};
