//! Shared training infrastructure: replay storage, running statistics, and
//! target-network maintenance.

pub mod replay_buffer;
pub mod running_stats;
pub mod target_network;

pub use replay_buffer::{ReplayBuffer, TransitionBatch};
pub use running_stats::{window_moments, RunningMeanStd};
pub use target_network::soft_update;
