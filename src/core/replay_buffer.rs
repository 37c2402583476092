//! Frame-stacked circular replay buffer.
//!
//! Storage is per frame, not per stacked observation: each environment step
//! writes one frame plus its effect (action, reward, done), and stacked
//! observations are re-assembled on demand by walking back `frame_stack - 1`
//! frames. Walks never cross an episode start; missing history is zero-padded
//! at the front, so an encoded observation is always oldest-first with
//! `frame_stack * frame_size` elements.
//!
//! Writing is split in two: [`ReplayBuffer::record_observation`] stores the
//! frame and returns a handle, the policy acts on the encoded observation, and
//! [`ReplayBuffer::finalize`] writes the effect at the handle once the
//! environment has replied.

use crate::env::Action;
use serde::{Deserialize, Serialize};

/// A sampled batch of transitions in flat host memory.
///
/// `observations` and `next_observations` are row-major
/// `[batch_size, observation_size]` buffers ready to upload as rank-2
/// tensors. `dones` is `1.0` for terminal transitions, `0.0` otherwise.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub observations: Vec<f32>,
    pub actions: Vec<Action>,
    pub rewards: Vec<f32>,
    pub next_observations: Vec<f32>,
    pub dones: Vec<f32>,
    pub batch_size: usize,
    pub observation_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayBuffer {
    capacity: usize,
    frame_stack: usize,
    /// Resolved from the first stored frame.
    frame_size: usize,
    frames: Vec<f32>,
    actions: Vec<Action>,
    rewards: Vec<f32>,
    dones: Vec<bool>,
    episode_starts: Vec<bool>,
    next_idx: usize,
    len: usize,
    /// Set by [`ReplayBuffer::begin_episode`]; consumed by the next stored
    /// frame, which becomes an episode start.
    at_episode_start: bool,
}

impl ReplayBuffer {
    /// Create a buffer holding up to `capacity` frames, each encoded
    /// observation stacking `frame_stack` of them.
    pub fn new(capacity: usize, frame_stack: usize) -> Self {
        assert!(capacity >= 2, "capacity must hold at least two frames");
        assert!(frame_stack >= 1, "frame_stack must be positive");
        Self {
            capacity,
            frame_stack,
            frame_size: 0,
            frames: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            dones: Vec::new(),
            episode_starts: Vec::new(),
            next_idx: 0,
            len: 0,
            at_episode_start: true,
        }
    }

    /// Number of frames currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_stack(&self) -> usize {
        self.frame_stack
    }

    /// Size of one encoded (stacked) observation, 0 before the first frame.
    pub fn encoded_size(&self) -> usize {
        self.frame_size * self.frame_stack
    }

    /// Mark that the next stored frame begins a new episode.
    pub fn begin_episode(&mut self) {
        self.at_episode_start = true;
    }

    /// Store one observation frame and return its handle.
    ///
    /// The effect of the step taken from this frame is attached later with
    /// [`ReplayBuffer::finalize`]. Overwrites the oldest frame once full.
    ///
    /// # Panics
    /// Panics if the frame size differs from the first stored frame.
    pub fn record_observation(&mut self, frame: &[f32]) -> usize {
        if self.frame_size == 0 {
            self.frame_size = frame.len();
            assert!(self.frame_size > 0, "frames must be non-empty");
            self.frames = vec![0.0; self.capacity * self.frame_size];
            self.actions = vec![Action::Discrete(0); self.capacity];
            self.rewards = vec![0.0; self.capacity];
            self.dones = vec![false; self.capacity];
            self.episode_starts = vec![false; self.capacity];
        }
        assert_eq!(frame.len(), self.frame_size, "frame size mismatch");

        let idx = self.next_idx;
        let start = idx * self.frame_size;
        self.frames[start..start + self.frame_size].copy_from_slice(frame);
        self.episode_starts[idx] = self.at_episode_start;
        self.at_episode_start = false;

        self.next_idx = (self.next_idx + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
        idx
    }

    /// Attach the effect of the step taken from the frame at `handle`.
    pub fn finalize(&mut self, handle: usize, action: Action, reward: f32, done: bool) {
        assert!(handle < self.capacity, "handle out of range");
        self.actions[handle] = action;
        self.rewards[handle] = reward;
        self.dones[handle] = done;
    }

    fn oldest_idx(&self) -> usize {
        (self.next_idx + self.capacity - self.len) % self.capacity
    }

    /// Frames stored strictly before `idx`, available for stacking.
    fn history_behind(&self, idx: usize) -> usize {
        (idx + self.capacity - self.oldest_idx()) % self.capacity
    }

    /// Assemble the stacked observation ending at frame `idx`.
    fn encode_observation(&self, idx: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; self.frame_stack * self.frame_size];

        // Walk back from idx, newest-last, stopping at an episode start or
        // the oldest stored frame.
        let mut frame_idx = idx;
        let mut remaining_history = self.history_behind(idx);
        for slot in (0..self.frame_stack).rev() {
            let src = frame_idx * self.frame_size;
            let dst = slot * self.frame_size;
            out[dst..dst + self.frame_size]
                .copy_from_slice(&self.frames[src..src + self.frame_size]);

            if self.episode_starts[frame_idx] || remaining_history == 0 {
                break;
            }
            frame_idx = (frame_idx + self.capacity - 1) % self.capacity;
            remaining_history -= 1;
        }
        out
    }

    /// Encoded observation for the most recently stored frame.
    ///
    /// # Panics
    /// Panics on an empty buffer.
    pub fn recent_encoded_observation(&self) -> Vec<f32> {
        assert!(self.len > 0, "buffer is empty");
        let newest = (self.next_idx + self.capacity - 1) % self.capacity;
        self.encode_observation(newest)
    }

    /// The last `n` stored frames flattened oldest-first, fewer if the buffer
    /// holds fewer.
    pub fn recent_window(&self, n: usize) -> Vec<f32> {
        let take = n.min(self.len);
        let mut out = Vec::with_capacity(take * self.frame_size);
        let first = (self.next_idx + self.capacity - take) % self.capacity;
        for k in 0..take {
            let idx = (first + k) % self.capacity;
            let start = idx * self.frame_size;
            out.extend_from_slice(&self.frames[start..start + self.frame_size]);
        }
        out
    }

    /// Whether a batch can be sampled. Draws are with replacement, so one
    /// complete transition (a frame plus its stored successor) supplies any
    /// batch size.
    pub fn can_sample(&self, batch_size: usize) -> bool {
        batch_size > 0 && self.len >= 2
    }

    /// Sample `batch_size` transitions uniformly with replacement.
    ///
    /// The newest frame is excluded because its successor has not been stored
    /// yet.
    ///
    /// # Panics
    /// Panics if the buffer cannot supply the batch; check with
    /// [`ReplayBuffer::can_sample`] first.
    pub fn sample(&self, batch_size: usize, rng: &mut fastrand::Rng) -> TransitionBatch {
        assert!(self.can_sample(batch_size), "not enough transitions to sample");

        let obs_size = self.encoded_size();
        let oldest = self.oldest_idx();
        let mut observations = Vec::with_capacity(batch_size * obs_size);
        let mut next_observations = Vec::with_capacity(batch_size * obs_size);
        let mut actions = Vec::with_capacity(batch_size);
        let mut rewards = Vec::with_capacity(batch_size);
        let mut dones = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let offset = rng.usize(0..=self.len - 2);
            let idx = (oldest + offset) % self.capacity;
            let next = (idx + 1) % self.capacity;

            observations.extend_from_slice(&self.encode_observation(idx));
            next_observations.extend_from_slice(&self.encode_observation(next));
            actions.push(self.actions[idx].clone());
            rewards.push(self.rewards[idx]);
            dones.push(if self.dones[idx] { 1.0 } else { 0.0 });
        }

        TransitionBatch {
            observations,
            actions,
            rewards,
            next_observations,
            dones,
            batch_size,
            observation_size: obs_size,
        }
    }
}
