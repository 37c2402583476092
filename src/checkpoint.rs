//! Checkpoint directory management.
//!
//! A checkpoint root holds one subdirectory per saved step, named by the
//! zero-padded step number, plus whatever the trainer drops at the root
//! (the replay buffer). Saves are strictly monotonic in step; an
//! out-of-order save fails before touching the disk.
//!
//! Pruning keeps the newest `max_to_keep` checkpoints. Older checkpoints
//! survive if they are the first save inside their `min_keep_period` window,
//! which leaves a sparse long-term history behind the dense recent one.
//!
//! Module weights go through Burn's `BinFileRecorder` at full precision.

use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum CheckpointError {
    Io(io::Error),
    Recorder(String),
    Meta(serde_json::Error),
    /// No checkpoint exists under the root.
    NoCheckpoints,
    /// The requested step was never saved.
    MissingStep(usize),
    /// A save was attempted at or before the latest saved step.
    OutOfOrder { step: usize, latest: usize },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "checkpoint io error: {}", e),
            CheckpointError::Recorder(e) => write!(f, "checkpoint recorder error: {}", e),
            CheckpointError::Meta(e) => write!(f, "checkpoint metadata error: {}", e),
            CheckpointError::NoCheckpoints => write!(f, "no checkpoints found"),
            CheckpointError::MissingStep(step) => {
                write!(f, "no checkpoint saved at step {}", step)
            }
            CheckpointError::OutOfOrder { step, latest } => write!(
                f,
                "cannot save step {} at or before latest checkpoint {}",
                step, latest
            ),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Meta(e)
    }
}

/// Retention policy for a checkpoint root.
#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    pub dir: PathBuf,
    /// Newest checkpoints always kept; 0 keeps everything.
    pub max_to_keep: usize,
    /// Window width for the sparse long-term history; 0 disables it.
    pub min_keep_period: usize,
}

impl CheckpointerConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep: 5,
            min_keep_period: 0,
        }
    }

    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }

    pub fn with_min_keep_period(mut self, period: usize) -> Self {
        self.min_keep_period = period;
        self
    }
}

pub struct Checkpointer {
    config: CheckpointerConfig,
}

impl Checkpointer {
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self { config })
    }

    pub fn root(&self) -> &Path {
        &self.config.dir
    }

    /// Directory for a given step.
    pub fn step_dir(&self, step: usize) -> PathBuf {
        self.config.dir.join(format!("{:09}", step))
    }

    /// All saved steps, ascending.
    pub fn steps(&self) -> Result<Vec<usize>, CheckpointError> {
        let mut steps = Vec::new();
        for entry in fs::read_dir(&self.config.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(step) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<usize>().ok())
            {
                steps.push(step);
            }
        }
        steps.sort_unstable();
        Ok(steps)
    }

    pub fn latest(&self) -> Result<Option<usize>, CheckpointError> {
        Ok(self.steps()?.last().copied())
    }

    /// Start a save: enforce monotonicity, then create the step directory.
    pub fn begin_save(&self, step: usize) -> Result<PathBuf, CheckpointError> {
        if let Some(latest) = self.latest()? {
            if step <= latest {
                return Err(CheckpointError::OutOfOrder { step, latest });
            }
        }
        let dir = self.step_dir(step);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Finish a save by pruning old checkpoints per the retention policy.
    pub fn finish_save(&self) -> Result<(), CheckpointError> {
        self.prune()
    }

    /// Resolve a step (or the latest) to its directory.
    pub fn dir_for(&self, step: Option<usize>) -> Result<(usize, PathBuf), CheckpointError> {
        let steps = self.steps()?;
        let resolved = match step {
            Some(step) => {
                if !steps.contains(&step) {
                    return Err(CheckpointError::MissingStep(step));
                }
                step
            }
            None => *steps.last().ok_or(CheckpointError::NoCheckpoints)?,
        };
        Ok((resolved, self.step_dir(resolved)))
    }

    fn prune(&self) -> Result<(), CheckpointError> {
        if self.config.max_to_keep == 0 {
            return Ok(());
        }
        let steps = self.steps()?;
        if steps.len() <= self.config.max_to_keep {
            return Ok(());
        }

        let cutoff = steps.len() - self.config.max_to_keep;
        let mut last_kept_window: Option<usize> = None;
        for &step in &steps[..cutoff] {
            let keep = if self.config.min_keep_period == 0 {
                false
            } else {
                let window = step / self.config.min_keep_period;
                if last_kept_window != Some(window) {
                    last_kept_window = Some(window);
                    true
                } else {
                    false
                }
            };
            if !keep {
                fs::remove_dir_all(self.step_dir(step))?;
            }
        }
        Ok(())
    }
}

/// Save a module's weights under `dir/name.bin`.
pub fn save_module<B: Backend, M: Module<B>>(
    module: &M,
    dir: &Path,
    name: &str,
) -> Result<(), CheckpointError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .clone()
        .save_file(dir.join(name), &recorder)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}

/// Load weights saved by [`save_module`] into a structurally matching module.
pub fn load_module<B: Backend, M: Module<B>>(
    module: M,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<M, CheckpointError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .load_file(dir.join(name), &recorder, device)
        .map_err(|e| CheckpointError::Recorder(e.to_string()))
}
