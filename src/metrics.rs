//! Training metrics and logging sinks.
//!
//! The trainer accumulates per-update loss scalars between log points, then
//! emits a [`SacSnapshot`] to whatever [`MetricsLogger`] it was given.
//! Loggers are composable through [`MultiLogger`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// One logged row of training state.
#[derive(Debug, Clone)]
pub struct SacSnapshot {
    pub step: usize,
    pub buffer_len: usize,
    pub episodes: usize,
    /// Mean return over recently finished episodes.
    pub mean_return: f32,
    pub policy_loss: f32,
    pub qf1_loss: f32,
    pub qf2_loss: f32,
    pub vf_loss: f32,
    pub alpha_loss: f32,
    pub alpha: f32,
    /// Negated batch-mean action log-density.
    pub entropy: f32,
}

/// A sink for training snapshots.
pub trait MetricsLogger: Send {
    fn log(&mut self, snapshot: &SacSnapshot);
    fn flush(&mut self);
}

/// Fixed-width column output to stdout, header reprinted every 20 rows.
pub struct ConsoleLogger {
    rows_since_header: usize,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            rows_since_header: 0,
        }
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, s: &SacSnapshot) {
        if self.rows_since_header == 0 {
            println!(
                "{:>10} {:>9} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8} {:>8}",
                "step", "buffer", "episodes", "return", "pi_loss", "q1_loss", "q2_loss",
                "v_loss", "alpha", "entropy"
            );
        }
        self.rows_since_header = (self.rows_since_header + 1) % 20;

        println!(
            "{:>10} {:>9} {:>8} {:>10.3} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8.4} {:>8.3}",
            s.step,
            s.buffer_len,
            s.episodes,
            s.mean_return,
            s.policy_loss,
            s.qf1_loss,
            s.qf2_loss,
            s.vf_loss,
            s.alpha,
            s.entropy
        );
    }

    fn flush(&mut self) {
        let _ = io::stdout().flush();
    }
}

/// Appends snapshots as CSV rows.
pub struct CsvLogger {
    writer: BufWriter<File>,
    wrote_header: bool,
}

impl CsvLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            wrote_header: false,
        })
    }
}

impl MetricsLogger for CsvLogger {
    fn log(&mut self, s: &SacSnapshot) {
        if !self.wrote_header {
            let _ = writeln!(
                self.writer,
                "step,buffer_len,episodes,mean_return,policy_loss,qf1_loss,qf2_loss,vf_loss,alpha_loss,alpha,entropy"
            );
            self.wrote_header = true;
        }
        let _ = writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{},{},{}",
            s.step,
            s.buffer_len,
            s.episodes,
            s.mean_return,
            s.policy_loss,
            s.qf1_loss,
            s.qf2_loss,
            s.vf_loss,
            s.alpha_loss,
            s.alpha,
            s.entropy
        );
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Fans snapshots out to several loggers.
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new(loggers: Vec<Box<dyn MetricsLogger>>) -> Self {
        Self { loggers }
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &SacSnapshot) {
        for logger in self.loggers.iter_mut() {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in self.loggers.iter_mut() {
            logger.flush();
        }
    }
}

/// Discards everything.
pub struct NullLogger;

impl MetricsLogger for NullLogger {
    fn log(&mut self, _snapshot: &SacSnapshot) {}
    fn flush(&mut self) {}
}

/// Loss scalars from one gradient update.
#[derive(Debug, Clone, Copy)]
pub struct UpdateStats {
    pub policy_loss: Option<f32>,
    pub qf1_loss: f32,
    pub qf2_loss: f32,
    pub vf_loss: f32,
    pub alpha_loss: f32,
    pub alpha: f32,
    pub mean_log_prob: f32,
}

/// Averaged loss scalars between two log points.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateMeans {
    pub policy_loss: f32,
    pub qf1_loss: f32,
    pub qf2_loss: f32,
    pub vf_loss: f32,
    pub alpha_loss: f32,
    pub alpha: f32,
    pub mean_log_prob: f32,
}

/// Accumulates [`UpdateStats`] and hands back their means.
#[derive(Debug, Default)]
pub struct LossAccumulator {
    sums: UpdateMeans,
    policy_count: usize,
    count: usize,
}

impl LossAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: UpdateStats) {
        if let Some(policy_loss) = stats.policy_loss {
            self.sums.policy_loss += policy_loss;
            self.policy_count += 1;
        }
        self.sums.qf1_loss += stats.qf1_loss;
        self.sums.qf2_loss += stats.qf2_loss;
        self.sums.vf_loss += stats.vf_loss;
        self.sums.alpha_loss += stats.alpha_loss;
        self.sums.alpha += stats.alpha;
        self.sums.mean_log_prob += stats.mean_log_prob;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Means since the last drain, or `None` when nothing was recorded.
    pub fn drain(&mut self) -> Option<UpdateMeans> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f32;
        let policy_n = self.policy_count.max(1) as f32;
        let means = UpdateMeans {
            policy_loss: self.sums.policy_loss / policy_n,
            qf1_loss: self.sums.qf1_loss / n,
            qf2_loss: self.sums.qf2_loss / n,
            vf_loss: self.sums.vf_loss / n,
            alpha_loss: self.sums.alpha_loss / n,
            alpha: self.sums.alpha / n,
            mean_log_prob: self.sums.mean_log_prob / n,
        };
        *self = Self::default();
        Some(means)
    }
}
