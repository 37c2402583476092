//! Running observation statistics using Welford's online algorithm.
//!
//! The trainer feeds the normalizer windows of recently stored observations as
//! batched moments; [`RunningMeanStd::update_moments`] merges them with the
//! parallel form of Welford's algorithm rather than overwriting, so the
//! statistics remain a consistent summary of everything seen so far.

use serde::{Deserialize, Serialize};

/// Per-dimension running mean and variance.
///
/// `var_sum` holds the sum of squared deviations; the population variance is
/// `var_sum / count`. Numerically stable for large sample counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningMeanStd {
    mean: Vec<f64>,
    var_sum: Vec<f64>,
    count: f64,
    epsilon: f64,
}

impl RunningMeanStd {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            var_sum: vec![0.0; dim],
            count: 0.0,
            epsilon: 1e-8,
        }
    }

    /// Update with a single observation.
    ///
    /// # Panics
    /// Panics if the observation dimension does not match.
    pub fn update(&mut self, obs: &[f32]) {
        assert_eq!(obs.len(), self.mean.len(), "observation dimension mismatch");

        self.count += 1.0;
        for i in 0..obs.len() {
            let x = obs[i] as f64;
            let delta = x - self.mean[i];
            self.mean[i] += delta / self.count;
            let delta2 = x - self.mean[i];
            self.var_sum[i] += delta * delta2;
        }
    }

    /// Update with a flattened batch of observations.
    pub fn update_batch(&mut self, batch: &[f32]) {
        let dim = self.mean.len();
        assert_eq!(batch.len() % dim, 0, "batch size must be a multiple of dim");

        for obs in batch.chunks_exact(dim) {
            self.update(obs);
        }
    }

    /// Merge pre-aggregated batch moments into the running statistics.
    ///
    /// Parallel Welford merge:
    /// `M2_combined = M2_a + M2_b + delta^2 * n_a * n_b / (n_a + n_b)`.
    ///
    /// # Panics
    /// Panics if the moment dimensions do not match.
    pub fn update_moments(&mut self, batch_mean: &[f64], batch_var: &[f64], batch_count: f64) {
        assert_eq!(batch_mean.len(), self.mean.len(), "moment dimension mismatch");
        assert_eq!(batch_var.len(), self.mean.len(), "moment dimension mismatch");

        if batch_count <= 0.0 {
            return;
        }
        if self.count == 0.0 {
            self.mean.copy_from_slice(batch_mean);
            for i in 0..self.var_sum.len() {
                self.var_sum[i] = batch_var[i] * batch_count;
            }
            self.count = batch_count;
            return;
        }

        let total_count = self.count + batch_count;
        for i in 0..self.mean.len() {
            let delta = batch_mean[i] - self.mean[i];
            self.mean[i] += delta * batch_count / total_count;
            self.var_sum[i] += batch_var[i] * batch_count
                + delta * delta * self.count * batch_count / total_count;
        }
        self.count = total_count;
    }

    /// Normalize an observation to zero mean and unit variance, in place.
    pub fn normalize_inplace(&self, obs: &mut [f32]) {
        assert_eq!(obs.len(), self.mean.len(), "observation dimension mismatch");

        for (i, x) in obs.iter_mut().enumerate() {
            let std = self.std(i);
            *x = ((*x as f64 - self.mean[i]) / std) as f32;
        }
    }

    /// Normalize an observation, returning a new vector.
    pub fn normalize(&self, obs: &[f32]) -> Vec<f32> {
        let mut out = obs.to_vec();
        self.normalize_inplace(&mut out);
        out
    }

    #[inline]
    fn std(&self, i: usize) -> f64 {
        if self.count < 2.0 {
            1.0
        } else {
            (self.var_sum[i] / self.count).sqrt().max(self.epsilon)
        }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Population variance per dimension.
    pub fn variance(&self) -> Vec<f64> {
        if self.count < 2.0 {
            vec![1.0; self.mean.len()]
        } else {
            self.var_sum.iter().map(|&v| v / self.count).collect()
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

/// Compute `(mean, variance)` per dimension over a flattened window of
/// observations. Used to turn a replay-buffer window into batched moments for
/// [`RunningMeanStd::update_moments`].
pub fn window_moments(window: &[f32], dim: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(dim > 0 && window.len() % dim == 0, "window must be a multiple of dim");
    let n = (window.len() / dim) as f64;

    let mut mean = vec![0.0f64; dim];
    for obs in window.chunks_exact(dim) {
        for (m, &x) in mean.iter_mut().zip(obs.iter()) {
            *m += x as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut var = vec![0.0f64; dim];
    for obs in window.chunks_exact(dim) {
        for i in 0..dim {
            let d = obs[i] as f64 - mean[i];
            var[i] += d * d;
        }
    }
    for v in var.iter_mut() {
        *v /= n;
    }

    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_mean() {
        let mut stats = RunningMeanStd::new(2);
        stats.update(&[1.0, 2.0]);
        stats.update(&[3.0, 4.0]);
        stats.update(&[5.0, 6.0]);

        let mean = stats.mean();
        assert!((mean[0] - 3.0).abs() < 1e-10);
        assert!((mean[1] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_welford_variance() {
        let mut stats = RunningMeanStd::new(1);
        // Values: 2, 4, 4, 4, 5, 5, 7, 9 -> mean 5, variance 4
        for &x in &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.update(&[x]);
        }

        let var = stats.variance();
        assert!((var[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_update_moments_matches_direct_updates() {
        let data: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut direct = RunningMeanStd::new(2);
        direct.update_batch(&data);

        let mut merged = RunningMeanStd::new(2);
        // Feed the same data in two windows of batched moments.
        for window in data.chunks(32) {
            let (mean, var) = window_moments(window, 2);
            merged.update_moments(&mean, &var, (window.len() / 2) as f64);
        }

        assert!((direct.count() - merged.count()).abs() < 1e-10);
        for i in 0..2 {
            assert!((direct.mean()[i] - merged.mean()[i]).abs() < 1e-9);
            assert!((direct.variance()[i] - merged.variance()[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_normalize() {
        let mut stats = RunningMeanStd::new(2);
        for _ in 0..1000 {
            stats.update(&[0.0, 10.0]);
            stats.update(&[2.0, 10.0]);
        }

        let normalized = stats.normalize(&[1.0, 10.0]);
        assert!(normalized[0].abs() < 0.1);
        assert!(normalized[1].abs() < 0.1);
    }

    #[test]
    fn test_normalize_before_enough_samples_is_identity_scale() {
        let stats = RunningMeanStd::new(1);
        // count < 2 uses unit std and zero mean
        let normalized = stats.normalize(&[3.5]);
        assert!((normalized[0] - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_window_moments() {
        let window = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (mean, var) = window_moments(&window, 2);
        assert!((mean[0] - 3.0).abs() < 1e-10);
        assert!((mean[1] - 4.0).abs() < 1e-10);
        // population variance of [1,3,5] is 8/3
        assert!((var[0] - 8.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut stats = RunningMeanStd::new(3);
        stats.update(&[1.0, 2.0, 3.0]);
        stats.update(&[4.0, 5.0, 6.0]);

        let json = serde_json::to_string(&stats).unwrap();
        let restored: RunningMeanStd = serde_json::from_str(&json).unwrap();

        assert_eq!(stats.mean(), restored.mean());
        assert_eq!(stats.count(), restored.count());
    }
}
