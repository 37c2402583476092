//! Sampling and log-density helpers for the policy heads.
//!
//! Continuous policies are tanh-squashed Gaussians: the network emits a
//! pre-squash mean and log-std, a sample is drawn with the reparameterization
//! trick, and `tanh` maps it into `[-1, 1]`. The density picks up the change
//! of variables term `log(1 - a^2)` per dimension.
//!
//! Discrete policies are categoricals over logits; sampling happens on the
//! host, the log-density stays on the graph.

use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax, tanh};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Distribution;

/// Clamp bounds for the policy's log-std head.
pub const LOG_STD_MIN: f32 = -20.0;
pub const LOG_STD_MAX: f32 = 2.0;

/// Numerical floor inside logs and atanh.
pub const EPSILON: f32 = 1e-6;

const LOG_2PI: f32 = 1.837_877_1;

/// Inverse hyperbolic tangent, elementwise.
fn atanh<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let one_plus = x.clone().add_scalar(1.0);
    let one_minus = x.neg().add_scalar(1.0);
    (one_plus.log() - one_minus.log()).mul_scalar(0.5)
}

/// Tanh change-of-variables term, summed over action dimensions.
///
/// `1 - a^2` is clamped to `[EPSILON, 1]` so the log stays finite at the
/// squash boundary.
fn squash_correction<B: Backend>(action: Tensor<B, 2>) -> Tensor<B, 1> {
    let one_minus_sq = action
        .powf_scalar(2.0)
        .neg()
        .add_scalar(1.0)
        .clamp(EPSILON, 1.0);
    one_minus_sq.log().sum_dim(1).flatten(0, 1)
}

/// Gaussian log-density of the standardized noise, summed over dimensions.
fn gaussian_log_prob<B: Backend>(noise: Tensor<B, 2>, log_std: Tensor<B, 2>) -> Tensor<B, 1> {
    let per_dim = noise
        .powf_scalar(2.0)
        .add_scalar(LOG_2PI)
        .mul_scalar(-0.5)
        - log_std;
    per_dim.sum_dim(1).flatten(0, 1)
}

/// Draw a reparameterized Gaussian sample and its log-density.
///
/// The noise is reused for the density, so no inversion is needed and the
/// sample stays differentiable w.r.t. `mean` and `log_std`.
pub fn sample_gaussian<B: Backend>(
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let shape = mean.dims();
    let device = mean.device();
    let noise = Tensor::<B, 2>::random(shape, Distribution::Normal(0.0, 1.0), &device);

    let std = log_std.clone().exp();
    let sample = mean + std * noise.clone();
    let log_prob = gaussian_log_prob(noise, log_std);
    (sample, log_prob)
}

/// Draw a tanh-squashed Gaussian action in `[-1, 1]` and its log-density.
pub fn sample_squashed_gaussian<B: Backend>(
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let (sample, gaussian_lp) = sample_gaussian(mean, log_std);
    let action = tanh(sample);
    let log_prob = gaussian_lp - squash_correction(action.clone());
    (action, log_prob)
}

/// Log-density of a given squashed action under `(mean, log_std)`.
///
/// Inverts the squash with `atanh` on an action clamped away from the
/// boundary.
pub fn log_prob_squashed_gaussian<B: Backend>(
    action: Tensor<B, 2>,
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let clamped = action.clone().clamp(-1.0 + EPSILON, 1.0 - EPSILON);
    let pre_squash = atanh(clamped);
    let noise = (pre_squash - mean) * log_std.clone().exp().recip();
    gaussian_log_prob(noise, log_std) - squash_correction(action)
}

/// Squashed Gaussian sample with the pathwise gradient cut.
///
/// The action is detached and its log-density recomputed through the inverse
/// squash, so gradients reach `mean` and `log_std` only through the density.
/// This is the sampling mode for the likelihood-ratio policy gradient.
pub fn sample_squashed_gaussian_detached<B: AutodiffBackend>(
    mean: Tensor<B, 2>,
    log_std: Tensor<B, 2>,
) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let (action, _) = sample_squashed_gaussian(mean.clone(), log_std.clone());
    let action = action.detach();
    let log_prob = log_prob_squashed_gaussian(action.clone(), mean, log_std);
    (action, log_prob)
}

/// Sample one categorical index per row of `logits` and return the indices
/// with their log-densities.
///
/// Probabilities are pulled to the host for the draw; the log-density is a
/// gather from `log_softmax`, so it stays differentiable w.r.t. the logits.
pub fn sample_categorical<B: AutodiffBackend>(
    logits: Tensor<B, 2>,
    rng: &mut fastrand::Rng,
) -> (Vec<usize>, Tensor<B, 1>) {
    let [rows, cols] = logits.dims();
    let device = logits.device();

    let probs_data = softmax(logits.clone(), 1).detach().into_data();
    let probs = probs_data.as_slice::<f32>().unwrap();

    let mut indices = Vec::with_capacity(rows);
    for row in 0..rows {
        let row_probs = &probs[row * cols..(row + 1) * cols];
        let draw = rng.f32();
        let mut cumulative = 0.0;
        let mut picked = cols - 1;
        for (i, &p) in row_probs.iter().enumerate() {
            cumulative += p;
            if draw < cumulative {
                picked = i;
                break;
            }
        }
        indices.push(picked);
    }

    let index_values: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
    let index_tensor =
        Tensor::<B, 1, Int>::from_ints(index_values.as_slice(), &device).reshape([rows, 1]);
    let log_prob = log_softmax(logits, 1)
        .gather(1, index_tensor)
        .flatten(0, 1);

    (indices, log_prob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_squashed_sample_in_bounds() {
        let device = device();
        let mean = Tensor::<TestBackend, 2>::zeros([16, 3], &device);
        let log_std = Tensor::<TestBackend, 2>::ones([16, 3], &device);

        let (action, log_prob) = sample_squashed_gaussian(mean, log_std);
        assert_eq!(action.dims(), [16, 3]);
        assert_eq!(log_prob.dims(), [16]);

        let data = action.into_data();
        for &a in data.as_slice::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&a));
        }
    }

    #[test]
    fn test_log_prob_matches_sampling_path() {
        let device = device();
        let mean = Tensor::<TestBackend, 2>::from_floats([[0.3, -0.2], [0.0, 0.5]], &device);
        let log_std = Tensor::<TestBackend, 2>::from_floats([[-1.0, -0.5], [-1.5, 0.0]], &device);

        let (action, lp_sampling) = sample_squashed_gaussian(mean.clone(), log_std.clone());
        let lp_inverted = log_prob_squashed_gaussian(action, mean, log_std);

        let a = lp_sampling.into_data();
        let b = lp_inverted.into_data();
        let a = a.as_slice::<f32>().unwrap();
        let b = b.as_slice::<f32>().unwrap();
        for i in 0..a.len() {
            assert!(
                (a[i] - b[i]).abs() < 1e-3,
                "noise-reuse and atanh densities disagree: {} vs {}",
                a[i],
                b[i]
            );
        }
    }

    #[test]
    fn test_gaussian_log_prob_analytic() {
        let device = device();
        // Standard normal at the mean: log N(0; 0, 1) = -0.5 ln(2 pi)
        let log_std = Tensor::<TestBackend, 2>::zeros([1, 1], &device);
        let noise = Tensor::<TestBackend, 2>::zeros([1, 1], &device);

        let lp = gaussian_log_prob(noise, log_std);
        let value = lp.into_data().as_slice::<f32>().unwrap()[0];
        assert!((value + 0.5 * LOG_2PI).abs() < 1e-5);
    }

    #[test]
    fn test_detached_sample_log_prob_finite() {
        let device = device();
        let mean = Tensor::<TestBackend, 2>::from_floats([[2.0, -2.0]], &device);
        let log_std = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5]], &device);

        let (action, log_prob) = sample_squashed_gaussian_detached(mean, log_std);
        let data = action.into_data();
        for &a in data.as_slice::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&a));
        }
        let lp = log_prob.into_data().as_slice::<f32>().unwrap()[0];
        assert!(lp.is_finite());
    }

    #[test]
    fn test_categorical_picks_dominant_logit() {
        let device = device();
        let logits =
            Tensor::<TestBackend, 2>::from_floats([[20.0, 0.0, 0.0], [0.0, 0.0, 20.0]], &device);

        let mut rng = fastrand::Rng::with_seed(5);
        for _ in 0..20 {
            let (indices, log_prob) = sample_categorical(logits.clone(), &mut rng);
            assert_eq!(indices, vec![0, 2]);

            let lp = log_prob.into_data();
            for &v in lp.as_slice::<f32>().unwrap() {
                assert!(v > -1e-3, "dominant action should have near-zero log prob");
            }
        }
    }

    #[test]
    fn test_categorical_log_prob_matches_log_softmax() {
        let device = device();
        let logits = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 0.5]], &device);

        let mut rng = fastrand::Rng::with_seed(9);
        let (indices, log_prob) = sample_categorical(logits.clone(), &mut rng);

        let reference = log_softmax(logits, 1).into_data();
        let reference = reference.as_slice::<f32>().unwrap();
        let lp = log_prob.into_data().as_slice::<f32>().unwrap()[0];
        assert!((lp - reference[indices[0]]).abs() < 1e-6);
    }
}
