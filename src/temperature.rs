//! Entropy temperature control.
//!
//! The temperature α weights the entropy bonus in every loss. In adaptive
//! mode, `log α` is a single scalar trained by Adam against the loss
//! `-log α * (E[log π] + H_target)`; its gradient w.r.t. `log α` is
//! `-(E[log π] + H_target)`, so the scalar never needs a tensor graph.
//! In fixed mode α is a constant and the reported loss is zero.
//!
//! The controller is plain serializable state, checkpointed as part of the
//! trainer's metadata.

use serde::{Deserialize, Serialize};

/// Adam state for a single scalar parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamScalarState {
    m: f64,
    v: f64,
    t: u64,
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

impl AdamScalarState {
    pub fn new() -> Self {
        Self { m: 0.0, v: 0.0, t: 0 }
    }

    /// One Adam step on `value` with gradient `grad`, returning the new value.
    pub fn step(&mut self, value: f64, grad: f64, lr: f64) -> f64 {
        self.t += 1;
        self.m = BETA1 * self.m + (1.0 - BETA1) * grad;
        self.v = BETA2 * self.v + (1.0 - BETA2) * grad * grad;

        let m_hat = self.m / (1.0 - BETA1.powi(self.t as i32));
        let v_hat = self.v / (1.0 - BETA2.powi(self.t as i32));
        value - lr * m_hat / (v_hat.sqrt() + ADAM_EPS)
    }
}

impl Default for AdamScalarState {
    fn default() -> Self {
        Self::new()
    }
}

/// The entropy temperature, either trained or pinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TemperatureController {
    Adaptive {
        log_alpha: f64,
        target_entropy: f64,
        lr: f64,
        optimizer: AdamScalarState,
    },
    Fixed { alpha: f64 },
}

impl TemperatureController {
    pub fn adaptive(initial_alpha: f32, target_entropy: f32, lr: f64) -> Self {
        TemperatureController::Adaptive {
            log_alpha: (initial_alpha as f64).ln(),
            target_entropy: target_entropy as f64,
            lr,
            optimizer: AdamScalarState::new(),
        }
    }

    pub fn fixed(alpha: f32) -> Self {
        TemperatureController::Fixed { alpha: alpha as f64 }
    }

    /// Current temperature.
    pub fn alpha(&self) -> f32 {
        match self {
            TemperatureController::Adaptive { log_alpha, .. } => log_alpha.exp() as f32,
            TemperatureController::Fixed { alpha } => *alpha as f32,
        }
    }

    /// Update the temperature from the batch-mean policy log-density and
    /// return the temperature loss.
    ///
    /// `log α` moves up when the policy is less entropic than the target
    /// (`mean_log_prob + H_target > 0`) and down otherwise. Fixed mode is a
    /// no-op reporting zero loss.
    pub fn step(&mut self, mean_log_prob: f32) -> f32 {
        match self {
            TemperatureController::Adaptive {
                log_alpha,
                target_entropy,
                lr,
                optimizer,
            } => {
                let gap = mean_log_prob as f64 + *target_entropy;
                let loss = -*log_alpha * gap;
                let grad = -gap;
                *log_alpha = optimizer.step(*log_alpha, grad, *lr);
                loss as f32
            }
            TemperatureController::Fixed { .. } => 0.0,
        }
    }
}
