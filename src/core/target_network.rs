//! Polyak (soft) updates for target networks.
//!
//! The value function's bootstrap target is produced by a slow-moving shadow
//! copy of the value network. On a fixed period the trainer blends the live
//! parameters into the shadow copy:
//!
//! ```text
//! p_targ = (1 - tau) * p_targ + tau * p_source
//! ```
//!
//! The blend is expressed as a pure function over two module snapshots: the
//! caller keeps ownership of the target module and receives a new one back.
//! The target is never touched by gradient descent.

use burn::module::{Module, ModuleMapper, Param};
use burn::prelude::*;
use std::cell::RefCell;

/// A parameter flattened to 1D together with nothing but its values.
///
/// Storing 1D tensors sidesteps const-generic rank mismatches when collecting
/// parameters of varying rank into one Vec.
struct FlatParam<B: Backend> {
    values: Tensor<B, 1>,
}

/// Collects every float parameter of a module, in traversal order.
///
/// Traversal order is deterministic for modules of the same architecture,
/// which is how source and target parameters are matched; the target is built
/// as a structural copy of the source, so the orders line up.
struct ParamCollector<B: Backend> {
    params: Vec<FlatParam<B>>,
}

impl<B: Backend> ParamCollector<B> {
    fn new() -> Self {
        Self { params: Vec::new() }
    }
}

impl<B: Backend> ModuleMapper<B> for ParamCollector<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let values = param.val();
        let total: usize = values.dims().iter().product();
        self.params.push(FlatParam {
            values: values.reshape([total]),
        });
        param
    }
}

/// Blends collected source parameters into the visited target parameters.
struct BlendMapper<B: Backend> {
    source_params: Vec<FlatParam<B>>,
    tau: f32,
    index: RefCell<usize>,
}

impl<B: Backend> ModuleMapper<B> for BlendMapper<B> {
    fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
        let target_val = param.val();
        let shape = target_val.dims();
        let total: usize = shape.iter().product();

        let idx = *self.index.borrow();
        *self.index.borrow_mut() = idx + 1;

        let source = self
            .source_params
            .get(idx)
            .expect("source and target parameter counts must match");

        let blended = source.values.clone().mul_scalar(self.tau)
            + target_val.reshape([total]).mul_scalar(1.0 - self.tau);

        Param::initialized(param.id.clone(), blended.reshape(shape))
    }
}

/// Soft-update `target` toward `source` and return the updated target.
///
/// `tau` must be in `(0, 1]`; `tau = 1` degenerates to a hard copy and
/// `tau = 0` returns the target unchanged. Both modules must share parameter
/// topology, which holds by construction when the target was created as a
/// clone of the source.
pub fn soft_update<B, M>(source: &M, target: M, tau: f32) -> M
where
    B: Backend,
    M: Module<B>,
{
    if (tau - 1.0).abs() < 1e-6 {
        return source.clone();
    }
    if tau.abs() < 1e-6 {
        return target;
    }

    let mut collector = ParamCollector::new();
    let _ = source.clone().map(&mut collector);

    let mut blend = BlendMapper {
        source_params: collector.params,
        tau,
        index: RefCell::new(0),
    };
    target.map(&mut blend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::LinearConfig;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_tau_zero_returns_target() {
        let device = <TestBackend as Backend>::Device::default();
        let source = LinearConfig::new(4, 4).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 4).init::<TestBackend>(&device);

        let target_before = target.weight.val().into_data();
        let updated = soft_update::<TestBackend, _>(&source, target, 0.0);
        let updated_weight = updated.weight.val().into_data();

        let before = target_before.as_slice::<f32>().unwrap();
        let after = updated_weight.as_slice::<f32>().unwrap();
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((b - a).abs() < 1e-6, "tau=0 must leave the target unchanged");
        }
    }

    #[test]
    fn test_tau_one_is_hard_copy() {
        let device = <TestBackend as Backend>::Device::default();
        let source = LinearConfig::new(4, 4).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 4).init::<TestBackend>(&device);

        let source_weight = source.weight.val().into_data();
        let updated = soft_update::<TestBackend, _>(&source, target, 1.0);
        let updated_weight = updated.weight.val().into_data();

        let src = source_weight.as_slice::<f32>().unwrap();
        let after = updated_weight.as_slice::<f32>().unwrap();
        for (s, a) in src.iter().zip(after.iter()) {
            assert!((s - a).abs() < 1e-6, "tau=1 must copy the source");
        }
    }

    #[test]
    fn test_elementwise_interpolation() {
        let device = <TestBackend as Backend>::Device::default();
        let source = LinearConfig::new(4, 4).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 4).init::<TestBackend>(&device);

        let source_weight = source.weight.val().into_data();
        let target_weight = target.weight.val().into_data();

        for &tau in &[0.5f32, 0.005] {
            let updated =
                soft_update::<TestBackend, _>(&source, target.clone(), tau);
            let updated_weight = updated.weight.val().into_data();

            let src = source_weight.as_slice::<f32>().unwrap();
            let tgt = target_weight.as_slice::<f32>().unwrap();
            let after = updated_weight.as_slice::<f32>().unwrap();

            for i in 0..src.len() {
                let expected = tau * src[i] + (1.0 - tau) * tgt[i];
                assert!(
                    (after[i] - expected).abs() < 1e-5,
                    "expected {} got {} at index {} (tau={})",
                    expected,
                    after[i],
                    i,
                    tau
                );
            }
        }
    }

    #[test]
    fn test_bias_is_blended_too() {
        let device = <TestBackend as Backend>::Device::default();
        let source = LinearConfig::new(4, 4).with_bias(true).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 4).with_bias(true).init::<TestBackend>(&device);

        let source_bias = source.bias.as_ref().unwrap().val().into_data();
        let target_bias = target.bias.as_ref().unwrap().val().into_data();

        let tau = 0.3f32;
        let updated = soft_update::<TestBackend, _>(&source, target, tau);
        let updated_bias = updated.bias.as_ref().unwrap().val().into_data();

        let src = source_bias.as_slice::<f32>().unwrap();
        let tgt = target_bias.as_slice::<f32>().unwrap();
        let after = updated_bias.as_slice::<f32>().unwrap();

        for i in 0..src.len() {
            let expected = tau * src[i] + (1.0 - tau) * tgt[i];
            assert!((after[i] - expected).abs() < 1e-5, "bias blend failed at {}", i);
        }
    }

    #[test]
    fn test_repeated_updates_converge_to_source() {
        let device = <TestBackend as Backend>::Device::default();
        let source = LinearConfig::new(3, 3).init::<TestBackend>(&device);
        let mut target = LinearConfig::new(3, 3).init::<TestBackend>(&device);

        for _ in 0..2000 {
            target = soft_update::<TestBackend, _>(&source, target, 0.01);
        }

        let source_weight = source.weight.val().into_data();
        let target_weight = target.weight.val().into_data();
        let src = source_weight.as_slice::<f32>().unwrap();
        let tgt = target_weight.as_slice::<f32>().unwrap();
        for (s, t) in src.iter().zip(tgt.iter()) {
            assert!((s - t).abs() < 1e-3, "target should track the source");
        }
    }
}
