//! Tape-based reverse-mode automatic differentiation for dynamically
//! shaped tensors.
//!
//! Every operation on a `Tensor` that involves an operand requiring
//! gradients records how to propagate a gradient back to its operands.
//! `Tensor::gradients` walks these records from a scalar result to any set
//! of source tensors. Gradients are tensors themselves and can be
//! differentiated again when the graph is retained.
//!
//! Data lives behind a `Device`, which pairs a `MemoryBackend` owning the
//! buffers with a `ComputeBackend` running the kernels. The `Cpu` device
//! keeps buffers in host memory and runs kernels with rayon and BLAS.

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn linear_regression_converges() {
        let mut rng = StdRng::seed_from_u64(7);
        let inputs: Tensor<f64> = Tensor::uniform_with(&mut rng, -1.0..1.0, &[32, 3], false);
        let truth: Tensor<f64> = Tensor::new(&[2.0, -1.0, 0.5], &[3, 1], false);
        let targets = inputs.matmul(&truth);

        let mut weights: Tensor<f64> = Tensor::zeros(&[3, 1]);
        weights.set_requires_gradient(true);
        for _ in 0..200 {
            let loss = mean_squared_error(&targets, &inputs.matmul(&weights));
            let grad = loss.gradients(&[&weights], false).remove(0);
            weights.add_scaled_in_place(&grad, -0.5);
        }

        for (found, expected) in weights.elements().into_iter().zip([2.0, -1.0, 0.5]) {
            assert_relative_eq!(found, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn classifier_gradient_flows_through_softmax() {
        let mut rng = StdRng::seed_from_u64(3);
        let weights: Tensor<f32> = Tensor::xavier_with(&mut rng, &[4, 3], true);
        let bias: Tensor<f32> = Tensor::zeros(&[3]);
        let inputs: Tensor<f32> = Tensor::normal_with(&mut rng, 0.0, 1.0, &[5, 4], false);
        let labels: Tensor<i32> = Tensor::new(&[0, 1, 2, -1, 1], &[5], false);

        let logits = &inputs.matmul(&weights) + &bias;
        let loss = categorical_cross_entropy(&labels, &logits.softmax(1));
        let grads = loss.gradients(&[&weights, &bias], false);
        assert_eq!(grads[0].shape(), &[4, 3]);
        assert_eq!(grads[1].elements(), vec![0.0; 3]);
        assert!(grads[0].elements().iter().any(|&g| g != 0.0));
    }
}

pub mod backprop;
pub mod device;
pub mod engine;
pub mod error;
pub mod loss;
pub mod memory;
pub mod numeric;
pub mod tensor;

pub use backprop::GradientOptions;
pub use device::{Cpu, Device};
pub use error::CodecError;
pub use memory::Selection;
pub use tensor::{Tensor, TensorId};

pub mod prelude {
    pub use crate::backprop::{Context, GradientOptions};
    pub use crate::error::CodecError;
    pub use crate::loss::*;
    pub use crate::memory::{configure_pool, PoolConfig};
    pub use crate::tensor::prelude::*;
}
