//! Index driven selection along an axis.
//!
//! Index tensors hold `i32` positions. Positions equal to the ignore index
//! select nothing: gathering yields zero there and scattering leaves the
//! target at zero. Gathering and scattering are each other's backward.

use super::tensor::Tensor;
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::{ComputeBackend, DEFAULT_IGNORE_INDEX};
use crate::numeric::Numeric;

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Picks the element at position `context[..]` along `axis`. The
    /// result has the shape of `context`, which is `self` without `axis`.
    pub fn gather(&self, context: &Tensor<i32, D>, axis: usize, ignore_index: i32) -> Self {
        assert!(axis < self.dim(), "Axis {} out of range for shape {:?}.", axis, self.shape);
        let result = Self::allocate(&context.shape);
        D::Engine::gather(&self.values(), &context.values(), &result, axis, ignore_index);

        let gradient_context = self.requires_gradient.then(|| {
            let (indices, size) = (context.clone(), self.shape[axis]);
            Context::unary("gather", self, move |grad| grad.scatter(&indices, axis, size, ignore_index))
        });
        Self::from_values(result, gradient_context)
    }

    /// Inverse of `gather`: inserts `axis` with `size` positions and writes
    /// every element to the position given by `context`.
    pub fn scatter(&self, context: &Tensor<i32, D>, axis: usize, size: usize, ignore_index: i32) -> Self {
        assert!(axis <= self.dim(), "Cannot insert axis {} into shape {:?}.", axis, self.shape);
        let mut shape = self.shape.clone();
        shape.insert(axis, size);
        let result = Self::allocate(&shape);
        D::Engine::scatter(&self.values(), &context.values(), &result, axis, ignore_index);

        let gradient_context = self.requires_gradient.then(|| {
            let indices = context.clone();
            Context::unary("scatter", self, move |grad| grad.gather(&indices, axis, ignore_index))
        });
        Self::from_values(result, gradient_context)
    }
}

impl<D: Device> Tensor<i32, D> {
    /// One-hot encoding along a new trailing axis of size `count`. Labels
    /// equal to `-1` encode to all zeros.
    pub fn one_hot<N: Numeric>(&self, count: usize) -> Tensor<N, D> {
        Tensor::<N, D>::ones(&self.shape).scatter(self, self.dim(), count, DEFAULT_IGNORE_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_and_scatter_are_adjoint() {
        let x: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true);
        let labels: Tensor<i32> = Tensor::new(&[2, 0], &[2], false);
        let picked = x.gather(&labels, 1, DEFAULT_IGNORE_INDEX);
        assert_eq!(picked.elements(), vec![3.0, 4.0]);

        let grad = (&picked * 10.0).sum_all().gradients(&[&x], false).remove(0);
        assert_eq!(grad.elements(), vec![0.0, 0.0, 10.0, 10.0, 0.0, 0.0]);

        let y: Tensor<f64> = Tensor::new(&[7.0, 8.0], &[2], true);
        let spread = y.scatter(&labels, 1, 3, DEFAULT_IGNORE_INDEX);
        assert_eq!(spread.elements(), vec![0.0, 0.0, 7.0, 8.0, 0.0, 0.0]);
        let weights = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let grad = (&spread * &weights).sum_all().gradients(&[&y], false).remove(0);
        assert_eq!(grad.elements(), vec![3.0, 4.0]);
    }

    #[test]
    fn ignored_positions() {
        let x: Tensor<f32> = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        let labels: Tensor<i32> = Tensor::new(&[1, -1], &[2], false);
        assert_eq!(x.gather(&labels, 1, -1).elements(), vec![2.0, 0.0]);
    }

    #[test]
    fn one_hot_rows() {
        let labels: Tensor<i32> = Tensor::new(&[0, 2, -1], &[3], false);
        let encoded: Tensor<f32> = labels.one_hot(3);
        assert_eq!(encoded.shape(), &[3, 3]);
        assert_eq!(encoded.elements(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
    }
}
