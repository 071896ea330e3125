//! Reductions along a set of axes.
//!
//! Reduced axes are removed from the result shape. The backward function
//! of a reduction reinserts them with size one and broadcasts the gradient
//! back to the source shape. Maximum and minimum only route the gradient
//! to the element that won, which the kernel records in an index context.

use super::tensor::{Tensor, Values};
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::{reduced_shape, ComputeBackend};
use crate::memory::ShapedBuffer;
use crate::numeric::Numeric;

/// `shape` with every axis of `axes` set to one.
pub(crate) fn kept_shape(shape: &[usize], axes: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .enumerate()
        .map(|(axis, &dim)| if axes.contains(&axis) { 1 } else { dim })
        .collect()
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    pub fn sum(&self, axes: &[usize]) -> Self {
        let shape = reduced_shape(&self.shape, axes);
        let result = Self::allocate(&shape);
        D::Engine::reduce_sum(&self.values(), &result, axes);

        let context = self.requires_gradient.then(|| {
            let source_shape = self.shape.clone();
            let kept = kept_shape(&self.shape, axes);
            Context::unary("sum", self, move |grad| grad.reshape(&kept).broadcast_to(&source_shape))
        });
        Self::from_values(result, context)
    }

    pub fn sum_all(&self) -> Self {
        self.sum(&self.all_axes())
    }

    pub fn mean(&self, axes: &[usize]) -> Self {
        let shape = reduced_shape(&self.shape, axes);
        let result = Self::allocate(&shape);
        D::Engine::reduce_mean(&self.values(), &result, axes);

        let context = self.requires_gradient.then(|| {
            let source_shape = self.shape.clone();
            let kept = kept_shape(&self.shape, axes);
            let count = N::from_usize(axes.iter().map(|&axis| source_shape[axis]).product());
            Context::unary("mean", self, move |grad| &grad.reshape(&kept).broadcast_to(&source_shape) / count)
        });
        Self::from_values(result, context)
    }

    pub fn mean_all(&self) -> Self {
        self.mean(&self.all_axes())
    }

    pub fn max(&self, axes: &[usize]) -> Self {
        self.extreme(axes, "max", D::Engine::reduce_max)
    }

    pub fn min(&self, axes: &[usize]) -> Self {
        self.extreme(axes, "min", D::Engine::reduce_min)
    }

    fn extreme<F>(&self, axes: &[usize], tag: &'static str, kernel: F) -> Self
    where
        F: FnOnce(&Values<N, D>, &Values<N, D>, Option<&ShapedBuffer<i32, D::Memory>>, &[usize]),
    {
        let shape = reduced_shape(&self.shape, axes);
        let result = Self::allocate(&shape);
        let winners = Tensor::<i32, D>::allocate(&shape);
        kernel(&self.values(), &result, Some(&winners), axes);

        let context = self.requires_gradient.then(|| {
            let mask = Self::allocate(&self.shape);
            D::Engine::expand_context(&Self::ones(&shape).values(), &winners, &mask, axes);
            let mask = Tensor::leaf(mask, false);
            let kept = kept_shape(&self.shape, axes);
            Context::unary(tag, self, move |grad| &grad.reshape(&kept).broadcast_to(&mask.shape) * &mask)
        });
        Self::from_values(result, context)
    }

    /// Biased variance along `axes`.
    pub fn variance(&self, axes: &[usize]) -> Self {
        let mean = self.mean(axes).reshape(&kept_shape(&self.shape, axes));
        (self - &mean).square().mean(axes)
    }

    /// Flat row-major position of the largest element. The first one wins
    /// on ties.
    pub fn argmax(&self) -> usize {
        assert!(self.count() > 0, "Cannot find the maximum of an empty tensor.");
        let flat = self.values().reshaped(vec![self.count()]);
        let result = Self::allocate(&[]);
        let winner = Tensor::<i32, D>::allocate(&[]);
        D::Engine::reduce_max(&flat, &result, Some(&winner), &[0]);
        winner.to_vec()[0] as usize
    }

    /// Positions of the largest elements along `axis`. Not differentiable.
    pub fn argmax_along(&self, axis: usize) -> Tensor<i32, D> {
        let shape = reduced_shape(&self.shape, &[axis]);
        let result = Self::allocate(&shape);
        let winners = Tensor::<i32, D>::allocate(&shape);
        D::Engine::reduce_max(&self.values(), &result, Some(&winners), &[axis]);
        Tensor::leaf(winners, false)
    }

    /// Sums a broadcast gradient back to `shape`, the inverse of
    /// `broadcast_to`.
    pub(crate) fn summed_to_shape(&self, shape: &[usize]) -> Self {
        if self.shape == shape {
            return self.clone();
        }
        assert!(
            self.dim() >= shape.len(),
            "Cannot sum a tensor of shape {:?} to the larger rank shape {:?}.",
            self.shape,
            shape
        );

        let pad = self.dim() - shape.len();
        let axes: Vec<usize> = (0..self.dim())
            .filter(|&axis| axis < pad || (shape[axis - pad] == 1 && self.shape[axis] != 1))
            .collect();
        self.sum(&axes).reshape(shape)
    }

    fn all_axes(&self) -> Vec<usize> {
        (0..self.dim()).collect()
    }
}
