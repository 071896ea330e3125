//! Operations changing how elements are laid out.
//!
//! Reshaping never copies: the result shares the storage of its source
//! under a new shape. Permutations, broadcasts and reversals move data and
//! allocate a result.

use super::tensor::Tensor;
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::{broadcast_shape, ComputeBackend};
use crate::numeric::Numeric;

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Reinterprets the elements under `shape`. At most one dimension may
    /// be `-1`, it is inferred from the element count.
    pub fn view(&self, shape: &[isize]) -> Self {
        let unknowns = shape.iter().filter(|&&dim| dim == -1).count();
        assert!(unknowns <= 1, "Cannot infer more than one dimension in view {:?}.", shape);
        assert!(
            shape.iter().all(|&dim| dim >= -1),
            "Invalid dimension in view {:?}, only -1 may be negative.",
            shape
        );

        let known: usize = shape.iter().filter(|&&dim| dim != -1).map(|&dim| dim as usize).product();
        let resolved: Vec<usize> = shape
            .iter()
            .map(|&dim| {
                if dim != -1 {
                    return dim as usize;
                }
                assert!(
                    known > 0 && self.count() % known == 0,
                    "Cannot view a tensor of shape {:?} as {:?}.",
                    self.shape,
                    shape
                );
                self.count() / known
            })
            .collect();
        self.reshape(&resolved)
    }

    pub fn reshape(&self, shape: &[usize]) -> Self {
        let context = self.requires_gradient.then(|| {
            let source_shape = self.shape.clone();
            Context::unary("reshape", self, move |grad| grad.reshape(&source_shape))
        });
        self.with_shape(shape.to_vec(), context)
    }

    pub fn flattened(&self) -> Self {
        self.reshape(&[self.count()])
    }

    /// Inserts an axis of size one at `axis`.
    pub fn unsqueezed(&self, axis: usize) -> Self {
        assert!(axis <= self.dim(), "Cannot insert axis {} into shape {:?}.", axis, self.shape);
        let mut shape = self.shape.clone();
        shape.insert(axis, 1);
        self.reshape(&shape)
    }

    /// Removes `axis`, which must have size one.
    pub fn squeezed_at(&self, axis: usize) -> Self {
        assert!(
            axis < self.dim() && self.shape[axis] == 1,
            "Cannot squeeze axis {} of shape {:?}.",
            axis,
            self.shape
        );
        let mut shape = self.shape.clone();
        shape.remove(axis);
        self.reshape(&shape)
    }

    /// Removes every axis of size one.
    pub fn squeezed(&self) -> Self {
        let shape: Vec<usize> = self.shape.iter().copied().filter(|&dim| dim != 1).collect();
        self.reshape(&shape)
    }

    /// Axis `i` of the result is axis `arrangement[i]` of `self`.
    pub fn permuted(&self, arrangement: &[usize]) -> Self {
        assert_eq!(
            arrangement.len(),
            self.dim(),
            "Arrangement {:?} does not match shape {:?}.",
            arrangement,
            self.shape
        );
        let shape: Vec<usize> = arrangement.iter().map(|&axis| self.shape[axis]).collect();
        let result = Self::allocate(&shape);
        D::Engine::permute_axes(&self.values(), &result, arrangement);

        let context = self.requires_gradient.then(|| {
            let mut inverse = vec![0; arrangement.len()];
            for (i, &axis) in arrangement.iter().enumerate() {
                inverse[axis] = i;
            }
            Context::unary("permute", self, move |grad| grad.permuted(&inverse))
        });
        Self::from_values(result, context)
    }

    /// Repeats the tensor along broadcast axes so that it has `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> Self {
        assert_eq!(
            broadcast_shape(&self.shape, shape),
            shape,
            "Cannot broadcast shape {:?} to {:?}.",
            self.shape,
            shape
        );
        if self.shape == shape {
            return self.clone();
        }

        let result = Self::allocate(shape);
        D::Engine::broadcast_add(&self.values(), &Self::zeros(shape).values(), &result);

        let context = self.requires_gradient.then(|| {
            let source_shape = self.shape.clone();
            Context::unary("broadcast", self, move |grad| grad.summed_to_shape(&source_shape))
        });
        Self::from_values(result, context)
    }

    /// Reverses the order of elements along `axis`.
    pub fn reversed(&self, axis: usize) -> Self {
        let result = Self::allocate(&self.shape);
        D::Engine::reverse(&self.values(), &result, axis);

        let context = self
            .requires_gradient
            .then(|| Context::unary("reverse", self, move |grad| grad.reversed(axis)));
        Self::from_values(result, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_share_storage() {
        let a: Tensor<f32> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let v = a.view(&[-1, 2]);
        assert_eq!(v.shape(), &[3, 2]);
        assert!(v.is_storage_shared());
        assert_eq!(v.elements(), a.elements());
        assert_eq!(a.flattened().shape(), &[6]);
        assert_eq!(a.unsqueezed(1).shape(), &[2, 1, 3]);
        assert_eq!(a.unsqueezed(1).squeezed().shape(), &[2, 3]);
    }

    #[test]
    #[should_panic(expected = "Cannot infer more than one dimension")]
    fn view_with_two_unknowns() {
        Tensor::<f32>::zeros(&[4]).view(&[-1, -1]);
    }

    #[test]
    #[should_panic(expected = "Differing number of elements")]
    fn reshape_count_mismatch() {
        Tensor::<f32>::zeros(&[4]).reshape(&[3]);
    }

    #[test]
    fn reshape_gradient_has_source_shape() {
        let a: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let weights: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[4], false);
        let grad = (&a.view(&[4]) * &weights).sum_all().gradients(&[&a], false).remove(0);
        assert_eq!(grad.shape(), &[2, 2]);
        assert_eq!(grad.elements(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn permutation_and_its_inverse() {
        let a: Tensor<f64> = Tensor::new(&(0..24).map(f64::from).collect::<Vec<_>>(), &[2, 3, 4], true);
        let p = a.permuted(&[2, 0, 1]);
        assert_eq!(p.shape(), &[4, 2, 3]);
        assert_eq!(p.elements()[..3], [0.0, 4.0, 8.0]);

        let weights: Tensor<f64> = Tensor::new(&(0..24).map(f64::from).collect::<Vec<_>>(), &[4, 2, 3], false);
        let grad = (&p * &weights).sum_all().gradients(&[&a], false).remove(0);
        assert_eq!(grad.elements(), weights.permuted(&[1, 2, 0]).elements());
    }

    #[test]
    fn broadcast_and_reverse() {
        let a: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[2, 1], true);
        let b = a.broadcast_to(&[3, 2, 2]);
        assert_eq!(b.elements(), vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
        let grad = b.sum_all().gradients(&[&a], false).remove(0);
        assert_eq!(grad.elements(), vec![6.0, 6.0]);

        let r: Tensor<i32> = Tensor::new(&[1, 2, 3, 4, 5, 6], &[2, 3], false);
        assert_eq!(r.reversed(1).elements(), vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(r.reversed(0).elements(), vec![4, 5, 6, 1, 2, 3]);
    }
}
