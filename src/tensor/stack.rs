//! Joining tensors along an axis and splitting them apart again.

use super::tensor::Tensor;
use crate::backprop::{BackwardFn, Context};
use crate::device::Device;
use crate::engine::ComputeBackend;
use crate::memory::Selection;
use crate::numeric::Numeric;

fn along_axis(axis: usize, range: std::ops::Range<usize>) -> Vec<Selection> {
    let mut selection = vec![Selection::All; axis];
    selection.push(Selection::Range(range));
    selection
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Concatenates `tensors` along the existing `axis`. Sizes along `axis`
    /// may differ, all other dimensions must match.
    pub fn concat(tensors: &[Self], axis: usize) -> Self {
        assert!(!tensors.is_empty(), "Cannot concatenate an empty list of tensors.");
        let mut shape = tensors[0].shape.clone();
        assert!(axis < shape.len(), "Axis {} out of range for shape {:?}.", axis, shape);
        shape[axis] = tensors.iter().map(|tensor| tensor.shape[axis]).sum();

        let buffers: Vec<_> = tensors.iter().map(|tensor| tensor.values()).collect();
        let result = Self::allocate(&shape);
        D::Engine::stack(&buffers, &result, axis);

        let context = tensors.iter().any(|tensor| tensor.requires_gradient).then(|| {
            let mut offset = 0;
            let backward: Vec<BackwardFn<N, D>> = tensors
                .iter()
                .map(|tensor| {
                    let selection = along_axis(axis, offset..offset + tensor.shape[axis]);
                    offset += tensor.shape[axis];
                    Box::new(move |grad: &Self| grad.get(&selection)) as BackwardFn<N, D>
                })
                .collect();
            Context::new(Some("concat"), tensors.to_vec(), backward)
        });
        Self::from_values(result, context)
    }

    /// Stacks tensors of the same shape along a new axis inserted at `axis`.
    pub fn stack(tensors: &[Self], axis: usize) -> Self {
        let expanded: Vec<Self> = tensors.iter().map(|tensor| tensor.unsqueezed(axis)).collect();
        Self::concat(&expanded, axis)
    }

    /// Concatenates `times` copies of the tensor along axis 0.
    pub fn repeated(&self, times: usize) -> Self {
        assert!(self.dim() > 0, "Cannot repeat a scalar along axis 0.");
        assert!(times > 0, "Cannot repeat a tensor zero times.");
        Self::concat(&vec![self.clone(); times], 0)
    }

    /// Splits the tensor along `axis` into parts of the given `lengths`,
    /// which must add up to the size of the axis.
    pub fn unstack(&self, axis: usize, lengths: &[usize]) -> Vec<Self> {
        assert!(axis < self.dim(), "Axis {} out of range for shape {:?}.", axis, self.shape);
        let total = self.shape[axis];
        assert_eq!(
            lengths.iter().sum::<usize>(),
            total,
            "Lengths {:?} do not cover axis {} of shape {:?}.",
            lengths,
            axis,
            self.shape
        );

        let parts: Vec<_> = lengths
            .iter()
            .map(|&length| {
                let mut shape = self.shape.clone();
                shape[axis] = length;
                Self::allocate(&shape)
            })
            .collect();
        D::Engine::unstack(&self.values(), &parts, axis);

        let mut offset = 0;
        parts
            .into_iter()
            .map(|part| {
                let (before, length) = (offset, part.shape[axis]);
                offset += length;
                let context = self.requires_gradient.then(|| {
                    let source_shape = self.shape.clone();
                    let selection = along_axis(axis, before..before + length);
                    Context::unary("unstack", self, move |grad| grad.embedded_in(&source_shape, &selection))
                });
                Self::from_values(part, context)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenation_and_its_gradient() {
        let a: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let b: Tensor<f64> = Tensor::new(&[5.0, 6.0], &[2, 1], true);
        let c = Tensor::concat(&[a.clone(), b.clone()], 1);
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.elements(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let weights: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let grads = (&c * &weights).sum_all().gradients(&[&a, &b], false);
        assert_eq!(grads[0].elements(), vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(grads[1].elements(), vec![3.0, 6.0]);
    }

    #[test]
    fn stacking_adds_an_axis() {
        let a: Tensor<i32> = Tensor::new(&[1, 2], &[2], false);
        let b: Tensor<i32> = Tensor::new(&[3, 4], &[2], false);
        let rows = Tensor::stack(&[a.clone(), b.clone()], 0);
        assert_eq!(rows.shape(), &[2, 2]);
        assert_eq!(rows.elements(), vec![1, 2, 3, 4]);
        let columns = Tensor::stack(&[a, b], 1);
        assert_eq!(columns.elements(), vec![1, 3, 2, 4]);
    }

    #[test]
    fn unstacking_inverts_concatenation() {
        let a: Tensor<f32> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], true);
        let parts = a.unstack(0, &[1, 2]);
        assert_eq!(parts[0].shape(), &[1, 2]);
        assert_eq!(parts[1].elements(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(Tensor::concat(&parts, 0).elements(), a.elements());

        let grad = (&parts[1] * 2.0).sum_all().gradients(&[&a], false).remove(0);
        assert_eq!(grad.elements(), vec![0.0, 0.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn repetition_accumulates_gradient() {
        let a: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[1, 2], true);
        let r = a.repeated(3);
        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(r.elements(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);

        let weights: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], false);
        let grad = (&r * &weights).sum_all().gradients(&[&a], false).remove(0);
        assert_eq!(grad.elements(), vec![9.0, 12.0]);
    }
}
