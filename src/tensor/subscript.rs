//! Reading and writing sub-regions.
//!
//! A selection holds one `Selection` per leading axis, missing trailing
//! axes are selected entirely. Reads of contiguous regions alias the
//! storage of the source, other reads copy. Reads and writes are each
//! other's backward function.

use super::tensor::{Tensor, TensorId};
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::ComputeBackend;
use crate::memory::{MemoryBackend, Selection};
use crate::numeric::Numeric;
use std::rc::Rc;

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Reads the selected region. Axes selected with `Selection::Index` are
    /// removed from the result.
    pub fn get(&self, selection: &[Selection]) -> Self {
        let (values, is_copy) = D::Memory::get(&self.values(), selection);

        let context = self.requires_gradient.then(|| {
            let selection = selection.to_vec();
            let source_shape = self.shape.clone();
            Context::unary("get", self, move |grad| grad.embedded_in(&source_shape, &selection))
        });
        if is_copy {
            Self::from_values(values, context)
        } else {
            Self::from_view(values, self, context)
        }
    }

    /// Tensor of shape `shape` holding `self` in the selected region and
    /// zeros elsewhere.
    pub(crate) fn embedded_in(&self, shape: &[usize], selection: &[Selection]) -> Self {
        let result = Self::allocate(shape);
        D::Engine::fill(N::ZERO, &result);
        D::Memory::set(&result, selection, &self.values());

        let context = self.requires_gradient.then(|| {
            let selection = selection.to_vec();
            Context::unary("embed", self, move |grad| grad.get(&selection))
        });
        Self::from_values(result, context)
    }

    /// Surrounds the tensor with `value`. `padding` holds the number of
    /// elements added before and after each axis.
    pub fn padded(&self, value: N, padding: &[(usize, usize)]) -> Self {
        assert_eq!(
            padding.len(),
            self.dim(),
            "Padding {:?} does not match a tensor of shape {:?}.",
            padding,
            self.shape
        );
        let shape: Vec<usize> = self.shape.iter().zip(padding).map(|(&dim, &(before, after))| before + dim + after).collect();
        let region: Vec<Selection> = self
            .shape
            .iter()
            .zip(padding)
            .map(|(&dim, &(before, _))| Selection::Range(before..before + dim))
            .collect();

        let result = Self::allocate(&shape);
        D::Engine::fill(value, &result);
        D::Memory::set(&result, &region, &self.values());

        let context = self
            .requires_gradient
            .then(|| Context::unary("pad", self, move |grad| grad.get(&region)));
        Self::from_values(result, context)
    }

    /// Pads every axis by the same amount on both sides.
    pub fn padded_evenly(&self, value: N, padding: &[usize]) -> Self {
        let padding: Vec<(usize, usize)> = padding.iter().map(|&amount| (amount, amount)).collect();
        self.padded(value, &padding)
    }

    /// Writes `value` into the selected region.
    ///
    /// When either side requires gradients the tensor becomes the result of
    /// a recorded write: the region receives the gradient of `value` and the
    /// previous contents receive the gradient outside of the region.
    pub fn set(&mut self, selection: &[Selection], value: &Self) {
        let previous = (self.requires_gradient || value.requires_gradient).then(|| self.clone());
        self.ensure_ownership();
        D::Memory::set(&self.values(), selection, &value.values());

        if let Some(previous) = previous {
            let (outside, inside) = (selection.to_vec(), selection.to_vec());
            let shape = self.shape.clone();
            let context = Context::binary(
                "set",
                &previous,
                value,
                move |grad| grad - &grad.get(&outside).embedded_in(&shape, &outside),
                move |grad| grad.get(&inside),
            );
            self.context = Some(Rc::new(context));
            self.requires_gradient = true;
            self.id = TensorId::next();
        }
    }
}
