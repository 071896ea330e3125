//! Matrix products.
//!
//! Products are computed by the engine's `gemm` on rank 2 operands with
//! optional transposition, so transposed products never materialize the
//! transposed operand. Gradients of a product are products themselves,
//! which keeps them differentiable.

use super::tensor::Tensor;
use crate::backprop::{BackwardFn, Context};
use crate::device::Device;
use crate::engine::{broadcast_shape, ComputeBackend};
use crate::memory::{element_count, MemoryBackend, Selection};
use crate::numeric::Numeric;

fn product_shape(lhs: &[usize], rhs: &[usize], transpose_lhs: bool, transpose_rhs: bool) -> Vec<usize> {
    assert!(
        lhs.len() == 2 && rhs.len() == 2,
        "Matrix multiplication requires rank 2 operands, got {:?} and {:?}.",
        lhs,
        rhs
    );
    let (m, k) = if transpose_lhs { (lhs[1], lhs[0]) } else { (lhs[0], lhs[1]) };
    let (k_rhs, n) = if transpose_rhs { (rhs[1], rhs[0]) } else { (rhs[0], rhs[1]) };
    assert_eq!(
        k, k_rhs,
        "Cannot multiply matrices of shapes {:?} and {:?} (transposed: {}, {}).",
        lhs, rhs, transpose_lhs, transpose_rhs
    );
    vec![m, n]
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Matrix product `self x other`.
    ///
    /// A rank 1 tensor on the left is a row vector and on the right a
    /// column vector. The promoted axis is removed from the result.
    pub fn matmul(&self, other: &Self) -> Self {
        self.matmul_transposed(other, false, false)
    }

    /// Matrix product with optional transposition of either operand.
    pub fn matmul_transposed(&self, other: &Self, transpose_self: bool, transpose_other: bool) -> Self {
        let lhs_vector = self.dim() == 1;
        let rhs_vector = other.dim() == 1;
        if !lhs_vector && !rhs_vector {
            return self.matrix_product(other, transpose_self, transpose_other);
        }

        let lhs = if lhs_vector { self.unsqueezed(0) } else { self.clone() };
        let rhs = if rhs_vector { other.unsqueezed(1) } else { other.clone() };
        let product = lhs.matrix_product(&rhs, transpose_self && !lhs_vector, transpose_other && !rhs_vector);
        match (lhs_vector, rhs_vector) {
            (true, true) => product.reshape(&[]),
            (true, false) => product.squeezed_at(0),
            _ => product.squeezed_at(1),
        }
    }

    fn matrix_product(&self, other: &Self, transpose_lhs: bool, transpose_rhs: bool) -> Self {
        let shape = product_shape(&self.shape, &other.shape, transpose_lhs, transpose_rhs);
        let result = Self::allocate(&shape);
        D::Engine::gemm(&self.values(), &other.values(), &result, N::ONE, N::ZERO, transpose_lhs, transpose_rhs);

        let context = (self.requires_gradient || other.requires_gradient).then(|| {
            let (lhs, rhs) = (self.clone(), other.clone());
            Context::binary(
                "matmul",
                self,
                other,
                move |grad| match (transpose_lhs, transpose_rhs) {
                    (false, false) => grad.matrix_product(&rhs, false, true),
                    (true, false) => rhs.matrix_product(grad, false, true),
                    (false, true) => grad.matrix_product(&rhs, false, false),
                    (true, true) => rhs.matrix_product(grad, true, true),
                },
                move |grad| match (transpose_lhs, transpose_rhs) {
                    (false, false) => lhs.matrix_product(grad, true, false),
                    (true, false) => lhs.matrix_product(grad, false, false),
                    (false, true) => grad.matrix_product(&lhs, true, false),
                    (true, true) => grad.matrix_product(&lhs, true, true),
                },
            )
        });
        Self::from_values(result, context)
    }

    /// `self x other + addend` computed by a single accumulating product.
    /// `addend` must have the shape of the product.
    pub fn matmul_add(&self, other: &Self, addend: &Self) -> Self {
        let shape = product_shape(&self.shape, &other.shape, false, false);
        assert_eq!(
            shape, addend.shape,
            "Cannot add a tensor of shape {:?} to a product of shape {:?}.",
            addend.shape, shape
        );
        let result = Self::allocate(&shape);
        D::Memory::assign(&result.values, &addend.values().values, addend.count());
        D::Engine::gemm(&self.values(), &other.values(), &result, N::ONE, N::ONE, false, false);

        let requires_gradient = self.requires_gradient || other.requires_gradient || addend.requires_gradient;
        let context = requires_gradient.then(|| {
            let (lhs, rhs) = (self.clone(), other.clone());
            let backward: Vec<BackwardFn<N, D>> = vec![
                Box::new(move |grad: &Self| grad.matrix_product(&rhs, false, true)),
                Box::new(move |grad: &Self| lhs.matrix_product(grad, true, false)),
                Box::new(|grad: &Self| grad.clone()),
            ];
            Context::new(Some("matmul_add"), vec![self.clone(), other.clone(), addend.clone()], backward)
        });
        Self::from_values(result, context)
    }

    pub fn transposed(&self) -> Self {
        assert_eq!(self.dim(), 2, "Only matrices can be transposed, got shape {:?}.", self.shape);
        self.permuted(&[1, 0])
    }

    /// Batched product of tensors of rank 3 or more. Leading axes are batch
    /// axes and broadcast against each other, the two trailing axes are
    /// multiplied as matrices.
    pub fn broadcast_matmul(&self, other: &Self) -> Self {
        assert!(
            self.dim() >= 2 && other.dim() >= 2,
            "Batched matrix multiplication requires operands of rank 2 or more, got {:?} and {:?}.",
            self.shape,
            other.shape
        );
        let (lhs_batch, lhs_matrix) = self.shape.split_at(self.dim() - 2);
        let (rhs_batch, rhs_matrix) = other.shape.split_at(other.dim() - 2);
        let batch = broadcast_shape(lhs_batch, rhs_batch);
        let batch_count = element_count(&batch);

        let expand = |tensor: &Self, matrix: &[usize]| {
            let full: Vec<usize> = batch.iter().chain(matrix).copied().collect();
            tensor.broadcast_to(&full).reshape(&[batch_count, matrix[0], matrix[1]])
        };
        let lhs = expand(self, lhs_matrix);
        let rhs = expand(other, rhs_matrix);

        let products: Vec<Self> = (0..batch_count)
            .map(|b| {
                let index = [Selection::Index(b)];
                lhs.get(&index).matmul(&rhs.get(&index)).unsqueezed(0)
            })
            .collect();
        let stacked = Tensor::concat(&products, 0);

        let shape: Vec<usize> = batch.iter().chain(&stacked.shape[1..]).copied().collect();
        stacked.reshape(&shape)
    }
}
