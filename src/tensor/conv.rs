//! Convolution and pooling over images of shape
//! `[batch, channels, height, width]` and signals of shape
//! `[batch, channels, length]`.
//!
//! Both are lowered to matrix operations with `img2col`, which copies
//! every kernel window of the image into a column. A convolution is then a
//! single matrix product with the flattened filters, and pooling a
//! reduction over the rows of the column matrix. Signals are lowered as
//! images of height one, padded along their length only.

use super::tensor::Tensor;
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::{ComputeBackend, Im2ColLayout};
use crate::memory::Selection;
use crate::numeric::Numeric;

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Lowers an image into a `[channels * kh * kw, batch * oh * ow]` matrix.
    pub fn img2col(&self, layout: &Im2ColLayout) -> Self {
        let result = Self::allocate(&layout.column_shape(&self.shape));
        D::Engine::img2col(&self.values(), &result, layout);

        let context = self.requires_gradient.then(|| {
            let (layout, image_shape) = (*layout, self.shape.clone());
            Context::unary("img2col", self, move |grad| grad.col2img(&layout, &image_shape))
        });
        Self::from_values(result, context)
    }

    /// Adjoint of `img2col`: sums every column back into an image of shape
    /// `image_shape`.
    pub fn col2img(&self, layout: &Im2ColLayout, image_shape: &[usize]) -> Self {
        let result = Self::allocate(image_shape);
        D::Engine::col2img(&self.values(), &result, layout);

        let context = self.requires_gradient.then(|| {
            let layout = *layout;
            Context::unary("col2img", self, move |grad| grad.img2col(&layout))
        });
        Self::from_values(result, context)
    }

    /// Lowers a signal into a `[channels * kernel_size, batch * out_length]`
    /// matrix.
    pub fn img2col_1d(&self, kernel_size: usize, padding: usize, stride: usize) -> Self {
        assert_eq!(self.dim(), 3, "Expected a signal of shape [batch, channels, length], got {:?}.", self.shape);
        let (batch, channels, length) = (self.shape[0], self.shape[1], self.shape[2]);
        self.padded(N::ZERO, &[(0, 0), (0, 0), (padding, padding)])
            .reshape(&[batch, channels, 1, length + 2 * padding])
            .img2col(&signal_layout(kernel_size, stride))
    }

    /// Adjoint of `img2col_1d`, producing a signal of shape `signal_shape`.
    pub fn col2img_1d(&self, kernel_size: usize, padding: usize, stride: usize, signal_shape: &[usize]) -> Self {
        assert_eq!(signal_shape.len(), 3, "Expected a signal of shape [batch, channels, length], got {:?}.", signal_shape);
        let (batch, channels, length) = (signal_shape[0], signal_shape[1], signal_shape[2]);
        let padded_length = length + 2 * padding;
        self.col2img(&signal_layout(kernel_size, stride), &[batch, channels, 1, padded_length])
            .reshape(&[batch, channels, padded_length])
            .get(&[Selection::All, Selection::All, Selection::Range(padding..padding + length)])
    }

    /// Cross-correlates the signal with `filters` of shape
    /// `[out_channels, channels, kernel_size]`.
    pub fn convolved_1d(&self, filters: &Self, padding: usize, stride: usize) -> Self {
        assert_eq!(self.dim(), 3, "Expected a signal of shape [batch, channels, length], got {:?}.", self.shape);
        assert!(
            filters.dim() == 3 && filters.shape[1] == self.shape[1],
            "Filters of shape {:?} do not match a signal of shape {:?}.",
            filters.shape,
            self.shape
        );
        let (out_channels, kernel_size) = (filters.shape[0], filters.shape[2]);
        let (_, out_length) = signal_layout(kernel_size, stride).output_size(1, self.shape[2] + 2 * padding);
        let columns = self.img2col_1d(kernel_size, padding, stride);

        filters
            .reshape(&[out_channels, columns.shape[0]])
            .matmul(&columns)
            .reshape(&[out_channels, self.shape[0], out_length])
            .permuted(&[1, 0, 2])
    }

    /// Cross-correlates the image with `filters` of shape
    /// `[out_channels, channels, kh, kw]`.
    pub fn convolved_2d(&self, filters: &Self, padding: usize, stride: usize) -> Self {
        assert_eq!(self.dim(), 4, "Expected an image of shape [batch, channels, height, width], got {:?}.", self.shape);
        assert!(
            filters.dim() == 4 && filters.shape[1] == self.shape[1],
            "Filters of shape {:?} do not match an image of shape {:?}.",
            filters.shape,
            self.shape
        );
        let layout = Im2ColLayout {
            kernel_height: filters.shape[2],
            kernel_width: filters.shape[3],
            padding,
            stride,
        };
        let (out_height, out_width) = layout.output_size(self.shape[2], self.shape[3]);
        let out_channels = filters.shape[0];

        let columns = self.img2col(&layout);
        let weights = filters.reshape(&[out_channels, columns.shape[0]]);
        weights
            .matmul(&columns)
            .reshape(&[out_channels, self.shape[0], out_height, out_width])
            .permuted(&[1, 0, 2, 3])
    }

    /// Adjoint of `convolved_2d` with respect to its image. `filters` has
    /// shape `[out_channels, channels, kh, kw]` where `channels` matches
    /// the image. Every input pixel scatters a scaled kernel into an output
    /// of size `(h - 1) * stride - 2 * padding + kh` by
    /// `(w - 1) * stride - 2 * padding + kw`.
    pub fn transposed_convolved_2d(&self, filters: &Self, padding: usize, stride: usize) -> Self {
        assert_eq!(self.dim(), 4, "Expected an image of shape [batch, channels, height, width], got {:?}.", self.shape);
        assert!(
            filters.dim() == 4 && filters.shape[1] == self.shape[1],
            "Filters of shape {:?} do not match an image of shape {:?}.",
            filters.shape,
            self.shape
        );
        let (batch, channels, height, width) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        let (out_channels, kernel_height, kernel_width) = (filters.shape[0], filters.shape[2], filters.shape[3]);
        let expanded = |size: usize, kernel: usize| {
            (size > 0)
                .then(|| (size - 1) * stride + kernel)
                .and_then(|full| full.checked_sub(2 * padding))
                .filter(|&out| out > 0)
        };
        let (out_height, out_width) = match (expanded(height, kernel_height), expanded(width, kernel_width)) {
            (Some(h), Some(w)) if h > 0 && w > 0 => (h, w),
            _ => panic!("Transposed convolution over {:?} with padding {} has an empty output.", self.shape, padding),
        };
        let layout = Im2ColLayout {
            kernel_height,
            kernel_width,
            padding,
            stride,
        };

        let pixels = self.permuted(&[1, 0, 2, 3]).reshape(&[channels, batch * height * width]);
        let weights = filters
            .permuted(&[1, 0, 2, 3])
            .reshape(&[channels, out_channels * kernel_height * kernel_width]);
        weights
            .matmul_transposed(&pixels, true, false)
            .col2img(&layout, &[batch, out_channels, out_height, out_width])
    }

    /// Average over square windows of `size`. Padded positions count as
    /// zeros.
    pub fn avg_pooled_2d(&self, size: usize, stride: usize, padding: usize) -> Self {
        self.pooled(size, stride, padding, |columns| columns.mean(&[0]))
    }

    /// Maximum over square windows of `size`. Padded positions count as
    /// zeros.
    pub fn max_pooled_2d(&self, size: usize, stride: usize, padding: usize) -> Self {
        self.pooled(size, stride, padding, |columns| columns.max(&[0]))
    }

    fn pooled<F>(&self, size: usize, stride: usize, padding: usize, reduce: F) -> Self
    where
        F: FnOnce(&Self) -> Self,
    {
        assert_eq!(self.dim(), 4, "Expected an image of shape [batch, channels, height, width], got {:?}.", self.shape);
        let (batch, channels, height, width) = (self.shape[0], self.shape[1], self.shape[2], self.shape[3]);
        let layout = Im2ColLayout {
            kernel_height: size,
            kernel_width: size,
            padding,
            stride,
        };
        let (out_height, out_width) = layout.output_size(height, width);

        let planes = self.reshape(&[batch * channels, 1, height, width]);
        reduce(&planes.img2col(&layout)).reshape(&[batch, channels, out_height, out_width])
    }
}

fn signal_layout(kernel_size: usize, stride: usize) -> Im2ColLayout {
    Im2ColLayout {
        kernel_height: 1,
        kernel_width: kernel_size,
        padding: 0,
        stride,
    }
}
