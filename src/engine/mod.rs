//! `engine` is the kernel catalogue every device has to provide.
//!
//! Kernels take their operands and a result buffer allocated by the
//! caller. They never infer shapes: the result shape is precomputed by
//! the tensor layer and kernels only assert it before filling values.
//! The `*_assign` and `*_add` kernels add into their target instead of
//! overwriting it.
//!
//! Index buffers (`context`) always hold `i32` elements regardless of the
//! element type of the values they route.

use crate::memory::{MemoryBackend, ShapedBuffer};
use crate::numeric::Numeric;

pub mod cpu;

pub use cpu::CpuEngine;

/// Index value excluded from gather and scatter by default.
pub const DEFAULT_IGNORE_INDEX: i32 = -1;

/// Geometry of an `img2col`/`col2img` lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Im2ColLayout {
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub padding: usize,
    pub stride: usize,
}

impl Im2ColLayout {
    pub fn output_size(&self, height: usize, width: usize) -> (usize, usize) {
        assert!(
            height + 2 * self.padding >= self.kernel_height && width + 2 * self.padding >= self.kernel_width,
            "Kernel {}x{} does not fit an image of {}x{} with padding {}.",
            self.kernel_height,
            self.kernel_width,
            height,
            width,
            self.padding
        );
        assert!(self.stride > 0, "Stride must be positive.");
        (
            (height + 2 * self.padding - self.kernel_height) / self.stride + 1,
            (width + 2 * self.padding - self.kernel_width) / self.stride + 1,
        )
    }

    /// Shape of the column matrix produced from an image of shape
    /// `[batch, channels, height, width]`.
    pub fn column_shape(&self, image_shape: &[usize]) -> Vec<usize> {
        assert_eq!(image_shape.len(), 4, "Expected an image of shape [batch, channels, height, width], got {:?}.", image_shape);
        let (out_height, out_width) = self.output_size(image_shape[2], image_shape[3]);
        vec![
            image_shape[1] * self.kernel_height * self.kernel_width,
            image_shape[0] * out_height * out_width,
        ]
    }
}

pub trait ComputeBackend: 'static {
    type Memory: MemoryBackend;

    fn fill<N: Numeric>(value: N, result: &ShapedBuffer<N, Self::Memory>);

    /// Fills `result` with `start + step * i`.
    fn arange<N: Numeric>(start: N, step: N, result: &ShapedBuffer<N, Self::Memory>);

    /// Fills a rank 2 `result` with ones on the diagonals `-below..=above`
    /// and zeros elsewhere.
    fn band_matrix<N: Numeric>(below: usize, above: usize, result: &ShapedBuffer<N, Self::Memory>);

    /// Elementwise maximum. `context`, when given, receives one where the
    /// left operand won and zero otherwise.
    fn max<N: Numeric>(
        lhs: &ShapedBuffer<N, Self::Memory>,
        rhs: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        context: Option<&ShapedBuffer<N, Self::Memory>>,
    );
    fn min<N: Numeric>(
        lhs: &ShapedBuffer<N, Self::Memory>,
        rhs: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        context: Option<&ShapedBuffer<N, Self::Memory>>,
    );

    fn neg<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn square<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn sqrt<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn exp<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn log<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn tanh<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn sin<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn cos<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn tan<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn sinh<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn cosh<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn pow<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, exponent: N, result: &ShapedBuffer<N, Self::Memory>);
    fn relu<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    /// One for strictly positive values, zero otherwise.
    fn heaviside<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);

    fn scalar_add<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, scalar: N, result: &ShapedBuffer<N, Self::Memory>);
    fn scalar_mul<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, scalar: N, result: &ShapedBuffer<N, Self::Memory>);
    /// `result = scalar / values`
    fn scalar_rdiv<N: Numeric>(scalar: N, values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    /// `result = lhs * scale + rhs`
    fn scaled_add<N: Numeric>(
        lhs: &ShapedBuffer<N, Self::Memory>,
        scale: N,
        rhs: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
    );

    /// `target += source`
    fn add_assign<N: Numeric>(target: &ShapedBuffer<N, Self::Memory>, source: &ShapedBuffer<N, Self::Memory>);
    /// `target += source * scale`
    fn scaled_add_assign<N: Numeric>(target: &ShapedBuffer<N, Self::Memory>, source: &ShapedBuffer<N, Self::Memory>, scale: N);

    fn broadcast_add<N: Numeric>(lhs: &ShapedBuffer<N, Self::Memory>, rhs: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn broadcast_sub<N: Numeric>(lhs: &ShapedBuffer<N, Self::Memory>, rhs: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn broadcast_mul<N: Numeric>(lhs: &ShapedBuffer<N, Self::Memory>, rhs: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);
    fn broadcast_div<N: Numeric>(lhs: &ShapedBuffer<N, Self::Memory>, rhs: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>);

    /// Sums over `axes`, `result` holds the remaining axes in order.
    fn reduce_sum<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, axes: &[usize]);
    fn reduce_mean<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, axes: &[usize]);
    /// `context`, when given, receives the flat position of the winner
    /// inside the reduced sub-space of every output element.
    fn reduce_max<N: Numeric>(
        values: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        context: Option<&ShapedBuffer<i32, Self::Memory>>,
        axes: &[usize],
    );
    fn reduce_min<N: Numeric>(
        values: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        context: Option<&ShapedBuffer<i32, Self::Memory>>,
        axes: &[usize],
    );
    /// Routes every reduced value back to the position recorded in
    /// `context` by `reduce_max`/`reduce_min`. Other positions are zero.
    fn expand_context<N: Numeric>(
        reduced: &ShapedBuffer<N, Self::Memory>,
        context: &ShapedBuffer<i32, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        axes: &[usize],
    );

    /// `result = alpha * op(lhs) * op(rhs) + beta * result` on rank 2 buffers.
    #[allow(clippy::too_many_arguments)]
    fn gemm<N: Numeric>(
        lhs: &ShapedBuffer<N, Self::Memory>,
        rhs: &ShapedBuffer<N, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        alpha: N,
        beta: N,
        transpose_lhs: bool,
        transpose_rhs: bool,
    );

    /// Picks one element along `axis` per position of `context`.
    fn gather<N: Numeric>(
        expanded: &ShapedBuffer<N, Self::Memory>,
        context: &ShapedBuffer<i32, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        axis: usize,
        ignore_index: i32,
    );
    /// Inverse of `gather`: positions not addressed by `context` are zero.
    fn scatter<N: Numeric>(
        reduced: &ShapedBuffer<N, Self::Memory>,
        context: &ShapedBuffer<i32, Self::Memory>,
        result: &ShapedBuffer<N, Self::Memory>,
        axis: usize,
        ignore_index: i32,
    );

    /// Axis `i` of `result` is axis `arrangement[i]` of `values`.
    fn permute_axes<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, arrangement: &[usize]);

    fn reverse<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, axis: usize);
    /// `result += reversed(values)`
    fn reverse_add<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, axis: usize);

    /// Concatenates `buffers` along `axis`.
    fn stack<N: Numeric>(buffers: &[ShapedBuffer<N, Self::Memory>], result: &ShapedBuffer<N, Self::Memory>, axis: usize);
    /// Splits `stacked` along `axis` into `results`.
    fn unstack<N: Numeric>(stacked: &ShapedBuffer<N, Self::Memory>, results: &[ShapedBuffer<N, Self::Memory>], axis: usize);

    fn img2col<N: Numeric>(values: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, layout: &Im2ColLayout);
    /// Adjoint of `img2col`: overlapping windows are summed.
    fn col2img<N: Numeric>(matrix: &ShapedBuffer<N, Self::Memory>, result: &ShapedBuffer<N, Self::Memory>, layout: &Im2ColLayout);
}

/// Shape resulting from broadcasting `lhs` against `rhs`.
///
/// Shapes are aligned on their trailing dimensions, the shorter one is
/// padded with leading ones and dimensions of size one stretch to match.
pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Vec<usize> {
    let rank = lhs.len().max(rhs.len());
    let padded = |shape: &[usize], axis: usize| -> usize {
        let pad = rank - shape.len();
        if axis < pad {
            1
        } else {
            shape[axis - pad]
        }
    };

    (0..rank)
        .map(|axis| {
            let (l, r) = (padded(lhs, axis), padded(rhs, axis));
            assert!(l == r || l == 1 || r == 1, "Cannot broadcast shapes {:?} and {:?}.", lhs, rhs);
            if l == 1 {
                r
            } else {
                l
            }
        })
        .collect()
}

/// Shape left after removing `axes` from `shape`.
pub fn reduced_shape(shape: &[usize], axes: &[usize]) -> Vec<usize> {
    validate_axes(shape, axes);
    shape
        .iter()
        .enumerate()
        .filter(|(axis, _)| !axes.contains(axis))
        .map(|(_, &dim)| dim)
        .collect()
}

pub(crate) fn validate_axes(shape: &[usize], axes: &[usize]) {
    for (i, &axis) in axes.iter().enumerate() {
        assert!(axis < shape.len(), "Axis {} out of range for shape {:?}.", axis, shape);
        assert!(!axes[..i].contains(&axis), "Axis {} given more than once in {:?}.", axis, axes);
    }
}
