use super::elementwise::assert_shape_eq;
use super::HostShaped;
use crate::memory::{element_count, strides};
use crate::numeric::Numeric;
use rayon::prelude::*;

/// Splits `shape` around `axis` into the element counts before it, the
/// axis length and the element count after it.
fn split_at_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    assert!(axis < shape.len(), "Axis {} out of range for shape {:?}.", axis, shape);
    (
        element_count(&shape[..axis]),
        shape[axis],
        element_count(&shape[axis + 1..]),
    )
}

pub(super) fn permute<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, arrangement: &[usize]) {
    let rank = values.shape.len();
    assert_eq!(arrangement.len(), rank, "Arrangement {:?} does not match rank {}.", arrangement, rank);
    let mut seen = vec![false; rank];
    for &axis in arrangement {
        assert!(axis < rank && !seen[axis], "Arrangement {:?} is not a permutation.", arrangement);
        seen[axis] = true;
    }
    let permuted: Vec<usize> = arrangement.iter().map(|&axis| values.shape[axis]).collect();
    assert_shape_eq(&permuted, &result.shape);

    let src_strides = strides(&values.shape);
    let gathered_strides: Vec<usize> = arrangement.iter().map(|&axis| src_strides[axis]).collect();
    let out_strides = strides(&result.shape);

    let src = values.values.read_for(&result.values);
    let src: &[N] = &src;
    let mut dst = result.values.write();
    dst.par_iter_mut().enumerate().for_each(|(i, x)| {
        let mut rem = i;
        let mut offset = 0;
        for (out_stride, src_stride) in out_strides.iter().zip(&gathered_strides) {
            offset += rem / out_stride * src_stride;
            rem %= out_stride;
        }
        *x = src[offset];
    });
}

pub(super) fn reverse<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axis: usize, accumulate: bool) {
    assert_shape_eq(&values.shape, &result.shape);
    let (_, dim, inner) = split_at_axis(&values.shape, axis);

    let src = values.values.read_for(&result.values);
    let src: &[N] = &src;
    let mut dst = result.values.write();
    dst.par_iter_mut().enumerate().for_each(|(i, x)| {
        let outer = i / (dim * inner);
        let k = i / inner % dim;
        let offset = outer * dim * inner + (dim - 1 - k) * inner + i % inner;
        if accumulate {
            *x += src[offset];
        } else {
            *x = src[offset];
        }
    });
}

fn check_stack<N: Numeric>(parts: &[HostShaped<N>], stacked: &HostShaped<N>, axis: usize) {
    assert!(!parts.is_empty(), "Cannot stack an empty list of buffers.");
    let mut expected = parts[0].shape.clone();
    assert!(axis < expected.len(), "Axis {} out of range for shape {:?}.", axis, expected);
    expected[axis] = 0;
    for part in parts {
        assert_eq!(part.shape.len(), expected.len(), "Stacked buffers must have the same rank.");
        for (a, (&dim, &other)) in part.shape.iter().zip(&parts[0].shape).enumerate() {
            assert!(
                a == axis || dim == other,
                "Cannot stack shapes {:?} and {:?} along axis {}.",
                part.shape,
                parts[0].shape,
                axis
            );
        }
        expected[axis] += part.shape[axis];
    }
    assert_shape_eq(&expected, &stacked.shape);
}

pub(super) fn stack<N: Numeric>(parts: &[HostShaped<N>], result: &HostShaped<N>, axis: usize) {
    check_stack(parts, result, axis);
    let (outer, total, inner) = split_at_axis(&result.shape, axis);

    let mut prefix = 0;
    for part in parts {
        let chunk = part.shape[axis] * inner;
        let src = part.values.read_for(&result.values);
        let mut dst = result.values.write();
        for o in 0..outer {
            let start = o * total * inner + prefix * inner;
            dst[start..start + chunk].copy_from_slice(&src[o * chunk..(o + 1) * chunk]);
        }
        prefix += part.shape[axis];
    }
}

pub(super) fn unstack<N: Numeric>(stacked: &HostShaped<N>, results: &[HostShaped<N>], axis: usize) {
    check_stack(results, stacked, axis);
    let (outer, total, inner) = split_at_axis(&stacked.shape, axis);

    let mut prefix = 0;
    for part in results {
        let chunk = part.shape[axis] * inner;
        let src = stacked.values.read_for(&part.values);
        let mut dst = part.values.write();
        for o in 0..outer {
            let start = o * total * inner + prefix * inner;
            dst[o * chunk..(o + 1) * chunk].copy_from_slice(&src[start..start + chunk]);
        }
        prefix += part.shape[axis];
    }
}

fn check_gather<N: Numeric>(expanded: &HostShaped<N>, context: &HostShaped<i32>, reduced: &HostShaped<N>, axis: usize) {
    let mut expected = expanded.shape.clone();
    assert!(axis < expected.len(), "Axis {} out of range for shape {:?}.", axis, expected);
    expected.remove(axis);
    assert_shape_eq(&expected, &context.shape);
    assert_shape_eq(&expected, &reduced.shape);
}

#[inline]
fn resolve_index(index: i32, dim: usize) -> usize {
    assert!(index >= 0 && (index as usize) < dim, "Index {} out of range for axis of size {}.", index, dim);
    index as usize
}

pub(super) fn gather<N: Numeric>(
    expanded: &HostShaped<N>,
    context: &HostShaped<i32>,
    result: &HostShaped<N>,
    axis: usize,
    ignore_index: i32,
) {
    check_gather(expanded, context, result, axis);
    let (_, dim, inner) = split_at_axis(&expanded.shape, axis);

    let src = expanded.values.read_for(&result.values);
    let src: &[N] = &src;
    let ctx = context.values.read();
    let mut dst = result.values.write();
    dst.par_iter_mut().zip(ctx.par_iter()).enumerate().for_each(|(i, (x, &c))| {
        *x = if c == ignore_index {
            N::ZERO
        } else {
            src[(i / inner) * dim * inner + resolve_index(c, dim) * inner + i % inner]
        };
    });
}

pub(super) fn scatter<N: Numeric>(
    reduced: &HostShaped<N>,
    context: &HostShaped<i32>,
    result: &HostShaped<N>,
    axis: usize,
    ignore_index: i32,
) {
    check_gather(result, context, reduced, axis);
    let (_, dim, inner) = split_at_axis(&result.shape, axis);

    let src = reduced.values.read_for(&result.values);
    let ctx = context.values.read();
    let mut dst = result.values.write();
    dst.iter_mut().for_each(|x| *x = N::ZERO);
    for (i, (&value, &c)) in src.iter().zip(ctx.iter()).enumerate() {
        if c != ignore_index {
            dst[(i / inner) * dim * inner + resolve_index(c, dim) * inner + i % inner] = value;
        }
    }
}
