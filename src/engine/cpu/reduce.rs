use super::HostShaped;
use crate::engine::{reduced_shape, validate_axes};
use crate::memory::strides;
use crate::numeric::Numeric;
use rayon::prelude::*;

/// Index arithmetic of a reduction over a set of axes.
///
/// Output element `r` covers the source positions `base(r) + offset(j)`
/// for `j` in `0..reduced_count`, `j` being the row-major position inside
/// the reduced sub-space.
pub(super) struct ReductionPlan {
    kept_out_strides: Vec<usize>,
    kept_src_strides: Vec<usize>,
    reduced_inner_strides: Vec<usize>,
    reduced_src_strides: Vec<usize>,
    pub(super) reduced_count: usize,
}

impl ReductionPlan {
    pub(super) fn new(shape: &[usize], axes: &[usize]) -> Self {
        validate_axes(shape, axes);
        let src_strides = strides(shape);

        let mut kept_dims = Vec::new();
        let mut kept_src_strides = Vec::new();
        let mut reduced_dims = Vec::new();
        let mut reduced_src_strides = Vec::new();
        for (axis, (&dim, &stride)) in shape.iter().zip(&src_strides).enumerate() {
            if axes.contains(&axis) {
                reduced_dims.push(dim);
                reduced_src_strides.push(stride);
            } else {
                kept_dims.push(dim);
                kept_src_strides.push(stride);
            }
        }

        ReductionPlan {
            kept_out_strides: strides(&kept_dims),
            kept_src_strides,
            reduced_inner_strides: strides(&reduced_dims),
            reduced_src_strides,
            reduced_count: reduced_dims.iter().product(),
        }
    }

    #[inline]
    pub(super) fn base(&self, out_index: usize) -> usize {
        decompose(out_index, &self.kept_out_strides, &self.kept_src_strides)
    }

    #[inline]
    pub(super) fn offset(&self, reduced_index: usize) -> usize {
        decompose(reduced_index, &self.reduced_inner_strides, &self.reduced_src_strides)
    }
}

#[inline]
fn decompose(mut index: usize, inner_strides: &[usize], outer_strides: &[usize]) -> usize {
    let mut offset = 0;
    for (inner, outer) in inner_strides.iter().zip(outer_strides) {
        offset += index / inner * outer;
        index %= inner;
    }
    offset
}

fn check_result<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axes: &[usize]) {
    let expected = reduced_shape(&values.shape, axes);
    assert_eq!(
        expected.iter().product::<usize>(),
        result.count(),
        "Reducing {:?} along {:?} gives {:?}, result has shape {:?}.",
        values.shape,
        axes,
        expected,
        result.shape
    );
}

pub(super) fn sum<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axes: &[usize]) -> usize {
    check_result(values, result, axes);
    let plan = ReductionPlan::new(&values.shape, axes);
    let src = values.values.read_for(&result.values);
    let src: &[N] = &src;
    let mut dst = result.values.write();
    dst.par_iter_mut().enumerate().for_each(|(r, x)| {
        let base = plan.base(r);
        let mut acc = N::ZERO;
        for j in 0..plan.reduced_count {
            acc += src[base + plan.offset(j)];
        }
        *x = acc;
    });
    plan.reduced_count
}

pub(super) fn extreme<N, F>(
    values: &HostShaped<N>,
    result: &HostShaped<N>,
    context: Option<&HostShaped<i32>>,
    axes: &[usize],
    better: F,
) where
    N: Numeric,
    F: Fn(N, N) -> bool + Sync + Send,
{
    check_result(values, result, axes);
    let plan = ReductionPlan::new(&values.shape, axes);
    assert!(plan.reduced_count > 0, "Cannot reduce empty axes {:?} of shape {:?}.", axes, values.shape);

    let src = values.values.read_for(&result.values);
    let src: &[N] = &src;
    let winner = |r: usize| -> (usize, N) {
        let base = plan.base(r);
        let mut best = (0, src[base]);
        for j in 1..plan.reduced_count {
            let candidate = src[base + plan.offset(j)];
            if better(candidate, best.1) {
                best = (j, candidate);
            }
        }
        best
    };

    let mut dst = result.values.write();
    match context {
        Some(context) => {
            assert_eq!(context.count(), result.count(), "Context must have as many elements as the result.");
            let mut ctx = context.values.write();
            dst.par_iter_mut()
                .zip(ctx.par_iter_mut())
                .enumerate()
                .for_each(|(r, (x, c))| {
                    let (j, value) = winner(r);
                    *x = value;
                    *c = j as i32;
                });
        }
        None => dst.par_iter_mut().enumerate().for_each(|(r, x)| *x = winner(r).1),
    }
}

pub(super) fn expand_context<N: Numeric>(
    reduced: &HostShaped<N>,
    context: &HostShaped<i32>,
    result: &HostShaped<N>,
    axes: &[usize],
) {
    check_result(result, reduced, axes);
    assert_eq!(context.count(), reduced.count(), "Context must have as many elements as the reduced values.");
    let plan = ReductionPlan::new(&result.shape, axes);

    let src = reduced.values.read_for(&result.values);
    let ctx = context.values.read();
    let mut dst = result.values.write();
    dst.iter_mut().for_each(|x| *x = N::ZERO);
    for (r, (&value, &j)) in src.iter().zip(ctx.iter()).enumerate() {
        assert!(j >= 0 && (j as usize) < plan.reduced_count, "Context index {} out of range.", j);
        dst[plan.base(r) + plan.offset(j as usize)] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_offsets() {
        let plan = ReductionPlan::new(&[2, 3, 4], &[1]);
        assert_eq!(plan.reduced_count, 3);
        assert_eq!(plan.base(5), 12 + 1);
        assert_eq!(plan.offset(2), 8);

        let plan = ReductionPlan::new(&[2, 3, 4], &[0, 2]);
        assert_eq!(plan.reduced_count, 8);
        assert_eq!(plan.base(2), 8);
        assert_eq!(plan.offset(5), 12 + 1);
    }
}
