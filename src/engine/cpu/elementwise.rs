use super::HostShaped;
use crate::numeric::Numeric;
use rayon::prelude::*;

pub(super) fn assert_shape_eq(lhs: &[usize], rhs: &[usize]) {
    assert_eq!(lhs, rhs, "Tensors must have same shape, got {:?} and {:?}.", lhs, rhs);
}

pub(super) fn generate<N, F>(result: &HostShaped<N>, f: F)
where
    N: Numeric,
    F: Fn(usize) -> N + Sync + Send,
{
    let mut dst = result.values.write();
    dst.par_iter_mut().enumerate().for_each(|(i, x)| *x = f(i));
}

pub(super) fn map<N, F>(values: &HostShaped<N>, result: &HostShaped<N>, f: F)
where
    N: Numeric,
    F: Fn(N) -> N + Sync + Send,
{
    assert_shape_eq(&values.shape, &result.shape);
    let src = values.values.read_for(&result.values);
    let mut dst = result.values.write();
    dst.par_iter_mut().zip(src.par_iter()).for_each(|(x, &y)| *x = f(y));
}

pub(super) fn zip<N, F>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>, f: F)
where
    N: Numeric,
    F: Fn(N, N) -> N + Sync + Send,
{
    assert_shape_eq(&lhs.shape, &rhs.shape);
    assert_shape_eq(&lhs.shape, &result.shape);
    let l = lhs.values.read_for(&result.values);
    let r = rhs.values.read_for(&result.values);
    let mut dst = result.values.write();
    dst.par_iter_mut()
        .zip(l.par_iter().zip(r.par_iter()))
        .for_each(|(x, (&a, &b))| *x = f(a, b));
}

/// Applies `f(target, source)` in place on `target`.
pub(super) fn update<N, F>(target: &HostShaped<N>, source: &HostShaped<N>, f: F)
where
    N: Numeric,
    F: Fn(&mut N, N) + Sync + Send,
{
    assert_eq!(
        target.count(),
        source.count(),
        "Tensors must have same number of elements, got shapes {:?} and {:?}.",
        target.shape,
        source.shape
    );
    let src = source.values.read_for(&target.values);
    let mut dst = target.values.write();
    dst.par_iter_mut().zip(src.par_iter()).for_each(|(x, &y)| f(x, y));
}

/// Elementwise selection between two operands. `context` receives one
/// where `lhs` was kept.
pub(super) fn select<N, F>(
    lhs: &HostShaped<N>,
    rhs: &HostShaped<N>,
    result: &HostShaped<N>,
    context: Option<&HostShaped<N>>,
    keep_lhs: F,
) where
    N: Numeric,
    F: Fn(N, N) -> bool + Sync + Send,
{
    if let Some(context) = context {
        assert_shape_eq(&lhs.shape, &context.shape);
        let l = lhs.values.read_for(&context.values);
        let r = rhs.values.read_for(&context.values);
        let mut mask = context.values.write();
        mask.par_iter_mut()
            .zip(l.par_iter().zip(r.par_iter()))
            .for_each(|(m, (&a, &b))| *m = if keep_lhs(a, b) { N::ONE } else { N::ZERO });
    }

    zip(lhs, rhs, result, |a, b| if keep_lhs(a, b) { a } else { b });
}
