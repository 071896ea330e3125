use super::elementwise;
use super::HostShaped;
use crate::engine::broadcast_shape;
use crate::memory::strides;
use crate::numeric::Numeric;
use rayon::prelude::*;

/// Strides reading `shape` as if it had `target`'s shape. Padded and
/// stretched axes get a zero stride.
fn broadcast_strides(shape: &[usize], target: &[usize]) -> Vec<usize> {
    let pad = target.len() - shape.len();
    let own = strides(shape);
    (0..target.len())
        .map(|axis| {
            if axis < pad || shape[axis - pad] == 1 {
                0
            } else {
                own[axis - pad]
            }
        })
        .collect()
}

pub(super) fn zip<N, F>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>, f: F)
where
    N: Numeric,
    F: Fn(N, N) -> N + Sync + Send,
{
    let shape = broadcast_shape(&lhs.shape, &rhs.shape);
    assert_eq!(
        shape, result.shape,
        "Broadcasting {:?} and {:?} gives {:?}, result has shape {:?}.",
        lhs.shape, rhs.shape, shape, result.shape
    );

    if lhs.shape == rhs.shape {
        return elementwise::zip(lhs, rhs, result, f);
    }

    let lhs_strides = broadcast_strides(&lhs.shape, &shape);
    let rhs_strides = broadcast_strides(&rhs.shape, &shape);
    let out_strides = strides(&shape);

    let l = lhs.values.read_for(&result.values);
    let r = rhs.values.read_for(&result.values);
    let (l, r): (&[N], &[N]) = (&l, &r);
    let mut dst = result.values.write();
    dst.par_iter_mut().enumerate().for_each(|(i, x)| {
        let mut rem = i;
        let (mut lo, mut ro) = (0, 0);
        for axis in 0..out_strides.len() {
            let index = rem / out_strides[axis];
            rem %= out_strides[axis];
            lo += index * lhs_strides[axis];
            ro += index * rhs_strides[axis];
        }
        *x = f(l[lo], r[ro]);
    });
}
