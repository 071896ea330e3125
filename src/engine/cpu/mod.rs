//! Host implementation of the kernel catalogue.
//!
//! Elementwise and broadcasting loops are split across the rayon thread
//! pool. Reductions parallelize over output elements and accumulate each
//! output sequentially, so results do not depend on the number of threads.

use super::{ComputeBackend, Im2ColLayout};
use crate::memory::{HostMemory, ShapedBuffer};
use crate::numeric::{GemmLayout, Numeric};

mod arrange;
mod broadcast;
mod conv;
mod elementwise;
mod reduce;

type HostShaped<N> = ShapedBuffer<N, HostMemory>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuEngine;

impl ComputeBackend for CpuEngine {
    type Memory = HostMemory;

    fn fill<N: Numeric>(value: N, result: &HostShaped<N>) {
        elementwise::generate(result, |_| value);
    }

    fn arange<N: Numeric>(start: N, step: N, result: &HostShaped<N>) {
        elementwise::generate(result, |i| start + step * N::from_usize(i));
    }

    fn band_matrix<N: Numeric>(below: usize, above: usize, result: &HostShaped<N>) {
        assert_eq!(result.dim(), 2, "Band matrix must have rank 2, got shape {:?}.", result.shape);
        let columns = result.shape[1];
        elementwise::generate(result, |i| {
            let (row, column) = ((i / columns) as isize, (i % columns) as isize);
            if column - row >= -(below as isize) && column - row <= above as isize {
                N::ONE
            } else {
                N::ZERO
            }
        });
    }

    fn max<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>, context: Option<&HostShaped<N>>) {
        elementwise::select(lhs, rhs, result, context, |a, b| a >= b);
    }

    fn min<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>, context: Option<&HostShaped<N>>) {
        elementwise::select(lhs, rhs, result, context, |a, b| a <= b);
    }

    fn neg<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| -x);
    }

    fn square<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| x * x);
    }

    fn sqrt<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::sqrt);
    }

    fn exp<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::exp);
    }

    fn log<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::ln);
    }

    fn tanh<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::tanh);
    }

    fn sin<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::sin);
    }

    fn cos<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::cos);
    }

    fn tan<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::tan);
    }

    fn sinh<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::sinh);
    }

    fn cosh<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, N::cosh);
    }

    fn pow<N: Numeric>(values: &HostShaped<N>, exponent: N, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| x.powf(exponent));
    }

    fn relu<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| if x > N::ZERO { x } else { N::ZERO });
    }

    fn heaviside<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| if x > N::ZERO { N::ONE } else { N::ZERO });
    }

    fn scalar_add<N: Numeric>(values: &HostShaped<N>, scalar: N, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| x + scalar);
    }

    fn scalar_mul<N: Numeric>(values: &HostShaped<N>, scalar: N, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| x * scalar);
    }

    fn scalar_rdiv<N: Numeric>(scalar: N, values: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::map(values, result, |x| scalar / x);
    }

    fn scaled_add<N: Numeric>(lhs: &HostShaped<N>, scale: N, rhs: &HostShaped<N>, result: &HostShaped<N>) {
        elementwise::zip(lhs, rhs, result, |a, b| a * scale + b);
    }

    fn add_assign<N: Numeric>(target: &HostShaped<N>, source: &HostShaped<N>) {
        elementwise::update(target, source, |x, y| *x += y);
    }

    fn scaled_add_assign<N: Numeric>(target: &HostShaped<N>, source: &HostShaped<N>, scale: N) {
        elementwise::update(target, source, |x, y| *x += y * scale);
    }

    fn broadcast_add<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>) {
        broadcast::zip(lhs, rhs, result, |a, b| a + b);
    }

    fn broadcast_sub<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>) {
        broadcast::zip(lhs, rhs, result, |a, b| a - b);
    }

    fn broadcast_mul<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>) {
        broadcast::zip(lhs, rhs, result, |a, b| a * b);
    }

    fn broadcast_div<N: Numeric>(lhs: &HostShaped<N>, rhs: &HostShaped<N>, result: &HostShaped<N>) {
        broadcast::zip(lhs, rhs, result, |a, b| a / b);
    }

    fn reduce_sum<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axes: &[usize]) {
        reduce::sum(values, result, axes);
    }

    fn reduce_mean<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axes: &[usize]) {
        let count = reduce::sum(values, result, axes);
        assert!(count > 0, "Cannot average empty axes {:?} of shape {:?}.", axes, values.shape);
        let scale = N::from_usize(count);
        let mut dst = result.values.write();
        dst.iter_mut().for_each(|x| *x = *x / scale);
    }

    fn reduce_max<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, context: Option<&HostShaped<i32>>, axes: &[usize]) {
        reduce::extreme(values, result, context, axes, |candidate, best| candidate > best);
    }

    fn reduce_min<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, context: Option<&HostShaped<i32>>, axes: &[usize]) {
        reduce::extreme(values, result, context, axes, |candidate, best| candidate < best);
    }

    fn expand_context<N: Numeric>(reduced: &HostShaped<N>, context: &HostShaped<i32>, result: &HostShaped<N>, axes: &[usize]) {
        reduce::expand_context(reduced, context, result, axes);
    }

    fn gemm<N: Numeric>(
        lhs: &HostShaped<N>,
        rhs: &HostShaped<N>,
        result: &HostShaped<N>,
        alpha: N,
        beta: N,
        transpose_lhs: bool,
        transpose_rhs: bool,
    ) {
        assert!(
            lhs.dim() == 2 && rhs.dim() == 2 && result.dim() == 2,
            "Matrix multiplication requires rank 2 operands, got {:?}, {:?} and {:?}.",
            lhs.shape,
            rhs.shape,
            result.shape
        );
        let (m, k) = if transpose_lhs { (lhs.shape[1], lhs.shape[0]) } else { (lhs.shape[0], lhs.shape[1]) };
        let (k_rhs, n) = if transpose_rhs { (rhs.shape[1], rhs.shape[0]) } else { (rhs.shape[0], rhs.shape[1]) };
        assert_eq!(
            k, k_rhs,
            "Contracted dimensions {} and {} must be equal, got shapes {:?} and {:?}.",
            k, k_rhs, lhs.shape, rhs.shape
        );
        assert_eq!(result.shape, vec![m, n], "Result of shape {:?} cannot hold a {}x{} product.", result.shape, m, n);

        let layout = GemmLayout {
            m,
            n,
            k,
            transpose_lhs,
            transpose_rhs,
        };
        let l = lhs.values.read_for(&result.values);
        let r = rhs.values.read_for(&result.values);
        let mut dst = result.values.write();
        N::gemm(&layout, alpha, &l, &r, beta, &mut dst);
    }

    fn gather<N: Numeric>(expanded: &HostShaped<N>, context: &HostShaped<i32>, result: &HostShaped<N>, axis: usize, ignore_index: i32) {
        arrange::gather(expanded, context, result, axis, ignore_index);
    }

    fn scatter<N: Numeric>(reduced: &HostShaped<N>, context: &HostShaped<i32>, result: &HostShaped<N>, axis: usize, ignore_index: i32) {
        arrange::scatter(reduced, context, result, axis, ignore_index);
    }

    fn permute_axes<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, arrangement: &[usize]) {
        arrange::permute(values, result, arrangement);
    }

    fn reverse<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axis: usize) {
        arrange::reverse(values, result, axis, false);
    }

    fn reverse_add<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, axis: usize) {
        arrange::reverse(values, result, axis, true);
    }

    fn stack<N: Numeric>(buffers: &[HostShaped<N>], result: &HostShaped<N>, axis: usize) {
        arrange::stack(buffers, result, axis);
    }

    fn unstack<N: Numeric>(stacked: &HostShaped<N>, results: &[HostShaped<N>], axis: usize) {
        arrange::unstack(stacked, results, axis);
    }

    fn img2col<N: Numeric>(values: &HostShaped<N>, result: &HostShaped<N>, layout: &Im2ColLayout) {
        conv::img2col(values, result, layout);
    }

    fn col2img<N: Numeric>(matrix: &HostShaped<N>, result: &HostShaped<N>, layout: &Im2ColLayout) {
        conv::col2img(matrix, result, layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn buffer<N: Numeric>(values: &[N], shape: &[usize]) -> HostShaped<N> {
        let buffer = HostMemory::allocate::<N>(shape);
        HostMemory::assign_from_host(&buffer.values, values);
        buffer
    }

    fn empty<N: Numeric>(shape: &[usize]) -> HostShaped<N> {
        HostMemory::allocate::<N>(shape)
    }

    #[test]
    fn elementwise_kernels() {
        let a = buffer(&[1.0f32, -2.0, 3.0], &[3]);
        let b = buffer(&[4.0f32, 5.0, -6.0], &[3]);
        let out = empty::<f32>(&[3]);

        CpuEngine::broadcast_add(&a, &b, &out);
        assert_eq!(out.to_vec(), vec![5.0, 3.0, -3.0]);
        CpuEngine::relu(&a, &out);
        assert_eq!(out.to_vec(), vec![1.0, 0.0, 3.0]);
        CpuEngine::scaled_add(&a, 2.0, &b, &out);
        assert_eq!(out.to_vec(), vec![6.0, 1.0, 0.0]);
        CpuEngine::scalar_rdiv(6.0, &b, &out);
        assert_eq!(out.to_vec(), vec![1.5, 1.2, -1.0]);
    }

    #[test]
    fn elementwise_max_context() {
        let a = buffer(&[1, 5, 3], &[3]);
        let b = buffer(&[2, 4, 3], &[3]);
        let out = empty::<i32>(&[3]);
        let mask = empty::<i32>(&[3]);
        CpuEngine::max(&a, &b, &out, Some(&mask));
        assert_eq!(out.to_vec(), vec![2, 5, 3]);
        assert_eq!(mask.to_vec(), vec![0, 1, 1]);
    }

    #[test]
    fn in_place_accumulation() {
        let target = buffer(&[1.0f64, 1.0], &[2]);
        let source = buffer(&[2.0f64, 3.0], &[2]);
        CpuEngine::scaled_add_assign(&target, &source, -0.5);
        assert_eq!(target.to_vec(), vec![0.0, -0.5]);
        CpuEngine::add_assign(&target, &target.clone());
        assert_eq!(target.to_vec(), vec![0.0, -1.0]);
    }

    #[test]
    fn broadcast_kernels() {
        let a = buffer(&[1, 2, 3, 4, 5, 6], &[2, 3]);
        let b = buffer(&[10, 20, 30], &[3]);
        let c = buffer(&[100, 200], &[2, 1]);
        let out = empty::<i32>(&[2, 3]);

        CpuEngine::broadcast_add(&a, &b, &out);
        assert_eq!(out.to_vec(), vec![11, 22, 33, 14, 25, 36]);
        CpuEngine::broadcast_sub(&c, &a, &out);
        assert_eq!(out.to_vec(), vec![99, 98, 97, 196, 195, 194]);
    }

    #[test]
    fn reductions() {
        let a = buffer(&[1.0f32, 7.0, 3.0, 4.0, 2.0, 6.0], &[2, 3]);
        let rows = empty::<f32>(&[2]);
        let columns = empty::<f32>(&[3]);
        let all = empty::<f32>(&[]);
        let context = empty::<i32>(&[2]);

        CpuEngine::reduce_sum(&a, &rows, &[1]);
        assert_eq!(rows.to_vec(), vec![11.0, 12.0]);
        CpuEngine::reduce_mean(&a, &columns, &[0]);
        assert_eq!(columns.to_vec(), vec![2.5, 4.5, 4.5]);
        CpuEngine::reduce_sum(&a, &all, &[0, 1]);
        assert_eq!(all.to_vec(), vec![23.0]);

        CpuEngine::reduce_max(&a, &rows, Some(&context), &[1]);
        assert_eq!(rows.to_vec(), vec![7.0, 6.0]);
        assert_eq!(context.to_vec(), vec![1, 2]);

        let expanded = empty::<f32>(&[2, 3]);
        CpuEngine::expand_context(&rows, &context, &expanded, &[1]);
        assert_eq!(expanded.to_vec(), vec![0.0, 7.0, 0.0, 0.0, 0.0, 6.0]);

        CpuEngine::reduce_min(&a, &rows, Some(&context), &[1]);
        assert_eq!(rows.to_vec(), vec![1.0, 2.0]);
        assert_eq!(context.to_vec(), vec![0, 1]);
    }

    #[test]
    fn gemm_with_transposes() {
        let a = buffer(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = buffer(&[1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let out = empty::<f32>(&[2, 2]);
        CpuEngine::gemm(&a, &b, &out, 1.0, 0.0, false, false);
        assert_eq!(out.to_vec(), vec![4.0, 5.0, 10.0, 11.0]);

        let gram = empty::<f32>(&[3, 3]);
        CpuEngine::gemm(&a, &a, &gram, 1.0, 0.0, true, false);
        assert_eq!(gram.to_vec(), vec![17.0, 22.0, 27.0, 22.0, 29.0, 36.0, 27.0, 36.0, 45.0]);

        CpuEngine::gemm(&a, &b, &out, 2.0, 1.0, false, false);
        assert_eq!(out.to_vec(), vec![12.0, 15.0, 30.0, 33.0]);
    }

    #[test]
    fn gather_and_scatter() {
        let a = buffer(&[1, 2, 3, 4, 5, 6], &[2, 3]);
        let context = buffer(&[2, -1], &[2]);
        let picked = empty::<i32>(&[2]);
        CpuEngine::gather(&a, &context, &picked, 1, -1);
        assert_eq!(picked.to_vec(), vec![3, 0]);

        let spread = empty::<i32>(&[2, 3]);
        CpuEngine::scatter(&buffer(&[7, 8], &[2]), &context, &spread, 1, -1);
        assert_eq!(spread.to_vec(), vec![0, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn permute_and_reverse() {
        let a = buffer(&[1, 2, 3, 4, 5, 6], &[2, 3]);
        let t = empty::<i32>(&[3, 2]);
        CpuEngine::permute_axes(&a, &t, &[1, 0]);
        assert_eq!(t.to_vec(), vec![1, 4, 2, 5, 3, 6]);

        let r = empty::<i32>(&[2, 3]);
        CpuEngine::reverse(&a, &r, 0);
        assert_eq!(r.to_vec(), vec![4, 5, 6, 1, 2, 3]);
        CpuEngine::reverse(&a, &r, 1);
        assert_eq!(r.to_vec(), vec![3, 2, 1, 6, 5, 4]);
        CpuEngine::reverse_add(&a, &r, 1);
        assert_eq!(r.to_vec(), vec![6, 4, 2, 12, 10, 8]);
    }

    #[test]
    fn stack_and_unstack() {
        let a = buffer(&[1, 2, 3, 4], &[2, 2]);
        let b = buffer(&[5, 6], &[2, 1]);
        let stacked = empty::<i32>(&[2, 3]);
        CpuEngine::stack(&[a.clone(), b.clone()], &stacked, 1);
        assert_eq!(stacked.to_vec(), vec![1, 2, 5, 3, 4, 6]);

        let parts = [empty::<i32>(&[2, 2]), empty::<i32>(&[2, 1])];
        CpuEngine::unstack(&stacked, &parts, 1);
        assert_eq!(parts[0].to_vec(), a.to_vec());
        assert_eq!(parts[1].to_vec(), b.to_vec());
    }

    #[test]
    fn img2col_layout() {
        let image = buffer(&[1.0f32, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let layout = Im2ColLayout {
            kernel_height: 2,
            kernel_width: 2,
            padding: 0,
            stride: 1,
        };
        let columns = empty::<f32>(&layout.column_shape(&image.shape));
        CpuEngine::img2col(&image, &columns, &layout);
        assert_eq!(columns.shape, vec![4, 1]);
        assert_eq!(columns.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        let padded = Im2ColLayout { padding: 1, ..layout };
        let columns = empty::<f32>(&padded.column_shape(&image.shape));
        CpuEngine::img2col(&image, &columns, &padded);
        assert_eq!(columns.shape, vec![4, 9]);
        let back = empty::<f32>(&[1, 1, 2, 2]);
        CpuEngine::col2img(&columns, &back, &padded);
        assert_eq!(back.to_vec(), vec![4.0, 8.0, 12.0, 16.0]);
    }

    #[test]
    fn fills() {
        let band = empty::<f32>(&[3, 3]);
        CpuEngine::band_matrix(0, 1, &band);
        assert_eq!(band.to_vec(), vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let range = empty::<i64>(&[4]);
        CpuEngine::arange(3, 2, &range);
        assert_eq!(range.to_vec(), vec![3, 5, 7, 9]);
    }
}
