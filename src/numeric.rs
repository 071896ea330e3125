//! `numeric` defines the `Numeric` trait, the generic numeric
//! constraint shared by every element type a tensor can hold.
//! Kernels, reductions and backward functions are written once against
//! this trait so that integer and floating point tensors share the same
//! call signatures.
//!
//! It is implemented for `f32`, `f64`, `i32` and `i64` thanks to the
//! `expand_impl` procedural macro from the `tapegrad_macros` crate.
//! Floating point types route matrix multiplication to BLAS while integer
//! types fall back to a naive triple loop with the same semantics.

extern crate cblas;
extern crate openblas_src;

use cblas::{dgemm, sgemm, Transpose};
use rayon::prelude::*;
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::*;
use tapegrad_macros::expand_impl;

/// Row-major geometry of a `result = alpha * op(lhs) * op(rhs) + beta * result`
/// product where `op(lhs)` is `m x k` and `op(rhs)` is `k x n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmLayout {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub transpose_lhs: bool,
    pub transpose_rhs: bool,
}

impl GemmLayout {
    #[inline]
    pub fn lhs_leading_dim(&self) -> usize {
        if self.transpose_lhs {
            self.m
        } else {
            self.k
        }
    }

    #[inline]
    pub fn rhs_leading_dim(&self) -> usize {
        if self.transpose_rhs {
            self.k
        } else {
            self.n
        }
    }

    #[inline]
    fn lhs_at<N: Copy>(&self, lhs: &[N], row: usize, col: usize) -> N {
        if self.transpose_lhs {
            lhs[col * self.m + row]
        } else {
            lhs[row * self.k + col]
        }
    }

    #[inline]
    fn rhs_at<N: Copy>(&self, rhs: &[N], row: usize, col: usize) -> N {
        if self.transpose_rhs {
            rhs[col * self.k + row]
        } else {
            rhs[row * self.n + col]
        }
    }

    fn blas_transpose(flag: bool) -> Transpose {
        if flag {
            Transpose::Ordinary
        } else {
            Transpose::None
        }
    }
}

pub trait Numeric:
    Copy
    + Debug
    + Default
    + PartialOrd
    + Send
    + Sync
    + bytemuck::Pod
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Sum
    + 'static
{
    const ZERO: Self;
    const ONE: Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn to_isize(self) -> isize;

    fn from_usize(value: usize) -> Self {
        Self::from_f64(value as f64)
    }

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn tanh(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn sinh(self) -> Self;
    fn cosh(self) -> Self;
    fn powf(self, exponent: Self) -> Self;

    /// General matrix multiplication on contiguous row-major slices.
    ///
    /// `beta == 0` never reads `result` so that uninitialized or recycled
    /// buffers can be written directly.
    fn gemm(layout: &GemmLayout, alpha: Self, lhs: &[Self], rhs: &[Self], beta: Self, result: &mut [Self]) {
        let GemmLayout { m, n, k, .. } = *layout;
        if m == 0 || n == 0 {
            return;
        }
        assert!(lhs.len() >= m * k && rhs.len() >= k * n && result.len() >= m * n);

        result[..m * n].par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, out) in row.iter_mut().enumerate() {
                let mut acc = Self::ZERO;
                for p in 0..k {
                    acc += layout.lhs_at(lhs, i, p) * layout.rhs_at(rhs, p, j);
                }
                *out = if beta == Self::ZERO {
                    alpha * acc
                } else {
                    alpha * acc + beta * *out
                };
            }
        });
    }
}

fn scale_by_beta<N: Numeric>(beta: N, result: &mut [N]) {
    if beta == N::ZERO {
        result.iter_mut().for_each(|x| *x = N::ZERO);
    } else {
        result.iter_mut().for_each(|x| *x = beta * *x);
    }
}

#[expand_impl(
    sgemm<T=f32>,
    dgemm<T=f64>,
)]
impl<T> Numeric for T {
    const ZERO: T = 0.0;
    const ONE: T = 1.0;

    #[inline]
    fn from_f64(value: f64) -> T {
        value as T
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn to_isize(self) -> isize {
        self as isize
    }

    #[inline]
    fn exp(self) -> T {
        T::exp(self)
    }

    #[inline]
    fn ln(self) -> T {
        T::ln(self)
    }

    #[inline]
    fn sqrt(self) -> T {
        T::sqrt(self)
    }

    #[inline]
    fn tanh(self) -> T {
        T::tanh(self)
    }

    #[inline]
    fn sin(self) -> T {
        T::sin(self)
    }

    #[inline]
    fn cos(self) -> T {
        T::cos(self)
    }

    #[inline]
    fn tan(self) -> T {
        T::tan(self)
    }

    #[inline]
    fn sinh(self) -> T {
        T::sinh(self)
    }

    #[inline]
    fn cosh(self) -> T {
        T::cosh(self)
    }

    #[inline]
    fn powf(self, exponent: T) -> T {
        T::powf(self, exponent)
    }

    fn gemm(layout: &GemmLayout, alpha: T, lhs: &[T], rhs: &[T], beta: T, result: &mut [T]) {
        let GemmLayout { m, n, k, .. } = *layout;
        if m == 0 || n == 0 {
            return;
        }
        if k == 0 {
            scale_by_beta(beta, &mut result[..m * n]);
            return;
        }

        unsafe {
            placeholder(
                cblas::Layout::RowMajor,
                GemmLayout::blas_transpose(layout.transpose_lhs),
                GemmLayout::blas_transpose(layout.transpose_rhs),
                m as i32,
                n as i32,
                k as i32,
                alpha,
                lhs,
                layout.lhs_leading_dim() as i32,
                rhs,
                layout.rhs_leading_dim() as i32,
                beta,
                result,
                n as i32,
            );
        }
    }
}

#[expand_impl(
    _i32<T=i32>,
    _i64<T=i64>,
)]
impl<T> Numeric for T {
    const ZERO: T = 0;
    const ONE: T = 1;

    #[inline]
    fn from_f64(value: f64) -> T {
        value as T
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn to_isize(self) -> isize {
        self as isize
    }

    fn exp(self) -> T {
        Self::from_f64(self.to_f64().exp())
    }

    fn ln(self) -> T {
        Self::from_f64(self.to_f64().ln())
    }

    fn sqrt(self) -> T {
        Self::from_f64(self.to_f64().sqrt())
    }

    fn tanh(self) -> T {
        Self::from_f64(self.to_f64().tanh())
    }

    fn sin(self) -> T {
        Self::from_f64(self.to_f64().sin())
    }

    fn cos(self) -> T {
        Self::from_f64(self.to_f64().cos())
    }

    fn tan(self) -> T {
        Self::from_f64(self.to_f64().tan())
    }

    fn sinh(self) -> T {
        Self::from_f64(self.to_f64().sinh())
    }

    fn cosh(self) -> T {
        Self::from_f64(self.to_f64().cosh())
    }

    fn powf(self, exponent: T) -> T {
        Self::from_f64(self.to_f64().powf(exponent.to_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive<N: Numeric>(layout: &GemmLayout, lhs: &[N], rhs: &[N]) -> Vec<N> {
        let mut out = vec![N::ZERO; layout.m * layout.n];
        for i in 0..layout.m {
            for j in 0..layout.n {
                for p in 0..layout.k {
                    out[i * layout.n + j] += layout.lhs_at(lhs, i, p) * layout.rhs_at(rhs, p, j);
                }
            }
        }
        out
    }

    #[test]
    fn identities() {
        assert_eq!(<f32 as Numeric>::ZERO, 0.0);
        assert_eq!(<f64 as Numeric>::ONE, 1.0);
        assert_eq!(<i32 as Numeric>::ONE, 1);
        assert_eq!(<i64 as Numeric>::from_f64(2.7), 2);
    }

    #[test]
    fn blas_matches_naive() {
        let lhs: Vec<f64> = (0..6).map(|x| x as f64).collect();
        let rhs: Vec<f64> = (0..12).map(|x| x as f64 * 0.5).collect();
        for &(transpose_lhs, transpose_rhs) in &[(false, false), (true, false), (false, true), (true, true)] {
            let layout = GemmLayout { m: 2, n: 4, k: 3, transpose_lhs, transpose_rhs };
            let mut out = vec![0.0; 8];
            f64::gemm(&layout, 1.0, &lhs, &rhs, 0.0, &mut out);
            assert_eq!(out, naive(&layout, &lhs, &rhs));
        }
    }

    #[test]
    fn integer_gemm_alpha_beta() {
        let layout = GemmLayout { m: 2, n: 2, k: 2, transpose_lhs: false, transpose_rhs: false };
        let mut out = vec![1, 1, 1, 1];
        i32::gemm(&layout, 2, &[1, 2, 3, 4], &[1, 0, 0, 1], 3, &mut out);
        assert_eq!(out, vec![5, 7, 9, 11]);
    }

    #[test]
    fn empty_inner_dimension_scales() {
        let layout = GemmLayout { m: 1, n: 2, k: 0, transpose_lhs: false, transpose_rhs: false };
        let mut out = vec![3.0f32, 4.0];
        f32::gemm(&layout, 1.0, &[], &[], 2.0, &mut out);
        assert_eq!(out, vec![6.0, 8.0]);
    }
}
