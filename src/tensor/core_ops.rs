//! `core_ops` contains the elementwise operations of tensors: broadcasting
//! arithmetic, scalar arithmetic and activation functions.
//!
//! Every operation is functional. It borrows its operands, allocates a
//! result and, when one of the operands requires gradients, attaches a
//! `Context` holding the operands and one backward function per operand.
//! Backward functions are written with tensor operations themselves, so
//! the gradients they produce can be differentiated again when the graph
//! is retained.
//!
//! Binary operations broadcast their operands following the usual trailing
//! dimension alignment. The backward function of an operand sums the
//! incoming gradient over the axes it was broadcast along so that the
//! contribution always has the operand's own shape.
//!
//! Operators are implemented for every combination of owned and borrowed
//! tensors as well as for scalars on either side. Scalars on the left are
//! only available for the concrete element types, the impls are stamped
//! out by the `expand_impl` procedural macro.

use super::tensor::{Tensor, Values};
use crate::backprop::Context;
use crate::device::Device;
use crate::engine::{broadcast_shape, ComputeBackend};
use crate::numeric::Numeric;
use std::ops::*;
use tapegrad_macros::expand_impl;

impl<N: Numeric, D: Device> Tensor<N, D> {
    pub(crate) fn unary_op<F, B>(&self, tag: &'static str, kernel: F, backward: B) -> Self
    where
        F: FnOnce(&Values<N, D>, &Values<N, D>),
        B: Fn(&Self, &Self) -> Self + 'static,
    {
        let result = Self::allocate(&self.shape);
        kernel(&self.values(), &result);

        let context = self.requires_gradient.then(|| {
            let source = self.clone();
            Context::unary(tag, self, move |grad| backward(grad, &source))
        });
        Self::from_values(result, context)
    }

    pub(crate) fn binary_op<F, L, R>(&self, other: &Self, tag: &'static str, kernel: F, lhs_backward: L, rhs_backward: R) -> Self
    where
        F: FnOnce(&Values<N, D>, &Values<N, D>, &Values<N, D>),
        L: Fn(&Self, &Self, &Self) -> Self + 'static,
        R: Fn(&Self, &Self, &Self) -> Self + 'static,
    {
        let shape = broadcast_shape(&self.shape, &other.shape);
        let result = Self::allocate(&shape);
        kernel(&self.values(), &other.values(), &result);

        let context = (self.requires_gradient || other.requires_gradient).then(|| {
            let (lhs, rhs) = (self.clone(), other.clone());
            let (lhs_, rhs_) = (self.clone(), other.clone());
            Context::binary(
                tag,
                self,
                other,
                move |grad| lhs_backward(grad, &lhs, &rhs).summed_to_shape(&lhs.shape),
                move |grad| rhs_backward(grad, &lhs_, &rhs_).summed_to_shape(&rhs_.shape),
            )
        });
        Self::from_values(result, context)
    }

    /// `self * scale + other` in a single pass. Both tensors must have the
    /// same shape.
    pub fn scaled_add(&self, scale: N, other: &Self) -> Self {
        self.assert_same_shape(other);
        self.binary_op(
            other,
            "scaled_add",
            |lhs, rhs, result| D::Engine::scaled_add(lhs, scale, rhs, result),
            move |grad, _, _| grad * scale,
            |grad, _, _| grad.clone(),
        )
    }

    /// `value - self`
    pub(crate) fn subtracted_from(&self, value: N) -> Self {
        &(-self) + value
    }

    /// `value / self`
    pub(crate) fn divided_into(&self, value: N) -> Self {
        self.unary_op(
            "rdiv_scalar",
            |values, result| D::Engine::scalar_rdiv(value, values, result),
            move |grad, x| -(&(grad * value) / &x.square()),
        )
    }

    pub fn exp(&self) -> Self {
        self.unary_op("exp", D::Engine::exp, |grad, x| grad * &x.exp())
    }

    pub fn log(&self) -> Self {
        self.unary_op("log", D::Engine::log, |grad, x| grad / x)
    }

    pub fn sqrt(&self) -> Self {
        self.unary_op("sqrt", D::Engine::sqrt, |grad, x| grad / &(&x.sqrt() * N::from_f64(2.0)))
    }

    pub fn square(&self) -> Self {
        self.unary_op("square", D::Engine::square, |grad, x| grad * &(x * N::from_f64(2.0)))
    }

    /// Raises every element to `exponent`.
    pub fn raised(&self, exponent: N) -> Self {
        self.unary_op(
            "pow",
            |values, result| D::Engine::pow(values, exponent, result),
            move |grad, x| grad * &(&x.raised(exponent - N::ONE) * exponent),
        )
    }

    pub fn relu(&self) -> Self {
        self.unary_op("relu", D::Engine::relu, |grad, x| grad * &x.heaviside())
    }

    /// `max(self, leakage * self)`, with `leakage` expected below one.
    pub fn leaky_relu(&self, leakage: N) -> Self {
        self.max_elementwise(&(self * leakage))
    }

    /// Step function. Its gradient is zero everywhere.
    pub fn heaviside(&self) -> Self {
        self.unary_op("heaviside", D::Engine::heaviside, |grad, _| Tensor::zeros(&grad.shape))
    }

    /// Logistic function, computed as `0.5 * tanh(0.5 * x) + 0.5` to stay
    /// stable for large magnitudes.
    pub fn sigmoid(&self) -> Self {
        let half = N::from_f64(0.5);
        &(&(self * half).tanh() * half) + half
    }

    pub fn tanh(&self) -> Self {
        self.unary_op("tanh", D::Engine::tanh, |grad, x| grad * &x.tanh().square().subtracted_from(N::ONE))
    }

    pub fn sin(&self) -> Self {
        self.unary_op("sin", D::Engine::sin, |grad, x| grad * &x.cos())
    }

    pub fn cos(&self) -> Self {
        self.unary_op("cos", D::Engine::cos, |grad, x| -&(grad * &x.sin()))
    }

    pub fn tan(&self) -> Self {
        self.unary_op("tan", D::Engine::tan, |grad, x| grad / &x.cos().square())
    }

    pub fn sinh(&self) -> Self {
        self.unary_op("sinh", D::Engine::sinh, |grad, x| grad * &x.cosh())
    }

    pub fn cosh(&self) -> Self {
        self.unary_op("cosh", D::Engine::cosh, |grad, x| grad * &x.sinh())
    }

    /// Elementwise maximum of two tensors of the same shape. Ties route the
    /// gradient to `self`.
    pub fn max_elementwise(&self, other: &Self) -> Self {
        self.select_elementwise(other, "max", D::Engine::max)
    }

    /// Elementwise minimum of two tensors of the same shape. Ties route the
    /// gradient to `self`.
    pub fn min_elementwise(&self, other: &Self) -> Self {
        self.select_elementwise(other, "min", D::Engine::min)
    }

    fn select_elementwise<F>(&self, other: &Self, tag: &'static str, kernel: F) -> Self
    where
        F: FnOnce(&Values<N, D>, &Values<N, D>, &Values<N, D>, Option<&Values<N, D>>),
    {
        self.assert_same_shape(other);
        let result = Self::allocate(&self.shape);
        let mask = Self::allocate(&self.shape);
        kernel(&self.values(), &other.values(), &result, Some(&mask));

        let context = (self.requires_gradient || other.requires_gradient).then(|| {
            let mask = Tensor::leaf(mask, false);
            let inverse = mask.subtracted_from(N::ONE);
            Context::binary(tag, self, other, move |grad| grad * &mask, move |grad| grad * &inverse)
        });
        Self::from_values(result, context)
    }

    /// Softmax along `axis`. The maximum is subtracted first and treated
    /// as a constant.
    pub fn softmax(&self, axis: usize) -> Self {
        let exponentials = self.shifted_by_max(axis).exp();
        &exponentials / &exponentials.sum(&[axis]).unsqueezed(axis)
    }

    pub fn log_softmax(&self, axis: usize) -> Self {
        let shifted = self.shifted_by_max(axis);
        let normalizer = shifted.exp().sum(&[axis]).unsqueezed(axis).log();
        &shifted - &normalizer
    }

    fn shifted_by_max(&self, axis: usize) -> Self {
        self - &self.detached().max(&[axis]).unsqueezed(axis)
    }
}

impl<'a, 'b, N: Numeric, D: Device> Add<&'b Tensor<N, D>> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn add(self, rhs: &'b Tensor<N, D>) -> Tensor<N, D> {
        self.binary_op(
            rhs,
            "add",
            D::Engine::broadcast_add,
            |grad, _, _| grad.clone(),
            |grad, _, _| grad.clone(),
        )
    }
}

impl<'a, 'b, N: Numeric, D: Device> Sub<&'b Tensor<N, D>> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn sub(self, rhs: &'b Tensor<N, D>) -> Tensor<N, D> {
        self.binary_op(rhs, "sub", D::Engine::broadcast_sub, |grad, _, _| grad.clone(), |grad, _, _| -grad)
    }
}

impl<'a, 'b, N: Numeric, D: Device> Mul<&'b Tensor<N, D>> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn mul(self, rhs: &'b Tensor<N, D>) -> Tensor<N, D> {
        self.binary_op(rhs, "mul", D::Engine::broadcast_mul, |grad, _, rhs| grad * rhs, |grad, lhs, _| grad * lhs)
    }
}

impl<'a, 'b, N: Numeric, D: Device> Div<&'b Tensor<N, D>> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn div(self, rhs: &'b Tensor<N, D>) -> Tensor<N, D> {
        self.binary_op(
            rhs,
            "div",
            D::Engine::broadcast_div,
            |grad, _, rhs| grad / rhs,
            |grad, lhs, rhs| -&(&(grad * lhs) / &rhs.square()),
        )
    }
}

impl<'a, N: Numeric, D: Device> Neg for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn neg(self) -> Tensor<N, D> {
        self.unary_op("neg", D::Engine::neg, |grad, _| -grad)
    }
}

impl<N: Numeric, D: Device> Neg for Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn neg(self) -> Tensor<N, D> {
        -&self
    }
}

impl<'a, N: Numeric, D: Device> Add<N> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn add(self, rhs: N) -> Tensor<N, D> {
        self.unary_op(
            "add_scalar",
            |values, result| D::Engine::scalar_add(values, rhs, result),
            |grad, _| grad.clone(),
        )
    }
}

impl<'a, N: Numeric, D: Device> Sub<N> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn sub(self, rhs: N) -> Tensor<N, D> {
        self + (-rhs)
    }
}

impl<'a, N: Numeric, D: Device> Mul<N> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn mul(self, rhs: N) -> Tensor<N, D> {
        self.unary_op(
            "mul_scalar",
            |values, result| D::Engine::scalar_mul(values, rhs, result),
            move |grad, _| grad * rhs,
        )
    }
}

impl<'a, N: Numeric, D: Device> Div<N> for &'a Tensor<N, D> {
    type Output = Tensor<N, D>;

    fn div(self, rhs: N) -> Tensor<N, D> {
        self / &Tensor::scalar(rhs)
    }
}

macro_rules! forward_operator {
    ($operator:ident, $method:ident) => {
        impl<N: Numeric, D: Device> $operator<Tensor<N, D>> for Tensor<N, D> {
            type Output = Tensor<N, D>;

            fn $method(self, rhs: Tensor<N, D>) -> Tensor<N, D> {
                (&self).$method(&rhs)
            }
        }

        impl<'a, N: Numeric, D: Device> $operator<&'a Tensor<N, D>> for Tensor<N, D> {
            type Output = Tensor<N, D>;

            fn $method(self, rhs: &'a Tensor<N, D>) -> Tensor<N, D> {
                (&self).$method(rhs)
            }
        }

        impl<'a, N: Numeric, D: Device> $operator<Tensor<N, D>> for &'a Tensor<N, D> {
            type Output = Tensor<N, D>;

            fn $method(self, rhs: Tensor<N, D>) -> Tensor<N, D> {
                self.$method(&rhs)
            }
        }

        impl<N: Numeric, D: Device> $operator<N> for Tensor<N, D> {
            type Output = Tensor<N, D>;

            fn $method(self, rhs: N) -> Tensor<N, D> {
                (&self).$method(rhs)
            }
        }
    };
}

forward_operator!(Add, add);
forward_operator!(Sub, sub);
forward_operator!(Mul, mul);
forward_operator!(Div, div);

#[expand_impl(
    _f32<T=f32>,
    _f64<T=f64>,
    _i32<T=i32>,
    _i64<T=i64>,
)]
impl<'a, T, D: Device> Add<&'a Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn add(self, rhs: &'a Tensor<T, D>) -> Tensor<T, D> {
        rhs + self
    }
}

#[expand_impl(
    _f32<T=f32>,
    _f64<T=f64>,
    _i32<T=i32>,
    _i64<T=i64>,
)]
impl<'a, T, D: Device> Sub<&'a Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn sub(self, rhs: &'a Tensor<T, D>) -> Tensor<T, D> {
        rhs.subtracted_from(self)
    }
}

#[expand_impl(
    _f32<T=f32>,
    _f64<T=f64>,
    _i32<T=i32>,
    _i64<T=i64>,
)]
impl<'a, T, D: Device> Mul<&'a Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn mul(self, rhs: &'a Tensor<T, D>) -> Tensor<T, D> {
        rhs * self
    }
}

#[expand_impl(
    _f32<T=f32>,
    _f64<T=f64>,
    _i32<T=i32>,
    _i64<T=i64>,
)]
impl<'a, T, D: Device> Div<&'a Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn div(self, rhs: &'a Tensor<T, D>) -> Tensor<T, D> {
        rhs.divided_into(self)
    }
}

#[expand_impl(
    add<T=f32>,
    add<T=f64>,
    add<T=i32>,
    add<T=i64>,
)]
impl<T, D: Device> Add<Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn add(self, rhs: Tensor<T, D>) -> Tensor<T, D> {
        self.placeholder(&rhs)
    }
}

#[expand_impl(
    sub<T=f32>,
    sub<T=f64>,
    sub<T=i32>,
    sub<T=i64>,
)]
impl<T, D: Device> Sub<Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn sub(self, rhs: Tensor<T, D>) -> Tensor<T, D> {
        self.placeholder(&rhs)
    }
}

#[expand_impl(
    mul<T=f32>,
    mul<T=f64>,
    mul<T=i32>,
    mul<T=i64>,
)]
impl<T, D: Device> Mul<Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn mul(self, rhs: Tensor<T, D>) -> Tensor<T, D> {
        self.placeholder(&rhs)
    }
}

#[expand_impl(
    div<T=f32>,
    div<T=f64>,
    div<T=i32>,
    div<T=i64>,
)]
impl<T, D: Device> Div<Tensor<T, D>> for T {
    type Output = Tensor<T, D>;

    fn div(self, rhs: Tensor<T, D>) -> Tensor<T, D> {
        self.placeholder(&rhs)
    }
}
