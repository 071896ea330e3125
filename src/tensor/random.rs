//! Random initialization of parameters.
//!
//! Every initializer has a variant taking the random number generator,
//! for reproducible initialization with a seeded `StdRng`.

use super::tensor::Tensor;
use crate::device::Device;
use crate::memory::element_count;
use crate::numeric::Numeric;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::Normal;
use std::ops::Range;

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Values drawn uniformly from `range`.
    pub fn uniform(range: Range<f64>, shape: &[usize], requires_gradient: bool) -> Self {
        Self::uniform_with(&mut rand::thread_rng(), range, shape, requires_gradient)
    }

    pub fn uniform_with<R: Rng + ?Sized>(rng: &mut R, range: Range<f64>, shape: &[usize], requires_gradient: bool) -> Self {
        assert!(range.start < range.end, "Cannot sample from the empty range {:?}.", range);
        let distribution = Uniform::new(range.start, range.end);
        Self::sampled(rng, &distribution, shape, requires_gradient)
    }

    /// Values drawn from a normal distribution.
    pub fn normal(mean: f64, std_dev: f64, shape: &[usize], requires_gradient: bool) -> Self {
        Self::normal_with(&mut rand::thread_rng(), mean, std_dev, shape, requires_gradient)
    }

    pub fn normal_with<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64, shape: &[usize], requires_gradient: bool) -> Self {
        let distribution = match Normal::new(mean, std_dev) {
            Ok(distribution) => distribution,
            Err(error) => panic!("Invalid normal distribution with mean {} and deviation {}: {}.", mean, std_dev, error),
        };
        Self::sampled(rng, &distribution, shape, requires_gradient)
    }

    /// Glorot uniform initialization of a weight tensor. The first axis is
    /// the fan out, the remaining axes make up the fan in, except for rank
    /// 2 tensors which are laid out `[inputs, outputs]`.
    pub fn xavier(shape: &[usize], requires_gradient: bool) -> Self {
        Self::xavier_with(&mut rand::thread_rng(), shape, requires_gradient)
    }

    pub fn xavier_with<R: Rng + ?Sized>(rng: &mut R, shape: &[usize], requires_gradient: bool) -> Self {
        let (fan_in, fan_out) = fans(shape);
        let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        Self::uniform_with(rng, -limit..limit, shape, requires_gradient)
    }

    fn sampled<R, S>(rng: &mut R, distribution: &S, shape: &[usize], requires_gradient: bool) -> Self
    where
        R: Rng + ?Sized,
        S: Distribution<f64>,
    {
        let values: Vec<N> = (0..element_count(shape))
            .map(|_| N::from_f64(distribution.sample(rng)))
            .collect();
        Tensor::new(&values, shape, requires_gradient)
    }
}

fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [inputs, outputs] => (*inputs, *outputs),
        [out_channels, rest @ ..] => {
            let receptive: usize = rest[1..].iter().product();
            (rest[0] * receptive, out_channels * receptive)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn seeded_initializers_are_reproducible() {
        let a: Tensor<f32> = Tensor::uniform_with(&mut StdRng::seed_from_u64(7), -1.0..1.0, &[16], true);
        let b: Tensor<f32> = Tensor::uniform_with(&mut StdRng::seed_from_u64(7), -1.0..1.0, &[16], true);
        assert_eq!(a.elements(), b.elements());
        assert!(a.requires_gradient());
        assert!(a.elements().iter().all(|&x| (-1.0..1.0).contains(&x)));
    }

    #[test]
    fn normal_statistics() {
        let x: Tensor<f64> = Tensor::normal_with(&mut StdRng::seed_from_u64(1), 2.0, 0.5, &[10_000], false);
        let mean = x.mean_all().item();
        let std = x.variance(&[0]).item().sqrt();
        assert!((mean - 2.0).abs() < 0.05, "mean {}", mean);
        assert!((std - 0.5).abs() < 0.05, "std {}", std);
    }

    #[test]
    fn xavier_limits() {
        assert_eq!(fans(&[8, 4]), (8, 4));
        assert_eq!(fans(&[16, 3, 5, 5]), (75, 400));
        let w: Tensor<f64> = Tensor::xavier_with(&mut StdRng::seed_from_u64(3), &[8, 4], true);
        let limit = (6.0f64 / 12.0).sqrt();
        assert!(w.elements().iter().all(|x| x.abs() < limit));
    }
}
