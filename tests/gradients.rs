use approx::assert_abs_diff_eq;
use tapegrad::prelude::*;

/// Central finite differences of a scalar function of one tensor.
fn numeric_gradient<F>(f: F, point: &Tensor<f64>, eps: f64) -> Vec<f64>
where
    F: Fn(&Tensor<f64>) -> Tensor<f64>,
{
    let mut perturbed = point.elements();
    (0..perturbed.len())
        .map(|i| {
            let original = perturbed[i];
            perturbed[i] = original + eps;
            let plus = f(&Tensor::new(&perturbed, point.shape(), false)).item();
            perturbed[i] = original - eps;
            let minus = f(&Tensor::new(&perturbed, point.shape(), false)).item();
            perturbed[i] = original;
            (plus - minus) / (2.0 * eps)
        })
        .collect()
}

fn assert_matches_numeric<F>(f: F, point: &Tensor<f64>)
where
    F: Fn(&Tensor<f64>) -> Tensor<f64>,
{
    let analytic = f(point).gradients(&[point], false).remove(0);
    assert_eq!(analytic.shape(), point.shape());
    let numeric = numeric_gradient(&f, point, 1e-6);
    for (a, n) in analytic.elements().into_iter().zip(numeric) {
        assert_abs_diff_eq!(a, n, epsilon = 1e-5);
    }
}

fn sample(shape: &[usize], seed: u64) -> Tensor<f64> {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    Tensor::uniform_with(&mut rng, -1.0..1.0, shape, true)
}

#[test]
fn fan_out_matches_closed_form() {
    let a: Tensor<f64> = Tensor::new(&[1.0, -2.0, 0.5, 3.0], &[4], true);
    let b: Tensor<f64> = Tensor::new(&[4.0, 1.0, -1.5, 0.0], &[4], true);
    let d = &(&a + &b) * &a;
    let grads = d.sum_all().gradients(&[&a, &b], false);

    let expected: Vec<f64> = a.elements().iter().zip(b.elements()).map(|(a, b)| 2.0 * a + b).collect();
    assert_eq!(grads[0].elements(), expected);
    assert_eq!(grads[1].elements(), a.elements());
}

#[test]
fn diamond_accumulates_both_paths() {
    let a: Tensor<f64> = Tensor::new(&[3.0], &[1], true);
    let b = &a * 2.0;
    let c = &a + &b;
    let grad = c.sum_all().gradients(&[&a], false).remove(0);
    assert_eq!(grad.elements(), vec![3.0]);
}

#[test]
fn unreachable_target_gets_zeros() {
    let a: Tensor<f32> = Tensor::new(&[1.0, 2.0], &[2], true);
    let unrelated: Tensor<f32> = Tensor::new(&[5.0, 6.0, 7.0], &[3], true);
    let grads = a.square().sum_all().gradients_with(
        &[&a, &unrelated],
        GradientOptions {
            retain_graph: false,
            warn_on_missing: true,
        },
    );
    assert_eq!(grads[0].elements(), vec![2.0, 4.0]);
    assert_eq!(grads[1].shape(), &[3]);
    assert_eq!(grads[1].elements(), vec![0.0; 3]);
}

#[test]
fn detached_values_stop_the_gradient() {
    let a: Tensor<f64> = Tensor::new(&[2.0], &[1], true);
    let stopped = a.detached();
    assert!(!stopped.requires_gradient());
    let y = (&a * &stopped).sum_all();
    assert_eq!(y.gradients(&[&a], false)[0].elements(), vec![2.0]);
}

#[test]
fn detached_shares_values_until_written() {
    let x: Tensor<f64> = Tensor::new(&[1.0, 2.0, 3.0], &[3], true);
    let t = x.exp();
    let mut stopped = t.detached();
    assert!(stopped.context().is_none());
    assert!(stopped.is_storage_shared());
    assert_eq!(stopped.elements(), t.elements());

    stopped.set_values(&[0.0, 0.0, 0.0]);
    assert!(!stopped.is_storage_shared());
    assert_eq!(stopped.elements(), vec![0.0; 3]);
    assert_eq!(t.elements(), vec![1f64.exp(), 2f64.exp(), 3f64.exp()]);
    assert!(t.context().is_some());
}

#[test]
fn clones_do_not_see_writes() {
    let original: Tensor<i32> = Tensor::new(&[1, 2, 3], &[3], false);
    let mut copy = original.clone();
    assert!(copy.is_storage_shared());
    copy.set_values(&[4, 5, 6]);
    assert_eq!(original.elements(), vec![1, 2, 3]);
    assert_eq!(copy.elements(), vec![4, 5, 6]);
    assert!(!copy.is_storage_shared());
}

#[test]
fn deep_chains_backpropagate_without_recursion() {
    let x: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[2], true);
    let mut y = x.clone();
    for _ in 0..100_000 {
        y = &y + 0.5;
    }
    assert_eq!(y.elements(), vec![50_001.0, 50_002.0]);
    let grad = y.sum_all().gradients(&[&x], false).remove(0);
    assert_eq!(grad.elements(), vec![1.0, 1.0]);
}

#[test]
fn deep_chains_are_dropped_without_recursion() {
    let x: Tensor<f32> = Tensor::new(&[0.0], &[1], true);
    let mut y = x.clone();
    for _ in 0..100_000 {
        y = &y + 1.0;
    }
    assert_eq!(y.item(), 100_000.0);
    drop(y);
}

#[test]
fn long_chains_backpropagate() {
    let x: Tensor<f64> = Tensor::new(&[1.0], &[1], true);
    let mut y = x.clone();
    for _ in 0..10_000 {
        y = &y * 1.0001;
    }
    let grad = y.sum_all().gradients(&[&x], false).remove(0);
    assert_abs_diff_eq!(grad.item(), 1.0001f64.powi(10_000), epsilon = 1e-6);
}

#[test]
fn matmul_matches_finite_differences() {
    let weights = sample(&[3, 2], 1).detached();
    assert_matches_numeric(|x| x.matmul(&weights).tanh().sum_all(), &sample(&[4, 3], 2));
    let inputs = sample(&[4, 3], 3).detached();
    assert_matches_numeric(|w| inputs.matmul_transposed(w, false, true).sigmoid().sum_all(), &sample(&[2, 3], 4));
}

#[test]
fn convolution_matches_finite_differences() {
    let filters = sample(&[2, 2, 3, 3], 5).detached();
    let weights = sample(&[1, 2, 3, 3], 6).detached();
    assert_matches_numeric(
        |x| (&x.convolved_2d(&filters, 1, 1) * &weights).sum_all(),
        &sample(&[1, 2, 3, 3], 7),
    );
    let image = sample(&[1, 2, 4, 4], 8).detached();
    assert_matches_numeric(
        |f| image.convolved_2d(f, 0, 1).square().mean_all(),
        &sample(&[2, 2, 3, 3], 9),
    );
}

#[test]
fn signal_convolution_matches_finite_differences() {
    let filters = sample(&[3, 2, 3], 20).detached();
    let weights = sample(&[2, 3, 4], 21).detached();
    assert_matches_numeric(
        |x| (&x.convolved_1d(&filters, 1, 2) * &weights).sum_all(),
        &sample(&[2, 2, 7], 22),
    );
    let signal = sample(&[2, 2, 6], 23).detached();
    assert_matches_numeric(|f| signal.convolved_1d(f, 0, 1).square().mean_all(), &sample(&[3, 2, 3], 24));
}

#[test]
fn transposed_convolution_matches_finite_differences() {
    let filters = sample(&[3, 2, 3, 3], 25).detached();
    let weights = sample(&[1, 3, 5, 5], 26).detached();
    assert_matches_numeric(
        |x| (&x.transposed_convolved_2d(&filters, 1, 2) * &weights).sum_all(),
        &sample(&[1, 2, 3, 3], 27),
    );
    let image = sample(&[2, 2, 2, 2], 28).detached();
    assert_matches_numeric(
        |f| image.transposed_convolved_2d(f, 0, 1).square().mean_all(),
        &sample(&[3, 2, 2, 2], 29),
    );
}

#[test]
fn padding_matches_finite_differences() {
    assert_matches_numeric(
        |x| x.padded(1.5, &[(1, 0), (2, 1)]).tanh().square().sum_all(),
        &sample(&[2, 3], 30),
    );
}

#[test]
fn softmax_matches_finite_differences() {
    let weights = sample(&[3, 4], 10).detached();
    assert_matches_numeric(|x| (&x.softmax(1) * &weights).sum_all(), &sample(&[3, 4], 11));
    assert_matches_numeric(|x| (&x.log_softmax(0) * &weights).sum_all(), &sample(&[3, 4], 12));
}

#[test]
fn pooling_and_reductions_match_finite_differences() {
    assert_matches_numeric(|x| x.avg_pooled_2d(2, 2, 0).square().sum_all(), &sample(&[1, 1, 4, 4], 13));
    assert_matches_numeric(|x| x.variance(&[1]).sum_all(), &sample(&[3, 5], 14));
    assert_matches_numeric(|x| x.max(&[0]).exp().sum_all(), &sample(&[4, 3], 15));
}

#[test]
fn discarded_clone_is_a_separate_node() {
    let x: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[2], true);
    let a = &x * 3.0;
    let mut b = a.clone();
    b.discard_context();

    let grad = (&a + &b).sum_all().gradients(&[&x], false).remove(0);
    assert_eq!(grad.elements(), vec![3.0, 3.0]);
    let grad = (&b + &a).sum_all().gradients(&[&x], false).remove(0);
    assert_eq!(grad.elements(), vec![3.0, 3.0]);

    let grads = (&a * &b).sum_all().gradients(&[&a, &b], false);
    assert_eq!(grads[0].elements(), vec![3.0, 6.0]);
    assert_eq!(grads[1].elements(), vec![3.0, 6.0]);
}
