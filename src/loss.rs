//! Loss functions composed from differentiable tensor operations.
//!
//! Every loss returns a scalar tensor so that it can be passed directly to
//! `gradients`.

use crate::device::Device;
use crate::engine::DEFAULT_IGNORE_INDEX;
use crate::numeric::Numeric;
use crate::tensor::Tensor;

/// Mean binary cross entropy between the `expected` labels and the
/// `actual` probabilities, which must lie in `(0, 1)`.
pub fn binary_cross_entropy<N: Numeric, D: Device>(expected: &Tensor<N, D>, actual: &Tensor<N, D>) -> Tensor<N, D> {
    assert_eq!(
        expected.count(),
        actual.count(),
        "Cannot compare {:?} labels with {:?} predictions.",
        expected.shape(),
        actual.shape()
    );
    let (expected, actual) = (expected.flattened(), actual.flattened());
    let positive = &expected * &actual.log();
    let negative = &expected.subtracted_from(N::ONE) * &actual.subtracted_from(N::ONE).log();
    -(&positive + &negative).mean_all()
}

/// Cross entropy between integer class labels of shape `[batch]` and
/// probabilities of shape `[batch, classes]`.
///
/// Labels equal to `-1` are ignored and do not count towards the mean. A
/// batch without any valid label has a loss of zero.
pub fn categorical_cross_entropy<N: Numeric, D: Device>(expected: &Tensor<i32, D>, actual: &Tensor<N, D>) -> Tensor<N, D> {
    assert!(
        actual.dim() == 2 && expected.shape() == &actual.shape()[..1],
        "Expected labels of shape [batch] and probabilities of shape [batch, classes], got {:?} and {:?}.",
        expected.shape(),
        actual.shape()
    );
    let valid: Vec<N> = expected
        .elements()
        .into_iter()
        .map(|label| if label == DEFAULT_IGNORE_INDEX { N::ZERO } else { N::ONE })
        .collect();
    let count = valid.iter().filter(|&&weight| weight == N::ONE).count();
    if count == 0 {
        return Tensor::scalar(N::ZERO);
    }
    let mask: Tensor<N, D> = Tensor::new(&valid, expected.shape(), false);

    // ignored rows gather a zero, shifting them to one keeps the log finite
    let picked = &actual.gather(expected, 1, DEFAULT_IGNORE_INDEX) + &mask.subtracted_from(N::ONE);
    let total = (&picked.log() * &mask).sum_all();
    -(&total / N::from_usize(count))
}

/// Squared error summed over all elements and averaged over the leading
/// batch axis. Rank 1 inputs are treated as a single sample.
pub fn mean_squared_error<N: Numeric, D: Device>(expected: &Tensor<N, D>, actual: &Tensor<N, D>) -> Tensor<N, D> {
    let difference = expected - actual;
    let batch = if actual.dim() > 1 { actual.shape()[0] } else { 1 };
    &difference.square().sum_all() / N::from_usize(batch)
}

/// Mean absolute value of the elements scaled by `factor`, used as a
/// weight regularizer.
pub fn l1_loss<N: Numeric, D: Device>(values: &Tensor<N, D>, factor: N) -> Tensor<N, D> {
    &values.leaky_relu(-N::ONE).mean_all() * factor
}

/// Mean square of the elements scaled by `factor`.
pub fn l2_loss<N: Numeric, D: Device>(values: &Tensor<N, D>, factor: N) -> Tensor<N, D> {
    &values.square().mean_all() * factor
}
