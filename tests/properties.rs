use proptest::prelude::*;
use tapegrad::prelude::*;

fn shape_and_broadcast() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..4, 1..4).prop_flat_map(|source| {
        let rank = source.len();
        (Just(source), prop::collection::vec(1usize..4, 0..3), prop::collection::vec(any::<bool>(), rank))
            .prop_map(|(source, leading, collapse)| {
                let target: Vec<usize> = leading.into_iter().chain(source.iter().copied()).collect();
                let source: Vec<usize> = source
                    .into_iter()
                    .zip(collapse)
                    .map(|(dim, collapse)| if collapse { 1 } else { dim })
                    .collect();
                (source, target)
            })
    })
}

proptest! {
    #[test]
    fn broadcast_gradient_has_source_shape((source, target) in shape_and_broadcast()) {
        let count: usize = source.iter().product();
        let values: Vec<f64> = (0..count).map(|i| i as f64).collect();
        let x: Tensor<f64> = Tensor::new(&values, &source, true);

        let wide = x.broadcast_to(&target);
        prop_assert_eq!(wide.shape(), &target[..]);

        let grad = wide.sum_all().gradients(&[&x], false).remove(0);
        prop_assert_eq!(grad.shape(), &source[..]);
        let repeats = (target.iter().product::<usize>() / count) as f64;
        prop_assert!(grad.elements().iter().all(|&g| g == repeats));
    }

    #[test]
    fn summing_added_axes_inverts_broadcast(
        source in prop::collection::vec(1usize..4, 1..3),
        leading in prop::collection::vec(1usize..4, 1..3),
    ) {
        let count: usize = source.iter().product();
        let values: Vec<f64> = (0..count).map(|i| i as f64 - 2.0).collect();
        let x: Tensor<f64> = Tensor::new(&values, &source, false);
        let target: Vec<usize> = leading.iter().chain(&source).copied().collect();
        let added: Vec<usize> = (0..leading.len()).collect();
        let repeats = leading.iter().product::<usize>() as f64;

        let summed = x.broadcast_to(&target).sum(&added);
        prop_assert_eq!(summed.shape(), &source[..]);
        let expected: Vec<f64> = values.iter().map(|v| v * repeats).collect();
        prop_assert_eq!(summed.elements(), expected);
        prop_assert_eq!(x.broadcast_to(&target).mean(&added).elements(), values);
    }

    #[test]
    fn reshape_preserves_elements(values in prop::collection::vec(-100i32..100, 12)) {
        let x: Tensor<i32> = Tensor::new(&values, &[3, 4], false);
        prop_assert_eq!(x.view(&[2, -1, 3]).elements(), values.clone());
        prop_assert_eq!(x.permuted(&[1, 0]).permuted(&[1, 0]).elements(), values);
    }

    #[test]
    fn sum_of_gradients_is_linear(values in prop::collection::vec(-10.0f64..10.0, 6), scale in -5.0f64..5.0) {
        let x: Tensor<f64> = Tensor::new(&values, &[2, 3], true);
        let grad = (&x * scale).sum(&[1]).sum_all().gradients(&[&x], false).remove(0);
        prop_assert!(grad.elements().iter().all(|&g| (g - scale).abs() < 1e-12));
    }
}
