use tapegrad::prelude::*;

#[test]
fn bytes_round_trip() {
    let x: Tensor<f32> = Tensor::new(&[1.5, -2.0, 3.25, 0.0, 8.0, 1e-3], &[2, 3], true);
    let bytes = x.to_bytes().expect("encoding failed");
    let y: Tensor<f32> = Tensor::from_bytes(&bytes).expect("decoding failed");
    assert_eq!(y.shape(), x.shape());
    assert_eq!(y.elements(), x.elements());
    assert!(y.requires_gradient());
    assert!(y.context().is_none());
    assert_ne!(y.id(), x.id());
}

#[test]
fn graph_is_not_persisted() {
    let x: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[2], true);
    let y = x.exp();
    let record = y.to_record();
    assert_eq!(record.shape, vec![2]);
    assert_eq!(record.data.len(), 2 * std::mem::size_of::<f64>());
    let restored: Tensor<f64> = Tensor::from_record(&record).expect("decoding failed");
    assert!(restored.context().is_none());
}

#[test]
fn malformed_records_are_rejected() {
    let record = TensorRecord {
        shape: vec![3],
        requires_gradient: false,
        data: vec![0; 7],
    };
    assert!(matches!(
        Tensor::<f32>::from_record(&record),
        Err(CodecError::Misaligned { len: 7, element_size: 4 })
    ));

    let record = TensorRecord {
        shape: vec![3],
        requires_gradient: false,
        data: vec![0; 8],
    };
    assert!(matches!(Tensor::<i32>::from_record(&record), Err(CodecError::CountMismatch { count: 2, .. })));
    assert!(Tensor::<f64>::from_bytes(&[1, 2, 3]).is_err());
}
