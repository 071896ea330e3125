//! Externalized form of a tensor.
//!
//! Only the values, the shape and the gradient flag are kept, the graph
//! behind a tensor is never persisted. Elements are stored as raw bytes in
//! native byte order.

use super::tensor::Tensor;
use crate::device::Device;
use crate::error::CodecError;
use crate::memory::element_count;
use crate::numeric::Numeric;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub requires_gradient: bool,
    pub data: Vec<u8>,
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    pub fn to_record(&self) -> TensorRecord {
        TensorRecord {
            shape: self.shape.clone(),
            requires_gradient: self.requires_gradient,
            data: bytemuck::cast_slice(&self.elements()).to_vec(),
        }
    }

    /// Rebuilds a leaf tensor from a record.
    pub fn from_record(record: &TensorRecord) -> Result<Self, CodecError> {
        let element_size = std::mem::size_of::<N>();
        if record.data.len() % element_size != 0 {
            return Err(CodecError::Misaligned {
                len: record.data.len(),
                element_size,
            });
        }

        let values: Vec<N> = bytemuck::pod_collect_to_vec(&record.data);
        if values.len() != element_count(&record.shape) {
            return Err(CodecError::CountMismatch {
                count: values.len(),
                shape: record.shape.clone(),
            });
        }
        Ok(Tensor::new(&values, &record.shape, record.requires_gradient))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(bincode::serialize(&self.to_record())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: TensorRecord = bincode::deserialize(bytes)?;
        Self::from_record(&record)
    }
}

impl<N: Numeric, D: Device> Serialize for Tensor<N, D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de, N: Numeric, D: Device> Deserialize<'de> for Tensor<N, D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let record = TensorRecord::deserialize(deserializer)?;
        Self::from_record(&record).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let a: Tensor<f32> = Tensor::new(&[1.5, -2.0, 0.25, 8.0], &[2, 2], true);
        let b = &a * 2.0;
        let decoded = Tensor::<f32>::from_bytes(&b.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.shape(), &[2, 2]);
        assert_eq!(decoded.elements(), b.elements());
        assert!(decoded.requires_gradient());
        assert!(decoded.context().is_none());
    }

    #[test]
    fn misaligned_data() {
        let record = TensorRecord {
            shape: vec![1],
            requires_gradient: false,
            data: vec![0, 1, 2],
        };
        assert!(matches!(
            Tensor::<i32>::from_record(&record),
            Err(CodecError::Misaligned { len: 3, element_size: 4 })
        ));
    }

    #[test]
    fn count_mismatch() {
        let record = Tensor::<i64>::from_slice(&[1, 2, 3]).to_record();
        let record = TensorRecord {
            shape: vec![2, 2],
            ..record
        };
        assert!(matches!(
            Tensor::<i64>::from_record(&record),
            Err(CodecError::CountMismatch { count: 3, .. })
        ));
    }

    #[test]
    fn truncated_bytes() {
        let bytes = Tensor::<f64>::ones(&[3]).to_bytes().unwrap();
        assert!(matches!(
            Tensor::<f64>::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CodecError::Bincode(_))
        ));
    }
}
