use thiserror::Error;

/// Failure to rebuild a tensor from its serialized form.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot encode or decode tensor record: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("{len} bytes do not hold a whole number of {element_size} byte elements")]
    Misaligned { len: usize, element_size: usize },
    #[error("{count} elements cannot fill a tensor of shape {shape:?}")]
    CountMismatch { count: usize, shape: Vec<usize> },
}
