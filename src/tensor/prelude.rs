pub use super::codec::TensorRecord;
pub use super::tensor::{Tensor, TensorId};
pub use crate::device::{Cpu, Device};
pub use crate::engine::{Im2ColLayout, DEFAULT_IGNORE_INDEX};
pub use crate::memory::Selection;
pub use crate::numeric::Numeric;
