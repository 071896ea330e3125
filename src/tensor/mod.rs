//! `tensor` defines the `Tensor` value type and every differentiable
//! operation on it.
//!
//! A tensor is a reference counted handle on device storage together with
//! a dynamic shape, a gradient flag, an identity and an optional `Context`
//! recording the operation that produced it. Handles are cheap to clone and
//! operations never mutate their operands, so the same tensor can feed any
//! number of operations. The few mutating methods (`set_values`,
//! `add_in_place`, `add_scaled_in_place`, `set`) copy shared storage first.
//!
//! Operations are grouped by family: elementwise arithmetic and
//! activations in `core_ops`, reductions in `reduction`, matrix products in
//! `linear_algebra`, layout changes in `shape_ops`, sub-region access in
//! `subscript`, joining and splitting in `stack`, index driven selection in
//! `scatter` and image lowering in `conv`. `codec` and `random` provide
//! serialization and initialization.

mod codec;
mod conv;
mod core_ops;
mod linear_algebra;
pub mod prelude;
mod random;
mod reduction;
mod scatter;
mod shape_ops;
mod stack;
mod subscript;
#[allow(clippy::module_inception)]
mod tensor;

pub use codec::TensorRecord;
pub use tensor::{Tensor, TensorId};
