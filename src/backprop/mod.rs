//! `backprop` records how tensors were computed and walks that record
//! backwards to obtain gradients.
//!
//! Every differentiable operation attaches a `Context` to its result when
//! one of its operands requires gradients. The context holds the operands
//! and one closure per operand that computes the vector-Jacobian product
//! of the operation. Contexts only point to tensors that existed before
//! the result, so the graph is acyclic by construction and reference
//! counting is enough to free it.
//!
//! `Tensor::gradients` sorts the graph reachable from a root with an
//! explicit stack, seeds the root gradient with ones and accumulates the
//! contributions of every consumer in reverse order. Contributions of a
//! tensor used several times are summed. Unless the graph is retained,
//! contributions are detached as soon as they are produced so that the
//! backward pass does not grow the graph.
//!
//! A requested tensor that receives no contribution gets zeros. This
//! happens regardless of the build profile; with the default options a
//! `tracing` warning is emitted as well since it usually points at a
//! broken graph.

mod context;
mod graph;

pub use context::{BackwardFn, Context};
pub use graph::GradientOptions;
