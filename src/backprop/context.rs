use crate::device::Device;
use crate::numeric::Numeric;
use crate::tensor::Tensor;
use std::fmt;
use std::rc::Rc;

/// Vector-Jacobian product of one operand: maps the gradient of the
/// result to the gradient contribution of that operand.
pub type BackwardFn<N, D> = Box<dyn Fn(&Tensor<N, D>) -> Tensor<N, D>>;

/// Record of the operation that produced a tensor.
///
/// `sources` and `backward` are parallel: `backward[i]` computes the
/// contribution for `sources[i]`. Backward closures may capture operands
/// but never tensors created after them, which keeps the graph acyclic.
pub struct Context<N: Numeric, D: Device> {
    tag: Option<&'static str>,
    pub(crate) sources: Vec<Tensor<N, D>>,
    pub(crate) backward: Vec<BackwardFn<N, D>>,
}

impl<N: Numeric, D: Device> Context<N, D> {
    pub fn new(tag: Option<&'static str>, sources: Vec<Tensor<N, D>>, backward: Vec<BackwardFn<N, D>>) -> Self {
        assert_eq!(
            sources.len(),
            backward.len(),
            "A context needs one backward function per source, got {} sources and {} functions.",
            sources.len(),
            backward.len()
        );
        tracing::trace!(op = tag.unwrap_or("unnamed"), sources = sources.len(), "recorded operation");
        Context { tag, sources, backward }
    }

    pub fn unary<F>(tag: &'static str, source: &Tensor<N, D>, backward: F) -> Self
    where
        F: Fn(&Tensor<N, D>) -> Tensor<N, D> + 'static,
    {
        Self::new(Some(tag), vec![source.clone()], vec![Box::new(backward)])
    }

    pub fn binary<F, G>(tag: &'static str, lhs: &Tensor<N, D>, rhs: &Tensor<N, D>, lhs_backward: F, rhs_backward: G) -> Self
    where
        F: Fn(&Tensor<N, D>) -> Tensor<N, D> + 'static,
        G: Fn(&Tensor<N, D>) -> Tensor<N, D> + 'static,
    {
        Self::new(
            Some(tag),
            vec![lhs.clone(), rhs.clone()],
            vec![Box::new(lhs_backward), Box::new(rhs_backward)],
        )
    }

    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }

    pub fn sources(&self) -> &[Tensor<N, D>] {
        &self.sources
    }
}

impl<N: Numeric, D: Device> Drop for Context<N, D> {
    /// Tears the graph down with an explicit work list. Dropping a long
    /// chain recursively would overflow the stack.
    fn drop(&mut self) {
        self.backward.clear();
        let mut pending = std::mem::take(&mut self.sources);
        while let Some(mut tensor) = pending.pop() {
            if let Some(context) = tensor.context.take() {
                if let Ok(mut context) = Rc::try_unwrap(context) {
                    context.backward.clear();
                    pending.append(&mut context.sources);
                }
            }
        }
    }
}

impl<N: Numeric, D: Device> fmt::Debug for Context<N, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("tag", &self.tag)
            .field("sources", &self.sources.iter().map(|source| source.id()).collect::<Vec<_>>())
            .finish()
    }
}
