use crate::device::Device;
use crate::numeric::Numeric;
use crate::tensor::{Tensor, TensorId};
use serde::Deserialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// Options of a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GradientOptions {
    /// Keep the backward graph of the gradients themselves so that they
    /// can be differentiated again.
    pub retain_graph: bool,
    /// Emit a `tracing` warning when a requested tensor receives no
    /// gradient. The tensor gets zeros either way.
    pub warn_on_missing: bool,
}

impl Default for GradientOptions {
    fn default() -> Self {
        GradientOptions {
            retain_graph: false,
            warn_on_missing: true,
        }
    }
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Tensors reachable from `self` through gradient requiring tensors,
    /// every source ordered before the tensors computed from it.
    ///
    /// The traversal keeps its own stack of `(tensor, next source)` pairs
    /// so that arbitrarily deep graphs do not exhaust the call stack.
    pub fn operation_order(&self) -> Vec<Tensor<N, D>> {
        let mut stack: Vec<(Tensor<N, D>, usize)> = vec![(self.clone(), 0)];
        let mut sorting = Vec::new();
        let mut visited: HashSet<TensorId> = HashSet::new();

        while let Some((current, index)) = stack.pop() {
            if visited.contains(&current.id) {
                continue;
            }

            let next_source = current
                .context
                .as_ref()
                .and_then(|context| context.sources.get(index))
                .cloned();

            match next_source {
                Some(source) => {
                    stack.push((current, index + 1));
                    if source.requires_gradient && !visited.contains(&source.id) {
                        stack.push((source, 0));
                    }
                }
                None => {
                    visited.insert(current.id);
                    sorting.push(current);
                }
            }
        }

        sorting
    }

    /// Gradients of `self` with respect to `targets`.
    ///
    /// The gradient of `self` is seeded with ones. Targets that cannot be
    /// reached from `self` receive zeros.
    pub fn gradients(&self, targets: &[&Self], retain_graph: bool) -> Vec<Self> {
        self.gradients_with(
            targets,
            GradientOptions {
                retain_graph,
                ..GradientOptions::default()
            },
        )
    }

    pub fn gradients_with(&self, targets: &[&Self], options: GradientOptions) -> Vec<Self> {
        let order = self.operation_order();
        let _span = tracing::debug_span!("backpropagate", nodes = order.len(), retain_graph = options.retain_graph).entered();

        let wanted: HashSet<TensorId> = targets.iter().map(|target| target.id).collect();
        let mut grads: HashMap<TensorId, Tensor<N, D>> = HashMap::with_capacity(order.len());
        grads.insert(self.id, Tensor::ones(&self.shape));

        for tensor in order.iter().rev() {
            let context = match &tensor.context {
                Some(context) => context,
                None => continue,
            };
            let grad = if wanted.contains(&tensor.id) {
                match grads.get(&tensor.id) {
                    Some(grad) => grad.clone(),
                    None => continue,
                }
            } else {
                match grads.remove(&tensor.id) {
                    Some(grad) => grad,
                    None => continue,
                }
            };

            for (source, backward) in context.sources.iter().zip(&context.backward) {
                if !source.requires_gradient {
                    continue;
                }

                let contribution = backward(&grad);
                assert_eq!(
                    contribution.shape,
                    source.shape,
                    "Backward of {:?} produced a gradient of shape {:?} for a source of shape {:?}.",
                    context.tag(),
                    contribution.shape,
                    source.shape
                );
                let contribution = if options.retain_graph {
                    contribution
                } else {
                    contribution.detached()
                };

                match grads.entry(source.id) {
                    Entry::Vacant(entry) => {
                        entry.insert(contribution);
                    }
                    Entry::Occupied(mut entry) => {
                        if options.retain_graph {
                            let sum = entry.get() + &contribution;
                            entry.insert(sum);
                        } else {
                            entry.get_mut().add_in_place(&contribution);
                        }
                    }
                }
            }
        }

        targets
            .iter()
            .map(|target| match grads.get(&target.id) {
                Some(grad) => grad.clone(),
                None => {
                    if options.warn_on_missing {
                        tracing::warn!(
                            target_id = target.id.get(),
                            shape = ?target.shape,
                            "no gradient reaches the requested tensor, using zeros"
                        );
                    }
                    Tensor::zeros(&target.shape)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_puts_sources_first() {
        let a: Tensor<f32> = Tensor::new(&[1.0], &[1], true);
        let b: Tensor<f32> = Tensor::new(&[2.0], &[1], true);
        let c = &a * &b;
        let d = &c + &a;
        let order: Vec<TensorId> = d.operation_order().iter().map(|t| t.id()).collect();

        let position = |id: TensorId| order.iter().position(|&x| x == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(a.id()) < position(c.id()));
        assert!(position(b.id()) < position(c.id()));
        assert!(position(c.id()) < position(d.id()));
        assert_eq!(*order.last().unwrap(), d.id());
    }

    #[test]
    fn order_skips_constants() {
        let a: Tensor<f32> = Tensor::new(&[1.0], &[1], true);
        let k: Tensor<f32> = Tensor::new(&[2.0], &[1], false);
        let c = &a * &k;
        assert_eq!(c.operation_order().len(), 2);
    }

    #[test]
    fn root_gradient_is_ones() {
        let a: Tensor<f32> = Tensor::new(&[1.0, 2.0], &[2], true);
        let grads = a.gradients(&[&a], false);
        assert_eq!(grads[0].elements(), vec![1.0, 1.0]);
    }

    #[test]
    fn gradients_are_detached() {
        let a: Tensor<f64> = Tensor::new(&[3.0], &[1], true);
        let b = &a * &a;
        let grads = b.gradients(&[&a], false);
        assert_eq!(grads[0].elements(), vec![6.0]);
        assert!(grads[0].context().is_none());
        assert!(!grads[0].requires_gradient());
    }

    #[test]
    fn second_order_with_retained_graph() {
        let x: Tensor<f64> = Tensor::new(&[3.0], &[1], true);
        let y = &(&x * &x) * &x;
        let dy = y.gradients(&[&x], true).remove(0);
        assert_eq!(dy.elements(), vec![27.0]);
        assert!(dy.requires_gradient());

        let ddy = dy.gradients(&[&x], false).remove(0);
        assert_eq!(ddy.elements(), vec![18.0]);
    }

    #[test]
    fn intermediate_targets() {
        let a: Tensor<f32> = Tensor::new(&[2.0], &[1], true);
        let b = &a * 3.0;
        let c = &b * &b;
        let grads = c.gradients(&[&b, &a], false);
        assert_eq!(grads[0].elements(), vec![12.0]);
        assert_eq!(grads[1].elements(), vec![36.0]);
    }
}
