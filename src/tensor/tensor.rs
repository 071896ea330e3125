use crate::backprop::Context;
use crate::device::{Cpu, Device};
use crate::engine::ComputeBackend;
use crate::memory::{element_count, MemoryBackend, ShapedBuffer};
use crate::numeric::Numeric;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type Values<N, D> = ShapedBuffer<N, <D as Device>::Memory>;

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(0);

/// Identity of a logical tensor value.
///
/// Clones share their identity while every operation, including
/// `detached`, produces a fresh one. Identities are never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl TensorId {
    pub(crate) fn next() -> Self {
        TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Unit of ownership of tensor data.
///
/// A storage either owns its buffer or is a view into the buffer of
/// `parent`, which it keeps alive. Only owning storages free their buffer.
pub(crate) struct Storage<N: Numeric, D: Device> {
    buffer: Option<<D::Memory as MemoryBackend>::Buffer<N>>,
    parent: Option<Rc<Storage<N, D>>>,
}

impl<N: Numeric, D: Device> Storage<N, D> {
    fn owned(buffer: <D::Memory as MemoryBackend>::Buffer<N>) -> Self {
        Storage {
            buffer: Some(buffer),
            parent: None,
        }
    }

    fn buffer(&self) -> &<D::Memory as MemoryBackend>::Buffer<N> {
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("storage buffer is only released on drop"),
        }
    }
}

impl<N: Numeric, D: Device> Drop for Storage<N, D> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if self.parent.is_none() {
                D::Memory::free(buffer);
            }
        }
    }
}

/// The central struct of the crate.
///
/// A `Tensor` is a cheap handle: cloning it shares the underlying storage
/// and the identity. Operations never mutate their operands, they allocate
/// a result and, if any operand requires gradients, attach a `Context`
/// recording how to backpropagate through them. In-place mutation goes
/// through copy-on-write so that aliasing handles never observe it.
pub struct Tensor<N: Numeric, D: Device = Cpu> {
    pub(crate) storage: Rc<Storage<N, D>>,
    pub(crate) shape: Vec<usize>,
    pub(crate) requires_gradient: bool,
    pub(crate) id: TensorId,
    pub(crate) context: Option<Rc<Context<N, D>>>,
}

impl<N: Numeric, D: Device> Clone for Tensor<N, D> {
    fn clone(&self) -> Self {
        Tensor {
            storage: Rc::clone(&self.storage),
            shape: self.shape.clone(),
            requires_gradient: self.requires_gradient,
            id: self.id,
            context: self.context.clone(),
        }
    }
}

impl<N: Numeric, D: Device> Tensor<N, D> {
    /// Creates a tensor from row-major `values`.
    pub fn new(values: &[N], shape: &[usize], requires_gradient: bool) -> Self {
        assert_eq!(
            values.len(),
            element_count(shape),
            "Cannot create a tensor of shape {:?} from {} elements.",
            shape,
            values.len()
        );
        let buffer = D::Memory::allocate::<N>(shape);
        D::Memory::assign_from_host(&buffer.values, values);
        Self::leaf(buffer, requires_gradient)
    }

    pub fn from_slice(values: &[N]) -> Self {
        Self::new(values, &[values.len()], false)
    }

    pub fn scalar(value: N) -> Self {
        Self::repeating(value, &[], false)
    }

    pub fn repeating(value: N, shape: &[usize], requires_gradient: bool) -> Self {
        let buffer = D::Memory::allocate::<N>(shape);
        D::Engine::fill(value, &buffer);
        Self::leaf(buffer, requires_gradient)
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::repeating(N::ZERO, shape, false)
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::repeating(N::ONE, shape, false)
    }

    /// `[start, start + step, ..]` with `count` elements.
    pub fn arange(start: N, step: N, count: usize) -> Self {
        let buffer = D::Memory::allocate::<N>(&[count]);
        D::Engine::arange(start, step, &buffer);
        Self::leaf(buffer, false)
    }

    /// Matrix of ones on the diagonals `-below..=above`, zeros elsewhere.
    pub fn band_matrix(rows: usize, columns: usize, below: usize, above: usize) -> Self {
        let buffer = D::Memory::allocate::<N>(&[rows, columns]);
        D::Engine::band_matrix(below, above, &buffer);
        Self::leaf(buffer, false)
    }

    pub(crate) fn leaf(values: Values<N, D>, requires_gradient: bool) -> Self {
        Tensor {
            storage: Rc::new(Storage::owned(values.values)),
            shape: values.shape,
            requires_gradient,
            id: TensorId::next(),
            context: None,
        }
    }

    /// Wraps the result of an operation. The tensor requires gradients
    /// exactly when a context is attached.
    pub(crate) fn from_values(values: Values<N, D>, context: Option<Context<N, D>>) -> Self {
        let requires_gradient = context.is_some();
        Tensor {
            storage: Rc::new(Storage::owned(values.values)),
            shape: values.shape,
            requires_gradient,
            id: TensorId::next(),
            context: context.map(Rc::new),
        }
    }

    /// Wraps a buffer that aliases the storage of `parent`. Views always
    /// hold the owning storage, never another view.
    pub(crate) fn from_view(values: Values<N, D>, parent: &Self, context: Option<Context<N, D>>) -> Self {
        let requires_gradient = context.is_some();
        let root = parent.storage.parent.clone().unwrap_or_else(|| Rc::clone(&parent.storage));
        Tensor {
            storage: Rc::new(Storage {
                buffer: Some(values.values),
                parent: Some(root),
            }),
            shape: values.shape,
            requires_gradient,
            id: TensorId::next(),
            context: context.map(Rc::new),
        }
    }

    /// Shape-only handle on the same storage.
    pub(crate) fn with_shape(&self, shape: Vec<usize>, context: Option<Context<N, D>>) -> Self {
        assert_eq!(
            element_count(&shape),
            self.count(),
            "Cannot reshape Tensor of shape {:?} to {:?}. Differing number of elements.",
            self.shape,
            shape
        );
        let requires_gradient = context.is_some();
        Tensor {
            storage: Rc::clone(&self.storage),
            shape,
            requires_gradient,
            id: TensorId::next(),
            context: context.map(Rc::new),
        }
    }

    pub(crate) fn values(&self) -> Values<N, D> {
        ShapedBuffer::new(self.storage.buffer().clone(), self.shape.clone())
    }

    pub(crate) fn allocate(shape: &[usize]) -> Values<N, D> {
        D::Memory::allocate::<N>(shape)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn count(&self) -> usize {
        element_count(&self.shape)
    }

    #[inline]
    pub fn requires_gradient(&self) -> bool {
        self.requires_gradient
    }

    /// Marks the tensor as a gradient leaf, or stops tracking it. Turning
    /// tracking off also drops the context.
    pub fn set_requires_gradient(&mut self, requires_gradient: bool) {
        self.requires_gradient = requires_gradient;
        if !requires_gradient {
            self.discard_context();
        }
    }

    #[inline]
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn context(&self) -> Option<&Context<N, D>> {
        self.context.as_deref()
    }

    /// Tag of the operation that produced the tensor.
    pub fn tag(&self) -> Option<&'static str> {
        self.context.as_ref().and_then(|context| context.tag())
    }

    /// Value of a single element tensor.
    pub fn item(&self) -> N {
        assert_eq!(self.count(), 1, "Cannot read a single item from a tensor of shape {:?}.", self.shape);
        D::Memory::get_value(self.storage.buffer())
    }

    /// Row-major copy of the elements.
    pub fn elements(&self) -> Vec<N> {
        self.values().to_vec()
    }

    /// Whether any element is not a number. Integer tensors never are.
    pub fn contains_nan(&self) -> bool {
        self.elements().into_iter().any(|x| x.to_f64().is_nan())
    }

    /// Whether every element is neither infinite nor NaN.
    pub fn is_finite(&self) -> bool {
        self.elements().into_iter().all(|x| x.to_f64().is_finite())
    }

    /// New tensor sharing the values but cut from the graph. The result
    /// does not require gradients.
    pub fn detached(&self) -> Self {
        Tensor {
            storage: Rc::clone(&self.storage),
            shape: self.shape.clone(),
            requires_gradient: false,
            id: TensorId::next(),
            context: None,
        }
    }

    /// Drops the backward graph behind this tensor. If the tensor required
    /// gradients it keeps doing so and becomes a leaf.
    ///
    /// A leaf is a different node than the operation result it was cut
    /// from, so the tensor takes a fresh identity when a context is dropped.
    pub fn discard_context(&mut self) {
        if self.context.take().is_some() {
            self.id = TensorId::next();
        }
    }

    /// Whether the storage is shared with another tensor value or is a view.
    pub fn is_storage_shared(&self) -> bool {
        Rc::strong_count(&self.storage) > 1 || self.storage.parent.is_some()
    }

    /// Gives the tensor exclusive ownership of its storage, copying the
    /// values when the storage is shared or a view. A copy is a new value
    /// and therefore gets a new identity.
    pub(crate) fn ensure_ownership(&mut self) {
        if !self.is_storage_shared() {
            return;
        }

        let replacement = Self::allocate(&self.shape);
        D::Memory::assign(&replacement.values, self.storage.buffer(), self.count());
        self.storage = Rc::new(Storage::owned(replacement.values));
        self.id = TensorId::next();
    }

    fn assert_mutable(&self) {
        assert!(
            self.context.is_none(),
            "Cannot mutate a tensor produced by a differentiable operation in place, detach it first."
        );
    }

    /// Overwrites all values in place.
    pub fn set_values(&mut self, values: &[N]) {
        self.assert_mutable();
        assert_eq!(
            values.len(),
            self.count(),
            "Cannot assign {} elements to a tensor of shape {:?}.",
            values.len(),
            self.shape
        );
        self.ensure_ownership();
        D::Memory::assign_from_host(self.storage.buffer(), values);
    }

    /// `self += other` in place, without recording an operation.
    pub fn add_in_place(&mut self, other: &Self) {
        self.assert_mutable();
        assert_eq!(self.shape, other.shape, "Tensors must have same shape, got {:?} and {:?}.", self.shape, other.shape);
        self.ensure_ownership();
        D::Engine::add_assign(&self.values(), &other.values());
    }

    /// `self += other * scale` in place, typically a parameter update.
    pub fn add_scaled_in_place(&mut self, other: &Self, scale: N) {
        self.assert_mutable();
        assert_eq!(self.shape, other.shape, "Tensors must have same shape, got {:?} and {:?}.", self.shape, other.shape);
        self.ensure_ownership();
        D::Engine::scaled_add_assign(&self.values(), &other.values(), scale);
    }

    pub(crate) fn assert_same_shape(&self, other: &Self) {
        assert_eq!(self.shape, other.shape, "Tensors must have same shape, got {:?} and {:?}.", self.shape, other.shape);
    }
}

impl<N: Numeric, D: Device> fmt::Debug for Tensor<N, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_gradient", &self.requires_gradient)
            .field("tag", &self.tag())
            .field("values", &self.elements())
            .finish()
    }
}

impl<N: Numeric, D: Device> From<N> for Tensor<N, D> {
    fn from(value: N) -> Self {
        Tensor::scalar(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction() {
        let t: Tensor<f32> = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.count(), 6);
        assert!(t.requires_gradient());
        assert!(t.context().is_none());
        assert_eq!(t.elements(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let s: Tensor<i32> = Tensor::scalar(3);
        assert_eq!(s.dim(), 0);
        assert_eq!(s.item(), 3);

        let r: Tensor<i64> = Tensor::arange(0, 3, 4);
        assert_eq!(r.elements(), vec![0, 3, 6, 9]);
    }

    #[test]
    #[should_panic(expected = "Cannot create a tensor of shape")]
    fn construction_count_mismatch() {
        Tensor::<f32>::new(&[1.0, 2.0], &[3], false);
    }

    #[test]
    fn identities() {
        let a: Tensor<f32> = Tensor::zeros(&[2]);
        let b = a.clone();
        let c = a.detached();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_ne!(a.id(), Tensor::<f32>::zeros(&[2]).id());
    }

    #[test]
    fn nan_and_infinity_checks() {
        let t: Tensor<f64> = Tensor::new(&[1.0, -2.0, 0.5], &[3], false);
        assert!(!t.contains_nan() && t.is_finite());
        let t: Tensor<f64> = Tensor::new(&[1.0, f64::NEG_INFINITY], &[2], false);
        assert!(!t.contains_nan() && !t.is_finite());
        let t: Tensor<f32> = Tensor::new(&[f32::NAN, 0.0], &[2], false);
        assert!(t.contains_nan() && !t.is_finite());
        let i: Tensor<i32> = Tensor::new(&[i32::MAX], &[1], false);
        assert!(!i.contains_nan() && i.is_finite());
    }

    #[test]
    fn discarding_context_takes_new_identity() {
        let mut a: Tensor<f32> = Tensor::new(&[1.0], &[1], true);
        let id = a.id();
        a.discard_context();
        assert_eq!(a.id(), id);

        let b = &a * 2.0;
        let mut c = b.clone();
        c.discard_context();
        assert!(c.context().is_none());
        assert!(c.requires_gradient());
        assert_ne!(c.id(), b.id());

        let mut d = b.clone();
        d.set_requires_gradient(false);
        assert_ne!(d.id(), b.id());
    }

    #[test]
    fn copy_on_write() {
        let mut a: Tensor<f64> = Tensor::new(&[1.0, 2.0], &[2], false);
        let b = a.clone();
        assert!(a.is_storage_shared());

        a.set_values(&[5.0, 6.0]);
        assert_eq!(a.elements(), vec![5.0, 6.0]);
        assert_eq!(b.elements(), vec![1.0, 2.0]);
        assert_ne!(a.id(), b.id());
        assert!(!a.is_storage_shared());

        let id = a.id();
        a.add_scaled_in_place(&b, 2.0);
        assert_eq!(a.elements(), vec![7.0, 10.0]);
        assert_eq!(a.id(), id);
    }

    #[test]
    fn views_of_views_hold_the_owner() {
        let a: Tensor<i32> = Tensor::new(&(0..24).collect::<Vec<_>>(), &[2, 3, 4], false);
        let mut view = a.get(&[crate::memory::Selection::Index(1)]);
        for _ in 0..10_000 {
            view = view.get(&[crate::memory::Selection::All]);
        }
        let owner = view.storage.parent.as_ref().map(|parent| Rc::ptr_eq(parent, &a.storage));
        assert_eq!(owner, Some(true));
        assert_eq!(view.elements(), (12..24).collect::<Vec<_>>());
    }

    #[test]
    fn in_place_keeps_leaf() {
        let mut w: Tensor<f32> = Tensor::new(&[1.0, 1.0], &[2], true);
        let step = Tensor::new(&[0.5, -0.5], &[2], false);
        w.add_in_place(&step);
        assert!(w.requires_gradient());
        assert!(w.context().is_none());
        assert_eq!(w.elements(), vec![1.5, 0.5]);
    }
}
