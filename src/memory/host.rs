use super::pool;
use super::{element_count, MemoryBackend, Region, Selection, ShapedBuffer};
use crate::numeric::Numeric;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Host memory backed by pooled `Vec` regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMemory;

struct HostRegion<N: Numeric> {
    data: RefCell<Vec<N>>,
}

impl<N: Numeric> Drop for HostRegion<N> {
    fn drop(&mut self) {
        pool::release(std::mem::take(self.data.get_mut()));
    }
}

/// Window `[offset, offset + len)` into a shared host region.
///
/// Views created by `HostMemory::get` share the region of their source,
/// so the region only goes back to the pool once every view is gone.
pub struct HostBuffer<N: Numeric> {
    region: Rc<HostRegion<N>>,
    offset: usize,
    len: usize,
}

impl<N: Numeric> HostBuffer<N> {
    fn allocate(len: usize) -> Self {
        HostBuffer {
            region: Rc::new(HostRegion {
                data: RefCell::new(pool::acquire(len)),
            }),
            offset: 0,
            len,
        }
    }

    fn view(&self, offset: usize, len: usize) -> Self {
        assert!(offset + len <= self.len);
        HostBuffer {
            region: Rc::clone(&self.region),
            offset: self.offset + offset,
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether both buffers point into the same allocation.
    pub fn aliases(&self, other: &HostBuffer<N>) -> bool {
        Rc::ptr_eq(&self.region, &other.region)
    }

    pub fn read(&self) -> Ref<'_, [N]> {
        let (start, end) = (self.offset, self.offset + self.len);
        Ref::map(self.region.data.borrow(), move |data| &data[start..end])
    }

    pub fn write(&self) -> RefMut<'_, [N]> {
        let (start, end) = (self.offset, self.offset + self.len);
        RefMut::map(self.region.data.borrow_mut(), move |data| &mut data[start..end])
    }

    /// Reads the buffer in preparation of writing `destination`. When both
    /// share an allocation the values are copied out first so that the
    /// write borrow does not conflict.
    pub fn read_for(&self, destination: &HostBuffer<N>) -> HostRead<'_, N> {
        if self.aliases(destination) {
            HostRead::Snapshot(self.read().to_vec())
        } else {
            HostRead::Borrowed(self.read())
        }
    }
}

impl<N: Numeric> Clone for HostBuffer<N> {
    fn clone(&self) -> Self {
        HostBuffer {
            region: Rc::clone(&self.region),
            offset: self.offset,
            len: self.len,
        }
    }
}

impl<N: Numeric> fmt::Debug for HostBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

pub enum HostRead<'a, N: Numeric> {
    Borrowed(Ref<'a, [N]>),
    Snapshot(Vec<N>),
}

impl<'a, N: Numeric> Deref for HostRead<'a, N> {
    type Target = [N];

    fn deref(&self) -> &[N] {
        match self {
            HostRead::Borrowed(values) => &**values,
            HostRead::Snapshot(values) => values.as_slice(),
        }
    }
}

impl MemoryBackend for HostMemory {
    type Buffer<N: Numeric> = HostBuffer<N>;

    fn allocate<N: Numeric>(shape: &[usize]) -> ShapedBuffer<N, Self> {
        ShapedBuffer::new(HostBuffer::allocate(element_count(shape)), shape.to_vec())
    }

    fn free<N: Numeric>(buffer: HostBuffer<N>) {
        drop(buffer);
    }

    fn count<N: Numeric>(buffer: &HostBuffer<N>) -> usize {
        buffer.len()
    }

    fn assign_from_host<N: Numeric>(destination: &HostBuffer<N>, source: &[N]) {
        assert!(
            source.len() <= destination.len(),
            "Cannot copy {} elements into a buffer of {} elements.",
            source.len(),
            destination.len()
        );
        destination.write()[..source.len()].copy_from_slice(source);
    }

    fn assign<N: Numeric>(destination: &HostBuffer<N>, source: &HostBuffer<N>, count: usize) {
        assert!(
            count <= source.len() && count <= destination.len(),
            "Cannot copy {} elements between buffers of {} and {} elements.",
            count,
            source.len(),
            destination.len()
        );
        let source = source.read_for(destination);
        destination.write()[..count].copy_from_slice(&source[..count]);
    }

    fn assign_to_host<N: Numeric>(destination: &mut [N], source: &HostBuffer<N>) {
        let count = destination.len();
        assert!(
            count <= source.len(),
            "Cannot read {} elements from a buffer of {} elements.",
            count,
            source.len()
        );
        destination.copy_from_slice(&source.read()[..count]);
    }

    fn get_value<N: Numeric>(buffer: &HostBuffer<N>) -> N {
        assert!(!buffer.is_empty(), "Cannot read a value from an empty buffer.");
        buffer.read()[0]
    }

    fn get<N: Numeric>(source: &ShapedBuffer<N, Self>, selection: &[Selection]) -> (ShapedBuffer<N, Self>, bool) {
        let region = Region::resolve(&source.shape, selection);

        if let Some(offset) = region.contiguous_offset(&source.shape) {
            let view = source.values.view(offset, region.count());
            return (ShapedBuffer::new(view, region.shape), false);
        }

        let result = Self::allocate::<N>(&region.shape);
        {
            let (starts, run) = region.runs(&source.shape);
            let src = source.values.read();
            let mut dst = result.values.write();
            for (chunk, start) in dst.chunks_mut(run.max(1)).zip(starts) {
                chunk.copy_from_slice(&src[start..start + run]);
            }
        }
        (result, true)
    }

    fn set<N: Numeric>(destination: &ShapedBuffer<N, Self>, selection: &[Selection], source: &ShapedBuffer<N, Self>) {
        let region = Region::resolve(&destination.shape, selection);
        assert_eq!(
            region.shape, source.shape,
            "Cannot write values of shape {:?} into a region of shape {:?}.",
            source.shape, region.shape
        );

        let (starts, run) = region.runs(&destination.shape);
        let src = source.values.read_for(&destination.values);
        let mut dst = destination.values.write();
        for (chunk, start) in src.chunks(run.max(1)).zip(starts) {
            dst[start..start + run].copy_from_slice(chunk);
        }
    }
}
