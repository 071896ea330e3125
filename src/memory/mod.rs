//! `memory` is the lowest layer of the crate: opaque device allocations
//! and the primitives that move data in and out of them.
//!
//! A `MemoryBackend` hands out untyped-shape buffers (`Buffer<N>`) and
//! never interprets their contents beyond element copies. Shapes are
//! layered on top by `ShapedBuffer`, which is what engines and tensors
//! pass around. Sub-regions are described per axis with `Selection`;
//! reading a region may alias the source allocation when the region is
//! contiguous, which the caller learns through the returned flag.
//!
//! Every violated precondition (out-of-bounds selection, mismatched
//! element counts) panics: this layer has no recoverable errors.

use crate::numeric::Numeric;
use std::fmt;
use std::ops::{Range, RangeFull};

pub mod host;
pub mod pool;

pub use host::{HostBuffer, HostMemory};
pub use pool::{clear_pool, configure_pool, pool_statistics, PoolConfig, PoolStatistics};

pub trait MemoryBackend: Sized + 'static {
    /// Handle to a contiguous allocation of `N` elements. Cloning the
    /// handle aliases the allocation.
    type Buffer<N: Numeric>: Clone + fmt::Debug;

    /// Allocates a buffer with room for the elements of `shape`.
    /// The contents are unspecified.
    fn allocate<N: Numeric>(shape: &[usize]) -> ShapedBuffer<N, Self>;

    /// Releases an allocation. Must be called at most once per allocation
    /// and never for aliasing views.
    fn free<N: Numeric>(buffer: Self::Buffer<N>);

    fn count<N: Numeric>(buffer: &Self::Buffer<N>) -> usize;

    fn assign_from_host<N: Numeric>(destination: &Self::Buffer<N>, source: &[N]);

    fn assign<N: Numeric>(destination: &Self::Buffer<N>, source: &Self::Buffer<N>, count: usize);

    fn assign_to_host<N: Numeric>(destination: &mut [N], source: &Self::Buffer<N>);

    /// Reads the first element, used by rank 0 tensors.
    fn get_value<N: Numeric>(buffer: &Self::Buffer<N>) -> N;

    /// Reads the selected region. The flag is `true` when a new buffer had
    /// to be allocated and `false` when the result aliases `source`.
    fn get<N: Numeric>(source: &ShapedBuffer<N, Self>, selection: &[Selection]) -> (ShapedBuffer<N, Self>, bool);

    /// Writes `source` into the selected region of `destination` in place.
    fn set<N: Numeric>(destination: &ShapedBuffer<N, Self>, selection: &[Selection], source: &ShapedBuffer<N, Self>);
}

/// A buffer together with the dimensions it is interpreted with.
pub struct ShapedBuffer<N: Numeric, M: MemoryBackend> {
    pub values: M::Buffer<N>,
    pub shape: Vec<usize>,
}

impl<N: Numeric, M: MemoryBackend> ShapedBuffer<N, M> {
    pub fn new(values: M::Buffer<N>, shape: Vec<usize>) -> Self {
        ShapedBuffer { values, shape }
    }

    #[inline]
    pub fn count(&self) -> usize {
        element_count(&self.shape)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    pub fn reshaped(&self, shape: Vec<usize>) -> Self {
        assert_eq!(
            element_count(&shape),
            self.count(),
            "Cannot reshape buffer of shape {:?} to {:?}. Differing number of elements.",
            self.shape,
            shape
        );
        ShapedBuffer::new(self.values.clone(), shape)
    }

    pub fn to_vec(&self) -> Vec<N> {
        let mut host = vec![N::ZERO; self.count()];
        M::assign_to_host(&mut host, &self.values);
        host
    }
}

impl<N: Numeric, M: MemoryBackend> Clone for ShapedBuffer<N, M> {
    fn clone(&self) -> Self {
        ShapedBuffer::new(self.values.clone(), self.shape.clone())
    }
}

impl<N: Numeric, M: MemoryBackend> fmt::Debug for ShapedBuffer<N, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapedBuffer")
            .field("shape", &self.shape)
            .field("values", &self.values)
            .finish()
    }
}

/// Selection of a sub-region along one axis.
///
/// `Index` removes the axis from the resulting shape while `Range` and
/// `All` keep it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Index(usize),
    Range(Range<usize>),
}

impl Selection {
    /// Builds an index selection, counting from the end of the axis when
    /// `index` is negative.
    pub fn from_signed(index: isize, dim: usize) -> Self {
        Selection::Index(wrap_index(index, dim))
    }

    /// Builds a range selection with Python-like wrapping of negative bounds.
    pub fn from_signed_range(start: isize, end: isize, dim: usize) -> Self {
        Selection::Range(wrap_bound(start, dim)..wrap_bound(end, dim))
    }

    fn resolve(&self, axis: usize, dim: usize) -> Range<usize> {
        match self {
            Selection::All => 0..dim,
            Selection::Index(index) => {
                assert!(*index < dim, "Index {} out of bounds for axis {} of size {}.", index, axis, dim);
                *index..*index + 1
            }
            Selection::Range(range) => {
                assert!(
                    range.start <= range.end && range.end <= dim,
                    "Range {:?} out of bounds for axis {} of size {}.",
                    range,
                    axis,
                    dim
                );
                range.clone()
            }
        }
    }
}

impl From<usize> for Selection {
    fn from(index: usize) -> Self {
        Selection::Index(index)
    }
}

impl From<Range<usize>> for Selection {
    fn from(range: Range<usize>) -> Self {
        Selection::Range(range)
    }
}

impl From<RangeFull> for Selection {
    fn from(_: RangeFull) -> Self {
        Selection::All
    }
}

fn wrap_index(index: isize, dim: usize) -> usize {
    let wrapped = if index < 0 { index + dim as isize } else { index };
    assert!(
        wrapped >= 0 && (wrapped as usize) < dim,
        "Index {} out of bounds for axis of size {}.",
        index,
        dim
    );
    wrapped as usize
}

fn wrap_bound(bound: isize, dim: usize) -> usize {
    let wrapped = if bound < 0 { bound + dim as isize } else { bound };
    assert!(
        wrapped >= 0 && (wrapped as usize) <= dim,
        "Range bound {} out of bounds for axis of size {}.",
        bound,
        dim
    );
    wrapped as usize
}

/// Region of a shape described by per-axis ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub ranges: Vec<Range<usize>>,
    /// Shape of the region once single index axes are dropped.
    pub shape: Vec<usize>,
}

impl Region {
    pub fn resolve(shape: &[usize], selection: &[Selection]) -> Self {
        assert!(
            selection.len() <= shape.len(),
            "Cannot select {} axes in a tensor of shape {:?}.",
            selection.len(),
            shape
        );
        let mut ranges = Vec::with_capacity(shape.len());
        let mut region_shape = Vec::with_capacity(shape.len());
        for (axis, &dim) in shape.iter().enumerate() {
            let select = selection.get(axis).unwrap_or(&Selection::All);
            let range = select.resolve(axis, dim);
            if !matches!(select, Selection::Index(_)) {
                region_shape.push(range.len());
            }
            ranges.push(range);
        }

        Region {
            ranges,
            shape: region_shape,
        }
    }

    pub fn count(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).product()
    }

    /// Offset of the region when it occupies one contiguous row-major run
    /// of the source, `None` otherwise.
    pub fn contiguous_offset(&self, shape: &[usize]) -> Option<usize> {
        let strides = strides(shape);
        let partial = self.ranges.iter().zip(shape).rposition(|(range, &dim)| range.len() != dim);
        if let Some(axis) = partial {
            if self.ranges[..axis].iter().any(|range| range.len() != 1) {
                return None;
            }
        }

        Some(self.ranges.iter().zip(&strides).map(|(range, stride)| range.start * stride).sum())
    }

    /// Starting offsets of the innermost contiguous runs in row-major order,
    /// together with the run length.
    pub fn runs(&self, shape: &[usize]) -> (Vec<usize>, usize) {
        if shape.is_empty() {
            return (vec![0], 1);
        }

        let strides = strides(shape);
        let last = shape.len() - 1;
        let run = self.ranges[last].len();
        let outer = &self.ranges[..last];
        let outer_count: usize = outer.iter().map(|r| r.len()).product();

        let mut starts = Vec::with_capacity(outer_count);
        if run == 0 || outer_count == 0 {
            return (starts, run);
        }

        let mut index: Vec<usize> = outer.iter().map(|r| r.start).collect();
        loop {
            let base: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            starts.push(base + self.ranges[last].start);

            let mut axis = last;
            loop {
                if axis == 0 {
                    return (starts, run);
                }
                axis -= 1;
                index[axis] += 1;
                if index[axis] < outer[axis].end {
                    break;
                }
                index[axis] = outer[axis].start;
            }
        }
    }
}

#[inline]
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides of a contiguous shape.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = shape.to_vec();
    let mut product = 1;
    for stride in strides.iter_mut().rev() {
        let tmp = product;
        product *= *stride;
        *stride = tmp;
    }

    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_strides() {
        assert_eq!(strides(&[3, 2, 4]), vec![8, 4, 1]);
        assert_eq!(strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn region_shapes() {
        let region = Region::resolve(&[4, 3, 2], &[Selection::Index(1), Selection::Range(0..2)]);
        assert_eq!(region.shape, vec![2, 2]);
        assert_eq!(region.count(), 4);
        assert_eq!(region.contiguous_offset(&[4, 3, 2]), Some(6));

        let strided = Region::resolve(&[4, 3, 2], &[Selection::All, Selection::Index(2)]);
        assert_eq!(strided.shape, vec![4, 2]);
        assert_eq!(strided.contiguous_offset(&[4, 3, 2]), None);
        assert_eq!(strided.runs(&[4, 3, 2]), (vec![4, 10, 16, 22], 2));
    }

    #[test]
    fn signed_selection_wraps() {
        assert_eq!(Selection::from_signed(-1, 5), Selection::Index(4));
        assert_eq!(Selection::from_signed_range(-3, -1, 5), Selection::Range(2..4));
        assert_eq!(Selection::from_signed_range(1, 5, 5), Selection::Range(1..5));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_index() {
        Region::resolve(&[2, 2], &[Selection::Index(2)]);
    }
}
