//! `BoxArray`: the ordered list of valid boxes of a collection.
//!
//! A `BoxArray` is immutable and cheap to clone; clones share one identity so
//! tag catalogs can key their cache on it without hashing every box.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;

use super::index_box::{IndexBox, IndexType};
use super::int_vect::IntVect;
use crate::halo_error::BlockHaloError;

static NEXT_GEOMETRY_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_geometry_id() -> u64 {
    NEXT_GEOMETRY_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct BoxArrayInner {
    id: u64,
    boxes: Vec<IndexBox>,
    itype: IndexType,
    bounding: OnceCell<IndexBox>,
}

/// Ordered, shared list of same-typed boxes.
#[derive(Clone, Debug)]
pub struct BoxArray {
    inner: Arc<BoxArrayInner>,
}

impl BoxArray {
    /// Build from boxes sharing one index type. Empty boxes are rejected.
    pub fn new(boxes: Vec<IndexBox>) -> Result<Self, BlockHaloError> {
        let itype = boxes.first().map(|b| b.index_type()).unwrap_or_default();
        for (i, b) in boxes.iter().enumerate() {
            if b.is_empty() {
                return Err(BlockHaloError::InvalidGeometry(format!("box {i} is empty")));
            }
            if b.index_type() != itype {
                return Err(BlockHaloError::InvalidGeometry(format!(
                    "box {i} has index type {:?}, expected {itype:?}",
                    b.index_type()
                )));
            }
        }
        Ok(BoxArray {
            inner: Arc::new(BoxArrayInner {
                id: next_geometry_id(),
                boxes,
                itype,
                bounding: OnceCell::new(),
            }),
        })
    }

    /// Chop `domain` into boxes of at most `max_size` points per direction.
    pub fn chop(domain: IndexBox, max_size: IntVect) -> Result<Self, BlockHaloError> {
        if domain.is_empty() {
            return Err(BlockHaloError::InvalidGeometry("domain is empty".into()));
        }
        BoxArray::new(domain.tiles(max_size))
    }

    /// Identity shared by all clones of this array.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.boxes.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> IndexBox {
        self.inner.boxes[i]
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.inner.boxes
    }

    #[inline]
    pub fn index_type(&self) -> IndexType {
        self.inner.itype
    }

    /// Same geometry: same identity, or the same boxes in the same order.
    pub fn same_geometry(&self, other: &BoxArray) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.itype == other.inner.itype && self.inner.boxes == other.inner.boxes)
    }

    /// Smallest box covering every box of the array.
    pub fn bounding_box(&self) -> IndexBox {
        *self.inner.bounding.get_or_init(|| {
            let mut it = self.inner.boxes.iter();
            let Some(first) = it.next() else {
                return IndexBox::empty();
            };
            let (mut lo, mut hi) = (first.lo(), first.hi());
            for b in it {
                lo = lo.component_min(&b.lo());
                hi = hi.component_max(&b.hi());
            }
            IndexBox::with_type(lo, hi, self.inner.itype)
        })
    }

    /// `(index, box ∩ query)` for every box whose `grow`-ed extent meets `query`.
    pub fn intersections(&self, query: &IndexBox, grow: IntVect) -> Vec<(usize, IndexBox)> {
        self.inner
            .boxes
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let isect = b.grow(grow).intersect(query);
                (!isect.is_empty()).then_some((i, isect))
            })
            .collect()
    }
}

impl PartialEq for BoxArray {
    fn eq(&self, other: &Self) -> bool {
        self.same_geometry(other)
    }
}

impl Eq for BoxArray {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chop_covers_domain() {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 31, 7), IntVect::new(8, 8, 1)).unwrap();
        assert_eq!(ba.len(), 4);
        assert_eq!(ba.get(3), IndexBox::new_2d(24, 0, 31, 7));
        assert_eq!(ba.bounding_box(), IndexBox::new_2d(0, 0, 31, 7));
    }

    #[test]
    fn clones_share_identity_and_equal_arrays_compare_equal() {
        let a = BoxArray::new(vec![IndexBox::new_2d(0, 0, 3, 3)]).unwrap();
        let b = a.clone();
        let c = BoxArray::new(vec![IndexBox::new_2d(0, 0, 3, 3)]).unwrap();
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
        assert_eq!(a, c);
    }

    #[test]
    fn rejects_mixed_types_and_empty_boxes() {
        let cell = IndexBox::new_2d(0, 0, 3, 3);
        let node = IndexBox::with_type(cell.lo(), cell.hi(), IndexType::NODE);
        assert!(BoxArray::new(vec![cell, node]).is_err());
        assert!(BoxArray::new(vec![IndexBox::empty()]).is_err());
    }

    #[test]
    fn intersections_with_growth() {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 15, 7), IntVect::new(8, 8, 1)).unwrap();
        let q = IndexBox::new_2d(8, 0, 8, 0);
        let hits = ba.intersections(&q, IntVect::ZERO);
        assert_eq!(hits, vec![(1, q)]);
        let hits = ba.intersections(&q, IntVect::new_2d(1, 1));
        assert_eq!(hits.len(), 2);
    }
}
