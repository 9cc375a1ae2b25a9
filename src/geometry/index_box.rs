//! `IndexBox`: an axis-aligned, inclusive range of lattice indices.
//!
//! A box carries an [`IndexType`] telling, per direction, whether its indices
//! refer to cell centers or nodes. Set operations only make sense between
//! boxes of the same index type; intersecting boxes of different types yields
//! an empty box.
//!
//! Points inside a box are enumerated in column-major ("Fortran") order: `x`
//! varies fastest, then `y`, then `z`. Every dense array in this crate uses the
//! same order.

use std::fmt;

use super::int_vect::{IntVect, SPACEDIM};

/// Cell/node centering of a box, one bit per direction (bit set = node).
#[derive(
    Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct IndexType(u8);

impl IndexType {
    /// Cell-centered in every direction.
    pub const CELL: IndexType = IndexType(0);
    /// Node-centered in every direction.
    pub const NODE: IndexType = IndexType(0b111);

    /// Build from per-direction node flags.
    pub fn from_nodal(nodal: [bool; SPACEDIM]) -> Self {
        let mut bits = 0u8;
        for (d, &n) in nodal.iter().enumerate() {
            if n {
                bits |= 1 << d;
            }
        }
        IndexType(bits)
    }

    #[inline]
    pub fn is_nodal(&self, dir: usize) -> bool {
        self.0 & (1 << dir) != 0
    }

    /// `true` when no direction is nodal.
    #[inline]
    pub fn is_cell_centered(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = |d: usize| if self.is_nodal(d) { 'N' } else { 'C' };
        write!(f, "{}{}{}", c(0), c(1), c(2))
    }
}

/// Inclusive index range `[lo, hi]` in every direction.
#[derive(Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexBox {
    lo: IntVect,
    hi: IntVect,
    itype: IndexType,
}

impl IndexBox {
    /// Cell-centered box with inclusive corners.
    #[inline]
    pub fn new(lo: IntVect, hi: IntVect) -> Self {
        IndexBox {
            lo,
            hi,
            itype: IndexType::CELL,
        }
    }

    #[inline]
    pub fn with_type(lo: IntVect, hi: IntVect, itype: IndexType) -> Self {
        IndexBox { lo, hi, itype }
    }

    /// Cell-centered box starting at `lo` with `size` points per direction.
    pub fn from_size(lo: IntVect, size: IntVect) -> Self {
        IndexBox::new(lo, lo + size - IntVect::UNIT)
    }

    /// Two-dimensional cell box `[x0, x1] x [y0, y1]` with a unit z extent.
    pub fn new_2d(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        IndexBox::new(IntVect::new(x0, y0, 0), IntVect::new(x1, y1, 0))
    }

    /// The canonical empty box.
    pub fn empty() -> Self {
        IndexBox::new(IntVect::ZERO, IntVect::splat(-1))
    }

    #[inline]
    pub fn lo(&self) -> IntVect {
        self.lo
    }

    #[inline]
    pub fn hi(&self) -> IntVect {
        self.hi
    }

    #[inline]
    pub fn index_type(&self) -> IndexType {
        self.itype
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.hi[d] < self.lo[d])
    }

    /// Number of indices along `dir` (zero for an empty box).
    #[inline]
    pub fn length(&self, dir: usize) -> usize {
        (self.hi[dir] - self.lo[dir] + 1).max(0) as usize
    }

    #[inline]
    pub fn size(&self) -> IntVect {
        IntVect(std::array::from_fn(|d| self.length(d) as i32))
    }

    /// Number of points in the box.
    #[inline]
    pub fn num_pts(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (0..SPACEDIM).map(|d| self.length(d)).product()
    }

    /// Same shape (extent per direction), regardless of position.
    #[inline]
    pub fn same_shape(&self, other: &IndexBox) -> bool {
        self.size() == other.size()
    }

    #[inline]
    pub fn contains(&self, p: IntVect) -> bool {
        self.lo.all_le(&p) && p.all_le(&self.hi)
    }

    /// `true` if `other` lies entirely inside `self` (empty boxes are contained everywhere).
    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty()
            || (self.itype == other.itype
                && self.lo.all_le(&other.lo)
                && other.hi.all_le(&self.hi))
    }

    /// Intersection; empty when disjoint or of different index types.
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        if self.itype != other.itype {
            return IndexBox::empty();
        }
        IndexBox {
            lo: self.lo.component_max(&other.lo),
            hi: self.hi.component_min(&other.hi),
            itype: self.itype,
        }
    }

    #[inline]
    pub fn intersects(&self, other: &IndexBox) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Grow by `n` on both sides of every direction.
    pub fn grow(&self, n: IntVect) -> IndexBox {
        IndexBox {
            lo: self.lo - n,
            hi: self.hi + n,
            itype: self.itype,
        }
    }

    /// Grow by `n` on both sides of direction `dir` only.
    pub fn grow_dir(&self, dir: usize, n: i32) -> IndexBox {
        let g = IntVect::basis(dir, n);
        IndexBox {
            lo: self.lo - g,
            hi: self.hi + g,
            itype: self.itype,
        }
    }

    /// Translate by `s`.
    pub fn shift(&self, s: IntVect) -> IndexBox {
        IndexBox {
            lo: self.lo + s,
            hi: self.hi + s,
            itype: self.itype,
        }
    }

    /// Column-major offset of `p` relative to `lo`. `p` must lie inside the box.
    #[inline]
    pub fn offset_of(&self, p: IntVect) -> usize {
        let nx = self.length(0);
        let ny = self.length(1);
        let i = (p[0] - self.lo[0]) as usize;
        let j = (p[1] - self.lo[1]) as usize;
        let k = (p[2] - self.lo[2]) as usize;
        i + nx * (j + ny * k)
    }

    /// Row starts `(y, z)` in column-major order; every row spans `lo.x..=hi.x`.
    pub fn rows(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let (y0, y1, z0, z1) = (self.lo[1], self.hi[1], self.lo[2], self.hi[2]);
        let empty = self.is_empty();
        (z0..=z1)
            .flat_map(move |k| (y0..=y1).map(move |j| (j, k)))
            .filter(move |_| !empty)
    }

    /// All points in column-major order.
    pub fn points(&self) -> impl Iterator<Item = IntVect> + '_ {
        let (x0, x1) = (self.lo[0], self.hi[0]);
        self.rows()
            .flat_map(move |(j, k)| (x0..=x1).map(move |i| IntVect::new(i, j, k)))
    }

    /// Split into tiles of at most `tile` points per direction, in column-major tile order.
    pub fn tiles(&self, tile: IntVect) -> Vec<IndexBox> {
        if self.is_empty() {
            return Vec::new();
        }
        let step: [i32; SPACEDIM] = std::array::from_fn(|d| tile[d].max(1));
        let starts = |d: usize| (self.lo[d]..=self.hi[d]).step_by(step[d] as usize);
        let mut out = Vec::new();
        for z in starts(2) {
            for y in starts(1) {
                for x in starts(0) {
                    let lo = IntVect::new(x, y, z);
                    let hi = IntVect(std::array::from_fn(|d| (lo[d] + step[d] - 1).min(self.hi[d])));
                    out.push(IndexBox::with_type(lo, hi, self.itype));
                }
            }
        }
        out
    }
}

impl Default for IndexBox {
    fn default() -> Self {
        IndexBox::empty()
    }
}

impl fmt::Debug for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}..{:?} {:?}]", self.lo, self.hi, self.itype)
    }
}
