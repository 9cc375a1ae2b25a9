//! `IntVect`: a fixed-size integer vector indexing the block lattice.
//!
//! Two-dimensional problems use the first two components and leave the third
//! at zero (boxes then have a unit extent in z).

use std::fmt;
use std::ops::{Add, Index, IndexMut, Neg, Sub};

/// Number of spatial dimensions carried by every index.
pub const SPACEDIM: usize = 3;

/// A point or extent in the integer index space.
#[derive(
    Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct IntVect(pub [i32; SPACEDIM]);

impl IntVect {
    /// All components zero.
    pub const ZERO: IntVect = IntVect([0; SPACEDIM]);
    /// All components one.
    pub const UNIT: IntVect = IntVect([1; SPACEDIM]);

    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        IntVect([x, y, z])
    }

    /// Two-dimensional vector, z component zero.
    #[inline]
    pub const fn new_2d(x: i32, y: i32) -> Self {
        IntVect([x, y, 0])
    }

    #[inline]
    pub const fn splat(v: i32) -> Self {
        IntVect([v; SPACEDIM])
    }

    /// Unit vector scaled by `len` in direction `dir`.
    #[inline]
    pub fn basis(dir: usize, len: i32) -> Self {
        let mut v = IntVect::ZERO;
        v.0[dir] = len;
        v
    }

    #[inline]
    pub fn max_component(&self) -> i32 {
        self.0.iter().copied().max().unwrap_or(0)
    }

    #[inline]
    pub fn min_component(&self) -> i32 {
        self.0.iter().copied().min().unwrap_or(0)
    }

    /// `true` if every component is `<=` the matching component of `other`.
    #[inline]
    pub fn all_le(&self, other: &IntVect) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a <= b)
    }

    /// `true` if every component is `>=` the matching component of `other`.
    #[inline]
    pub fn all_ge(&self, other: &IntVect) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a >= b)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        *self == IntVect::ZERO
    }

    #[inline]
    pub fn component_max(&self, other: &IntVect) -> IntVect {
        IntVect(std::array::from_fn(|d| self.0[d].max(other.0[d])))
    }

    #[inline]
    pub fn component_min(&self, other: &IntVect) -> IntVect {
        IntVect(std::array::from_fn(|d| self.0[d].min(other.0[d])))
    }
}

impl fmt::Debug for IntVect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.0[0], self.0[1], self.0[2])
    }
}

impl Index<usize> for IntVect {
    type Output = i32;
    #[inline]
    fn index(&self, d: usize) -> &i32 {
        &self.0[d]
    }
}

impl IndexMut<usize> for IntVect {
    #[inline]
    fn index_mut(&mut self, d: usize) -> &mut i32 {
        &mut self.0[d]
    }
}

impl Add for IntVect {
    type Output = IntVect;
    #[inline]
    fn add(self, rhs: IntVect) -> IntVect {
        IntVect(std::array::from_fn(|d| self.0[d] + rhs.0[d]))
    }
}

impl Sub for IntVect {
    type Output = IntVect;
    #[inline]
    fn sub(self, rhs: IntVect) -> IntVect {
        IntVect(std::array::from_fn(|d| self.0[d] - rhs.0[d]))
    }
}

impl Neg for IntVect {
    type Output = IntVect;
    #[inline]
    fn neg(self) -> IntVect {
        IntVect(self.0.map(|v| -v))
    }
}

impl From<[i32; SPACEDIM]> for IntVect {
    fn from(v: [i32; SPACEDIM]) -> Self {
        IntVect(v)
    }
}
