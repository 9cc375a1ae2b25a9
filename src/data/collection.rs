//! Collection: the blocks of a distributed array that live on this process.
//!
//! A collection is described globally by a [`BoxArray`] (the valid box of every
//! block) and a [`DistributionMap`] (the owner of every block). Each process
//! stores only the blocks it owns, each grown by the collection's ghost width.

use std::collections::BTreeMap;

use crate::data::block::Block;
use crate::data::element::Element;
use crate::geometry::{BoxArray, DistributionMap, IndexBox, IntVect};
use crate::halo_error::BlockHaloError;

/// Locally stored part of a distributed block-structured array.
#[derive(Clone, Debug)]
pub struct Collection<V> {
    boxes: BoxArray,
    dmap: DistributionMap,
    ngrow: IntVect,
    ncomp: usize,
    rank: usize,
    blocks: BTreeMap<usize, Block<V>>,
}

impl<V: Element> Collection<V> {
    /// Allocate zeroed blocks for every index `rank` owns.
    pub fn new(
        boxes: BoxArray,
        dmap: DistributionMap,
        ncomp: usize,
        ngrow: IntVect,
        rank: usize,
    ) -> Result<Self, BlockHaloError> {
        if boxes.len() != dmap.len() {
            return Err(BlockHaloError::GeometryMismatch(format!(
                "{} boxes but distribution map covers {} blocks",
                boxes.len(),
                dmap.len()
            )));
        }
        if ngrow.min_component() < 0 {
            return Err(BlockHaloError::InvalidGeometry(format!(
                "negative ghost width {ngrow:?}"
            )));
        }
        let blocks = dmap
            .local_indices(rank)
            .map(|i| (i, Block::new(boxes.get(i).grow(ngrow), ncomp)))
            .collect();
        Ok(Collection {
            boxes,
            dmap,
            ngrow,
            ncomp,
            rank,
            blocks,
        })
    }

    #[inline]
    pub fn boxes(&self) -> &BoxArray {
        &self.boxes
    }

    #[inline]
    pub fn distribution(&self) -> &DistributionMap {
        &self.dmap
    }

    /// Allocated ghost width.
    #[inline]
    pub fn ngrow(&self) -> IntVect {
        self.ngrow
    }

    #[inline]
    pub fn ncomp(&self) -> usize {
        self.ncomp
    }

    /// Rank this collection view belongs to.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of blocks globally.
    #[inline]
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Valid box of block `i`.
    #[inline]
    pub fn valid_box(&self, i: usize) -> IndexBox {
        self.boxes.get(i)
    }

    /// Stored box (valid grown by the ghost width) of block `i`.
    #[inline]
    pub fn stored_box(&self, i: usize) -> IndexBox {
        self.boxes.get(i).grow(self.ngrow)
    }

    pub fn is_local(&self, i: usize) -> bool {
        self.blocks.contains_key(&i)
    }

    /// Indices of locally stored blocks, ascending.
    pub fn local_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks.keys().copied()
    }

    pub fn block(&self, i: usize) -> Option<&Block<V>> {
        self.blocks.get(&i)
    }

    pub fn block_mut(&mut self, i: usize) -> Option<&mut Block<V>> {
        self.blocks.get_mut(&i)
    }

    pub(crate) fn try_block(&self, i: usize) -> Result<&Block<V>, BlockHaloError> {
        self.blocks.get(&i).ok_or(BlockHaloError::MissingBlock(i))
    }

    pub(crate) fn try_block_mut(&mut self, i: usize) -> Result<&mut Block<V>, BlockHaloError> {
        self.blocks.get_mut(&i).ok_or(BlockHaloError::MissingBlock(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Block<V>)> {
        self.blocks.iter().map(|(&i, b)| (i, b))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Block<V>)> {
        self.blocks.iter_mut().map(|(&i, b)| (i, b))
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut BTreeMap<usize, Block<V>> {
        &mut self.blocks
    }

    /// Set every stored value (valid and ghost) to `v`.
    pub fn set_val(&mut self, v: V) {
        for b in self.blocks.values_mut() {
            b.fill(v);
        }
    }

    /// Fill the valid region of every local block from `f(block, point, comp)`.
    pub fn fill_valid_with<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, IntVect, usize) -> V,
    {
        for (&i, b) in self.blocks.iter_mut() {
            let valid = self.boxes.get(i);
            for n in 0..self.ncomp {
                for p in valid.points() {
                    b.set(p, n, f(i, p, n));
                }
            }
        }
    }

    /// Whether `self` and `other` share box geometry and block ownership.
    pub fn same_layout<W: Element>(&self, other: &Collection<W>) -> bool {
        self.boxes.same_geometry(&other.boxes) && self.dmap.same_assignment(&other.dmap)
    }
}
