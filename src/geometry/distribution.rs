//! `DistributionMap`: which process owns each block.

use std::sync::Arc;

use super::box_array::next_geometry_id;
use crate::halo_error::BlockHaloError;

/// Block index → owning rank. Clones share one identity.
#[derive(Clone, Debug)]
pub struct DistributionMap {
    id: u64,
    ranks: Arc<[usize]>,
}

impl DistributionMap {
    /// Explicit owner list.
    pub fn from_ranks(ranks: Vec<usize>) -> Self {
        DistributionMap {
            id: next_geometry_id(),
            ranks: ranks.into(),
        }
    }

    /// Block `i` is owned by rank `i % nprocs`.
    pub fn round_robin(nblocks: usize, nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        Self::from_ranks((0..nblocks).map(|i| i % nprocs).collect())
    }

    /// Contiguous runs of blocks per rank, as even as possible.
    pub fn contiguous(nblocks: usize, nprocs: usize) -> Self {
        let nprocs = nprocs.max(1);
        let base = nblocks / nprocs;
        let rem = nblocks % nprocs;
        let mut ranks = Vec::with_capacity(nblocks);
        for r in 0..nprocs {
            let n = base + usize::from(r < rem);
            ranks.extend(std::iter::repeat_n(r, n));
        }
        Self::from_ranks(ranks)
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    #[inline]
    pub fn owner(&self, block: usize) -> usize {
        self.ranks[block]
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Indices of the blocks owned by `rank`, ascending.
    pub fn local_indices(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.ranks
            .iter()
            .enumerate()
            .filter(move |&(_, &r)| r == rank)
            .map(|(i, _)| i)
    }

    /// Same assignment of blocks to ranks.
    pub fn same_assignment(&self, other: &DistributionMap) -> bool {
        Arc::ptr_eq(&self.ranks, &other.ranks) || self.ranks == other.ranks
    }

    /// Reject owners outside `0..nprocs`.
    pub fn check_ranks(&self, nprocs: usize) -> Result<(), BlockHaloError> {
        match self.ranks.iter().position(|&r| r >= nprocs) {
            Some(i) => Err(BlockHaloError::InvalidGeometry(format!(
                "block {i} is owned by rank {} but only {nprocs} processes exist",
                self.ranks[i]
            ))),
            None => Ok(()),
        }
    }
}

impl PartialEq for DistributionMap {
    fn eq(&self, other: &Self) -> bool {
        self.same_assignment(other)
    }
}

impl Eq for DistributionMap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_and_contiguous() {
        let rr = DistributionMap::round_robin(5, 2);
        assert_eq!(rr.ranks(), &[0, 1, 0, 1, 0]);
        assert_eq!(rr.local_indices(1).collect::<Vec<_>>(), vec![1, 3]);
        let c = DistributionMap::contiguous(5, 2);
        assert_eq!(c.ranks(), &[0, 0, 0, 1, 1]);
        assert_ne!(rr, c);
    }

    #[test]
    fn check_ranks_rejects_out_of_range_owner() {
        let dm = DistributionMap::from_ranks(vec![0, 3]);
        assert!(dm.check_ranks(4).is_ok());
        assert!(dm.check_ranks(2).is_err());
    }
}
