//! Tags and tag sets: the atomic transfers of a fill or copy.
//!
//! A [`Tag`] moves one sub-box of a source block into a destination block,
//! possibly across a periodic boundary. A [`TagSet`] groups the tags of one
//! configuration as seen from one process: tags whose source and destination
//! both live here, tags this process must send (by destination rank), and tags
//! it must receive (by source rank).
//!
//! Per-peer lists keep the global tag order, so the sender packs exactly the
//! sequence the receiver unpacks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::debug_invariants::DebugInvariants;
use crate::geometry::{BoxArray, DistributionMap, IndexBox, IntVect};
use crate::halo_error::BlockHaloError;

static NEXT_TAGSET_ID: AtomicU64 = AtomicU64::new(1);

/// One atomic sub-box transfer: `dbox = sbox + shift`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag {
    pub src_index: usize,
    pub dst_index: usize,
    pub sbox: IndexBox,
    pub dbox: IndexBox,
    pub shift: IntVect,
}

impl Tag {
    /// Tag filling `dbox` of `dst_index` from the image of `src_index` shifted by `shift`.
    pub fn new(src_index: usize, dst_index: usize, dbox: IndexBox, shift: IntVect) -> Self {
        Tag {
            src_index,
            dst_index,
            sbox: dbox.shift(-shift),
            dbox,
            shift,
        }
    }

    #[inline]
    pub fn num_pts(&self) -> usize {
        self.dbox.num_pts()
    }

    fn check(&self) -> Result<(), BlockHaloError> {
        if self.dbox.is_empty() {
            return Err(BlockHaloError::InvalidTag(format!("{self:?} has an empty box")));
        }
        if !self.sbox.same_shape(&self.dbox) || self.sbox.shift(self.shift) != self.dbox {
            return Err(BlockHaloError::InvalidTag(format!(
                "{self:?}: destination is not the shifted source"
            )));
        }
        Ok(())
    }
}

/// Tags of one configuration, classified for one process.
#[derive(Debug)]
pub struct TagSet {
    id: u64,
    rank: usize,
    local: Vec<Tag>,
    send: BTreeMap<usize, Vec<Tag>>,
    recv: BTreeMap<usize, Vec<Tag>>,
    thread_safe_unpack: bool,
    thread_safe_local: bool,
}

impl TagSet {
    /// Classify global tags by the owners of their source and destination blocks.
    pub fn classify<I>(tags: I, src_dmap: &DistributionMap, dst_dmap: &DistributionMap, rank: usize) -> Self
    where
        I: IntoIterator<Item = Tag>,
    {
        let mut local = Vec::new();
        let mut send: BTreeMap<usize, Vec<Tag>> = BTreeMap::new();
        let mut recv: BTreeMap<usize, Vec<Tag>> = BTreeMap::new();
        for tag in tags {
            let so = src_dmap.owner(tag.src_index);
            let dst_owner = dst_dmap.owner(tag.dst_index);
            match (so == rank, dst_owner == rank) {
                (true, true) => local.push(tag),
                (true, false) => send.entry(dst_owner).or_default().push(tag),
                (false, true) => recv.entry(so).or_default().push(tag),
                (false, false) => {}
            }
        }
        let thread_safe_unpack = no_destination_overlap(recv.values().flatten());
        let thread_safe_local = no_destination_overlap(local.iter());
        TagSet {
            id: NEXT_TAGSET_ID.fetch_add(1, Ordering::Relaxed),
            rank,
            local,
            send,
            recv,
            thread_safe_unpack,
            thread_safe_local,
        }
    }

    /// Unique identity, used to key captured kernel graphs.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Rank the set was classified for.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn local_tags(&self) -> &[Tag] {
        &self.local
    }

    pub fn send_tags(&self) -> &BTreeMap<usize, Vec<Tag>> {
        &self.send
    }

    pub fn recv_tags(&self) -> &BTreeMap<usize, Vec<Tag>> {
        &self.recv
    }

    /// No two received tags write overlapping destination points of one block.
    #[inline]
    pub fn thread_safe_unpack(&self) -> bool {
        self.thread_safe_unpack
    }

    /// No two local tags write overlapping destination points of one block.
    #[inline]
    pub fn thread_safe_local(&self) -> bool {
        self.thread_safe_local
    }

    /// Nothing to copy, send or receive on this process.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.send.is_empty() && self.recv.is_empty()
    }

    /// Check every tag against the stored extents of both collections.
    pub fn validate_against(
        &self,
        src_boxes: &BoxArray,
        src_grow: IntVect,
        dst_boxes: &BoxArray,
        dst_grow: IntVect,
    ) -> Result<(), BlockHaloError> {
        let all = self
            .local
            .iter()
            .chain(self.send.values().flatten())
            .chain(self.recv.values().flatten());
        for t in all {
            t.check()?;
            if t.src_index >= src_boxes.len() || t.dst_index >= dst_boxes.len() {
                return Err(BlockHaloError::InvalidTag(format!("{t:?}: block index out of range")));
            }
            if !src_boxes.get(t.src_index).grow(src_grow).contains_box(&t.sbox) {
                return Err(BlockHaloError::InvalidTag(format!(
                    "{t:?}: source box outside stored extent"
                )));
            }
            if !dst_boxes.get(t.dst_index).grow(dst_grow).contains_box(&t.dbox) {
                return Err(BlockHaloError::InvalidTag(format!(
                    "{t:?}: destination box outside stored extent"
                )));
            }
        }
        Ok(())
    }
}

impl DebugInvariants for TagSet {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "TagSet");
    }

    fn validate_invariants(&self) -> Result<(), BlockHaloError> {
        for t in &self.local {
            t.check()?;
        }
        for (&peer, tags) in self.send.iter().chain(self.recv.iter()) {
            if peer == self.rank {
                return Err(BlockHaloError::InvalidTag(format!(
                    "rank {peer} listed as its own remote peer"
                )));
            }
            if tags.is_empty() {
                return Err(BlockHaloError::InvalidTag(format!("empty tag list for peer {peer}")));
            }
            for t in tags {
                t.check()?;
            }
        }
        Ok(())
    }
}

/// `true` unless two tags write overlapping points of the same destination block.
fn no_destination_overlap<'a, I>(tags: I) -> bool
where
    I: Iterator<Item = &'a Tag>,
{
    let mut by_dst: BTreeMap<usize, Vec<IndexBox>> = BTreeMap::new();
    for t in tags {
        by_dst.entry(t.dst_index).or_default().push(t.dbox);
    }
    by_dst.values().all(|boxes| {
        boxes
            .iter()
            .enumerate()
            .all(|(a, ba)| boxes[a + 1..].iter().all(|bb| !ba.intersects(bb)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_owner() {
        let dm = DistributionMap::from_ranks(vec![0, 1, 0]);
        let b = IndexBox::new_2d(0, 0, 0, 3);
        let tags = vec![
            Tag::new(0, 2, b, IntVect::ZERO),
            Tag::new(1, 0, b, IntVect::ZERO),
            Tag::new(2, 1, b, IntVect::ZERO),
            Tag::new(1, 1, b.shift(IntVect::new_2d(1, 0)), IntVect::ZERO),
        ];
        let ts = TagSet::classify(tags, &dm, &dm, 0);
        assert_eq!(ts.local_tags().len(), 1);
        assert_eq!(ts.recv_tags()[&1].len(), 1);
        assert_eq!(ts.send_tags()[&1].len(), 1);
        assert!(ts.validate_invariants().is_ok());
        assert!(ts.thread_safe_unpack());
    }

    #[test]
    fn overlapping_destinations_are_not_thread_safe() {
        let dm = DistributionMap::from_ranks(vec![1, 1, 0]);
        let tags = vec![
            Tag::new(0, 2, IndexBox::new_2d(0, 0, 2, 0), IntVect::ZERO),
            Tag::new(1, 2, IndexBox::new_2d(2, 0, 4, 0), IntVect::ZERO),
        ];
        let ts = TagSet::classify(tags, &dm, &dm, 0);
        assert!(!ts.thread_safe_unpack());
        assert!(ts.thread_safe_local());
    }

    #[test]
    fn shifted_tag_boxes() {
        let t = Tag::new(3, 0, IndexBox::new_2d(-1, 0, -1, 7), IntVect::new_2d(-32, 0));
        assert_eq!(t.sbox, IndexBox::new_2d(31, 0, 31, 7));
        assert!(t.check().is_ok());
    }
}
