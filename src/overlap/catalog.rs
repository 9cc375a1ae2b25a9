//! Memoized tag-set construction.
//!
//! Building the tags of a configuration is a pure function of the geometry,
//! ownership, ghost widths, periodicity and fill flags. The catalog computes
//! each configuration once per process and hands out shared [`TagSet`]s.
//! Geometries are keyed by identity, so two equal but separately built box
//! arrays get separate entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};

use crate::debug_invariants::DebugInvariants;
use crate::geometry::{BoxArray, DistributionMap, IndexBox, IntVect, Periodicity, SPACEDIM};
use crate::overlap::tags::{Tag, TagSet};

/// Identity of a memoized tag configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagKey {
    Fill {
        boxes: u64,
        dmap: u64,
        ghost: IntVect,
        period: Periodicity,
        cross: bool,
        periodic_only: bool,
    },
    Copy {
        dst_boxes: u64,
        dst_dmap: u64,
        dst_ghost: IntVect,
        src_boxes: u64,
        src_dmap: u64,
        src_ghost: IntVect,
        period: Periodicity,
    },
    Redistribute {
        boxes: u64,
        dst_dmap: u64,
        src_dmap: u64,
        ghost: IntVect,
    },
}

/// Hit/miss counters of a [`TagCatalog`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub hits: u64,
    pub misses: u64,
}

/// Per-process cache of classified tag sets.
#[derive(Debug)]
pub struct TagCatalog {
    rank: usize,
    cache: DashMap<TagKey, Arc<TagSet>, ahash::RandomState>,
    built: DashSet<TagKey, ahash::RandomState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TagCatalog {
    pub fn new(rank: usize) -> Self {
        TagCatalog {
            rank,
            cache: DashMap::with_hasher(ahash::RandomState::new()),
            built: DashSet::with_hasher(ahash::RandomState::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Tags filling the ghost region of width `ghost` of a collection from its own valid data.
    pub fn fill_boundary_tags(
        &self,
        boxes: &BoxArray,
        dmap: &DistributionMap,
        ghost: IntVect,
        period: &Periodicity,
        cross: bool,
        periodic_only: bool,
    ) -> Arc<TagSet> {
        let key = TagKey::Fill {
            boxes: boxes.id(),
            dmap: dmap.id(),
            ghost,
            period: *period,
            cross,
            periodic_only,
        };
        self.lookup(key, || {
            let tags = fill_tags(boxes, ghost, period, cross, periodic_only);
            TagSet::classify(tags, dmap, dmap, self.rank)
        })
    }

    /// Tags copying the grown source blocks into the grown destination blocks.
    #[allow(clippy::too_many_arguments)]
    pub fn parallel_copy_tags(
        &self,
        dst_boxes: &BoxArray,
        dst_dmap: &DistributionMap,
        dst_ghost: IntVect,
        src_boxes: &BoxArray,
        src_dmap: &DistributionMap,
        src_ghost: IntVect,
        period: &Periodicity,
    ) -> Arc<TagSet> {
        let key = TagKey::Copy {
            dst_boxes: dst_boxes.id(),
            dst_dmap: dst_dmap.id(),
            dst_ghost,
            src_boxes: src_boxes.id(),
            src_dmap: src_dmap.id(),
            src_ghost,
            period: *period,
        };
        self.lookup(key, || {
            let tags = copy_tags(dst_boxes, dst_ghost, src_boxes, src_ghost, period);
            TagSet::classify(tags, src_dmap, dst_dmap, self.rank)
        })
    }

    /// Tags moving each grown block from its source owner to its destination owner.
    pub fn redistribute_tags(
        &self,
        boxes: &BoxArray,
        dst_dmap: &DistributionMap,
        src_dmap: &DistributionMap,
        ghost: IntVect,
    ) -> Arc<TagSet> {
        let key = TagKey::Redistribute {
            boxes: boxes.id(),
            dst_dmap: dst_dmap.id(),
            src_dmap: src_dmap.id(),
            ghost,
        };
        self.lookup(key, || {
            let tags = boxes
                .boxes()
                .iter()
                .enumerate()
                .map(|(i, b)| Tag::new(i, i, b.grow(ghost), IntVect::ZERO));
            TagSet::classify(tags, src_dmap, dst_dmap, self.rank)
        })
    }

    fn lookup<F>(&self, key: TagKey, build: F) -> Arc<TagSet>
    where
        F: FnOnce() -> TagSet,
    {
        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(hit.value());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        if !self.built.insert(key.clone()) {
            log::warn!("[catalog] rank {} rebuilding {:?} after clear", self.rank, key);
        }
        let built = build();
        built.debug_assert_invariants();
        log::debug!(
            "[catalog] rank {} built {:?}: {} local, {} send peers, {} recv peers",
            self.rank,
            key,
            built.local_tags().len(),
            built.send_tags().len(),
            built.recv_tags().len()
        );
        Arc::clone(self.cache.entry(key).or_insert_with(|| Arc::new(built)).value())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Rank the catalog classifies tags for.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Forget every memoized tag set.
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Global fill tags in deterministic order: destination block, then shift, then source block.
///
/// With `cross`, only the faces of each destination are filled: the grown
/// region is the union of the box grown in one direction at a time.
pub fn fill_tags(
    boxes: &BoxArray,
    ghost: IntVect,
    period: &Periodicity,
    cross: bool,
    periodic_only: bool,
) -> Vec<Tag> {
    let shifts = period.shifts();
    let mut out = Vec::new();
    for (j, bj) in boxes.boxes().iter().enumerate() {
        let regions: Vec<IndexBox> = if cross {
            (0..SPACEDIM)
                .filter(|&d| ghost[d] > 0)
                .map(|d| bj.grow_dir(d, ghost[d]))
                .collect()
        } else {
            vec![bj.grow(ghost)]
        };
        let first = out.len();
        for &s in &shifts {
            if periodic_only && s.is_zero() {
                continue;
            }
            for (i, bi) in boxes.boxes().iter().enumerate() {
                if i == j && s.is_zero() {
                    continue;
                }
                let image = bi.shift(s);
                for region in &regions {
                    let dbox = region.intersect(&image);
                    if dbox.is_empty() {
                        continue;
                    }
                    let tag = Tag::new(i, j, dbox, s);
                    // cross faces share the valid box; keep one copy of a repeated overlap
                    if !out[first..].contains(&tag) {
                        out.push(tag);
                    }
                }
            }
        }
    }
    out
}

/// Global copy tags: grown destination `j` against grown source `i` shifted by each period image.
pub fn copy_tags(
    dst_boxes: &BoxArray,
    dst_ghost: IntVect,
    src_boxes: &BoxArray,
    src_ghost: IntVect,
    period: &Periodicity,
) -> Vec<Tag> {
    let shifts = period.shifts();
    let mut out = Vec::new();
    for (j, bj) in dst_boxes.boxes().iter().enumerate() {
        let region = bj.grow(dst_ghost);
        for &s in &shifts {
            for (i, bi) in src_boxes.boxes().iter().enumerate() {
                let dbox = region.intersect(&bi.grow(src_ghost).shift(s));
                if !dbox.is_empty() {
                    out.push(Tag::new(i, j, dbox, s));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row() -> BoxArray {
        BoxArray::chop(IndexBox::new_2d(0, 0, 31, 7), IntVect::new(8, 8, 1)).unwrap()
    }

    #[test]
    fn fill_tags_cover_ghost_faces() {
        let ba = row();
        let tags = fill_tags(&ba, IntVect::new_2d(1, 1), &Periodicity::non_periodic(), false, false);
        // interior blocks get a left and a right neighbour column, end blocks one
        assert_eq!(tags.len(), 6);
        assert!(tags.iter().all(|t| t.num_pts() == 8));
        let t = tags.iter().find(|t| t.dst_index == 0).unwrap();
        assert_eq!(t.src_index, 1);
        assert_eq!(t.dbox, IndexBox::new_2d(8, 0, 8, 7));
    }

    #[test]
    fn periodic_fill_wraps() {
        let ba = row();
        let domain = IndexBox::new_2d(0, 0, 31, 7);
        let period = Periodicity::new(&domain, [true, false, false]);
        let all = fill_tags(&ba, IntVect::new_2d(1, 0), &period, false, false);
        assert_eq!(all.len(), 8);
        let wrapped = fill_tags(&ba, IntVect::new_2d(1, 0), &period, false, true);
        assert_eq!(wrapped.len(), 2);
        let left = wrapped.iter().find(|t| t.dst_index == 0).unwrap();
        assert_eq!(left.src_index, 3);
        assert_eq!(left.dbox, IndexBox::new_2d(-1, 0, -1, 7));
        assert_eq!(left.sbox, IndexBox::new_2d(31, 0, 31, 7));
    }

    #[test]
    fn cross_skips_corners() {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 15, 15), IntVect::new(8, 8, 1)).unwrap();
        let full = fill_tags(&ba, IntVect::new_2d(1, 1), &Periodicity::non_periodic(), false, false);
        let cross = fill_tags(&ba, IntVect::new_2d(1, 1), &Periodicity::non_periodic(), true, false);
        // the diagonal neighbour only contributes a corner
        assert!(full.iter().any(|t| t.num_pts() == 1));
        assert!(cross.iter().all(|t| t.num_pts() == 8));
        assert_eq!(cross.len(), 8);
    }

    #[test]
    fn catalog_memoizes() {
        let ba = row();
        let dm = DistributionMap::round_robin(4, 2);
        let cat = TagCatalog::new(0);
        let p = Periodicity::non_periodic();
        let a = cat.fill_boundary_tags(&ba, &dm, IntVect::new_2d(1, 1), &p, false, false);
        let b = cat.fill_boundary_tags(&ba, &dm, IntVect::new_2d(1, 1), &p, false, false);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cat.stats(), CatalogStats { hits: 1, misses: 1 });
        let _ = cat.fill_boundary_tags(&ba, &dm, IntVect::new_2d(1, 0), &p, false, false);
        assert_eq!(cat.len(), 2);
        cat.clear();
        assert!(cat.is_empty());
    }

    #[test]
    fn copy_tags_between_layouts() {
        let fine = row();
        let coarse = BoxArray::new(vec![IndexBox::new_2d(0, 0, 31, 7)]).unwrap();
        let tags = copy_tags(&coarse, IntVect::ZERO, &fine, IntVect::ZERO, &Periodicity::non_periodic());
        assert_eq!(tags.len(), 4);
        assert!(tags.iter().all(|t| t.dst_index == 0 && t.sbox == t.dbox));
    }

    proptest! {
        #[test]
        fn periodic_fill_covers_each_ghost_once(mx in 1i32..13, my in 1i32..9) {
            let domain = IndexBox::new_2d(0, 0, 23, 15);
            let ba = BoxArray::chop(domain, IntVect::new(mx, my, 1)).unwrap();
            let period = Periodicity::new(&domain, [true, true, false]);
            let ghost = IntVect::new_2d(1, 1);
            let tags = fill_tags(&ba, ghost, &period, false, false);
            for (j, bj) in ba.boxes().iter().enumerate() {
                let mut hits = std::collections::HashMap::new();
                for t in tags.iter().filter(|t| t.dst_index == j) {
                    prop_assert!(!t.dbox.intersects(bj));
                    for p in t.dbox.points() {
                        *hits.entry(p).or_insert(0usize) += 1;
                    }
                }
                prop_assert_eq!(hits.len(), bj.grow(ghost).num_pts() - bj.num_pts());
                prop_assert!(hits.values().all(|&n| n == 1));
            }
        }
    }
}
