//! Copy between two collections with arbitrary box layouts.
//!
//! Every destination point (valid, or within `dst_ghost`) covered by a source
//! point (valid, or within `src_ghost`, or a periodic image of either) takes
//! the source value under the chosen [`CopyOp`]. Multi-component transfers are
//! split into passes of at most [`HaloConfig::max_comp`](crate::config::HaloConfig)
//! components to bound the scratch memory of a single exchange.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::algs::communicator::Communicator;
use crate::algs::exchange::session::{Session, SessionTags};
use crate::algs::exec::Window;
use crate::context::HaloContext;
use crate::data::{Block, Collection, Element};
use crate::geometry::{IndexBox, IntVect, Periodicity};
use crate::halo_error::{BlockHaloError, check_component_window};
use crate::overlap::delta::CopyOp;
use crate::overlap::tags::TagSet;

/// Component window, ghost widths, periodicity and operator of a copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CopySpec {
    pub scomp: usize,
    pub dcomp: usize,
    pub ncomp: usize,
    pub src_ghost: IntVect,
    pub dst_ghost: IntVect,
    pub period: Periodicity,
    pub op: CopyOp,
}

impl CopySpec {
    /// Overwrite of valid regions, no periodicity.
    pub fn new(scomp: usize, dcomp: usize, ncomp: usize) -> Self {
        CopySpec {
            scomp,
            dcomp,
            ncomp,
            src_ghost: IntVect::ZERO,
            dst_ghost: IntVect::ZERO,
            period: Periodicity::default(),
            op: CopyOp::Overwrite,
        }
    }

    pub fn with_ghosts(mut self, src_ghost: IntVect, dst_ghost: IntVect) -> Self {
        self.src_ghost = src_ghost;
        self.dst_ghost = dst_ghost;
        self
    }

    pub fn with_period(mut self, period: Periodicity) -> Self {
        self.period = period;
        self
    }

    pub fn with_op(mut self, op: CopyOp) -> Self {
        self.op = op;
        self
    }
}

fn check_ghost<V: Element>(ghost: IntVect, coll: &Collection<V>) -> Result<(), BlockHaloError> {
    if ghost.min_component() < 0 {
        return Err(BlockHaloError::InvalidGeometry(format!(
            "negative ghost width {ghost:?}"
        )));
    }
    if !ghost.all_le(&coll.ngrow()) {
        return Err(BlockHaloError::GhostTooWide {
            requested: ghost,
            allocated: coll.ngrow(),
        });
    }
    Ok(())
}

/// Split `[0, ncomp)` into consecutive `(start, len)` ranges of at most `max` components.
pub(crate) fn component_chunks(ncomp: usize, max: usize) -> impl Iterator<Item = (usize, usize)> {
    let max = max.max(1);
    (0..ncomp).step_by(max).map(move |start| (start, max.min(ncomp - start)))
}

/// Copy `src` into `dst` according to `spec`.
///
/// A caller that repeats the same copy may pass the tag set it obtained from
/// [`TagCatalog::parallel_copy_tags`](crate::overlap::catalog::TagCatalog::parallel_copy_tags)
/// as `precomputed` to skip the catalog lookup.
pub fn parallel_copy<C, V>(
    ctx: &HaloContext<C>,
    dst: &mut Collection<V>,
    src: &Collection<V>,
    spec: CopySpec,
    precomputed: Option<&TagSet>,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    let (dtype, stype) = (dst.boxes().index_type(), src.boxes().index_type());
    if dtype != stype {
        return Err(BlockHaloError::IndexTypeMismatch {
            dst: dtype,
            src: stype,
        });
    }
    check_ghost(spec.src_ghost, src)?;
    check_ghost(spec.dst_ghost, dst)?;
    check_component_window(spec.scomp, spec.ncomp, src.ncomp())?;
    check_component_window(spec.dcomp, spec.ncomp, dst.ncomp())?;
    src.distribution().check_ranks(ctx.nprocs())?;
    dst.distribution().check_ranks(ctx.nprocs())?;

    if spec.ncomp == 0 || dst.boxes().is_empty() || src.boxes().is_empty() {
        return Ok(());
    }

    let fast = dst.same_layout(src)
        && spec.src_ghost.is_zero()
        && spec.dst_ghost.is_zero()
        && !spec.period.is_any_periodic()
        && (spec.op == CopyOp::Overwrite || dtype.is_cell_centered());
    if fast {
        log::trace!("[parallel_copy] rank {} same layout, tile copy", ctx.rank());
        let win = Window::new(spec.scomp, spec.dcomp, spec.ncomp);
        let boxes = dst.boxes().clone();
        return tile_copy(dst, src, |i| boxes.get(i), win, spec.op, ctx.config().tile_size);
    }

    let precomputed = precomputed.filter(|t| {
        let ok = t.rank() == ctx.rank();
        if !ok {
            log::warn!(
                "[parallel_copy] precomputed tag set {} belongs to rank {}, not {}; ignoring it",
                t.id(),
                t.rank(),
                ctx.rank()
            );
        }
        ok
    });
    let tags: SessionTags<'_> = match precomputed {
        Some(t) => {
            t.validate_against(src.boxes(), src.ngrow(), dst.boxes(), dst.ngrow())?;
            t.into()
        }
        None => ctx
            .catalog()
            .parallel_copy_tags(
                dst.boxes(),
                dst.distribution(),
                spec.dst_ghost,
                src.boxes(),
                src.distribution(),
                spec.src_ghost,
                &spec.period,
            )
            .into(),
    };
    run_passes(ctx, dst, src, &tags, Window::new(spec.scomp, spec.dcomp, spec.ncomp), spec.op)
}

/// Copy the grown blocks of `src` into `dst`, which has the same boxes but a
/// different distribution.
pub fn redistribute<C, V>(
    ctx: &HaloContext<C>,
    dst: &mut Collection<V>,
    src: &Collection<V>,
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    ghost: IntVect,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    if !dst.boxes().same_geometry(src.boxes()) {
        return Err(BlockHaloError::GeometryMismatch(
            "redistribute needs identical box arrays".into(),
        ));
    }
    check_ghost(ghost, src)?;
    check_ghost(ghost, dst)?;
    check_component_window(scomp, ncomp, src.ncomp())?;
    check_component_window(dcomp, ncomp, dst.ncomp())?;
    src.distribution().check_ranks(ctx.nprocs())?;
    dst.distribution().check_ranks(ctx.nprocs())?;

    if ncomp == 0 || src.boxes().is_empty() {
        return Ok(());
    }
    let win = Window::new(scomp, dcomp, ncomp);
    if ctx.nprocs() == 1 {
        let boxes = src.boxes().clone();
        return tile_copy(
            dst,
            src,
            |i| boxes.get(i).grow(ghost),
            win,
            CopyOp::Overwrite,
            ctx.config().tile_size,
        );
    }
    let tags = ctx
        .catalog()
        .redistribute_tags(src.boxes(), dst.distribution(), src.distribution(), ghost);
    run_passes(ctx, dst, src, &tags, win, CopyOp::Overwrite)
}

/// Run the full exchange once per component chunk.
fn run_passes<C, V>(
    ctx: &HaloContext<C>,
    dst: &mut Collection<V>,
    src: &Collection<V>,
    tags: &TagSet,
    win: Window,
    op: CopyOp,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    for (start, len) in component_chunks(win.ncomp, ctx.config().max_comp) {
        let seq = ctx.comm().next_sequence();
        if tags.is_empty() {
            continue;
        }
        let chunk = Window::new(win.scomp + start, win.dcomp + start, len);
        log::trace!(
            "[parallel_copy] rank {} seq {:?}: components {}..{}",
            ctx.rank(),
            seq,
            start,
            start + len
        );
        let mut session = Session::start(ctx, seq, tags, src, chunk)?;
        session.local_between(src, dst, op)?;
        session.finish(dst, op)?;
    }
    Ok(())
}

/// Copy `region(i)` of every local block of `src` into the block of `dst`
/// with the same index, one tile at a time.
fn tile_copy<V, F>(
    dst: &mut Collection<V>,
    src: &Collection<V>,
    region: F,
    win: Window,
    op: CopyOp,
    tile: IntVect,
) -> Result<(), BlockHaloError>
where
    V: Element,
    F: Fn(usize) -> IndexBox + Sync,
{
    let copy_block = |i: usize, d: &mut Block<V>| -> Result<(), BlockHaloError> {
        let s = src.try_block(i)?;
        for t in region(i).tiles(tile) {
            d.copy_from(s, &t, win.scomp, &t, win.dcomp, win.ncomp, op)?;
        }
        Ok(())
    };
    #[cfg(feature = "rayon")]
    {
        dst.blocks_mut()
            .par_iter_mut()
            .try_for_each(|(&i, d)| copy_block(i, d))
    }
    #[cfg(not(feature = "rayon"))]
    {
        dst.blocks_mut().iter_mut().try_for_each(|(&i, d)| copy_block(i, d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::config::HaloConfig;
    use crate::geometry::{BoxArray, DistributionMap};
    use proptest::prelude::*;

    fn ramp(ba: BoxArray, ncomp: usize, ngrow: IntVect) -> Collection<f64> {
        let n = ba.len();
        let mut c = Collection::new(ba, DistributionMap::from_ranks(vec![0; n]), ncomp, ngrow, 0).unwrap();
        c.fill_valid_with(|_, p, n| (p[0] * 100 + p[1] + n as i32 * 10_000) as f64);
        c
    }

    proptest! {
        #[test]
        fn chunks_cover_the_range_in_order(ncomp in 0usize..64, max in 0usize..16) {
            let chunks: Vec<_> = component_chunks(ncomp, max).collect();
            let mut next = 0;
            for &(start, len) in &chunks {
                prop_assert_eq!(start, next);
                prop_assert!(len >= 1 && len <= max.max(1));
                next += len;
            }
            prop_assert_eq!(next, ncomp);
        }
    }

    #[test]
    fn chunks_of_four() {
        assert_eq!(component_chunks(10, 4).collect::<Vec<_>>(), vec![(0, 4), (4, 4), (8, 2)]);
    }

    #[test]
    fn copies_across_different_layouts() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let domain = IndexBox::new_2d(0, 0, 15, 7);
        let src = ramp(BoxArray::chop(domain, IntVect::new(8, 8, 1)).unwrap(), 1, IntVect::ZERO);
        let dba = BoxArray::chop(domain, IntVect::new(4, 4, 1)).unwrap();
        let mut dst = Collection::<f64>::new(dba.clone(), DistributionMap::from_ranks(vec![0; dba.len()]), 1, IntVect::ZERO, 0)
            .unwrap();
        parallel_copy(&ctx, &mut dst, &src, CopySpec::new(0, 0, 1), None).unwrap();
        for (i, b) in dst.iter() {
            for p in dba.get(i).points() {
                assert_eq!(b.get(p, 0), (p[0] * 100 + p[1]) as f64);
            }
        }
        assert_eq!(ctx.arena().stats().outstanding, 0);
    }

    #[test]
    fn chunked_and_single_pass_agree() {
        let domain = IndexBox::new_2d(0, 0, 15, 7);
        let src = ramp(BoxArray::chop(domain, IntVect::new(8, 8, 1)).unwrap(), 10, IntVect::ZERO);
        let dba = BoxArray::chop(domain, IntVect::new(4, 8, 1)).unwrap();
        let blank = Collection::<f64>::new(dba.clone(), DistributionMap::from_ranks(vec![0; dba.len()]), 10, IntVect::ZERO, 0)
            .unwrap();

        let mut one = blank.clone();
        let wide = HaloContext::with_defaults(NoComm::default());
        parallel_copy(&wide, &mut one, &src, CopySpec::new(0, 0, 10), None).unwrap();

        let mut chunked = blank;
        let narrow = HaloContext::new(NoComm::default(), HaloConfig::default().with_max_comp(4));
        parallel_copy(&narrow, &mut chunked, &src, CopySpec::new(0, 0, 10), None).unwrap();

        for i in 0..dba.len() {
            assert_eq!(one.block(i), chunked.block(i));
        }
    }

    #[test]
    fn mismatched_index_types_are_rejected() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let cells = BoxArray::new(vec![IndexBox::new_2d(0, 0, 3, 3)]).unwrap();
        let nodal_box = IndexBox::with_type(
            IntVect::ZERO,
            IntVect::new_2d(4, 3),
            crate::geometry::IndexType::from_nodal([true, false, false]),
        );
        let nodes = BoxArray::new(vec![nodal_box]).unwrap();
        let src = ramp(cells, 1, IntVect::ZERO);
        let mut dst = ramp(nodes, 1, IntVect::ZERO);
        let err = parallel_copy(&ctx, &mut dst, &src, CopySpec::new(0, 0, 1), None).unwrap_err();
        assert!(matches!(err, BlockHaloError::IndexTypeMismatch { .. }));
    }

    #[test]
    fn precomputed_tags_are_used() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let domain = IndexBox::new_2d(0, 0, 7, 3);
        let sba = BoxArray::chop(domain, IntVect::new(4, 4, 1)).unwrap();
        let src = ramp(sba, 1, IntVect::ZERO);
        let dba = BoxArray::new(vec![domain]).unwrap();
        let mut dst = Collection::<f64>::new(dba, DistributionMap::from_ranks(vec![0]), 1, IntVect::ZERO, 0).unwrap();
        let tags = ctx.catalog().parallel_copy_tags(
            dst.boxes(),
            dst.distribution(),
            IntVect::ZERO,
            src.boxes(),
            src.distribution(),
            IntVect::ZERO,
            &Periodicity::default(),
        );
        let before = ctx.catalog().stats();
        parallel_copy(&ctx, &mut dst, &src, CopySpec::new(0, 0, 1), Some(&*tags)).unwrap();
        assert_eq!(ctx.catalog().stats(), before);
        assert_eq!(dst.block(0).unwrap().get(IntVect::new_2d(6, 2), 0), 602.0);
    }

    #[test]
    fn precomputed_tags_must_fit_the_collections() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let domain = IndexBox::new_2d(0, 0, 15, 7);
        let sba = BoxArray::chop(domain, IntVect::new(8, 8, 1)).unwrap();
        let src = ramp(sba, 1, IntVect::new_2d(1, 1));
        let dba = BoxArray::new(vec![IndexBox::new_2d(0, 0, 7, 7)]).unwrap();
        let ddm = DistributionMap::from_ranks(vec![0]);
        let tags = ctx.catalog().parallel_copy_tags(
            &dba,
            &ddm,
            IntVect::new_2d(1, 1),
            src.boxes(),
            src.distribution(),
            IntVect::ZERO,
            &Periodicity::default(),
        );
        // destination stores no ghosts, but the tags write one layer of them
        let mut dst = Collection::<f64>::new(dba, ddm, 1, IntVect::ZERO, 0).unwrap();
        let spec = CopySpec::new(0, 0, 1).with_ghosts(IntVect::ZERO, IntVect::ZERO);
        let err = parallel_copy(&ctx, &mut dst, &src, spec, Some(&*tags)).unwrap_err();
        assert!(matches!(err, BlockHaloError::InvalidTag(_)));
        assert!(dst.block(0).unwrap().as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn redistribute_single_process_copies_ghosts() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 7, 3), IntVect::new(4, 4, 1)).unwrap();
        let mut src = ramp(ba.clone(), 2, IntVect::new_2d(1, 1));
        src.set_val(3.5);
        let mut dst = Collection::<f64>::new(ba, DistributionMap::from_ranks(vec![0, 0]), 2, IntVect::new_2d(1, 1), 0)
            .unwrap();
        redistribute(&ctx, &mut dst, &src, 0, 0, 2, IntVect::new_2d(1, 1)).unwrap();
        assert_eq!(dst.block(1), src.block(1));
    }
}
