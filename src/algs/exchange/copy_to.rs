//! Gather part of a distributed collection into one block on every process.

use bytemuck::{Pod, Zeroable};

use crate::algs::communicator::Communicator;
use crate::algs::exchange::transport::{broadcast, gather};
use crate::algs::wire::WireBox;
use crate::context::HaloContext;
use crate::data::{Arena, Block, Collection, Element};
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::{BlockHaloError, check_component_window};
use crate::overlap::delta::CopyOp;

/// Copy the part of `coll` inside `sub_box` into `out` on every process.
///
/// Each block whose box grown by `ghost` meets `sub_box` is broadcast by its
/// owner, in block-index order, and written into `out` with overwrite. Where
/// grown blocks overlap, the block with the larger index wins. `sub_box` must
/// be the same on every process.
#[allow(clippy::too_many_arguments)]
pub fn copy_to<C, V>(
    ctx: &HaloContext<C>,
    coll: &Collection<V>,
    out: &mut Block<V>,
    sub_box: &IndexBox,
    scomp: usize,
    dcomp: usize,
    ncomp: usize,
    ghost: IntVect,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    let itype = coll.boxes().index_type();
    if sub_box.index_type() != itype {
        return Err(BlockHaloError::IndexTypeMismatch {
            dst: sub_box.index_type(),
            src: itype,
        });
    }
    if ghost.min_component() < 0 || !ghost.all_le(&coll.ngrow()) {
        return Err(BlockHaloError::GhostTooWide {
            requested: ghost,
            allocated: coll.ngrow(),
        });
    }
    check_component_window(scomp, ncomp, coll.ncomp())?;
    check_component_window(dcomp, ncomp, out.ncomp())?;
    if !out.stored_box().contains_box(sub_box) {
        return Err(BlockHaloError::SubBoxNotContained {
            block: out.stored_box(),
            sub_box: *sub_box,
        });
    }
    coll.distribution().check_ranks(ctx.nprocs())?;

    let comm = ctx.comm();
    let multi = ctx.nprocs() > 1;
    if multi && cfg!(debug_assertions) {
        check_same_sub_box(ctx, sub_box)?;
    }
    if ncomp == 0 || sub_box.is_empty() {
        return Ok(());
    }

    for (i, region) in coll.boxes().intersections(sub_box, ghost) {
        if !multi {
            out.copy_from(coll.try_block(i)?, &region, scomp, &region, dcomp, ncomp, CopyOp::Overwrite)?;
            continue;
        }
        let seq = comm.next_sequence();
        let owner = coll.distribution().owner(i);
        let nbytes = region.num_pts() * ncomp * std::mem::size_of::<V>();
        let mut buf = ctx.arena().alloc(nbytes)?;
        if owner == ctx.rank() {
            let staged = buf.typed_mut::<V>(0, nbytes)?;
            coll.try_block(i)?.pack_region(&region, scomp, ncomp, staged)?;
        }
        log::trace!(
            "[copy_to] rank {} seq {:?}: block {i} from {owner}, {nbytes} bytes",
            ctx.rank(),
            seq
        );
        broadcast(comm, seq, owner, buf.as_bytes_mut())?;
        out.unpack_region(&region, dcomp, ncomp, buf.typed::<V>(0, nbytes)?, CopyOp::Overwrite)?;
    }
    Ok(())
}

/// Rank 0's ruling on whether every rank asked for the same sub-box.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SubBoxVerdict {
    agreed_le: u32,
    first_bad_rank_le: u32,
    root: WireBox,
    first_bad: WireBox,
}

/// Gather every rank's sub-box on rank 0 and broadcast one verdict, so all
/// ranks fail together on a mismatch.
fn check_same_sub_box<C: Communicator>(
    ctx: &HaloContext<C>,
    sub_box: &IndexBox,
) -> Result<(), BlockHaloError> {
    let comm = ctx.comm();
    let mine = WireBox::of(sub_box);
    let boxes = gather(comm, comm.next_sequence(), 0, bytemuck::bytes_of(&mine))?;
    let mut verdict = SubBoxVerdict::zeroed();
    if ctx.rank() == 0 {
        verdict.agreed_le = 1u32.to_le();
        verdict.root = mine;
        let first_bad = boxes
            .iter()
            .map(|raw| bytemuck::pod_read_unaligned::<WireBox>(raw))
            .enumerate()
            .find(|(_, b)| b.get() != *sub_box);
        if let Some((rank, b)) = first_bad {
            verdict.agreed_le = 0;
            verdict.first_bad_rank_le = (rank as u32).to_le();
            verdict.first_bad = b;
        }
    }
    broadcast(comm, comm.next_sequence(), 0, bytemuck::bytes_of_mut(&mut verdict))?;
    if u32::from_le(verdict.agreed_le) == 1 {
        return Ok(());
    }
    Err(BlockHaloError::SubBoxMismatch {
        rank: u32::from_le(verdict.first_bad_rank_le) as usize,
        local: verdict.first_bad.get(),
        root: verdict.root.get(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::geometry::{BoxArray, DistributionMap};

    fn quad() -> Collection<i64> {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 7, 7), IntVect::new(4, 4, 1)).unwrap();
        let mut c = Collection::new(ba, DistributionMap::from_ranks(vec![0; 4]), 2, IntVect::new_2d(1, 1), 0).unwrap();
        c.fill_valid_with(|_, p, n| (p[0] * 10 + p[1]) as i64 + 1000 * n as i64);
        c
    }

    #[test]
    fn gathers_across_blocks() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let c = quad();
        let sub = IndexBox::new_2d(2, 2, 5, 5);
        let mut out = Block::new(sub, 1);
        copy_to(&ctx, &c, &mut out, &sub, 1, 0, 1, IntVect::ZERO).unwrap();
        for p in sub.points() {
            assert_eq!(out.get(p, 0), 1000 + (p[0] * 10 + p[1]) as i64);
        }
    }

    #[test]
    fn sub_box_outside_output_is_rejected() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let c = quad();
        let mut out = Block::new(IndexBox::new_2d(0, 0, 3, 3), 1);
        let err = copy_to(&ctx, &c, &mut out, &IndexBox::new_2d(2, 2, 5, 5), 0, 0, 1, IntVect::ZERO)
            .unwrap_err();
        assert!(matches!(err, BlockHaloError::SubBoxNotContained { .. }));
        assert!(out.as_slice().iter().all(|&v| v == 0));
    }
}
