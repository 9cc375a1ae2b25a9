//! Batched row kernels.
//!
//! A [`KernelPlan`] is the flattened form of one transfer phase: every
//! x-row of every tag becomes one [`RowRun`] addressing element offsets
//! directly. Plans depend only on geometry and buffer layout, never on data,
//! so they can be captured once and replayed.

use crate::algs::exec::{Job, Window};
use crate::data::{Block, Collection, Element};
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::BlockHaloError;
use crate::overlap::delta::{AddDelta, CopyDelta, CopyOp, ValueDelta};

/// What the two ends of a plan's runs refer to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Block rows into the send buffer.
    Pack,
    /// Receive buffer into block rows.
    Unpack,
    /// Block rows into block rows of another collection.
    Local,
    /// Block rows into a staging buffer (first half of an in-place local copy).
    StagePack,
    /// Staging buffer into block rows (second half of an in-place local copy).
    StageUnpack,
}

impl Phase {
    fn reads_buffer(self) -> bool {
        matches!(self, Phase::Unpack | Phase::StageUnpack)
    }

    fn writes_buffer(self) -> bool {
        matches!(self, Phase::Pack | Phase::StagePack)
    }
}

/// One contiguous row transfer. Block-side offsets index a block's data;
/// buffer-side offsets index the combined buffer, and the block index is unused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RowRun {
    pub src_block: usize,
    pub src_off: usize,
    pub dst_block: usize,
    pub dst_off: usize,
    pub len: usize,
}

/// Flattened row runs of one phase, in tag order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelPlan {
    phase: Phase,
    runs: Vec<RowRun>,
}

fn row_offsets<'a>(
    stored: &'a IndexBox,
    region: &'a IndexBox,
    comp: usize,
) -> impl Iterator<Item = usize> + 'a {
    let base = comp * stored.num_pts();
    let x0 = region.lo()[0];
    region
        .rows()
        .map(move |(j, k)| base + stored.offset_of(IntVect::new(x0, j, k)))
}

impl KernelPlan {
    /// Flatten `jobs` for `phase`. `src_stored`/`dst_stored` give the stored box of a block.
    pub fn build<S, D>(phase: Phase, jobs: &[Job], src_stored: S, dst_stored: D, win: Window) -> Self
    where
        S: Fn(usize) -> IndexBox,
        D: Fn(usize) -> IndexBox,
    {
        let mut runs = Vec::new();
        for job in jobs {
            let t = &job.tag;
            let nx = t.dbox.length(0);
            let npts = t.dbox.num_pts();
            let sbox_stored = src_stored(t.src_index);
            let dbox_stored = dst_stored(t.dst_index);
            for n in 0..win.ncomp {
                let rows = t.sbox.rows().count();
                let buf_base = job.buf_off + n * npts;
                let src_offs: Vec<usize> = if phase.reads_buffer() {
                    (0..rows).map(|r| buf_base + r * nx).collect()
                } else {
                    row_offsets(&sbox_stored, &t.sbox, win.scomp + n).collect()
                };
                let dst_offs: Vec<usize> = if phase.writes_buffer() {
                    (0..rows).map(|r| buf_base + r * nx).collect()
                } else {
                    row_offsets(&dbox_stored, &t.dbox, win.dcomp + n).collect()
                };
                runs.extend(src_offs.into_iter().zip(dst_offs).map(|(so, d_o)| RowRun {
                    src_block: t.src_index,
                    src_off: so,
                    dst_block: t.dst_index,
                    dst_off: d_o,
                    len: nx,
                }));
            }
        }
        KernelPlan { phase, runs }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn runs(&self) -> &[RowRun] {
        &self.runs
    }

    /// Elements moved by one execution.
    pub fn elements(&self) -> usize {
        self.runs.iter().map(|r| r.len).sum()
    }

    /// Copy block rows of `src` into `buf`.
    pub fn run_pack<V: Element>(&self, src: &Collection<V>, buf: &mut [V]) -> Result<(), BlockHaloError> {
        debug_assert!(self.phase.writes_buffer());
        let mut cached: Option<(usize, &Block<V>)> = None;
        for r in &self.runs {
            let blk = match cached {
                Some((i, b)) if i == r.src_block => b,
                _ => {
                    let b = src.try_block(r.src_block)?;
                    cached = Some((r.src_block, b));
                    b
                }
            };
            buf[r.dst_off..r.dst_off + r.len]
                .copy_from_slice(&blk.as_slice()[r.src_off..r.src_off + r.len]);
        }
        Ok(())
    }

    /// Fuse `buf` into block rows of `dst`.
    pub fn run_unpack<V: Element>(
        &self,
        buf: &[V],
        dst: &mut Collection<V>,
        op: CopyOp,
    ) -> Result<(), BlockHaloError> {
        debug_assert!(self.phase.reads_buffer());
        match op {
            CopyOp::Overwrite => self.unpack_with::<V, CopyDelta>(buf, dst),
            CopyOp::Accumulate => self.unpack_with::<V, AddDelta>(buf, dst),
        }
    }

    fn unpack_with<V: Element, D: ValueDelta<V>>(
        &self,
        buf: &[V],
        dst: &mut Collection<V>,
    ) -> Result<(), BlockHaloError> {
        for r in &self.runs {
            let blk = dst.try_block_mut(r.dst_block)?;
            D::fuse_slice(
                &mut blk.as_mut_slice()[r.dst_off..r.dst_off + r.len],
                &buf[r.src_off..r.src_off + r.len],
            );
        }
        Ok(())
    }

    /// Fuse block rows of `src` into block rows of `dst`.
    pub fn run_local<V: Element>(
        &self,
        src: &Collection<V>,
        dst: &mut Collection<V>,
        op: CopyOp,
    ) -> Result<(), BlockHaloError> {
        debug_assert_eq!(self.phase, Phase::Local);
        match op {
            CopyOp::Overwrite => self.local_with::<V, CopyDelta>(src, dst),
            CopyOp::Accumulate => self.local_with::<V, AddDelta>(src, dst),
        }
    }

    fn local_with<V: Element, D: ValueDelta<V>>(
        &self,
        src: &Collection<V>,
        dst: &mut Collection<V>,
    ) -> Result<(), BlockHaloError> {
        for r in &self.runs {
            let s = src.try_block(r.src_block)?;
            let d = dst.try_block_mut(r.dst_block)?;
            D::fuse_slice(
                &mut d.as_mut_slice()[r.dst_off..r.dst_off + r.len],
                &s.as_slice()[r.src_off..r.src_off + r.len],
            );
        }
        Ok(())
    }
}
