//! Execution backends for the pack, unpack and local-copy phases.
//!
//! Three strategies move exactly the same elements in the same per-block
//! order, so their results are bit-identical:
//!
//! - [`ExecBackend::Cpu`] walks each tag's rows inline. With the `rayon`
//!   feature, phases whose tags never write overlapping points of one block
//!   run in parallel across destination blocks; otherwise tags are applied
//!   one after another in tag order.
//! - [`ExecBackend::DeviceAsync`] flattens a phase into a [`KernelPlan`],
//!   launches it on a [`DeviceStream`] and synchronizes.
//! - [`ExecBackend::DeviceGraph`] additionally captures each plan in a
//!   [`GraphCache`] and replays it on later exchanges of the same shape.

pub mod device;
pub mod kernels;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::data::{Collection, Element};
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::BlockHaloError;
use crate::overlap::delta::CopyOp;
use crate::overlap::tags::Tag;

pub use device::{DeviceStream, GraphCache, PlanKey};
pub use kernels::{KernelPlan, Phase, RowRun};

/// How transfer phases are executed.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum ExecBackend {
    #[default]
    Cpu,
    DeviceAsync,
    DeviceGraph,
}

/// Component window of one transfer: source `[scomp, scomp+ncomp)` into
/// destination `[dcomp, dcomp+ncomp)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Window {
    pub scomp: usize,
    pub dcomp: usize,
    pub ncomp: usize,
}

impl Window {
    pub fn new(scomp: usize, dcomp: usize, ncomp: usize) -> Self {
        Window { scomp, dcomp, ncomp }
    }

    /// Same component range on both sides.
    pub fn same(comp: usize, ncomp: usize) -> Self {
        Window::new(comp, comp, ncomp)
    }
}

/// A tag together with the element offset of its payload in a combined buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub tag: Tag,
    pub buf_off: usize,
}

impl Job {
    /// Payload length in elements.
    #[inline]
    pub fn len(&self, ncomp: usize) -> usize {
        self.tag.num_pts() * ncomp
    }
}

/// Counters of an [`Executor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub launches: u64,
    pub syncs: u64,
    pub captures: u64,
    pub replays: u64,
}

/// Runs transfer phases with one backend.
#[derive(Debug, Default)]
pub struct Executor {
    backend: ExecBackend,
    graphs: GraphCache,
    launches: AtomicU64,
    syncs: AtomicU64,
}

impl Executor {
    pub fn new(backend: ExecBackend) -> Self {
        Executor {
            backend,
            ..Default::default()
        }
    }

    #[inline]
    pub fn backend(&self) -> ExecBackend {
        self.backend
    }

    pub fn stats(&self) -> ExecStats {
        ExecStats {
            launches: self.launches.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            captures: self.graphs.captures(),
            replays: self.graphs.replays(),
        }
    }

    fn plan<F>(&self, key: PlanKey, build: F) -> Arc<KernelPlan>
    where
        F: FnOnce() -> KernelPlan,
    {
        match self.backend {
            ExecBackend::DeviceGraph => self.graphs.get_or_capture(key, build),
            _ => Arc::new(build()),
        }
    }

    fn launch_and_sync<F>(&self, plan: Arc<KernelPlan>, exec: F) -> Result<(), BlockHaloError>
    where
        F: FnMut(&KernelPlan) -> Result<(), BlockHaloError>,
    {
        let mut stream = DeviceStream::new();
        stream.launch(plan);
        self.launches.fetch_add(1, Ordering::Relaxed);
        self.syncs.fetch_add(1, Ordering::Relaxed);
        stream.synchronize(exec)
    }

    /// Copy the source rows of `jobs` into `buf`.
    pub(crate) fn pack<V: Element>(
        &self,
        tagset: u64,
        phase: Phase,
        jobs: &[Job],
        src: &Collection<V>,
        win: Window,
        buf: &mut [V],
    ) -> Result<(), BlockHaloError> {
        if jobs.is_empty() {
            return Ok(());
        }
        match self.backend {
            ExecBackend::Cpu => pack_inline(jobs, src, win, buf),
            _ => {
                let key = PlanKey {
                    tagset,
                    phase,
                    window: win,
                    src_ngrow: src.ngrow(),
                    dst_ngrow: IntVect::ZERO,
                    elem_size: std::mem::size_of::<V>(),
                };
                let plan = self.plan(key, || {
                    KernelPlan::build(phase, jobs, |i| src.stored_box(i), |_| IndexBox::empty(), win)
                });
                self.launch_and_sync(plan, |p| p.run_pack(src, buf))
            }
        }
    }

    /// Fuse the payloads of `jobs` in `buf` into `dst`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn unpack<V: Element>(
        &self,
        tagset: u64,
        phase: Phase,
        jobs: &[Job],
        buf: &[V],
        dst: &mut Collection<V>,
        win: Window,
        op: CopyOp,
        thread_safe: bool,
    ) -> Result<(), BlockHaloError> {
        if jobs.is_empty() {
            return Ok(());
        }
        match self.backend {
            ExecBackend::Cpu => unpack_inline(jobs, buf, dst, win, op, thread_safe),
            _ => {
                let key = PlanKey {
                    tagset,
                    phase,
                    window: win,
                    src_ngrow: IntVect::ZERO,
                    dst_ngrow: dst.ngrow(),
                    elem_size: std::mem::size_of::<V>(),
                };
                let plan = {
                    let d: &Collection<V> = dst;
                    self.plan(key, || {
                        KernelPlan::build(phase, jobs, |_| IndexBox::empty(), |i| d.stored_box(i), win)
                    })
                };
                self.launch_and_sync(plan, |p| p.run_unpack(buf, dst, op))
            }
        }
    }

    /// Fuse source rows of `jobs` in `src` directly into `dst`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn local<V: Element>(
        &self,
        tagset: u64,
        jobs: &[Job],
        src: &Collection<V>,
        dst: &mut Collection<V>,
        win: Window,
        op: CopyOp,
        thread_safe: bool,
    ) -> Result<(), BlockHaloError> {
        if jobs.is_empty() {
            return Ok(());
        }
        match self.backend {
            ExecBackend::Cpu => local_inline(jobs, src, dst, win, op, thread_safe),
            _ => {
                let key = PlanKey {
                    tagset,
                    phase: Phase::Local,
                    window: win,
                    src_ngrow: src.ngrow(),
                    dst_ngrow: dst.ngrow(),
                    elem_size: std::mem::size_of::<V>(),
                };
                let plan = {
                    let d: &Collection<V> = dst;
                    self.plan(key, || {
                        KernelPlan::build(
                            Phase::Local,
                            jobs,
                            |i| src.stored_box(i),
                            |i| d.stored_box(i),
                            win,
                        )
                    })
                };
                self.launch_and_sync(plan, |p| p.run_local(src, dst, op))
            }
        }
    }
}

fn pack_inline<V: Element>(
    jobs: &[Job],
    src: &Collection<V>,
    win: Window,
    buf: &mut [V],
) -> Result<(), BlockHaloError> {
    for job in jobs {
        let blk = src.try_block(job.tag.src_index)?;
        let out = &mut buf[job.buf_off..job.buf_off + job.len(win.ncomp)];
        blk.pack_rows(&job.tag.sbox, win.scomp, win.ncomp, out);
    }
    Ok(())
}

/// Jobs grouped by destination block, each group in tag order.
#[cfg(feature = "rayon")]
fn by_destination(jobs: &[Job]) -> hashbrown::HashMap<usize, Vec<&Job>> {
    let mut groups: hashbrown::HashMap<usize, Vec<&Job>> = hashbrown::HashMap::new();
    for job in jobs {
        groups.entry(job.tag.dst_index).or_default().push(job);
    }
    groups
}

fn unpack_inline<V: Element>(
    jobs: &[Job],
    buf: &[V],
    dst: &mut Collection<V>,
    win: Window,
    op: CopyOp,
    thread_safe: bool,
) -> Result<(), BlockHaloError> {
    #[cfg(feature = "rayon")]
    if thread_safe {
        use rayon::prelude::*;
        let groups = by_destination(jobs);
        if let Some(&missing) = groups.keys().find(|&&i| !dst.is_local(i)) {
            return Err(BlockHaloError::MissingBlock(missing));
        }
        dst.blocks_mut().par_iter_mut().for_each(|(i, blk)| {
            for job in groups.get(i).into_iter().flatten() {
                let input = &buf[job.buf_off..job.buf_off + job.len(win.ncomp)];
                blk.unpack_rows(&job.tag.dbox, win.dcomp, win.ncomp, input, op);
            }
        });
        return Ok(());
    }
    let _ = thread_safe;
    for job in jobs {
        let blk = dst.try_block_mut(job.tag.dst_index)?;
        let input = &buf[job.buf_off..job.buf_off + job.len(win.ncomp)];
        blk.unpack_rows(&job.tag.dbox, win.dcomp, win.ncomp, input, op);
    }
    Ok(())
}

fn local_inline<V: Element>(
    jobs: &[Job],
    src: &Collection<V>,
    dst: &mut Collection<V>,
    win: Window,
    op: CopyOp,
    thread_safe: bool,
) -> Result<(), BlockHaloError> {
    #[cfg(feature = "rayon")]
    if thread_safe {
        use rayon::prelude::*;
        let groups = by_destination(jobs);
        if let Some(&missing) = groups.keys().find(|&&i| !dst.is_local(i)) {
            return Err(BlockHaloError::MissingBlock(missing));
        }
        return dst.blocks_mut().par_iter_mut().try_for_each(|(i, blk)| {
            for job in groups.get(i).into_iter().flatten() {
                let t = &job.tag;
                let s = src.try_block(t.src_index)?;
                blk.copy_rows(s, &t.sbox, win.scomp, &t.dbox, win.dcomp, win.ncomp, op);
            }
            Ok(())
        });
    }
    let _ = thread_safe;
    for job in jobs {
        let t = &job.tag;
        let s = src.try_block(t.src_index)?;
        let d = dst.try_block_mut(t.dst_index)?;
        d.copy_rows(s, &t.sbox, win.scomp, &t.dbox, win.dcomp, win.ncomp, op);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoxArray, DistributionMap};

    fn pair() -> (Collection<f64>, Collection<f64>, Vec<Job>) {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 15, 7), IntVect::new(8, 8, 1)).unwrap();
        let dm = DistributionMap::from_ranks(vec![0, 0]);
        let mut src = Collection::new(ba.clone(), dm.clone(), 2, IntVect::new_2d(1, 1), 0).unwrap();
        src.fill_valid_with(|i, p, n| (i * 100) as f64 + p[0] as f64 + 0.5 * n as f64);
        let dst = Collection::new(ba, dm, 2, IntVect::new_2d(1, 1), 0).unwrap();
        let jobs = vec![
            Job { tag: Tag::new(1, 0, IndexBox::new_2d(8, 0, 8, 7), IntVect::ZERO), buf_off: 0 },
            Job { tag: Tag::new(0, 1, IndexBox::new_2d(7, 0, 7, 7), IntVect::ZERO), buf_off: 16 },
        ];
        (src, dst, jobs)
    }

    #[test]
    fn backends_agree_on_local_copy() {
        let mut results = Vec::new();
        for backend in [ExecBackend::Cpu, ExecBackend::DeviceAsync, ExecBackend::DeviceGraph] {
            let exec = Executor::new(backend);
            let (src, mut dst, jobs) = pair();
            for _ in 0..2 {
                exec.local(7, &jobs, &src, &mut dst, Window::same(0, 2), CopyOp::Accumulate, true)
                    .unwrap();
            }
            results.push(dst);
            if backend == ExecBackend::DeviceGraph {
                assert_eq!(exec.stats().captures, 1);
                assert_eq!(exec.stats().replays, 1);
            }
        }
        let first = results[0].block(0).unwrap().as_slice().to_vec();
        assert_eq!(results[0].block(0).unwrap().get(IntVect::new_2d(8, 3), 1), 2.0 * 108.5);
        for r in &results[1..] {
            assert_eq!(r.block(0).unwrap().as_slice(), &first[..]);
        }
    }

    #[test]
    fn pack_then_unpack_through_buffer() {
        for backend in [ExecBackend::Cpu, ExecBackend::DeviceAsync] {
            let exec = Executor::new(backend);
            let (src, mut dst, jobs) = pair();
            let mut buf = vec![0.0; 32];
            exec.pack(3, Phase::Pack, &jobs, &src, Window::same(1, 1), &mut buf).unwrap();
            assert_eq!(buf[0], 108.5);
            assert_eq!(buf[16], 7.5);
            exec.unpack(3, Phase::Unpack, &jobs, &buf, &mut dst, Window::same(1, 1), CopyOp::Overwrite, false)
                .unwrap();
            assert_eq!(dst.block(1).unwrap().get(IntVect::new_2d(7, 2), 1), 7.5);
            assert_eq!(dst.block(1).unwrap().get(IntVect::new_2d(7, 2), 0), 0.0);
        }
    }

    #[test]
    fn missing_destination_block_is_reported() {
        let exec = Executor::new(ExecBackend::Cpu);
        let (src, _, jobs) = pair();
        let ba = src.boxes().clone();
        let mut remote = Collection::<f64>::new(ba, DistributionMap::from_ranks(vec![1, 1]), 2, IntVect::new_2d(1, 1), 0)
            .unwrap();
        let err = exec
            .local(1, &jobs, &src, &mut remote, Window::same(0, 1), CopyOp::Overwrite, false)
            .unwrap_err();
        assert_eq!(err, BlockHaloError::MissingBlock(0));
    }
}
