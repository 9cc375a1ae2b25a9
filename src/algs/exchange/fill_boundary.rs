//! Ghost-region fill of a collection from its own valid data.
//!
//! Each ghost point takes the value of the valid point of another block (or
//! of a periodic image of a block) that covers it. The exchange runs in the
//! usual order: post receives, pack and send, copy the local pairs while the
//! messages are in flight, wait, unpack with overwrite, wait for sends.
//!
//! [`fill_boundary_nowait`] splits the call after the local copy; the returned
//! [`PendingFill`] mutably borrows the collection until it is finished, so at
//! most one fill per collection can be in flight.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::session::Session;
use crate::algs::exec::Window;
use crate::context::HaloContext;
use crate::data::{Collection, Element};
use crate::geometry::{IntVect, Periodicity};
use crate::halo_error::{BlockHaloError, check_component_window};
use crate::overlap::delta::CopyOp;

/// Parameters of a ghost fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillBoundaryOptions {
    /// Ghost width to fill; `None` fills the whole allocated ghost region.
    pub ghost: Option<IntVect>,
    pub period: Periodicity,
    /// Fill face ghosts only, skipping edges and corners.
    pub cross: bool,
    /// Fill only ghosts covered by a periodic image.
    pub periodic_only: bool,
    pub scomp: usize,
    /// Components to fill; `None` fills every component from `scomp` on.
    pub ncomp: Option<usize>,
}

impl FillBoundaryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ghost(mut self, ghost: IntVect) -> Self {
        self.ghost = Some(ghost);
        self
    }

    pub fn with_period(mut self, period: Periodicity) -> Self {
        self.period = period;
        self
    }

    pub fn with_cross(mut self, cross: bool) -> Self {
        self.cross = cross;
        self
    }

    pub fn with_periodic_only(mut self, periodic_only: bool) -> Self {
        self.periodic_only = periodic_only;
        self
    }

    pub fn with_components(mut self, scomp: usize, ncomp: usize) -> Self {
        self.scomp = scomp;
        self.ncomp = Some(ncomp);
        self
    }
}

/// Ghost width and component window after validation against a collection.
struct Resolved {
    ghost: IntVect,
    win: Window,
}

fn resolve<V: Element>(
    coll: &Collection<V>,
    opts: &FillBoundaryOptions,
    nprocs: usize,
) -> Result<Resolved, BlockHaloError> {
    let ghost = opts.ghost.unwrap_or(coll.ngrow());
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
    let ncomp = opts.ncomp.unwrap_or(coll.ncomp().saturating_sub(opts.scomp));
    check_component_window(opts.scomp, ncomp, coll.ncomp())?;
    coll.distribution().check_ranks(nprocs)?;
    Ok(Resolved {
        ghost,
        win: Window::same(opts.scomp, ncomp),
    })
}

fn needs_work(opts: &FillBoundaryOptions, r: &Resolved) -> bool {
    let by_extent = if opts.periodic_only {
        opts.period.is_any_periodic() && r.ghost.max_component() > 0
    } else {
        r.ghost.max_component() > 0
    };
    by_extent && r.win.ncomp > 0
}

/// Fill the ghost region of `coll`.
pub fn fill_boundary<C, V>(
    ctx: &HaloContext<C>,
    coll: &mut Collection<V>,
    opts: FillBoundaryOptions,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    fill_boundary_nowait(ctx, coll, opts)?.finish()
}

/// Start a ghost fill and return once the local pairs are copied.
pub fn fill_boundary_nowait<'a, C, V>(
    ctx: &'a HaloContext<C>,
    coll: &'a mut Collection<V>,
    opts: FillBoundaryOptions,
) -> Result<PendingFill<'a, C, V>, BlockHaloError>
where
    C: Communicator,
    V: Element,
{
    let r = resolve(coll, &opts, ctx.nprocs())?;
    if !needs_work(&opts, &r) {
        return Ok(PendingFill {
            coll,
            session: None,
        });
    }
    let tags = ctx.catalog().fill_boundary_tags(
        coll.boxes(),
        coll.distribution(),
        r.ghost,
        &opts.period,
        opts.cross,
        opts.periodic_only,
    );
    // every rank draws the tag, even with nothing to move here
    let seq = ctx.comm().next_sequence();
    if tags.is_empty() {
        return Ok(PendingFill {
            coll,
            session: None,
        });
    }
    let mut session = Session::start(ctx, seq, tags, coll, r.win)?;
    session.local_in_place(coll)?;
    Ok(PendingFill {
        coll,
        session: Some(session),
    })
}

/// Fill several collections with their exchanges in flight at once.
///
/// Every collection is filled even if one of them fails; the first error is returned.
pub fn fill_boundary_many<'a, C, V, I>(
    ctx: &'a HaloContext<C>,
    colls: I,
    opts: FillBoundaryOptions,
) -> Result<(), BlockHaloError>
where
    C: Communicator,
    V: Element,
    I: IntoIterator<Item = &'a mut Collection<V>>,
{
    let mut pending = Vec::new();
    for coll in colls {
        pending.push(fill_boundary_nowait(ctx, coll, opts)?);
    }
    let mut maybe_err = None;
    for p in pending {
        if let Err(e) = p.finish() {
            maybe_err.get_or_insert(e);
        }
    }
    maybe_err.map_or(Ok(()), Err)
}

/// A ghost fill whose messages may still be in flight.
///
/// Dropping it without calling [`finish`](Self::finish) completes the fill
/// and logs any error.
pub struct PendingFill<'a, C: Communicator, V: Element> {
    coll: &'a mut Collection<V>,
    session: Option<Session<'a, C>>,
}

impl<C: Communicator, V: Element> PendingFill<'_, C, V> {
    /// Poll the transport; `true` once every message has arrived.
    pub fn test(&mut self) -> bool {
        self.session.as_mut().is_none_or(|s| s.progress())
    }

    /// Wait for the remaining messages and unpack them.
    pub fn finish(mut self) -> Result<(), BlockHaloError> {
        match self.session.take() {
            Some(s) => s.finish(&mut *self.coll, CopyOp::Overwrite),
            None => Ok(()),
        }
    }
}

impl<C: Communicator, V: Element> Drop for PendingFill<'_, C, V> {
    fn drop(&mut self) {
        if let Some(s) = self.session.take() {
            if let Err(e) = s.finish(&mut *self.coll, CopyOp::Overwrite) {
                log::warn!("[fill_boundary] unfinished fill failed on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::geometry::{BoxArray, DistributionMap, IndexBox};

    fn two_blocks() -> Collection<f64> {
        let ba = BoxArray::chop(IndexBox::new_2d(0, 0, 7, 3), IntVect::new(4, 4, 1)).unwrap();
        let mut c = Collection::new(ba, DistributionMap::from_ranks(vec![0, 0]), 2, IntVect::new_2d(1, 1), 0)
            .unwrap();
        c.fill_valid_with(|i, p, n| (i * 100 + n * 10) as f64 + p[0] as f64);
        c
    }

    #[test]
    fn ghost_wider_than_allocated_is_rejected() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let mut c = two_blocks();
        let before = c.clone();
        let err = fill_boundary(&ctx, &mut c, FillBoundaryOptions::new().with_ghost(IntVect::new_2d(2, 0)))
            .unwrap_err();
        assert!(matches!(err, BlockHaloError::GhostTooWide { .. }));
        assert_eq!(c.block(0), before.block(0));
    }

    #[test]
    fn component_window_limits_the_fill() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let mut c = two_blocks();
        fill_boundary(&ctx, &mut c, FillBoundaryOptions::new().with_components(1, 1)).unwrap();
        let b0 = c.block(0).unwrap();
        assert_eq!(b0.get(IntVect::new_2d(4, 1), 1), 114.0);
        assert_eq!(b0.get(IntVect::new_2d(4, 1), 0), 0.0);
        assert!(fill_boundary(&ctx, &mut c, FillBoundaryOptions::new().with_components(1, 2)).is_err());
    }

    #[test]
    fn nowait_then_finish() {
        let ctx = HaloContext::with_defaults(NoComm::default());
        let mut c = two_blocks();
        let mut pending = fill_boundary_nowait(&ctx, &mut c, FillBoundaryOptions::new()).unwrap();
        assert!(pending.test());
        pending.finish().unwrap();
        assert_eq!(c.block(1).unwrap().get(IntVect::new_2d(3, 0), 0), 3.0);
        assert_eq!(ctx.arena().stats().outstanding, 0);
    }
}
