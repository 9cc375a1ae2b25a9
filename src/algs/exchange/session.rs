//! One exchange in flight.
//!
//! A [`Session`] owns everything a single fill or copy pass needs between
//! posting its messages and unpacking them: the sequence tag, the scratch
//! buffers and the outstanding transport handles. Dropping a session waits
//! for its sends (the transport may still read the send buffer) and then
//! releases both buffers to the arena, so the scratch memory is returned on
//! every exit path.
//!
//! Pending receives of a dropped session are abandoned: messages that have
//! already arrived are discarded, but one still in flight stays queued in the
//! transport (the shared mailbox of a [`RayonComm`] world, or MPI's unexpected
//! message queue) for the life of the communicator.
//!
//! [`RayonComm`]: crate::algs::communicator::RayonComm

use std::ops::Deref;
use std::sync::Arc;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::plan::{ExchangePlan, typed_len};
use crate::algs::exchange::transport;
use crate::algs::exec::{Phase, Window};
use crate::context::HaloContext;
use crate::data::{Arena, ArenaBuffer, Collection, Element};
use crate::halo_error::BlockHaloError;
use crate::overlap::delta::CopyOp;
use crate::overlap::tags::TagSet;

/// Tag set of a session: memoized by the catalog or supplied by the caller.
pub(crate) enum SessionTags<'c> {
    Shared(Arc<TagSet>),
    Borrowed(&'c TagSet),
}

impl Deref for SessionTags<'_> {
    type Target = TagSet;

    fn deref(&self) -> &TagSet {
        match self {
            SessionTags::Shared(t) => t,
            SessionTags::Borrowed(t) => t,
        }
    }
}

impl From<Arc<TagSet>> for SessionTags<'_> {
    fn from(t: Arc<TagSet>) -> Self {
        SessionTags::Shared(t)
    }
}

impl<'c> From<&'c TagSet> for SessionTags<'c> {
    fn from(t: &'c TagSet) -> Self {
        SessionTags::Borrowed(t)
    }
}

pub(crate) struct Session<'c, C: Communicator> {
    ctx: &'c HaloContext<C>,
    seq: CommTag,
    tags: SessionTags<'c>,
    plan: ExchangePlan,
    win: Window,
    recv_buf: ArenaBuffer,
    send_buf: ArenaBuffer,
    recvs: Vec<(usize, C::RecvHandle)>,
    sends: Vec<(usize, C::SendHandle)>,
}

impl<'c, C: Communicator> Session<'c, C> {
    /// Allocate buffers, post receives, pack and post sends.
    pub fn start<V: Element>(
        ctx: &'c HaloContext<C>,
        seq: CommTag,
        tags: impl Into<SessionTags<'c>>,
        src: &Collection<V>,
        win: Window,
    ) -> Result<Self, BlockHaloError> {
        let tags = tags.into();
        let plan = ExchangePlan::new::<V>(&tags, win.ncomp);
        let recv_buf = ctx.arena().alloc(plan.recv.total)?;
        let send_buf = ctx.arena().alloc(plan.send.total)?;
        log::debug!(
            "[session] rank {} seq {:?}: {} local tags, {} bytes to {} peers, {} bytes from {} peers",
            ctx.rank(),
            seq,
            plan.local_jobs.len(),
            plan.send.total,
            plan.send.slots.len(),
            plan.recv.total,
            plan.recv.slots.len()
        );
        let mut s = Session {
            ctx,
            seq,
            tags,
            plan,
            win,
            recv_buf,
            send_buf,
            recvs: Vec::new(),
            sends: Vec::new(),
        };
        s.recvs = transport::post_recvs(ctx.comm(), seq, &s.plan.recv, &mut s.recv_buf);
        if !s.plan.send.is_empty() {
            let len = typed_len::<V>(&s.plan.send);
            let out = s.send_buf.typed_mut::<V>(0, len)?;
            ctx.executor()
                .pack(s.tags.id(), Phase::Pack, &s.plan.send_jobs, src, win, out)?;
            s.sends = transport::post_sends(ctx.comm(), seq, &s.plan.send, &s.send_buf);
        }
        s.progress();
        Ok(s)
    }

    /// Poll outstanding receives; `true` once all of them have arrived.
    pub fn progress(&mut self) -> bool {
        let done = transport::test_recvs::<C>(&mut self.recvs);
        done == self.recvs.len()
    }

    /// Copy the local tags within one collection, staging through a scratch
    /// buffer so every read happens before any write.
    pub fn local_in_place<V: Element>(&mut self, coll: &mut Collection<V>) -> Result<(), BlockHaloError> {
        if self.plan.local_jobs.is_empty() {
            return Ok(());
        }
        let bytes = self.plan.local_elems * std::mem::size_of::<V>();
        let mut stage = self.ctx.arena().alloc(bytes)?;
        let exec = self.ctx.executor();
        let id = self.tags.id();
        {
            let out = stage.typed_mut::<V>(0, bytes)?;
            exec.pack(id, Phase::StagePack, &self.plan.local_jobs, coll, self.win, out)?;
        }
        let input = stage.typed::<V>(0, bytes)?;
        exec.unpack(
            id,
            Phase::StageUnpack,
            &self.plan.local_jobs,
            input,
            coll,
            self.win,
            CopyOp::Overwrite,
            self.tags.thread_safe_local(),
        )?;
        self.progress();
        Ok(())
    }

    /// Copy the local tags from `src` into a different collection `dst`.
    pub fn local_between<V: Element>(
        &mut self,
        src: &Collection<V>,
        dst: &mut Collection<V>,
        op: CopyOp,
    ) -> Result<(), BlockHaloError> {
        self.ctx.executor().local(
            self.tags.id(),
            &self.plan.local_jobs,
            src,
            dst,
            self.win,
            op,
            self.tags.thread_safe_local(),
        )?;
        self.progress();
        Ok(())
    }

    /// Wait for all receives, unpack them into `dst`, wait for the sends.
    pub fn finish<V: Element>(mut self, dst: &mut Collection<V>, op: CopyOp) -> Result<(), BlockHaloError> {
        let recvs = std::mem::take(&mut self.recvs);
        transport::wait_recvs::<C>(recvs, &self.plan.recv, &mut self.recv_buf)?;
        if !self.plan.recv.is_empty() {
            let len = typed_len::<V>(&self.plan.recv);
            let input = self.recv_buf.typed::<V>(0, len)?;
            self.ctx.executor().unpack(
                self.tags.id(),
                Phase::Unpack,
                &self.plan.recv_jobs,
                input,
                dst,
                self.win,
                op,
                self.tags.thread_safe_unpack(),
            )?;
        }
        let sends = std::mem::take(&mut self.sends);
        transport::wait_sends::<C>(sends);
        log::debug!("[session] rank {} seq {:?} complete", self.ctx.rank(), self.seq);
        Ok(())
    }
}

impl<C: Communicator> Drop for Session<'_, C> {
    fn drop(&mut self) {
        if !self.sends.is_empty() {
            transport::wait_sends::<C>(std::mem::take(&mut self.sends));
        }
        if !self.recvs.is_empty() {
            let pending = self.recvs.len();
            let arrived = transport::abandon_recvs::<C>(std::mem::take(&mut self.recvs));
            log::warn!(
                "[session] rank {} seq {:?}: abandoning {pending} pending receives, {arrived} already arrived",
                self.ctx.rank(),
                self.seq,
            );
        }
    }
}
