//! Thin façade over intra-process (Rayon) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* matched by `(source, destination,
//! tag)`. All handles are **waitable** but non-blocking; the exchange layer
//! calls `.wait()` before it trusts that a receive buffer is ready, and always
//! waits on its send handles before releasing the send buffers.
//!
//! Tags are drawn from a cycling per-communicator sequence so that two
//! exchanges in flight at once never match each other's messages. Every rank
//! must draw the same number of tags in the same order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Barrier};

use bytes::Bytes;
use dashmap::DashMap;

/// Message tag of one exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    /// First tag of the cycling sequence.
    pub const FIRST: u16 = 0x1000;
    /// Last tag of the cycling sequence.
    pub const LAST: u16 = 0x7FFF;

    #[inline]
    pub const fn new(raw: u16) -> Self {
        CommTag(raw)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Next tag in the cycling sequence.
    pub fn next(self) -> Self {
        if self.0 >= Self::LAST {
            CommTag(Self::FIRST)
        } else {
            CommTag(self.0 + 1)
        }
    }
}

/// Cycling tag source shared by a communicator's clones.
#[derive(Debug)]
struct TagSequence(AtomicU16);

impl TagSequence {
    fn new() -> Self {
        TagSequence(AtomicU16::new(CommTag::FIRST))
    }

    fn take(&self) -> CommTag {
        let cur = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                Some(CommTag(t).next().as_u16())
            })
            .unwrap_or(CommTag::FIRST);
        CommTag(cur)
    }
}

/// Non-blocking communication interface.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process.
    fn rank(&self) -> usize;

    /// Number of processes.
    fn size(&self) -> usize;

    /// Synchronize all ranks.
    fn barrier(&self) {}

    /// `true` if this is a no-op communicator (serial).
    fn is_no_comm(&self) -> bool {
        false
    }

    /// Draw the tag for the next exchange.
    fn next_sequence(&self) -> CommTag;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;

    /// Poll for completion without blocking.
    fn test(&mut self) -> bool {
        true
    }
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-process communicator: size one, every message call is a no-op.
#[derive(Debug)]
pub struct NoComm {
    seq: TagSequence,
}

impl Default for NoComm {
    fn default() -> Self {
        NoComm {
            seq: TagSequence::new(),
        }
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn is_no_comm(&self) -> bool {
        true
    }

    fn next_sequence(&self) -> CommTag {
        self.seq.take()
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Messages in flight between the ranks of one in-process world.
#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
    }

    fn take(&self, key: &Key) -> Option<Bytes> {
        let mut slot = self.slots.get_mut(key)?;
        slot.pop_front()
    }

    fn peek(&self, key: &Key) -> bool {
        self.slots.get(key).is_some_and(|q| !q.is_empty())
    }
}

/// Pending receive of a [`RayonComm`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    ready: Option<Bytes>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(bytes) = self.ready.take() {
            return Some(bytes.to_vec());
        }
        loop {
            if let Some(bytes) = self.mailbox.take(&self.key) {
                return Some(bytes.to_vec());
            }
            std::thread::yield_now();
        }
    }

    fn test(&mut self) -> bool {
        if self.ready.is_none() && self.mailbox.peek(&self.key) {
            self.ready = self.mailbox.take(&self.key);
        }
        self.ready.is_some()
    }
}

/// One rank of an in-process world; ranks are threads sharing a mailbox.
///
/// Sends are eager: the payload is copied into the mailbox immediately, so a
/// send handle completes at once.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    barrier: Arc<Barrier>,
    seq: Arc<TagSequence>,
}

impl RayonComm {
    /// Create the `size` ranks of a fresh world.
    pub fn world(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::default());
        let barrier = Arc::new(Barrier::new(size.max(1)));
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                barrier: Arc::clone(&barrier),
                seq: Arc::new(TagSequence::new()),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            ready: None,
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn next_sequence(&self) -> CommTag {
        self.seq.take()
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::Threading;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    use crate::halo_error::{BlockHaloError, CommFailure};

    /// Communicator over the MPI world.
    pub struct MpiComm {
        pub world: Arc<SimpleCommunicator>,
        pub rank: usize,
        size: usize,
        seq: TagSequence,
        _universe: Arc<Universe>,
    }

    // The world is initialized with `Threading::Multiple`.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, BlockHaloError> {
            let (universe, level) = mpi::initialize_with_threading(Threading::Multiple).ok_or(
                BlockHaloError::CommError {
                    neighbor: usize::MAX,
                    source: CommFailure::from("MPI already initialized"),
                },
            )?;
            if level < Threading::Multiple {
                log::warn!("[mpi] requested multiple threading, got {level:?}");
            }
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(MpiComm {
                world: Arc::new(world),
                rank,
                size,
                seq: TagSequence::new(),
                _universe: Arc::new(universe),
            })
        }
    }

    /// In-flight send; owns the payload until completion.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8], StaticScope>>,
        buf: *mut [u8],
    }

    unsafe impl Send for MpiSendHandle {}

    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: the request completed, nothing else refers to the payload.
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }

        fn test(&mut self) -> bool {
            match self.req.take() {
                Some(req) => match req.test() {
                    Ok(_) => true,
                    Err(pending) => {
                        self.req = Some(pending);
                        false
                    }
                },
                None => true,
            }
        }
    }

    /// Posted receive; completes by matching the next message with its tag.
    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
    }

    unsafe impl Send for MpiRecvHandle {}

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }

        fn test(&mut self) -> bool {
            self.world
                .process_at_rank(self.peer)
                .immediate_probe_with_tag(self.tag)
                .is_some()
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the payload lives until `MpiSendHandle::wait` reclaims it.
            let payload: &'static [u8] = unsafe { &*raw };
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                payload,
                tag as i32,
            );
            MpiSendHandle {
                req: Some(req),
                buf: raw,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Arc::clone(&self.world),
                peer: peer as i32,
                tag: tag as i32,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn next_sequence(&self) -> CommTag {
            self.seq.take()
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::{MpiComm, MpiRecvHandle, MpiSendHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn messages_with_same_key_arrive_in_order() {
        let world = RayonComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        let mut buf = [0u8; 1];
        let mut first = world[1].irecv(0, 3, &mut buf);
        assert!(first.test());
        assert_eq!(first.wait(), Some(vec![1]));
        assert_eq!(world[1].irecv(0, 3, &mut buf).wait(), Some(vec![2]));
    }

    #[test]
    fn test_does_not_block() {
        let world = RayonComm::world(2);
        let mut buf = [0u8; 2];
        let mut h = world[1].irecv(0, 11, &mut buf);
        assert!(!h.test());
        world[0].isend(1, 11, &[9, 9]);
        assert!(h.test());
        assert_eq!(h.wait(), Some(vec![9, 9]));
    }

    #[test]
    fn separate_worlds_do_not_share_mail() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 5, &[1]);
        let mut buf = [0u8; 1];
        assert!(!b[1].irecv(0, 5, &mut buf).test());
    }

    #[test]
    fn tag_sequence_cycles() {
        let comm = NoComm::default();
        assert_eq!(comm.next_sequence().as_u16(), CommTag::FIRST);
        assert_eq!(comm.next_sequence().as_u16(), CommTag::FIRST + 1);
        assert_eq!(CommTag::new(CommTag::LAST).next().as_u16(), CommTag::FIRST);
    }
}
