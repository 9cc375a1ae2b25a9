//! Transport adapter: posts, polls and completes the per-peer messages of a
//! session, and gathers or broadcasts small payloads for the block gather.
//!
//! Every wait path drains all handles before reporting the first error.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{BufferLayout, expect_exact_len};
use crate::data::ArenaBuffer;
use crate::halo_error::{BlockHaloError, CommFailure};

/// Post one receive per peer of `layout`, each into its slice of `buf`.
pub(crate) fn post_recvs<C: Communicator>(
    comm: &C,
    tag: CommTag,
    layout: &BufferLayout,
    buf: &mut ArenaBuffer,
) -> Vec<(usize, C::RecvHandle)> {
    layout
        .slots
        .iter()
        .map(|&(peer, off, n)| {
            log::trace!("[transport] rank {} irecv {n} bytes from {peer} tag {tag:?}", comm.rank());
            let h = comm.irecv(peer, tag.as_u16(), &mut buf.as_bytes_mut()[off..off + n]);
            (peer, h)
        })
        .collect()
}

/// Post one send per peer of `layout`, each from its slice of `buf`.
pub(crate) fn post_sends<C: Communicator>(
    comm: &C,
    tag: CommTag,
    layout: &BufferLayout,
    buf: &ArenaBuffer,
) -> Vec<(usize, C::SendHandle)> {
    layout
        .slots
        .iter()
        .map(|&(peer, off, n)| {
            log::trace!("[transport] rank {} isend {n} bytes to {peer} tag {tag:?}", comm.rank());
            (peer, comm.isend(peer, tag.as_u16(), &buf.as_bytes()[off..off + n]))
        })
        .collect()
}

/// Poll every receive; returns how many have completed.
pub(crate) fn test_recvs<C: Communicator>(handles: &mut [(usize, C::RecvHandle)]) -> usize {
    handles.iter_mut().map(|(_, h)| h.test()).filter(|&done| done).count()
}

/// Give up on pending receives; returns how many already-arrived messages were discarded.
///
/// A message that arrives after this stays queued in the transport under its
/// tag, where a later exchange reusing that tag after the sequence wraps
/// would match it.
pub(crate) fn abandon_recvs<C: Communicator>(handles: Vec<(usize, C::RecvHandle)>) -> usize {
    handles
        .into_iter()
        .map(|(_, mut h)| h.test())
        .filter(|&arrived| arrived)
        .count()
}

/// Wait for every receive and copy each payload into its slice of `buf`.
pub(crate) fn wait_recvs<C: Communicator>(
    handles: Vec<(usize, C::RecvHandle)>,
    layout: &BufferLayout,
    buf: &mut ArenaBuffer,
) -> Result<(), BlockHaloError> {
    let mut maybe_err = None;
    for ((peer, h), &(_, off, n)) in handles.into_iter().zip(&layout.slots) {
        match h.wait() {
            Some(raw) => match expect_exact_len(peer, raw.len(), n) {
                Ok(()) => buf.as_bytes_mut()[off..off + n].copy_from_slice(&raw),
                Err(e) => {
                    log::warn!("[transport] {peer} sent {} bytes, expected {n}", raw.len());
                    maybe_err.get_or_insert(e);
                }
            },
            None => {
                maybe_err.get_or_insert(BlockHaloError::CommError {
                    neighbor: peer,
                    source: CommFailure::from("receive completed without data"),
                });
            }
        }
    }
    maybe_err.map_or(Ok(()), Err)
}

/// Wait for every send to complete.
pub(crate) fn wait_sends<C: Communicator>(handles: Vec<(usize, C::SendHandle)>) {
    for (peer, h) in handles {
        log::trace!("[transport] send to {peer} complete");
        let _ = h.wait();
    }
}

/// Copy `payload` from `root` to every other rank.
pub(crate) fn broadcast<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    payload: &mut [u8],
) -> Result<(), BlockHaloError> {
    if comm.size() <= 1 {
        return Ok(());
    }
    if comm.rank() == root {
        let sends: Vec<_> = (0..comm.size())
            .filter(|&r| r != root)
            .map(|r| (r, comm.isend(r, tag.as_u16(), payload)))
            .collect();
        wait_sends::<C>(sends);
        return Ok(());
    }
    let expected = payload.len();
    match comm.irecv(root, tag.as_u16(), payload).wait() {
        Some(raw) => {
            expect_exact_len(root, raw.len(), expected)?;
            payload.copy_from_slice(&raw);
            Ok(())
        }
        None => Err(BlockHaloError::CommError {
            neighbor: root,
            source: CommFailure::from("broadcast completed without data"),
        }),
    }
}

/// Collect an equal-sized `payload` from every rank on `root`, in rank order.
/// Ranks other than `root` get an empty vector back.
pub(crate) fn gather<C: Communicator>(
    comm: &C,
    tag: CommTag,
    root: usize,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, BlockHaloError> {
    if comm.rank() != root {
        wait_sends::<C>(vec![(root, comm.isend(root, tag.as_u16(), payload))]);
        return Ok(Vec::new());
    }
    let mut scratch = vec![0u8; payload.len()];
    let recvs: Vec<_> = (0..comm.size())
        .filter(|&r| r != root)
        .map(|r| (r, comm.irecv(r, tag.as_u16(), &mut scratch)))
        .collect();
    let mut all = vec![Vec::new(); comm.size()];
    all[root] = payload.to_vec();
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(raw) => match expect_exact_len(peer, raw.len(), payload.len()) {
                Ok(()) => all[peer] = raw,
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            },
            None => {
                maybe_err.get_or_insert(BlockHaloError::CommError {
                    neighbor: peer,
                    source: CommFailure::from("gather completed without data"),
                });
            }
        }
    }
    maybe_err.map_or(Ok(all), Err)
}
