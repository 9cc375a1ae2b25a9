//! Buffer layouts and per-tag payload offsets of one exchange.

use std::collections::BTreeMap;

use crate::algs::exec::Job;
use crate::algs::wire::BufferLayout;
use crate::data::element::{Element, payload_bytes};
use crate::overlap::tags::{Tag, TagSet};

/// Where every tag's payload lives in the combined send, receive and staging buffers.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExchangePlan {
    pub send: BufferLayout,
    pub send_jobs: Vec<Job>,
    pub recv: BufferLayout,
    pub recv_jobs: Vec<Job>,
    pub local_jobs: Vec<Job>,
    /// Elements of the staging buffer of an in-place local copy.
    pub local_elems: usize,
}

impl ExchangePlan {
    pub fn new<V: Element>(tags: &TagSet, ncomp: usize) -> Self {
        let (send, send_jobs) = peer_jobs::<V>(tags.send_tags(), ncomp);
        let (recv, recv_jobs) = peer_jobs::<V>(tags.recv_tags(), ncomp);
        let mut local_elems = 0;
        let local_jobs = tags
            .local_tags()
            .iter()
            .map(|t| {
                let job = Job {
                    tag: *t,
                    buf_off: local_elems,
                };
                local_elems += t.num_pts() * ncomp;
                job
            })
            .collect();
        ExchangePlan {
            send,
            send_jobs,
            recv,
            recv_jobs,
            local_jobs,
            local_elems,
        }
    }
}

/// Lay out per-peer payloads and give each tag its element offset.
fn peer_jobs<V: Element>(by_peer: &BTreeMap<usize, Vec<Tag>>, ncomp: usize) -> (BufferLayout, Vec<Job>) {
    let layout = BufferLayout::for_peers::<V>(by_peer.iter().map(|(&peer, tags)| {
        let nbytes = tags
            .iter()
            .map(|t| payload_bytes::<V>(t.num_pts(), ncomp))
            .sum();
        (peer, nbytes)
    }));
    let esz = std::mem::size_of::<V>();
    let mut jobs = Vec::with_capacity(by_peer.values().map(Vec::len).sum());
    for (tags, &(_, offset, _)) in by_peer.values().zip(&layout.slots) {
        debug_assert_eq!(offset % esz, 0);
        let mut cur = offset / esz;
        for t in tags {
            jobs.push(Job { tag: *t, buf_off: cur });
            cur += t.num_pts() * ncomp;
        }
    }
    (layout, jobs)
}

/// Byte length of the element view of a buffer laid out by `layout`.
#[inline]
pub(crate) fn typed_len<V: Element>(layout: &BufferLayout) -> usize {
    let esz = std::mem::size_of::<V>();
    layout.total / esz * esz
}
