//! Host-emulated device stream and kernel-graph cache.
//!
//! The stream records launched plans and runs them, in launch order, when it
//! is synchronized. The graph cache keeps captured plans by configuration so a
//! repeated exchange replays its plan instead of rebuilding it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::algs::exec::Window;
use crate::algs::exec::kernels::{KernelPlan, Phase};
use crate::geometry::IntVect;
use crate::halo_error::BlockHaloError;

/// Identity of a captured plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub tagset: u64,
    pub phase: Phase,
    pub window: Window,
    pub src_ngrow: IntVect,
    pub dst_ngrow: IntVect,
    pub elem_size: usize,
}

/// Captured plans, replayed on later exchanges with the same key.
#[derive(Debug, Default)]
pub struct GraphCache {
    graphs: DashMap<PlanKey, Arc<KernelPlan>, ahash::RandomState>,
    captures: AtomicU64,
    replays: AtomicU64,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for `key`, capturing it with `build` on first use.
    pub fn get_or_capture<F>(&self, key: PlanKey, build: F) -> Arc<KernelPlan>
    where
        F: FnOnce() -> KernelPlan,
    {
        if let Some(plan) = self.graphs.get(&key) {
            self.replays.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(plan.value());
        }
        self.captures.fetch_add(1, Ordering::Relaxed);
        log::trace!("[graph] capturing {key:?}");
        let plan = Arc::new(build());
        Arc::clone(self.graphs.entry(key).or_insert(plan).value())
    }

    pub fn captures(&self) -> u64 {
        self.captures.load(Ordering::Relaxed)
    }

    pub fn replays(&self) -> u64 {
        self.replays.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

/// In-order queue of launched plans.
#[derive(Debug, Default)]
pub struct DeviceStream {
    queue: Vec<Arc<KernelPlan>>,
}

impl DeviceStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launch(&mut self, plan: Arc<KernelPlan>) {
        self.queue.push(plan);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run every queued plan with `exec`, in launch order.
    ///
    /// The queue is emptied even when a plan fails.
    pub fn synchronize<F>(&mut self, mut exec: F) -> Result<(), BlockHaloError>
    where
        F: FnMut(&KernelPlan) -> Result<(), BlockHaloError>,
    {
        let mut maybe_err = None;
        for plan in self.queue.drain(..) {
            if maybe_err.is_none() {
                if let Err(e) = exec(&plan) {
                    maybe_err = Some(e);
                }
            }
        }
        maybe_err.map_or(Ok(()), Err)
    }
}
