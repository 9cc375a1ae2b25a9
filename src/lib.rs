#![cfg_attr(docsrs, feature(doc_cfg))]
//! # block-halo
//!
//! block-halo moves data between the blocks of distributed, block-structured
//! arrays: the ghost-region fill of a collection from its own valid data, the
//! copy between collections with different box layouts or distributions, and
//! the gather of a sub-box into one block on every process.
//!
//! ## Features
//! - Tag sets describing which sub-box moves where, memoized per geometry
//! - Pluggable communication backends (serial, threaded, MPI)
//! - Runtime-selected execution backends (inline, stream-queued, graph-replayed)
//! - Component chunking to bound scratch memory, served from a pooled arena
//! - Split-phase ghost fill overlapping communication with computation
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! block-halo = "0.3"
//! # Optional features:
//! # features = ["rayon", "mpi-support"]
//! ```
//!
//! ```
//! use block_halo::prelude::*;
//!
//! let ctx = HaloContext::with_defaults(NoComm::default());
//! let boxes = BoxArray::chop(IndexBox::new_2d(0, 0, 15, 7), IntVect::new(8, 8, 1)).unwrap();
//! let dmap = DistributionMap::round_robin(boxes.len(), 1);
//! let mut u = Collection::<f64>::new(boxes, dmap, 1, IntVect::new_2d(1, 1), ctx.rank()).unwrap();
//! u.fill_valid_with(|_, p, _| p[0] as f64);
//! fill_boundary(&ctx, &mut u, FillBoundaryOptions::new()).unwrap();
//! assert_eq!(u.block(0).unwrap().get(IntVect::new_2d(8, 3), 0), 8.0);
//! ```
//!
//! ## Collectives
//!
//! Every exchange is collective over the communicator: all processes must
//! issue the same operations in the same order, because each draws the next
//! message tag from a per-process sequence.

pub mod algs;
pub mod config;
pub mod context;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod halo_error;
pub mod overlap;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::exchange::{
        CopySpec, FillBoundaryOptions, PendingFill, copy_to, fill_boundary, fill_boundary_many,
        fill_boundary_nowait, parallel_copy, redistribute,
    };
    pub use crate::algs::exec::ExecBackend;
    pub use crate::config::HaloConfig;
    pub use crate::context::HaloContext;
    pub use crate::data::{Arena, Block, Collection, Element, PooledArena};
    pub use crate::geometry::{BoxArray, DistributionMap, IndexBox, IndexType, IntVect, Periodicity};
    pub use crate::halo_error::BlockHaloError;
    pub use crate::overlap::{CopyOp, TagCatalog, TagSet};
}
