//! Halo exchange operations.
//!
//! All operations share one protocol, driven by a [`session`]: derive the tag
//! set from the catalog, draw a sequence number (on every process, even when
//! it has nothing to move), post receives, pack and send, run the local
//! copies while messages are in flight, wait, unpack, wait for sends.
//!
//! - [`fill_boundary`]: ghost fill of one collection from its own valid data.
//! - [`parallel_copy`]: copy between collections of different layouts, and
//!   [`redistribute`] between distributions of the same boxes.
//! - [`copy_to`]: gather a sub-box into one block on every process.

pub mod copy_to;
pub mod fill_boundary;
pub mod parallel_copy;
pub(crate) mod plan;
pub(crate) mod session;
pub(crate) mod transport;

pub use copy_to::copy_to;
pub use fill_boundary::{
    FillBoundaryOptions, PendingFill, fill_boundary, fill_boundary_many, fill_boundary_nowait,
};
pub use parallel_copy::{CopySpec, parallel_copy, redistribute};
