//! Overlap module: which sub-boxes move where, and how they are fused.
//!
//! [`tags`] holds the per-process classification of transfers, [`catalog`]
//! memoizes it per configuration, and [`delta`] defines the fusion rules
//! applied at the destination.

pub mod catalog;
pub mod delta;
pub mod tags;

pub use catalog::{CatalogStats, TagCatalog, TagKey};
pub use delta::{AddDelta, CopyDelta, CopyOp, ValueDelta};
pub use tags::{Tag, TagSet};
