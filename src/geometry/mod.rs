//! Geometry of block-structured collections.
//!
//! Integer lattice vectors, boxes, box lists, ownership maps and periodicity.
//! These are the inputs from which tag sets are derived.

pub mod box_array;
pub mod distribution;
pub mod index_box;
pub mod int_vect;
pub mod periodicity;

pub use box_array::BoxArray;
pub use distribution::DistributionMap;
pub use index_box::{IndexBox, IndexType};
pub use int_vect::{IntVect, SPACEDIM};
pub use periodicity::Periodicity;
