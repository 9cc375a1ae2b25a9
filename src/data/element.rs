//! Element types storable in blocks and shippable through byte buffers.

use std::fmt::Debug;
use std::ops::AddAssign;

use bytemuck::Pod;
use num_traits::Zero;

/// Marker trait for "values can be shipped as raw bytes and accumulated".
///
/// Implemented automatically for every `Pod` numeric type. Scratch buffers
/// are 8-byte aligned, so element alignment must not exceed 8.
pub trait Element: Pod + Zero + AddAssign + PartialEq + Debug + Send + Sync + 'static {}

impl<T> Element for T where T: Pod + Zero + AddAssign + PartialEq + Debug + Send + Sync + 'static {}

/// Largest element alignment scratch buffers guarantee.
pub const MAX_ELEMENT_ALIGN: usize = 8;

/// Size in bytes of `npts * ncomp` elements of `V`.
#[inline]
pub fn payload_bytes<V: Element>(npts: usize, ncomp: usize) -> usize {
    npts * ncomp * std::mem::size_of::<V>()
}
