//! Byte-level layout of exchange buffers.
//!
//! Payloads are raw element bytes in native order; every rank of a run is
//! assumed to share one architecture. Per-peer payloads inside a combined
//! buffer are placed at aligned offsets so each slice can be viewed as the
//! element type without copying. The only structured record sent on the wire
//! is [`WireBox`], which carries a box for consistency checks.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

use crate::data::element::Element;
use crate::geometry::{IndexBox, IndexType, IntVect};
use crate::halo_error::BlockHaloError;

/// A payload from `peer` must carry exactly the byte count the tag set predicts.
pub fn expect_exact_len(peer: usize, actual: usize, expected: usize) -> Result<(), BlockHaloError> {
    if actual == expected {
        Ok(())
    } else {
        Err(BlockHaloError::ProtocolViolation {
            peer,
            expected,
            got: actual,
        })
    }
}

/// Largest of 8, 4, 2, 1 dividing `nbytes`.
#[inline]
pub fn alignof_comm_data(nbytes: usize) -> usize {
    [8, 4, 2].into_iter().find(|a| nbytes % a == 0).unwrap_or(1)
}

/// Round `offset` up to a multiple of `align` (a power of two).
#[inline]
pub fn aligned_size(align: usize, offset: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Placement of each peer's payload inside one combined buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferLayout {
    /// `(peer, offset, nbytes)` in ascending peer order.
    pub slots: Vec<(usize, usize, usize)>,
    /// Total bytes of the combined buffer.
    pub total: usize,
}

impl BufferLayout {
    /// Lay out per-peer payloads of element type `V`.
    ///
    /// Each payload size is aligned to its own natural communication
    /// alignment, and each offset to the larger of that and `align_of::<V>()`.
    pub fn for_peers<V: Element>(sizes: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut slots = Vec::new();
        let mut total = 0usize;
        for (peer, nbytes) in sizes {
            let acd = alignof_comm_data(nbytes);
            let padded = aligned_size(acd, nbytes);
            let offset = aligned_size(acd.max(align_of::<V>()), total);
            slots.push((peer, offset, nbytes));
            total = offset + padded;
        }
        BufferLayout { slots, total }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// A box on the wire: corners and index type, little-endian.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBox {
    pub lo_le: [i32; 3],
    pub hi_le: [i32; 3],
    pub itype_le: u32,
    pub reserved_le: u32,
}

static_assertions::const_assert_eq!(size_of::<WireBox>(), 32);
static_assertions::const_assert_eq!(align_of::<WireBox>(), 4);

impl WireBox {
    pub fn of(b: &IndexBox) -> Self {
        WireBox {
            lo_le: b.lo().0.map(i32::to_le),
            hi_le: b.hi().0.map(i32::to_le),
            itype_le: (b.index_type().bits() as u32).to_le(),
            reserved_le: 0,
        }
    }

    pub fn get(&self) -> IndexBox {
        let bits = u32::from_le(self.itype_le) as u8;
        let itype = IndexType::from_nodal(std::array::from_fn(|d| bits & (1 << d) != 0));
        IndexBox::with_type(
            IntVect(self.lo_le.map(i32::from_le)),
            IntVect(self.hi_le.map(i32::from_le)),
            itype,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_alignment() {
        assert_eq!(alignof_comm_data(24), 8);
        assert_eq!(alignof_comm_data(12), 4);
        assert_eq!(alignof_comm_data(6), 2);
        assert_eq!(alignof_comm_data(7), 1);
        assert_eq!(aligned_size(8, 13), 16);
        assert_eq!(aligned_size(4, 16), 16);
    }

    #[test]
    fn layout_aligns_offsets_for_element() {
        // two f32 payloads of 12 bytes then one of 8
        let l = BufferLayout::for_peers::<f32>([(1, 12), (3, 12), (4, 8)]);
        assert_eq!(l.slots, vec![(1, 0, 12), (3, 12, 12), (4, 24, 8)]);
        assert_eq!(l.total, 32);
        let d = BufferLayout::for_peers::<f64>([(0, 8), (2, 16)]);
        assert_eq!(d.slots, vec![(0, 0, 8), (2, 8, 16)]);
    }

    #[test]
    fn wire_box_roundtrip() {
        let b = IndexBox::with_type(
            IntVect::new(-3, 0, 2),
            IntVect::new(4, 9, 2),
            IndexType::from_nodal([true, false, true]),
        );
        let w = WireBox::of(&b);
        let back: &WireBox = bytemuck::from_bytes(bytemuck::bytes_of(&w));
        assert_eq!(back.get(), b);
    }

    #[test]
    fn short_payload_names_the_sender() {
        assert!(expect_exact_len(2, 16, 16).is_ok());
        assert_eq!(
            expect_exact_len(2, 12, 16),
            Err(BlockHaloError::ProtocolViolation {
                peer: 2,
                expected: 16,
                got: 12
            })
        );
    }
}
