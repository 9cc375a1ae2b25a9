use block_halo::algs::wire::{BufferLayout, WireBox, alignof_comm_data, aligned_size, expect_exact_len};
use block_halo::geometry::{IndexBox, IndexType, IntVect};
use block_halo::halo_error::BlockHaloError;

#[test]
fn comm_alignment_divides_payload() {
    assert_eq!(alignof_comm_data(24), 8);
    assert_eq!(alignof_comm_data(12), 4);
    assert_eq!(alignof_comm_data(6), 2);
    assert_eq!(alignof_comm_data(5), 1);
    assert_eq!(aligned_size(8, 13), 16);
    assert_eq!(aligned_size(8, 16), 16);
}

#[test]
fn peer_slots_are_element_aligned() {
    let layout = BufferLayout::for_peers::<f64>([(1, 12), (3, 16)]);
    assert_eq!(layout.slots[1].1 % 8, 0);
    assert!(layout.total >= 28);
}

#[test]
fn wire_box_keeps_index_type() {
    let itype = IndexType::from_nodal([true, false, true]);
    let b = IndexBox::with_type(IntVect::new(-3, 0, 2), IntVect::new(5, 7, 9), itype);
    let w = WireBox::of(&b);
    let bytes = bytemuck::bytes_of(&w).to_vec();
    let back: WireBox = *bytemuck::from_bytes(&bytes);
    assert_eq!(back.get(), b);
}

#[test]
fn byte_count_mismatch_is_a_protocol_violation() {
    let err = expect_exact_len(1, 3, 4).unwrap_err();
    assert!(matches!(err, BlockHaloError::ProtocolViolation { peer: 1, expected: 4, got: 3 }));
    assert!(expect_exact_len(1, 4, 4).is_ok());
}
