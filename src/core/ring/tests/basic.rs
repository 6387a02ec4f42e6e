// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Descriptor codec and ring construction tests

use super::super::*;

#[test]
fn test_descriptor_round_trip() {
    let desc = Descriptor {
        address: 0x1_0000_2000,
        length_words: 48,
        sync: SyncMode::Wait,
        level: Level::Subroutine,
    };
    assert_eq!(Descriptor::decode(desc.encode()).unwrap(), desc);

    let plain = Descriptor {
        address: 0x1000_0040,
        length_words: 1,
        sync: SyncMode::Proceed,
        level: Level::Main,
    };
    let words = plain.encode();
    assert_eq!(words[0], 0x1000_0040);
    assert_eq!(words[1], 0);
    assert_eq!(words[2], 1);
    assert_eq!(words[3], 0);
    assert_eq!(Descriptor::decode(words).unwrap(), plain);
}

#[test]
fn test_descriptor_unknown_flags_are_corruption() {
    let err = Descriptor::decode([0, 0, 4, 0x8000_0000]).unwrap_err();
    assert!(matches!(err, ChannelError::RingCorrupt(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_entry_count_validation() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let userd = mem.alloc(16, 8, Location::HostVisible).unwrap();

    for bad in [0u32, 1, 3, 12] {
        assert!(matches!(
            DescriptorRing::new(
                &mut mem,
                bad,
                Location::HostVisible,
                userd.address,
                userd.address + 4
            ),
            Err(ChannelError::InvalidArgument(_))
        ));
    }
}

#[test]
fn test_slot_addressing_wraps() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let userd = mem.alloc(16, 8, Location::HostVisible).unwrap();
    let ring = DescriptorRing::new(
        &mut mem,
        8,
        Location::HostVisible,
        userd.address,
        userd.address + 4,
    )
    .unwrap();

    assert_eq!(ring.mask(), 7);
    assert_eq!(ring.slot_address(0), ring.base());
    assert_eq!(ring.slot_address(3), ring.base() + 48);
    assert_eq!(ring.slot_address(8), ring.slot_address(0));
    assert_eq!(ring.slot_address(11), ring.slot_address(3));
}
