// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! not-full predicate and occupancy tests

use proptest::prelude::*;

use super::super::*;

struct Fixture {
    mem: DeviceMemory,
    ring: DescriptorRing,
    get_address: u64,
}

fn fixture(entries: u32) -> Fixture {
    let mut mem = DeviceMemory::new(64 * 1024);
    let userd = mem.alloc(16, 8, Location::HostVisible).unwrap();
    let doorbell = mem.alloc(4, 4, Location::HostVisible).unwrap();
    let mut ring = DescriptorRing::new(
        &mut mem,
        entries,
        Location::HostVisible,
        userd.address,
        userd.address + 4,
    )
    .unwrap();
    ring.set_doorbell(DoorbellTarget {
        address: doorbell.address,
        token: 1,
    });
    Fixture {
        mem,
        ring,
        get_address: userd.address + 4,
    }
}

fn desc() -> Descriptor {
    Descriptor {
        address: 0x1000_0000,
        length_words: 1,
        sync: SyncMode::Proceed,
        level: Level::Main,
    }
}

#[test]
fn test_idle_busy_full_states() {
    let mut f = fixture(4);

    assert_eq!(f.ring.state(&f.mem).unwrap(), RingState::Idle);

    f.ring.post(&mut f.mem, &desc()).unwrap();
    assert_eq!(f.ring.state(&f.mem).unwrap(), RingState::Busy);

    f.ring.post(&mut f.mem, &desc()).unwrap();
    f.ring.post(&mut f.mem, &desc()).unwrap();
    assert_eq!(f.ring.state(&f.mem).unwrap(), RingState::Full);
    assert!(!f.ring.not_full(&f.mem).unwrap());
}

#[test]
fn test_not_full_recovers_when_consumer_advances_get() {
    let mut f = fixture(4);

    for _ in 0..3 {
        f.ring.post(&mut f.mem, &desc()).unwrap();
    }
    assert!(!f.ring.not_full(&f.mem).unwrap());

    // Consumer retires one descriptor.
    f.mem.write_u32(f.get_address, 1).unwrap();
    assert!(f.ring.not_full(&f.mem).unwrap());
    assert_eq!(f.ring.occupancy(&f.mem).unwrap(), 2);
}

proptest! {
    /// not_full is false exactly when (put - get) mod entries == entries - 1,
    /// over all reachable (put, get) pairs.
    #[test]
    fn prop_not_full_truth_table(put in 0u32..8, get in 0u32..8) {
        let mut f = fixture(8);
        f.ring.set_initial_put(put);
        f.mem.write_u32(f.get_address, get).unwrap();

        let expected = (put.wrapping_sub(get) & 7) != 7;
        prop_assert_eq!(f.ring.not_full(&f.mem).unwrap(), expected);
    }
}
