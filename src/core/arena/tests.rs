// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Unit tests for the pushbuffer arena

use super::*;

fn arena(mem: &mut DeviceMemory) -> PushbufferArena {
    PushbufferArena::new(mem, 4, 64, Location::HostVisible).unwrap()
}

#[test]
fn test_geometry_validation() {
    let mut mem = DeviceMemory::new(64 * 1024);

    assert!(matches!(
        PushbufferArena::new(&mut mem, 3, 64, Location::HostVisible),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        PushbufferArena::new(&mut mem, 0, 64, Location::HostVisible),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        PushbufferArena::new(&mut mem, 4, 30, Location::HostVisible),
        Err(ChannelError::InvalidArgument(_))
    ));
}

#[test]
fn test_segment_addressing() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);

    assert_eq!(arena.segment_base(0), arena.base());
    assert_eq!(arena.segment_base(1), arena.base() + 64);
    assert_eq!(arena.segment_base(3), arena.base() + 192);
    // Indices wrap with a mask, never a divide.
    assert_eq!(arena.segment_base(4), arena.segment_base(0));
    assert_eq!(arena.segment_base(7), arena.segment_base(3));
}

#[test]
fn test_append_round_trip() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);
    let mut writer = arena.begin_segment(2);

    writer.append(&mut mem, &[0x1111_0000, 0x2222_0000]).unwrap();
    writer.append(&mut mem, &[0x3333_0000]).unwrap();
    assert_eq!(writer.words_written(), 3);

    // Bytes read back equal bytes written, in order.
    let readback = mem.read_words(arena.segment_base(2), 3).unwrap();
    assert_eq!(readback, vec![0x1111_0000, 0x2222_0000, 0x3333_0000]);
}

#[test]
fn test_overflow_leaves_cursor_unchanged() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);
    let mut writer = arena.begin_segment(0);

    // 64-byte segment holds 16 words.
    writer.append(&mut mem, &vec![0u32; 14]).unwrap();
    assert_eq!(writer.remaining_words(), 2);

    let err = writer.append(&mut mem, &[1, 2, 3]).unwrap_err();
    assert_eq!(
        err,
        ChannelError::SegmentOverflow {
            requested: 3,
            remaining: 2
        }
    );
    assert_eq!(writer.words_written(), 14);

    // The remainder is still usable.
    writer.append(&mut mem, &[1, 2]).unwrap();
    assert_eq!(writer.remaining_words(), 0);
}

#[test]
fn test_reserved_tail_stays_out_of_append_reach() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);
    let mut writer = arena.begin_segment(0);

    // 16-word segment with 6 held back leaves 10 for regular appends.
    writer.reserve(6).unwrap();
    assert_eq!(writer.remaining_words(), 10);

    let err = writer.append(&mut mem, &vec![0u32; 11]).unwrap_err();
    assert_eq!(
        err,
        ChannelError::SegmentOverflow {
            requested: 11,
            remaining: 10
        }
    );

    writer.append(&mut mem, &vec![0u32; 10]).unwrap();
    assert_eq!(writer.remaining_words(), 0);

    // The tail path still reaches full capacity, and no further.
    writer.append_tail(&mut mem, &[1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(writer.words_written(), 16);
    assert!(writer.append_tail(&mut mem, &[7]).is_err());
}

#[test]
fn test_reservation_must_leave_usable_capacity() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);
    let mut writer = arena.begin_segment(0);

    assert!(matches!(
        writer.reserve(16),
        Err(ChannelError::InvalidArgument(_))
    ));
    writer.reserve(15).unwrap();
    assert_eq!(writer.remaining_words(), 1);
}

#[test]
fn test_canary_fill() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = arena(&mut mem);

    arena.fill_canary(&mut mem, 1, 0xE000_DEAD).unwrap();
    let words = mem.read_words(arena.segment_base(1), 16).unwrap();
    assert!(words.iter().all(|&w| w == 0xE000_DEAD));
}

#[test]
fn test_isolated_arena_rejects_host_writes() {
    let mut mem = DeviceMemory::new(64 * 1024);
    let arena = PushbufferArena::new(&mut mem, 4, 64, Location::DeviceOnly).unwrap();
    let mut writer = arena.begin_segment(0);

    let err = writer.append(&mut mem, &[1]).unwrap_err();
    assert!(matches!(err, ChannelError::NotHostVisible { .. }));

    // Canary fill still works: arming runs through the setup path.
    arena.fill_canary(&mut mem, 0, 0xE000_DEAD).unwrap();
}
