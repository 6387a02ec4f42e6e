// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Unit tests for the integrity tracker

use proptest::prelude::*;

use super::*;
use crate::core::encoder::{encode_header, methods, MethodMode};

#[test]
fn test_crc32_known_vectors() {
    // Standard CRC-32/IEEE check values.
    assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    assert_eq!(crc32(b""), 0x0000_0000);
    assert_eq!(crc32(b"a"), 0xE8B7_BE43);
    assert_eq!(crc32(&[0x00, 0x00, 0x00, 0x00]), 0x2144_DF1C);
}

fn run(words: &[u32]) -> u32 {
    let mut tracker = IntegrityTracker::new();
    tracker.update(words).unwrap();
    tracker.value()
}

fn inc_run(method: u32, payload: &[u32]) -> Vec<u32> {
    let mut words = vec![encode_header(0, method, payload.len() as u32, MethodMode::Increment).unwrap()];
    words.extend_from_slice(payload);
    words
}

#[test]
fn test_determinism() {
    let words = inc_run(0x0100, &[0xAAAA, 0xBBBB, 0xCCCC]);
    assert_eq!(run(&words), run(&words));
}

#[test]
fn test_single_byte_difference_changes_value() {
    let a = inc_run(0x0100, &[0xAAAA, 0xBBBB]);
    let mut b = a.clone();
    b[2] ^= 0x0000_0100; // one byte differs
    assert_ne!(run(&a), run(&b));
}

#[test]
fn test_software_and_nop_excluded() {
    let folded = inc_run(0x0100, &[0x1234]);

    // Prepending a NOP or a SOFTWARE run must not change the value.
    let mut with_nop = vec![0u32]; // NOP header
    with_nop.extend_from_slice(&folded);

    let mut with_sw =
        vec![encode_header(0, methods::CRC_CHECK, 1, MethodMode::NonIncrement).unwrap()];
    // Rewrite opcode to SOFTWARE (2) keeping the rest of the header.
    with_sw[0] = (with_sw[0] & !(7 << 29)) | (2 << 29);
    with_sw.push(0xFFFF_FFFF); // payload that must be skipped
    with_sw.extend_from_slice(&folded);

    assert_eq!(run(&with_nop), run(&folded));
    assert_eq!(run(&with_sw), run(&folded));
}

#[test]
fn test_immediate_folds_header_only() {
    let imm = encode_header(0, 0x0110, 0x123, MethodMode::Immediate).unwrap();
    let expected = crc32(&imm.to_le_bytes());
    assert_eq!(run(&[imm]), expected);
}

#[test]
fn test_unknown_opcode_fails_closed() {
    let mut tracker = IntegrityTracker::new();
    let reserved = 6u32 << 29;
    assert_eq!(
        tracker.update(&[reserved]),
        Err(ChannelError::UnsupportedOpcode { opcode: 6 })
    );

    // The canary opcode is likewise never checksummed.
    let canary = 7u32 << 29;
    assert_eq!(
        tracker.update(&[canary]),
        Err(ChannelError::UnsupportedOpcode { opcode: 7 })
    );
}

#[test]
fn test_truncated_run_is_corruption() {
    let mut tracker = IntegrityTracker::new();
    let header = encode_header(0, 0x0100, 4, MethodMode::Increment).unwrap();
    let err = tracker.update(&[header, 1, 2]).unwrap_err();
    assert!(matches!(err, ChannelError::RingCorrupt(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_check_and_clear() {
    let mut tracker = IntegrityTracker::new();
    assert_eq!(tracker.check_and_clear(), None); // nothing folded yet

    tracker.update(&inc_run(0x0100, &[0x55])).unwrap();
    let value = tracker.check_and_clear().expect("nonzero running value");
    assert_ne!(value, 0);

    // Cleared: the same words fold to the same value again.
    tracker.update(&inc_run(0x0100, &[0x55])).unwrap();
    assert_eq!(tracker.check_and_clear(), Some(value));
}

#[test]
fn test_incremental_matches_one_shot() {
    let first = inc_run(0x0100, &[1, 2, 3]);
    let second = inc_run(0x0200, &[4, 5]);

    let mut split = IntegrityTracker::new();
    split.update(&first).unwrap();
    split.update(&second).unwrap();

    let mut joined = IntegrityTracker::new();
    let mut all = first.clone();
    all.extend_from_slice(&second);
    joined.update(&all).unwrap();

    assert_eq!(split.value(), joined.value());
}

proptest! {
    #[test]
    fn prop_equal_streams_fold_equal(payload in prop::collection::vec(any::<u32>(), 1..64)) {
        let words = inc_run(0x0100, &payload);
        prop_assert_eq!(run(&words), run(&words));
    }

    #[test]
    fn prop_avalanche(payload in prop::collection::vec(any::<u32>(), 1..32), flip in 0usize..32) {
        let words = inc_run(0x0100, &payload);
        let mut mutated = words.clone();
        let idx = 1 + (flip % payload.len());
        mutated[idx] ^= 1 << (flip % 32);
        prop_assert_ne!(run(&words), run(&mutated));
    }
}
