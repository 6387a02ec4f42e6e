// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers

//! Unit tests for the command encoder (bit-exact header vectors)

use super::*;

#[test]
fn test_header_bit_layout() {
    // INCREMENT, count 5, subchannel 0, method 0x0100 (dword index 0x40).
    let word = encode_header(0, 0x0100, 5, MethodMode::Increment).unwrap();
    assert_eq!(word, (1 << 29) | (5 << 16) | 0x40);

    // NON_INCREMENT, count 1, subchannel 3, method 0x0040.
    let word = encode_header(3, 0x0040, 1, MethodMode::NonIncrement).unwrap();
    assert_eq!(word, (3 << 29) | (1 << 16) | (3 << 13) | 0x10);

    // ONE_INCREMENT, count 2, subchannel 7, method 0x1FFC.
    let word = encode_header(7, 0x1FFC, 2, MethodMode::OneIncrement).unwrap();
    assert_eq!(word, (5 << 29) | (2 << 16) | (7 << 13) | 0x7FF);

    // IMMEDIATE carries the value in the count field.
    let word = encode_header(0, 0x0110, 0x1234, MethodMode::Immediate).unwrap();
    assert_eq!(word, (4 << 29) | (0x1234 << 16) | 0x44);
}

#[test]
fn test_header_count_limit() {
    assert!(encode_header(0, 0x0100, MAX_METHOD_COUNT, MethodMode::Increment).is_ok());

    let err = encode_header(0, 0x0100, MAX_METHOD_COUNT + 1, MethodMode::Increment).unwrap_err();
    assert_eq!(
        err,
        ChannelError::MethodCountTooLarge {
            count: 0x2000,
            limit: 0x1FFF
        }
    );
}

#[test]
fn test_header_contract_violations() {
    assert!(matches!(
        encode_header(8, 0x0100, 1, MethodMode::Increment),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        encode_header(0, 0x0102, 1, MethodMode::Increment),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        encode_header(0, MAX_METHOD + 4, 1, MethodMode::Increment),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        encode_header(0, 0x0100, 0, MethodMode::Increment),
        Err(ChannelError::InvalidArgument(_))
    ));
}

#[test]
fn test_release_semaphore_shape() {
    let words = encode_release_semaphore(
        0x1_2345_6780,
        0x1234,
        ReleaseFlags::SIZE64 | ReleaseFlags::MEMBAR,
    )
    .unwrap();

    assert_eq!(words.len(), 6);
    assert_eq!(
        words[0],
        encode_header(0, methods::SEM_ADDR_HI, 5, MethodMode::Increment).unwrap()
    );
    assert_eq!(words[1], 0x1); // address high
    assert_eq!(words[2], 0x2345_6780); // address low
    assert_eq!(words[3], 0x1234); // payload low
    assert_eq!(words[4], 0); // payload high
    assert_eq!(
        words[5],
        sem_execute::RELEASE | sem_execute::SIZE64 | sem_execute::MEMBAR
    );
}

#[test]
fn test_release_semaphore_32bit_payload_limit() {
    // A value above u32::MAX without SIZE64 is a contract violation.
    let err = encode_release_semaphore(0x1000, 0x1_0000_0000, ReleaseFlags::empty()).unwrap_err();
    assert!(matches!(err, ChannelError::InvalidArgument(_)));

    // Unaligned semaphore address likewise.
    let err = encode_release_semaphore(0x1001, 1, ReleaseFlags::empty()).unwrap_err();
    assert!(matches!(err, ChannelError::InvalidArgument(_)));
}

#[test]
fn test_copy_shape() {
    let words = encode_copy(0x2000, 0x3000, 256, CopyFlush::System).unwrap();

    assert_eq!(words.len(), 8);
    assert_eq!(
        words[0],
        encode_header(0, methods::COPY_SRC_HI, 7, MethodMode::Increment).unwrap()
    );
    assert_eq!(words[2], 0x2000);
    assert_eq!(words[4], 0x3000);
    assert_eq!(words[5], 256);
    assert_eq!(words[6], 0);
    assert_eq!(words[7], copy_execute::FLUSH_SYSTEM);
}

#[test]
fn test_copy_unmask_carries_key() {
    let words = encode_copy_unmask(0x2000, 0x3000, 16, CopyFlush::None, 0xA5A5_A5A5).unwrap();
    assert_eq!(words[6], 0xA5A5_A5A5);
    assert_eq!(words[7], copy_execute::UNMASK);
}

#[test]
fn test_copy_size_validation() {
    assert!(matches!(
        encode_copy(0x2000, 0x3000, 0, CopyFlush::None),
        Err(ChannelError::InvalidArgument(_))
    ));
    assert!(matches!(
        encode_copy(0x2000, 0x3000, 10, CopyFlush::None),
        Err(ChannelError::InvalidArgument(_))
    ));
}

#[test]
fn test_canary_word_uses_canary_opcode() {
    assert_eq!(CANARY_WORD_V1 >> 29, opcode::CANARY);
}

#[test]
fn test_completion_predicates() {
    assert!(CompletionPredicate::AtLeast.satisfied(5, 5));
    assert!(CompletionPredicate::AtLeast.satisfied(6, 5));
    assert!(!CompletionPredicate::AtLeast.satisfied(4, 5));

    assert!(CompletionPredicate::Exact.satisfied(5, 5));
    assert!(!CompletionPredicate::Exact.satisfied(6, 5));
}

#[test]
fn test_dialect_tables() {
    let host = Dialect::host_v1();
    assert_eq!(host.completion, CompletionPredicate::AtLeast);
    assert_eq!(host.canary_word, CANARY_WORD_V1);

    let exact = Dialect::host_v1_exact();
    assert_eq!(exact.completion, CompletionPredicate::Exact);
    // Same encoders, different wait semantics.
    assert_eq!(
        (exact.encode_header)(0, 0x0100, 1, MethodMode::Increment).unwrap(),
        (host.encode_header)(0, 0x0100, 1, MethodMode::Increment).unwrap()
    );
}
