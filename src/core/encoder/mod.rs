// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 ringbell developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Command encoder
//!
//! Translates logical operations (write register, release semaphore, copy)
//! into the fixed 32-bit word format the command processor consumes.
//! Encoding is pure: no I/O, no state. That keeps it unit-testable apart
//! from the ring and arena, and lets multiple consumer dialects share the
//! machinery through a [`Dialect`] table selected at channel construction.
//!
//! # Word format (v1)
//!
//! ```text
//! Bits  | Field
//! ------|---------------------------------------
//! 31:29 | Opcode
//! 28:16 | Count (or immediate value)
//! 15:13 | Subchannel
//! 12:0  | Method dword index (byte address >> 2)
//! ```
//!
//! Opcodes:
//!
//! | Value | Meaning       | Payload words | Method stepping        |
//! |-------|---------------|---------------|------------------------|
//! | 0     | NOP           | none          | -                      |
//! | 1     | INCREMENT     | count         | +4 per payload word    |
//! | 2     | SOFTWARE      | count         | +4, excluded from CRC  |
//! | 3     | NON_INCREMENT | count         | fixed                  |
//! | 4     | IMMEDIATE     | none          | value in count field   |
//! | 5     | ONE_INCREMENT | count         | +4 once, then fixed    |
//! | 6     | reserved      | -             | rejected               |
//! | 7     | CANARY        | none          | deterministic fault    |
//!
//! This layout is the wire contract with the consumer; treat it as a
//! versioned constant table.

use bitflags::bitflags;

use crate::core::error::{ChannelError, Result};

#[cfg(test)]
mod tests;

/// Opcode field values (bits 31:29)
pub mod opcode {
    pub const NOP: u32 = 0;
    pub const INCREMENT: u32 = 1;
    pub const SOFTWARE: u32 = 2;
    pub const NON_INCREMENT: u32 = 3;
    pub const IMMEDIATE: u32 = 4;
    pub const ONE_INCREMENT: u32 = 5;
    pub const RESERVED: u32 = 6;
    pub const CANARY: u32 = 7;
}

/// Maximum value of the 13-bit count/immediate field
pub const MAX_METHOD_COUNT: u32 = 0x1FFF;
/// Highest addressable subchannel
pub const MAX_SUBCHANNEL: u32 = 7;
/// Highest method byte address (13-bit dword index)
pub const MAX_METHOD: u32 = MAX_METHOD_COUNT << 2;

const OPCODE_SHIFT: u32 = 29;
const COUNT_SHIFT: u32 = 16;
const SUBCHANNEL_SHIFT: u32 = 13;
const METHOD_MASK: u32 = 0x1FFF;

/// Method register map understood by the reference consumer (subchannel 0)
pub mod methods {
    /// Semaphore address, high 32 bits
    pub const SEM_ADDR_HI: u32 = 0x0100;
    /// Semaphore address, low 32 bits
    pub const SEM_ADDR_LO: u32 = 0x0104;
    /// Semaphore payload, low 32 bits
    pub const SEM_PAYLOAD_LO: u32 = 0x0108;
    /// Semaphore payload, high 32 bits (SIZE64 releases)
    pub const SEM_PAYLOAD_HI: u32 = 0x010C;
    /// Semaphore execute trigger; bit 0 = release, bits 1-4 = flags
    pub const SEM_EXECUTE: u32 = 0x0110;

    /// Copy source address, high 32 bits
    pub const COPY_SRC_HI: u32 = 0x0180;
    /// Copy source address, low 32 bits
    pub const COPY_SRC_LO: u32 = 0x0184;
    /// Copy destination address, high 32 bits
    pub const COPY_DST_HI: u32 = 0x0188;
    /// Copy destination address, low 32 bits
    pub const COPY_DST_LO: u32 = 0x018C;
    /// Copy size in bytes (multiple of 4)
    pub const COPY_SIZE: u32 = 0x0190;
    /// Keystream word for unmasking copies
    pub const COPY_KEY: u32 = 0x0194;
    /// Copy execute trigger; bits 1:0 = flush mode, bit 2 = unmask
    pub const COPY_EXECUTE: u32 = 0x0198;

    /// Integrity check: payload is the expected running CRC
    pub const CRC_CHECK: u32 = 0x01C0;
}

/// SEM_EXECUTE trigger bits
pub mod sem_execute {
    pub const RELEASE: u32 = 1 << 0;
    pub const SIZE64: u32 = 1 << 1;
    pub const MEMBAR: u32 = 1 << 2;
    pub const SYSMEMBAR: u32 = 1 << 3;
    pub const WFI: u32 = 1 << 4;
}

/// COPY_EXECUTE trigger bits
pub mod copy_execute {
    pub const FLUSH_MASK: u32 = 0b11;
    pub const FLUSH_LOCAL: u32 = 1;
    pub const FLUSH_SYSTEM: u32 = 2;
    pub const UNMASK: u32 = 1 << 2;
}

/// Method header addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMode {
    /// Method address advances by one dword per payload word
    Increment,
    /// All payload words target the same method
    NonIncrement,
    /// Address advances once after the first payload word, then stays
    OneIncrement,
    /// Single value carried in the header's count field, no payload
    Immediate,
}

impl MethodMode {
    fn opcode(self) -> u32 {
        match self {
            MethodMode::Increment => opcode::INCREMENT,
            MethodMode::NonIncrement => opcode::NON_INCREMENT,
            MethodMode::OneIncrement => opcode::ONE_INCREMENT,
            MethodMode::Immediate => opcode::IMMEDIATE,
        }
    }
}

bitflags! {
    /// Semaphore release options
    ///
    /// Bit values match the SEM_EXECUTE trigger word so flags pass through
    /// unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReleaseFlags: u32 {
        /// Release a 64-bit payload instead of 32-bit
        const SIZE64 = sem_execute::SIZE64;
        /// Local memory barrier before the release write
        const MEMBAR = sem_execute::MEMBAR;
        /// Full-system memory barrier before the release write
        const SYSMEMBAR = sem_execute::SYSMEMBAR;
        /// Wait for engine idle before the release write
        const WFI = sem_execute::WFI;
    }
}

/// Cache flush behavior for device copies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFlush {
    None,
    Local,
    System,
}

impl CopyFlush {
    fn execute_bits(self) -> u32 {
        match self {
            CopyFlush::None => 0,
            CopyFlush::Local => copy_execute::FLUSH_LOCAL,
            CopyFlush::System => copy_execute::FLUSH_SYSTEM,
        }
    }
}

/// Pack a method header word
///
/// # Errors
///
/// - `MethodCountTooLarge` when `count` exceeds the 13-bit field
/// - `InvalidArgument` for a zero count, out-of-range subchannel, or a
///   misaligned/out-of-range method address
pub fn encode_header(subchannel: u32, method: u32, count: u32, mode: MethodMode) -> Result<u32> {
    if subchannel > MAX_SUBCHANNEL {
        return Err(ChannelError::InvalidArgument("subchannel out of range"));
    }
    if method % 4 != 0 || method > MAX_METHOD {
        return Err(ChannelError::InvalidArgument(
            "method address must be dword-aligned and within the 13-bit index",
        ));
    }
    if count > MAX_METHOD_COUNT {
        return Err(ChannelError::MethodCountTooLarge {
            count,
            limit: MAX_METHOD_COUNT,
        });
    }
    if count == 0 && mode != MethodMode::Immediate {
        return Err(ChannelError::InvalidArgument("method count is zero"));
    }

    Ok((mode.opcode() << OPCODE_SHIFT)
        | (count << COUNT_SHIFT)
        | (subchannel << SUBCHANNEL_SHIFT)
        | ((method >> 2) & METHOD_MASK))
}

/// Pack a SOFTWARE header carrying one payload word for `method`
///
/// Software-only runs execute on the consumer but are excluded from both
/// sides of the integrity checksum, which is what lets the CRC_CHECK
/// command itself stay out of the value it verifies.
pub fn encode_software_header(method: u32) -> Result<u32> {
    if method % 4 != 0 || method > MAX_METHOD {
        return Err(ChannelError::InvalidArgument(
            "method address must be dword-aligned and within the 13-bit index",
        ));
    }
    Ok((opcode::SOFTWARE << OPCODE_SHIFT) | (1 << COUNT_SHIFT) | ((method >> 2) & METHOD_MASK))
}

/// Encode a semaphore release: write `value` to `address` once prior work
/// has retired
///
/// Emits one INCREMENT run covering the five consecutive semaphore methods.
pub fn encode_release_semaphore(address: u64, value: u64, flags: ReleaseFlags) -> Result<Vec<u32>> {
    if address % 4 != 0 {
        return Err(ChannelError::InvalidArgument(
            "semaphore address must be dword-aligned",
        ));
    }
    if !flags.contains(ReleaseFlags::SIZE64) && value > u64::from(u32::MAX) {
        return Err(ChannelError::InvalidArgument(
            "64-bit payload requires the SIZE64 flag",
        ));
    }

    Ok(vec![
        encode_header(0, methods::SEM_ADDR_HI, 5, MethodMode::Increment)?,
        (address >> 32) as u32,
        address as u32,
        value as u32,
        (value >> 32) as u32,
        sem_execute::RELEASE | flags.bits(),
    ])
}

/// Encode a device-side memory copy of `size` bytes
pub fn encode_copy(src: u64, dst: u64, size: u32, flush: CopyFlush) -> Result<Vec<u32>> {
    encode_copy_words(src, dst, size, flush.execute_bits())
}

/// Encode a copy that unmasks its payload with `key` while copying
///
/// The keyed variant is the relay pipeline's stand-in for a decrypting
/// transfer into an isolated channel.
pub fn encode_copy_unmask(
    src: u64,
    dst: u64,
    size: u32,
    flush: CopyFlush,
    key: u32,
) -> Result<Vec<u32>> {
    let mut words = encode_copy_words(src, dst, size, flush.execute_bits() | copy_execute::UNMASK)?;
    // COPY_KEY is the sixth payload word of the run.
    words[6] = key;
    Ok(words)
}

fn encode_copy_words(src: u64, dst: u64, size: u32, execute: u32) -> Result<Vec<u32>> {
    if size == 0 || size % 4 != 0 {
        return Err(ChannelError::InvalidArgument(
            "copy size must be a nonzero multiple of 4",
        ));
    }

    Ok(vec![
        encode_header(0, methods::COPY_SRC_HI, 7, MethodMode::Increment)?,
        (src >> 32) as u32,
        src as u32,
        (dst >> 32) as u32,
        dst as u32,
        size,
        0, // COPY_KEY, unused unless UNMASK is set
        execute,
    ])
}

/// Predicate applied to the completion sequence during `wait`
///
/// Which predicate a consumer implements is part of its dialect; tests
/// exercise both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionPredicate {
    /// Observed value must reach or pass the target (monotonic counters)
    AtLeast,
    /// Observed value must equal the target exactly
    Exact,
}

impl CompletionPredicate {
    pub fn satisfied(self, observed: u64, target: u64) -> bool {
        match self {
            CompletionPredicate::AtLeast => observed >= target,
            CompletionPredicate::Exact => observed == target,
        }
    }
}

/// Consumer dialect: the encoding strategy table for one engine family
///
/// A plain table of pure functions plus constants, selected once at channel
/// construction. Different engines format headers differently; none of that
/// variation leaks past this struct.
#[derive(Clone, Copy)]
pub struct Dialect {
    pub name: &'static str,
    pub encode_header: fn(u32, u32, u32, MethodMode) -> Result<u32>,
    pub encode_release_semaphore: fn(u64, u64, ReleaseFlags) -> Result<Vec<u32>>,
    pub encode_copy: fn(u64, u64, u32, CopyFlush) -> Result<Vec<u32>>,
    /// Placeholder command that faults deterministically if executed
    pub canary_word: u32,
    pub completion: CompletionPredicate,
}

/// Canary word under format v1: CANARY opcode, recognizable payload bits
pub const CANARY_WORD_V1: u32 = (opcode::CANARY << OPCODE_SHIFT) | 0xDEAD;

impl Dialect {
    /// The reference host-interface dialect (format v1, `AtLeast` waits)
    pub fn host_v1() -> Self {
        Self {
            name: "host-v1",
            encode_header,
            encode_release_semaphore,
            encode_copy,
            canary_word: CANARY_WORD_V1,
            completion: CompletionPredicate::AtLeast,
        }
    }

    /// Format v1 with exact-match completion, for consumers whose sequence
    /// location carries values rather than a counter
    pub fn host_v1_exact() -> Self {
        Self {
            completion: CompletionPredicate::Exact,
            name: "host-v1-exact",
            ..Self::host_v1()
        }
    }
}
