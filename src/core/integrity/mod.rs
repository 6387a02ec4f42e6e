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

//! Integrity tracker
//!
//! Maintains a running CRC-32 over emitted command words so ring or
//! pushbuffer corruption can be detected. The tracker computes the
//! *expected* side of the comparison; the actual check happens on the
//! consumer when a CRC_CHECK method carrying the expected value executes.
//!
//! The tracker walks the word stream with the same header parsing the
//! consumer uses, because only bytes the consumer folds into its own
//! checksum may be folded here. NOP headers and SOFTWARE method runs are
//! excluded on both sides. Any opcode this parser does not recognize is a
//! hard error, never a silent skip: duplicating consumer-internal
//! semantics is the error-prone part of this component, and failing
//! closed keeps the two checksums from drifting apart unnoticed.

use crate::core::encoder::opcode;
use crate::core::error::{ChannelError, Result};

#[cfg(test)]
mod tests;

/// CRC-32 (IEEE, reflected polynomial 0xEDB88320) lookup table
///
/// Built at compile time; the simulated engine uses the same table, which
/// is the point: both sides of the comparison must agree bit-for-bit.
const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Fold `bytes` into a raw CRC state (pre-inverted form)
pub(crate) fn crc_fold(state: u32, bytes: &[u8]) -> u32 {
    let mut crc = state;
    for &byte in bytes {
        crc = (crc >> 8) ^ CRC_TABLE[((crc ^ byte as u32) & 0xFF) as usize];
    }
    crc
}

/// Initial raw CRC state
pub(crate) const CRC_INIT: u32 = 0xFFFF_FFFF;

/// Finalize a raw CRC state into the presented value
pub(crate) fn crc_finish(state: u32) -> u32 {
    !state
}

/// One-shot CRC-32 of a byte slice
pub fn crc32(bytes: &[u8]) -> u32 {
    crc_finish(crc_fold(CRC_INIT, bytes))
}

/// Running checksum over emitted method words
#[derive(Debug, Clone)]
pub struct IntegrityTracker {
    state: u32,
}

impl Default for IntegrityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityTracker {
    pub fn new() -> Self {
        Self { state: CRC_INIT }
    }

    /// Fold a complete run of method sequences into the running value
    ///
    /// `words` must start at a header and end at a sequence boundary.
    ///
    /// # Errors
    ///
    /// - `UnsupportedOpcode` for any opcode the consumer parser does not
    ///   recognize (including the canary, which must never be checksummed)
    /// - `RingCorrupt` when a counted run extends past the slice
    pub fn update(&mut self, words: &[u32]) -> Result<()> {
        let mut i = 0usize;
        while i < words.len() {
            let header = words[i];
            let op = header >> 29;
            let count = ((header >> 16) & 0x1FFF) as usize;

            match op {
                opcode::NOP => {
                    // No payload, excluded from the checksum.
                    i += 1;
                }
                opcode::SOFTWARE => {
                    // Software-only methods execute but are never folded.
                    if i + 1 + count > words.len() {
                        return Err(ChannelError::RingCorrupt("truncated software method run"));
                    }
                    i += 1 + count;
                }
                opcode::INCREMENT | opcode::NON_INCREMENT | opcode::ONE_INCREMENT => {
                    if i + 1 + count > words.len() {
                        return Err(ChannelError::RingCorrupt("truncated method run"));
                    }
                    for &word in &words[i..i + 1 + count] {
                        self.state = crc_fold(self.state, &word.to_le_bytes());
                    }
                    i += 1 + count;
                }
                opcode::IMMEDIATE => {
                    // Value lives in the header; fold the header alone.
                    self.state = crc_fold(self.state, &header.to_le_bytes());
                    i += 1;
                }
                _ => {
                    return Err(ChannelError::UnsupportedOpcode { opcode: op });
                }
            }
        }
        Ok(())
    }

    /// Current presented value of the running checksum
    pub fn value(&self) -> u32 {
        crc_finish(self.state)
    }

    /// Take the running value if nonzero and reset the tracker
    ///
    /// The returned value is what gets embedded in a CRC_CHECK method
    /// addressed to the consumer.
    pub fn check_and_clear(&mut self) -> Option<u32> {
        let value = self.value();
        if value == 0 {
            return None;
        }
        self.state = CRC_INIT;
        Some(value)
    }
}
