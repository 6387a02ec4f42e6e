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

//! Pushbuffer arena
//!
//! A fixed-capacity device memory region divided into equal power-of-two
//! segments. The producer builds one segment at a time through a
//! [`SegmentWriter`]; ownership of a segment transfers to the consumer when
//! the descriptor referencing it is posted, and returns to the producer only
//! once the ring's not-full predicate admits the slot again.

use log::trace;

use crate::core::error::{ChannelError, Result};
use crate::core::memory::{Allocation, DeviceMemory, Location};

#[cfg(test)]
mod tests;

/// Fixed-capacity pushbuffer split into equal segments
///
/// `segment_count` must be a power of two so segment indices can be masked,
/// and `segment_size` a nonzero multiple of 4 (commands are 32-bit words).
pub struct PushbufferArena {
    allocation: Allocation,
    segment_count: u32,
    segment_size: u32,
}

impl PushbufferArena {
    /// Allocate an arena of `segment_count * segment_size` bytes
    pub fn new(
        mem: &mut DeviceMemory,
        segment_count: u32,
        segment_size: u32,
        location: Location,
    ) -> Result<Self> {
        if segment_count == 0 || !segment_count.is_power_of_two() {
            return Err(ChannelError::InvalidArgument(
                "segment count must be a nonzero power of two",
            ));
        }
        if segment_size == 0 || segment_size % 4 != 0 {
            return Err(ChannelError::InvalidArgument(
                "segment size must be a nonzero multiple of 4",
            ));
        }

        let total = segment_count as u64 * segment_size as u64;
        let allocation = mem.alloc(total, 4096, location)?;
        trace!(
            "pushbuffer arena at 0x{:012X}: {} segments x {} bytes",
            allocation.address,
            segment_count,
            segment_size
        );

        Ok(Self {
            allocation,
            segment_count,
            segment_size,
        })
    }

    /// Device address of the arena's first byte
    pub fn base(&self) -> u64 {
        self.allocation.address
    }

    /// Number of segments
    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    /// Segment size in bytes
    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// Visibility of the arena's backing memory
    pub fn location(&self) -> Location {
        self.allocation.location
    }

    /// Device address of segment `index` (masked)
    pub fn segment_base(&self, index: u32) -> u64 {
        let index = index & (self.segment_count - 1);
        self.allocation.address + index as u64 * self.segment_size as u64
    }

    /// Open segment `index` for writing, with the cursor at word 0
    ///
    /// Capacity checks happen at the caller (the channel verifies the ring
    /// is not full before opening a fresh segment).
    pub fn begin_segment(&self, index: u32) -> SegmentWriter {
        SegmentWriter {
            base: self.segment_base(index),
            capacity_words: self.segment_size / 4,
            reserved_words: 0,
            write_index: 0,
        }
    }

    /// Fill segment `index` with the dialect's canary word
    ///
    /// Runs through the setup path (device view) so isolated arenas can be
    /// armed before they stop being reachable from the host.
    pub fn fill_canary(&self, mem: &mut DeviceMemory, index: u32, canary: u32) -> Result<()> {
        let words = vec![canary; (self.segment_size / 4) as usize];
        mem.device_write_words(self.segment_base(index), &words)
    }
}

/// Cursor over the segment currently being built
///
/// Tracks the next free word; `append` is the only way bytes enter a
/// segment, so the recorded length can never disagree with what was
/// written.
pub struct SegmentWriter {
    base: u64,
    capacity_words: u32,
    reserved_words: u32,
    write_index: u32,
}

impl SegmentWriter {
    /// Hold back `words` of tail capacity, invisible to `append`
    ///
    /// Reserved words can only be written through `append_tail`, so a
    /// trailing sequence appended at close time always fits. Rejects a
    /// reservation that leaves no usable capacity.
    pub fn reserve(&mut self, words: u32) -> Result<()> {
        if words >= self.capacity_words {
            return Err(ChannelError::InvalidArgument(
                "reservation leaves no usable segment capacity",
            ));
        }
        self.reserved_words = words;
        Ok(())
    }

    /// Copy `words` into the segment at the cursor
    ///
    /// Fails with `SegmentOverflow` (cursor unchanged) when the words do
    /// not fit ahead of the reserved tail.
    pub fn append(&mut self, mem: &mut DeviceMemory, words: &[u32]) -> Result<()> {
        self.append_up_to(mem, words, self.capacity_words - self.reserved_words)
    }

    /// Copy `words` into the segment, allowed to consume the reserved tail
    pub(crate) fn append_tail(&mut self, mem: &mut DeviceMemory, words: &[u32]) -> Result<()> {
        self.append_up_to(mem, words, self.capacity_words)
    }

    fn append_up_to(&mut self, mem: &mut DeviceMemory, words: &[u32], limit: u32) -> Result<()> {
        let requested = words.len() as u32;
        if self
            .write_index
            .checked_add(requested)
            .map_or(true, |end| end > limit)
        {
            return Err(ChannelError::SegmentOverflow {
                requested,
                remaining: limit - self.write_index,
            });
        }

        mem.write_words(self.base + self.write_index as u64 * 4, words)?;
        self.write_index += requested;
        Ok(())
    }

    /// Device address of the segment's first byte
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Words appended so far
    pub fn words_written(&self) -> u32 {
        self.write_index
    }

    /// Words still free for `append`, excluding any reserved tail
    pub fn remaining_words(&self) -> u32 {
        (self.capacity_words - self.reserved_words).saturating_sub(self.write_index)
    }

    /// True when nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.write_index == 0
    }
}
