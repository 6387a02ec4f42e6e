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

//! Descriptor ring
//!
//! A fixed array of fixed-size descriptors in device memory, indexed by a
//! masked PUT the producer owns and a GET the consumer publishes into the
//! userd block. At most `entry_count - 1` descriptors may be outstanding;
//! one slot stays empty to disambiguate full from empty.
//!
//! # Publish ordering
//!
//! `post` writes the descriptor body, issues a release fence, advances the
//! masked PUT, publishes it to the consumer-visible location, and only then
//! writes the doorbell. Descriptor contents must be fully visible before
//! the PUT that exposes them, which must be visible before the doorbell.
//! A consumer fetching a stale or half-written descriptor is the worst
//! failure mode this design exists to prevent, so the order in `post` is
//! load-bearing.

use std::sync::atomic::{fence, Ordering};

use log::{debug, trace};

use crate::core::error::{ChannelError, Result};
use crate::core::memory::{DeviceMemory, Location};

#[cfg(test)]
mod tests;

/// Descriptor flag: consumer must wait for prior work before dispatch
const FLAG_SYNC_WAIT: u32 = 1 << 0;
/// Descriptor flag: segment runs at subroutine level
const FLAG_LEVEL_SUBROUTINE: u32 = 1 << 1;

/// Dispatch synchronization for one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Dispatch as soon as fetched
    Proceed,
    /// Drain prior work before dispatch
    Wait,
}

/// Execution level of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Main,
    Subroutine,
}

/// One ring entry: where a segment lives and how to dispatch it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Device address of the segment's first word
    pub address: u64,
    /// Number of valid command words in the segment
    pub length_words: u32,
    pub sync: SyncMode,
    pub level: Level,
}

impl Descriptor {
    /// Wire size of one entry
    pub const SIZE_BYTES: u32 = 16;

    /// Encode to the 16-byte wire layout (address, length, flags; LE words)
    pub fn encode(&self) -> [u32; 4] {
        let mut flags = 0;
        if self.sync == SyncMode::Wait {
            flags |= FLAG_SYNC_WAIT;
        }
        if self.level == Level::Subroutine {
            flags |= FLAG_LEVEL_SUBROUTINE;
        }
        [
            self.address as u32,
            (self.address >> 32) as u32,
            self.length_words,
            flags,
        ]
    }

    /// Decode the wire layout; unknown flag bits are corruption
    pub fn decode(words: [u32; 4]) -> Result<Self> {
        let flags = words[3];
        if flags & !(FLAG_SYNC_WAIT | FLAG_LEVEL_SUBROUTINE) != 0 {
            return Err(ChannelError::RingCorrupt("unknown descriptor flag bits"));
        }
        Ok(Self {
            address: (words[1] as u64) << 32 | words[0] as u64,
            length_words: words[2],
            sync: if flags & FLAG_SYNC_WAIT != 0 {
                SyncMode::Wait
            } else {
                SyncMode::Proceed
            },
            level: if flags & FLAG_LEVEL_SUBROUTINE != 0 {
                Level::Subroutine
            } else {
                Level::Main
            },
        })
    }
}

/// Observable ring states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// put == get
    Idle,
    /// Descriptors outstanding
    Busy,
    /// One free slot remains reserved; no more posts admitted
    Full,
}

/// Doorbell binding handed out when a channel is scheduled
#[derive(Debug, Clone, Copy)]
pub struct DoorbellTarget {
    /// Host-visible register address
    pub address: u64,
    /// Opaque per-channel token written to the register
    pub token: u32,
}

/// Producer-side descriptor ring
///
/// Owns the masked PUT; the consumer publishes GET into the userd block.
/// Exclusively owned by one channel, so no ring-level locking exists or is
/// needed.
pub struct DescriptorRing {
    base: u64,
    entry_count: u32,
    put: u32,
    put_address: u64,
    get_address: u64,
    doorbell: Option<DoorbellTarget>,
}

impl DescriptorRing {
    /// Allocate ring storage and wrap it
    ///
    /// `put_address`/`get_address` point into the channel's userd block.
    pub fn new(
        mem: &mut DeviceMemory,
        entry_count: u32,
        location: Location,
        put_address: u64,
        get_address: u64,
    ) -> Result<Self> {
        if entry_count < 2 || !entry_count.is_power_of_two() {
            return Err(ChannelError::InvalidArgument(
                "ring entry count must be a power of two >= 2",
            ));
        }

        let allocation = mem.alloc(
            entry_count as u64 * Descriptor::SIZE_BYTES as u64,
            64,
            location,
        )?;
        trace!(
            "descriptor ring at 0x{:012X}: {} entries",
            allocation.address,
            entry_count
        );

        Ok(Self {
            base: allocation.address,
            entry_count,
            put: 0,
            put_address,
            get_address,
            doorbell: None,
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// Index mask (entry count is a power of two)
    pub fn mask(&self) -> u32 {
        self.entry_count - 1
    }

    /// Producer-side PUT index
    pub fn put(&self) -> u32 {
        self.put
    }

    /// Device address of ring slot `index`
    pub fn slot_address(&self, index: u32) -> u64 {
        self.base + (index & self.mask()) as u64 * Descriptor::SIZE_BYTES as u64
    }

    /// Attach the doorbell obtained at scheduling time
    pub fn set_doorbell(&mut self, target: DoorbellTarget) {
        self.doorbell = Some(target);
    }

    pub fn doorbell(&self) -> Option<DoorbellTarget> {
        self.doorbell
    }

    /// Force the producer PUT, for pre-arming relay-driven rings
    pub(crate) fn set_initial_put(&mut self, put: u32) {
        self.put = put & self.mask();
    }

    /// Consumer-visible GET, re-read from the userd block
    pub fn read_get(&self, mem: &DeviceMemory) -> Result<u32> {
        mem.read_u32(self.get_address)
    }

    /// Outstanding descriptor count
    pub fn occupancy(&self, mem: &DeviceMemory) -> Result<u32> {
        let get = self.read_get(mem)?;
        Ok(self.put.wrapping_sub(get) & self.mask())
    }

    /// True while at least one slot can still be posted
    ///
    /// Re-reads the consumer's GET on every call; the answer goes stale the
    /// moment the consumer retires more work, but only in the permissive
    /// direction.
    pub fn not_full(&self, mem: &DeviceMemory) -> Result<bool> {
        Ok(self.occupancy(mem)? != self.mask())
    }

    pub fn state(&self, mem: &DeviceMemory) -> Result<RingState> {
        Ok(match self.occupancy(mem)? {
            0 => RingState::Idle,
            n if n == self.mask() => RingState::Full,
            _ => RingState::Busy,
        })
    }

    /// Publish one descriptor and ring the doorbell
    ///
    /// Posting on a full ring is a caller bug, not a recoverable error:
    /// callers must check `not_full` or wait first.
    pub fn post(&mut self, mem: &mut DeviceMemory, descriptor: &Descriptor) -> Result<()> {
        let doorbell = self
            .doorbell
            .ok_or(ChannelError::InvalidArgument("ring has no doorbell target"))?;
        if !self.not_full(mem)? {
            return Err(ChannelError::InvalidArgument(
                "post on a full descriptor ring",
            ));
        }

        let slot = self.slot_address(self.put);
        mem.write_words(slot, &descriptor.encode())?;

        // Descriptor body must be visible before the PUT that exposes it.
        fence(Ordering::Release);

        self.put = (self.put + 1) & self.mask();
        mem.write_u32(self.put_address, self.put)?;
        mem.write_u32(doorbell.address, doorbell.token)?;

        debug!(
            "posted descriptor addr=0x{:012X} len={} put={} token={}",
            descriptor.address, descriptor.length_words, self.put, doorbell.token
        );
        Ok(())
    }
}
