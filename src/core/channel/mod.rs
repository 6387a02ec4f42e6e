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

//! Submission channel
//!
//! One producer/consumer relationship: a pushbuffer arena, a descriptor
//! ring, a completion sequence and an integrity tracker composed into a
//! single flush/wait unit.
//!
//! # Lifecycle
//!
//! ```text
//! Allocated → Scheduled → (Flushing ⇄ Draining) → Disabled / Faulted
//! ```
//!
//! A channel is constructed once per unit of work, scheduled against a
//! consumer (which hands out the doorbell target), flushed and waited on
//! any number of times, then disabled. There is no mid-flight cancel: a
//! posted descriptor either retires or faults against its canary.
//!
//! # Userd block layout
//!
//! Per-channel, host-visible, 16 bytes:
//!
//! | Offset | Field               |
//! |--------|---------------------|
//! | 0x0    | PUT (u32)           |
//! | 0x4    | GET (u32)           |
//! | 0x8    | completion sequence (u64) |

use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::core::arena::{PushbufferArena, SegmentWriter};
use crate::core::encoder::{
    encode_software_header, methods, CopyFlush, Dialect, MethodMode, ReleaseFlags,
};
use crate::core::error::{ChannelError, Result};
use crate::core::integrity::IntegrityTracker;
use crate::core::memory::{Allocation, DeviceMemory, Location};
use crate::core::notify::{poll_until, CompletionSequence, WaitStrategy};
use crate::core::ring::{Descriptor, DescriptorRing, DoorbellTarget, Level, SyncMode};

#[cfg(test)]
mod tests;

/// Words every segment holds back for the flush-time completion release
const RELEASE_TAIL_WORDS: u32 = 6;

/// Userd field offsets
pub(crate) const USERD_PUT: u64 = 0x0;
pub(crate) const USERD_GET: u64 = 0x4;
pub(crate) const USERD_SEQUENCE: u64 = 0x8;
const USERD_SIZE: u64 = 16;

/// Channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed; no doorbell target yet
    Allocated,
    /// Bound to a consumer, idle
    Scheduled,
    /// Current segment has pending words
    Flushing,
    /// Descriptors posted, completion outstanding
    Draining,
    /// Detached; no further scheduling
    Disabled,
    /// First fatal error latched; channel is dead
    Faulted,
}

/// One command-submission channel
pub struct Channel {
    dialect: Dialect,
    arena: PushbufferArena,
    ring: DescriptorRing,
    completion: CompletionSequence,
    userd: Allocation,
    writer: SegmentWriter,
    segment_index: u32,
    sequence_put: u64,
    sequence_get: u64,
    tracker: IntegrityTracker,
    state: ChannelState,
    fault: Option<ChannelError>,
}

impl Channel {
    /// Construct a channel with `entry_count` ring slots and matching
    /// pushbuffer segments of `segment_size` bytes
    ///
    /// The arena and ring share `location`; the userd block is always
    /// host-visible (the producer must poll GET and the completion
    /// sequence even for an isolated channel). Every segment is
    /// canary-filled before first use so premature consumption faults
    /// deterministically instead of executing stale bytes.
    /// `segment_size` must exceed the 24-byte completion-release tail
    /// held back in every segment.
    pub fn new(
        mem: &mut DeviceMemory,
        dialect: Dialect,
        entry_count: u32,
        segment_size: u32,
        location: Location,
    ) -> Result<Self> {
        let userd = mem.alloc(USERD_SIZE, 8, Location::HostVisible)?;
        let arena = PushbufferArena::new(mem, entry_count, segment_size, location)?;
        let ring = DescriptorRing::new(
            mem,
            entry_count,
            location,
            userd.address + USERD_PUT,
            userd.address + USERD_GET,
        )?;

        for index in 0..entry_count {
            arena.fill_canary(mem, index, dialect.canary_word)?;
        }

        let writer = Self::open_segment(&arena, 0)?;
        let completion = CompletionSequence::new(userd.address + USERD_SEQUENCE);

        info!(
            "channel allocated: dialect={} entries={} segment={}B arena=0x{:012X} {:?}",
            dialect.name,
            entry_count,
            segment_size,
            arena.base(),
            location
        );

        Ok(Self {
            dialect,
            arena,
            ring,
            completion,
            userd,
            writer,
            segment_index: 0,
            sequence_put: 0,
            sequence_get: 0,
            tracker: IntegrityTracker::new(),
            state: ChannelState::Allocated,
            fault: None,
        })
    }

    /// Open a segment with the completion-release tail held back
    ///
    /// `emit` can therefore never fill a segment past the point where it
    /// can no longer be flushed; a `SegmentOverflow` seen by a caller
    /// always means "flush, then continue".
    fn open_segment(arena: &PushbufferArena, index: u32) -> Result<SegmentWriter> {
        let mut writer = arena.begin_segment(index);
        writer.reserve(RELEASE_TAIL_WORDS)?;
        Ok(writer)
    }

    /// Attach the doorbell target handed out by the consumer at
    /// scheduling time
    pub fn attach_doorbell(&mut self, target: DoorbellTarget) {
        self.ring.set_doorbell(target);
        if self.state == ChannelState::Allocated {
            self.state = ChannelState::Scheduled;
        }
        debug!(
            "channel scheduled: doorbell=0x{:012X} token={}",
            target.address, target.token
        );
    }

    /// Latch the first fatal error and kill the channel
    fn fatal(&mut self, err: ChannelError) -> ChannelError {
        if self.fault.is_none() {
            warn!("channel faulted: {err}");
            self.fault = Some(err.clone());
            self.state = ChannelState::Faulted;
        }
        err
    }

    /// Reject work once the channel is dead or detached
    fn check_usable(&self) -> Result<()> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }
        match self.state {
            ChannelState::Disabled => Err(ChannelError::ChannelDisabled),
            ChannelState::Allocated => Err(ChannelError::InvalidArgument(
                "channel has not been scheduled",
            )),
            _ => Ok(()),
        }
    }

    /// Append raw command words to the current segment
    ///
    /// Opening a fresh segment requires a free ring slot: the segment
    /// cannot be handed to the consumer otherwise, so a full ring surfaces
    /// here as `RingFull` before any bytes move.
    pub fn emit(&mut self, mem: &mut DeviceMemory, words: &[u32]) -> Result<()> {
        self.check_usable()?;
        if words.is_empty() {
            return Err(ChannelError::InvalidArgument("empty word sequence"));
        }

        if self.writer.is_empty() && !self.ring.not_full(mem)? {
            return Err(ChannelError::RingFull);
        }

        self.writer.append(mem, words)?;
        if let Err(err) = self.tracker.update(words) {
            // The tracker refusing a stream means we emitted something the
            // consumer will not parse the way we think; that is corruption,
            // not a recoverable append.
            return Err(self.fatal(err));
        }

        self.state = ChannelState::Flushing;
        trace!("emit {} words (segment {})", words.len(), self.segment_index);
        Ok(())
    }

    /// Emit a single register write on `subchannel`
    pub fn write_method(
        &mut self,
        mem: &mut DeviceMemory,
        subchannel: u32,
        method: u32,
        value: u32,
    ) -> Result<()> {
        let header = (self.dialect.encode_header)(subchannel, method, 1, MethodMode::Increment)?;
        self.emit(mem, &[header, value])
    }

    /// Emit a semaphore release to an arbitrary device address
    pub fn release_semaphore(
        &mut self,
        mem: &mut DeviceMemory,
        address: u64,
        value: u64,
        flags: ReleaseFlags,
    ) -> Result<()> {
        let words = (self.dialect.encode_release_semaphore)(address, value, flags)?;
        self.emit(mem, &words)
    }

    /// Emit a device-side copy
    pub fn copy(
        &mut self,
        mem: &mut DeviceMemory,
        src: u64,
        dst: u64,
        size: u32,
        flush: CopyFlush,
    ) -> Result<()> {
        let words = (self.dialect.encode_copy)(src, dst, size, flush)?;
        self.emit(mem, &words)
    }

    /// Emit a consumer-side integrity check for everything folded since
    /// the last check
    ///
    /// No-op when the running value is zero. The check rides a SOFTWARE
    /// method so it is excluded from both checksums by construction.
    pub fn flush_crc_check(&mut self, mem: &mut DeviceMemory) -> Result<()> {
        let Some(expected) = self.tracker.check_and_clear() else {
            return Ok(());
        };
        let header = encode_software_header(methods::CRC_CHECK)?;
        self.emit(mem, &[header, expected])
    }

    /// Close the current segment and hand it to the consumer
    ///
    /// Appends the completion release (next sequence value to the userd
    /// sequence cell), posts the descriptor, rings the doorbell and opens
    /// the next segment. A flush with nothing pending is a no-op. A full
    /// ring fails with `RingFull` before anything is appended; pending
    /// words stay in place for a retry after `wait(false)`.
    pub fn flush(&mut self, mem: &mut DeviceMemory) -> Result<u64> {
        self.check_usable()?;
        if self.writer.is_empty() {
            return Ok(self.sequence_put);
        }
        if !self.ring.not_full(mem)? {
            return Err(ChannelError::RingFull);
        }

        let sequence = self.sequence_put + 1;
        let release = (self.dialect.encode_release_semaphore)(
            self.completion.address(),
            sequence,
            ReleaseFlags::SIZE64 | ReleaseFlags::MEMBAR,
        )?;
        self.writer.append_tail(mem, &release)?;
        if let Err(err) = self.tracker.update(&release) {
            return Err(self.fatal(err));
        }

        let descriptor = Descriptor {
            address: self.writer.base(),
            length_words: self.writer.words_written(),
            sync: SyncMode::Proceed,
            level: Level::Main,
        };
        self.ring.post(mem, &descriptor)?;

        self.sequence_put = sequence;
        self.segment_index = (self.segment_index + 1) & (self.arena.segment_count() - 1);
        self.writer = Self::open_segment(&self.arena, self.segment_index)?;
        self.state = ChannelState::Draining;

        debug!(
            "flush: seq={} segment={} len={} words",
            sequence, self.segment_index, descriptor.length_words
        );
        Ok(sequence)
    }

    /// Wait for outstanding work to retire
    ///
    /// With `drain` set, flushes first. Polls the completion sequence
    /// under the dialect's predicate with bounded retries; `hook` runs
    /// between attempts (scheduler yield, or the consumer tick in tests).
    /// `Timeout` is retryable and leaves the channel in `Draining`;
    /// corruption latches the channel into `Faulted`.
    pub fn wait<H>(
        &mut self,
        mem: &mut DeviceMemory,
        drain: bool,
        timeout: Duration,
        strategy: WaitStrategy,
        hook: &mut H,
    ) -> Result<()>
    where
        H: FnMut(&mut DeviceMemory),
    {
        self.check_usable()?;
        if drain {
            self.flush(mem)?;
        }

        let target = self.sequence_put;
        if target == self.sequence_get {
            return Ok(());
        }

        self.state = ChannelState::Draining;
        let predicate = self.dialect.completion;
        let completion = &mut self.completion;

        let result = poll_until(mem, timeout, strategy, hook, |mem| {
            let observed = completion.read(mem)?;
            Ok(predicate.satisfied(observed, target))
        });

        match result {
            Ok(attempts) => {
                self.sequence_get = target;
                self.state = ChannelState::Scheduled;
                trace!("wait: seq {} retired after {} attempts", target, attempts);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(self.fatal(err)),
            Err(err) => Err(err),
        }
    }

    /// Detach the channel: no further scheduling
    ///
    /// In-flight descriptors either retire or fault against a canary;
    /// there is no way to pull them back.
    pub fn disable(&mut self) {
        if self.state != ChannelState::Faulted {
            info!("channel disabled (seq put={} get={})", self.sequence_put, self.sequence_get);
            self.state = ChannelState::Disabled;
        }
    }

    // Accessors

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// First latched fatal error, if any
    pub fn fault(&self) -> Option<&ChannelError> {
        self.fault.as_ref()
    }

    pub fn sequence_put(&self) -> u64 {
        self.sequence_put
    }

    pub fn sequence_get(&self) -> u64 {
        self.sequence_get
    }

    /// Words pending in the segment currently being built
    pub fn pending_words(&self) -> u32 {
        self.writer.words_written()
    }

    pub fn not_full(&self, mem: &DeviceMemory) -> Result<bool> {
        self.ring.not_full(mem)
    }

    pub fn arena(&self) -> &PushbufferArena {
        &self.arena
    }

    pub fn ring(&self) -> &DescriptorRing {
        &self.ring
    }

    pub(crate) fn ring_mut(&mut self) -> &mut DescriptorRing {
        &mut self.ring
    }

    /// Device address of the userd PUT cell
    pub fn userd_put_address(&self) -> u64 {
        self.userd.address + USERD_PUT
    }

    /// Device address of the userd GET cell
    pub fn userd_get_address(&self) -> u64 {
        self.userd.address + USERD_GET
    }

    /// Device address of the completion sequence cell
    pub fn completion_address(&self) -> u64 {
        self.userd.address + USERD_SEQUENCE
    }
}
