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

//! Relay pipeline
//!
//! Drives a downstream channel's descriptor ring from an upstream
//! channel's own command stream instead of from the host. Each staged
//! payload becomes four upstream commands, executed by the consumer in
//! program order:
//!
//! 1. copy the payload into a downstream pushbuffer segment
//! 2. copy a 16-byte descriptor into the downstream ring slot
//! 3. release the new PUT to the downstream userd block
//! 4. release the downstream doorbell token
//!
//! That ordering mirrors the host-side publish discipline: segment and
//! descriptor land before the PUT that exposes them, PUT before the
//! doorbell. It is what lets a channel whose arena and ring are not
//! host-writable (isolated execution) be fed entirely through another
//! channel.
//!
//! Before any doorbell can reach the downstream ring it must be armed:
//! a deterministic initial PUT written to its userd block and every ring
//! slot prefilled with a descriptor over a canary-filled segment. A
//! consumer that starts draining early then faults on the canary instead
//! of executing stale bytes.

use log::{debug, info, trace};

use crate::core::channel::Channel;
use crate::core::encoder::{encode_copy_unmask, CopyFlush, ReleaseFlags};
use crate::core::error::{ChannelError, Result};
use crate::core::memory::{Allocation, DeviceMemory, Location};
use crate::core::ring::{Descriptor, DoorbellTarget, Level, SyncMode};


/// Payload transform applied while crossing into the downstream segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Plain device copy
    Copy,
    /// XOR the payload with a keystream word during the copy, standing in
    /// for a decrypting transfer
    CopyXor { key: u32 },
}

/// One directed edge of a relay pipeline
///
/// Captures the downstream geometry at construction; afterwards the
/// downstream channel object is only needed once more, at `arm` time.
/// All traffic flows through the upstream channel.
#[derive(Debug)]
pub struct RelayLink {
    transform: Transform,
    arena_base: u64,
    segment_size: u32,
    ring_base: u64,
    entry_count: u32,
    put_address: u64,
    get_address: u64,
    doorbell: DoorbellTarget,
    staging: Allocation,
    initial_put: u32,
    shadow_put: u32,
    armed: bool,
}

impl RelayLink {
    /// Build a link onto `downstream`, which must already be scheduled
    /// (its doorbell target is baked into the staged command streams)
    ///
    /// Allocates host-visible staging of one payload image plus one
    /// descriptor image per ring slot.
    pub fn new(
        mem: &mut DeviceMemory,
        downstream: &Channel,
        transform: Transform,
        initial_put: u32,
    ) -> Result<Self> {
        let doorbell = downstream
            .ring()
            .doorbell()
            .ok_or(ChannelError::InvalidArgument(
                "downstream channel has not been scheduled",
            ))?;

        let entry_count = downstream.ring().entry_count();
        let segment_size = downstream.arena().segment_size();
        let slot_bytes = segment_size as u64 + Descriptor::SIZE_BYTES as u64;
        let staging = mem.alloc(entry_count as u64 * slot_bytes, 4096, Location::HostVisible)?;

        info!(
            "relay link: {} slots x {}B staged at 0x{:012X}, transform {:?}",
            entry_count, segment_size, staging.address, transform
        );

        Ok(Self {
            transform,
            arena_base: downstream.arena().base(),
            segment_size,
            ring_base: downstream.ring().base(),
            entry_count,
            put_address: downstream.userd_put_address(),
            get_address: downstream.userd_get_address(),
            doorbell,
            staging,
            initial_put: initial_put & (entry_count - 1),
            shadow_put: initial_put & (entry_count - 1),
            armed: false,
        })
    }

    fn mask(&self) -> u32 {
        self.entry_count - 1
    }

    /// Downstream PUT as driven by this link
    pub fn shadow_put(&self) -> u32 {
        self.shadow_put
    }

    pub fn initial_put(&self) -> u32 {
        self.initial_put
    }

    fn staging_slot(&self, index: u32) -> u64 {
        self.staging.address
            + (index & self.mask()) as u64
                * (self.segment_size as u64 + Descriptor::SIZE_BYTES as u64)
    }

    fn segment_base(&self, index: u32) -> u64 {
        self.arena_base + (index & self.mask()) as u64 * self.segment_size as u64
    }

    fn ring_slot(&self, index: u32) -> u64 {
        self.ring_base + (index & self.mask()) as u64 * Descriptor::SIZE_BYTES as u64
    }

    /// Pre-arm the downstream ring
    ///
    /// Writes the deterministic initial PUT (and a matching GET) to the
    /// downstream userd block and prefills every ring slot with a
    /// descriptor covering its full canary-filled segment. Runs through
    /// the privileged device view so isolated downstream memory can still
    /// be set up.
    pub fn arm(&mut self, mem: &mut DeviceMemory, downstream: &mut Channel) -> Result<()> {
        mem.device_write_u32(self.put_address, self.initial_put)?;
        mem.device_write_u32(self.get_address, self.initial_put)?;
        downstream.ring_mut().set_initial_put(self.initial_put);

        for index in 0..self.entry_count {
            let descriptor = Descriptor {
                address: self.segment_base(index),
                length_words: self.segment_size / 4,
                sync: SyncMode::Proceed,
                level: Level::Main,
            };
            mem.device_write_words(self.ring_slot(index), &descriptor.encode())?;
        }

        self.armed = true;
        self.shadow_put = self.initial_put;
        debug!("relay armed: initial put={}", self.initial_put);
        Ok(())
    }

    /// Stage one downstream payload through `upstream`
    ///
    /// Appends the four-command relay sequence to the upstream channel's
    /// current segment. Nothing reaches the downstream ring until the
    /// upstream segment is flushed and executed.
    pub fn stage(
        &mut self,
        mem: &mut DeviceMemory,
        upstream: &mut Channel,
        payload: &[u32],
    ) -> Result<()> {
        if !self.armed {
            return Err(ChannelError::InvalidArgument("relay link is not armed"));
        }
        if payload.is_empty() || payload.len() > (self.segment_size / 4) as usize {
            return Err(ChannelError::InvalidArgument(
                "relay payload must fit one downstream segment",
            ));
        }

        let slot = self.shadow_put & self.mask();
        let payload_bytes = payload.len() as u32 * 4;
        let staged_payload = self.staging_slot(slot);
        let staged_descriptor = staged_payload + self.segment_size as u64;

        // Stage the payload image, masked when the transform unmasks.
        match self.transform {
            Transform::Copy => mem.write_words(staged_payload, payload)?,
            Transform::CopyXor { key } => {
                let masked: Vec<u32> = payload.iter().map(|&w| w ^ key).collect();
                mem.write_words(staged_payload, &masked)?;
            }
        }

        let descriptor = Descriptor {
            address: self.segment_base(slot),
            length_words: payload.len() as u32,
            sync: SyncMode::Proceed,
            level: Level::Main,
        };
        mem.write_words(staged_descriptor, &descriptor.encode())?;

        // Payload first, then descriptor, then PUT, then doorbell; the
        // consumer executes these in program order.
        match self.transform {
            Transform::Copy => upstream.copy(
                mem,
                staged_payload,
                descriptor.address,
                payload_bytes,
                CopyFlush::System,
            )?,
            Transform::CopyXor { key } => {
                let words = encode_copy_unmask(
                    staged_payload,
                    descriptor.address,
                    payload_bytes,
                    CopyFlush::System,
                    key,
                )?;
                upstream.emit(mem, &words)?;
            }
        }
        upstream.copy(
            mem,
            staged_descriptor,
            self.ring_slot(slot),
            Descriptor::SIZE_BYTES,
            CopyFlush::System,
        )?;

        let new_put = (self.shadow_put + 1) & self.mask();
        self.emit_put_and_doorbell(mem, upstream, new_put)?;

        trace!(
            "staged {} words into downstream slot {} (put -> {})",
            payload.len(),
            slot,
            new_put
        );
        self.shadow_put = new_put;
        Ok(())
    }

    /// Advance the downstream PUT by `delta` slots without staging payload
    ///
    /// The segments exposed this way still hold their armed canary
    /// descriptors, so a consumer that follows the doorbell faults
    /// deterministically. Useful for pacing tests and for pipelines where
    /// a later hop populates the slots.
    pub fn advance_put(
        &mut self,
        mem: &mut DeviceMemory,
        upstream: &mut Channel,
        delta: u32,
    ) -> Result<()> {
        if !self.armed {
            return Err(ChannelError::InvalidArgument("relay link is not armed"));
        }
        if delta == 0 || delta >= self.entry_count {
            return Err(ChannelError::InvalidArgument(
                "put advance must be between 1 and entry count - 1",
            ));
        }

        let new_put = (self.shadow_put + delta) & self.mask();
        self.emit_put_and_doorbell(mem, upstream, new_put)?;
        self.shadow_put = new_put;
        Ok(())
    }

    fn emit_put_and_doorbell(
        &self,
        mem: &mut DeviceMemory,
        upstream: &mut Channel,
        new_put: u32,
    ) -> Result<()> {
        upstream.release_semaphore(
            mem,
            self.put_address,
            new_put as u64,
            ReleaseFlags::SYSMEMBAR,
        )?;
        upstream.release_semaphore(
            mem,
            self.doorbell.address,
            self.doorbell.token as u64,
            ReleaseFlags::empty(),
        )
    }
}
