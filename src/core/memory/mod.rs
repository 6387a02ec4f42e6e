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

//! Device memory model
//!
//! This module models the device address space shared between the host-side
//! producer and the command-processing consumer. All pushbuffer segments,
//! descriptor rings, userd blocks and doorbell registers live here.
//!
//! # Address space
//!
//! Allocations are carved out of one contiguous pool mapped at
//! [`DEVICE_BASE`]. Every accessor is bounds-checked against the pool, so
//! segment and descriptor arithmetic is validated in one place instead of
//! at each call site.
//!
//! # Visibility
//!
//! An allocation is either [`Location::HostVisible`] or
//! [`Location::DeviceOnly`]. Host accessors (`read_u32`, `write_u32`, ...)
//! refuse device-only ranges; the consumer-side accessors used by the
//! simulated engine see everything. Device-only memory is how an
//! isolated/encrypted channel is represented: after setup, only another
//! channel's command stream can reach it.

use log::trace;

use crate::core::error::{ChannelError, Result};


/// Base device virtual address of the memory pool
pub const DEVICE_BASE: u64 = 0x1000_0000;

/// Memory visibility attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Mapped into the host; readable and writable through the host accessors
    HostVisible,
    /// Reachable only by the consumer (isolated/encrypted channels)
    DeviceOnly,
}

/// Handle identifying one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocHandle(pub u32);

/// One allocation carved from the pool
#[derive(Debug, Clone, Copy)]
pub struct Allocation {
    /// Handle for later `free`
    pub handle: AllocHandle,
    /// Device virtual address of the first byte
    pub address: u64,
    /// Size in bytes
    pub size: u64,
    /// Visibility attribute
    pub location: Location,
}

struct AllocationRecord {
    offset: u64,
    size: u64,
    location: Location,
    freed: bool,
}

/// Flat device memory pool with a bump allocator
///
/// The allocator is scoped to one test run and passed by `&mut` wherever
/// memory is touched; there are no global handle counters. `free` validates
/// and retires the handle but does not reclaim pool space (bump discipline).
pub struct DeviceMemory {
    pool: Vec<u8>,
    next: u64,
    allocations: Vec<AllocationRecord>,
}

impl DeviceMemory {
    /// Create a pool of `size` bytes, zero-initialized
    pub fn new(size: u64) -> Self {
        Self {
            pool: vec![0u8; size as usize],
            next: 0,
            allocations: Vec::new(),
        }
    }

    /// Bytes still available for allocation
    pub fn available(&self) -> u64 {
        self.pool.len() as u64 - self.next
    }

    /// Allocate `size` bytes with the given alignment and visibility
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a zero size or non-power-of-two alignment
    /// - `OutOfDeviceMemory` when the pool is exhausted
    pub fn alloc(&mut self, size: u64, align: u64, location: Location) -> Result<Allocation> {
        if size == 0 {
            return Err(ChannelError::InvalidArgument("allocation size is zero"));
        }
        if !align.is_power_of_two() {
            return Err(ChannelError::InvalidArgument(
                "allocation alignment must be a power of two",
            ));
        }

        let offset = (self.next + align - 1) & !(align - 1);
        if offset + size > self.pool.len() as u64 {
            return Err(ChannelError::OutOfDeviceMemory {
                requested: size,
                available: self.available(),
            });
        }

        self.next = offset + size;
        let handle = AllocHandle(self.allocations.len() as u32);
        self.allocations.push(AllocationRecord {
            offset,
            size,
            location,
            freed: false,
        });

        let address = DEVICE_BASE + offset;
        trace!(
            "alloc handle={} addr=0x{:012X} size={} {:?}",
            handle.0,
            address,
            size,
            location
        );

        Ok(Allocation {
            handle,
            address,
            size,
            location,
        })
    }

    /// Retire an allocation handle
    ///
    /// Pool space is not reclaimed; a second `free` of the same handle is a
    /// caller bug.
    pub fn free(&mut self, handle: AllocHandle) -> Result<()> {
        let record = self
            .allocations
            .get_mut(handle.0 as usize)
            .ok_or(ChannelError::InvalidHandle { handle: handle.0 })?;
        if record.freed {
            return Err(ChannelError::InvalidHandle { handle: handle.0 });
        }
        record.freed = true;
        trace!("free handle={}", handle.0);
        Ok(())
    }

    /// Translate a device address range to a pool offset, bounds-checked
    ///
    /// Lengths are u64 so word-count arithmetic at the call sites cannot
    /// wrap before the check.
    fn translate(&self, address: u64, len: u64) -> Result<usize> {
        let end = address
            .checked_add(len)
            .ok_or(ChannelError::InvalidDeviceAccess { address, len })?;
        if address < DEVICE_BASE || end > DEVICE_BASE + self.pool.len() as u64 {
            return Err(ChannelError::InvalidDeviceAccess { address, len });
        }
        Ok((address - DEVICE_BASE) as usize)
    }

    /// Check that a range lies inside a live host-visible allocation
    fn check_host_visible(&self, address: u64, len: u64) -> Result<()> {
        self.translate(address, len)?;
        let offset = address - DEVICE_BASE;
        let end = offset + len;
        for record in &self.allocations {
            if record.freed {
                continue;
            }
            if offset >= record.offset && end <= record.offset + record.size {
                return match record.location {
                    Location::HostVisible => Ok(()),
                    Location::DeviceOnly => Err(ChannelError::NotHostVisible { address }),
                };
            }
        }
        Err(ChannelError::InvalidDeviceAccess { address, len })
    }

    // Host accessors: bounds-checked, restricted to host-visible allocations.

    /// Read a 32-bit word through the host mapping
    pub fn read_u32(&self, address: u64) -> Result<u32> {
        self.check_host_visible(address, 4)?;
        self.device_read_u32(address)
    }

    /// Write a 32-bit word through the host mapping
    pub fn write_u32(&mut self, address: u64, value: u32) -> Result<()> {
        self.check_host_visible(address, 4)?;
        self.device_write_u32(address, value)
    }

    /// Read a 64-bit word through the host mapping
    pub fn read_u64(&self, address: u64) -> Result<u64> {
        self.check_host_visible(address, 8)?;
        self.device_read_u64(address)
    }

    /// Write a 64-bit word through the host mapping
    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<()> {
        self.check_host_visible(address, 8)?;
        self.device_write_u64(address, value)
    }

    /// Read `count` 32-bit words through the host mapping
    pub fn read_words(&self, address: u64, count: u32) -> Result<Vec<u32>> {
        self.check_host_visible(address, count as u64 * 4)?;
        self.device_read_words(address, count)
    }

    /// Write a word slice through the host mapping
    pub fn write_words(&mut self, address: u64, words: &[u32]) -> Result<()> {
        self.check_host_visible(address, words.len() as u64 * 4)?;
        self.device_write_words(address, words)
    }

    // Consumer-side accessors: bounds-checked only. Used by the simulated
    // engine and by the privileged setup path (channel construction, relay
    // arming), which model agents with an unrestricted view of the pool.

    pub(crate) fn device_read_u32(&self, address: u64) -> Result<u32> {
        let offset = self.translate(address, 4)?;
        Ok(u32::from_le_bytes([
            self.pool[offset],
            self.pool[offset + 1],
            self.pool[offset + 2],
            self.pool[offset + 3],
        ]))
    }

    pub(crate) fn device_write_u32(&mut self, address: u64, value: u32) -> Result<()> {
        let offset = self.translate(address, 4)?;
        self.pool[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub(crate) fn device_read_u64(&self, address: u64) -> Result<u64> {
        let offset = self.translate(address, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.pool[offset..offset + 8]);
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn device_write_u64(&mut self, address: u64, value: u64) -> Result<()> {
        let offset = self.translate(address, 8)?;
        self.pool[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub(crate) fn device_read_words(&self, address: u64, count: u32) -> Result<Vec<u32>> {
        let offset = self.translate(address, count as u64 * 4)?;
        let mut words = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let at = offset + i * 4;
            words.push(u32::from_le_bytes([
                self.pool[at],
                self.pool[at + 1],
                self.pool[at + 2],
                self.pool[at + 3],
            ]));
        }
        Ok(words)
    }

    pub(crate) fn device_write_words(&mut self, address: u64, words: &[u32]) -> Result<()> {
        let offset = self.translate(address, words.len() as u64 * 4)?;
        for (i, word) in words.iter().enumerate() {
            let at = offset + i * 4;
            self.pool[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    pub(crate) fn device_copy(&mut self, src: u64, dst: u64, len: u32) -> Result<()> {
        let src_offset = self.translate(src, len as u64)?;
        let dst_offset = self.translate(dst, len as u64)?;
        self.pool
            .copy_within(src_offset..src_offset + len as usize, dst_offset);
        Ok(())
    }
}
