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

//! Simulated command processor
//!
//! The consumer side of the channel protocol, modeled as a struct advanced
//! by `tick` the way real hardware drains asynchronously. Each tick walks
//! every bound channel: fetch descriptors between the consumer's GET and
//! the published PUT, validate them against the channel's segment
//! geometry, execute the method stream, and write back GET.
//!
//! The engine maintains its own running CRC with exactly the inclusion
//! rules of the producer-side tracker; a CRC_CHECK method compares the two
//! and faults on mismatch. Faults are latched per binding: a faulted
//! channel drains nothing further, matching a real engine parking itself
//! until teardown.

use log::{debug, error, trace, warn};
use thiserror::Error;

use crate::core::channel::Channel;
use crate::core::encoder::{copy_execute, methods, opcode, sem_execute};
use crate::core::error::Result;
use crate::core::integrity::{crc_finish, crc_fold, CRC_INIT};
use crate::core::memory::{DeviceMemory, Location};
use crate::core::ring::{Descriptor, DoorbellTarget};


/// Reasons a binding parks itself
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    #[error("canary command fetched at 0x{address:012X}")]
    Canary { address: u64 },

    #[error("unsupported opcode {opcode}")]
    UnsupportedOpcode { opcode: u32 },

    #[error("descriptor does not match segment geometry: {0}")]
    BadDescriptor(&'static str),

    #[error("method run extends past descriptor length")]
    TruncatedStream,

    #[error("integrity check failed: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("copy rejected: {0}")]
    BadCopy(&'static str),

    #[error("memory access faulted: {0}")]
    Memory(String),
}

/// Per-channel method registers (subchannel state)
#[derive(Debug, Default, Clone)]
struct MethodRegs {
    sem_addr_hi: u32,
    sem_addr_lo: u32,
    sem_payload_lo: u32,
    sem_payload_hi: u32,
    copy_src_hi: u32,
    copy_src_lo: u32,
    copy_dst_hi: u32,
    copy_dst_lo: u32,
    copy_size: u32,
    copy_key: u32,
}

struct Binding {
    token: u32,
    ring_base: u64,
    entry_count: u32,
    arena_base: u64,
    segment_count: u32,
    segment_size: u32,
    userd_put: u64,
    userd_get: u64,
    crc_state: u32,
    regs: MethodRegs,
    fault: Option<EngineFault>,
}

impl Binding {
    fn mask(&self) -> u32 {
        self.entry_count - 1
    }
}

/// Tick-driven consumer for any number of channels
pub struct SimulatedEngine {
    doorbell_address: u64,
    bindings: Vec<Binding>,
}

impl SimulatedEngine {
    /// Allocate the engine's doorbell register and construct it
    pub fn new(mem: &mut DeviceMemory) -> Result<Self> {
        let doorbell = mem.alloc(4, 4, Location::HostVisible)?;
        Ok(Self {
            doorbell_address: doorbell.address,
            bindings: Vec::new(),
        })
    }

    /// Host-visible doorbell register address
    pub fn doorbell_address(&self) -> u64 {
        self.doorbell_address
    }

    /// Bind a channel and hand it its doorbell target
    ///
    /// Returns the opaque per-channel token. Binding captures the channel
    /// geometry; the engine never touches producer-side state afterwards.
    pub fn bind(&mut self, channel: &mut Channel) -> u32 {
        let token = self.bindings.len() as u32 + 1;
        self.bindings.push(Binding {
            token,
            ring_base: channel.ring().base(),
            entry_count: channel.ring().entry_count(),
            arena_base: channel.arena().base(),
            segment_count: channel.arena().segment_count(),
            segment_size: channel.arena().segment_size(),
            userd_put: channel.userd_put_address(),
            userd_get: channel.userd_get_address(),
            crc_state: CRC_INIT,
            regs: MethodRegs::default(),
            fault: None,
        });

        channel.attach_doorbell(DoorbellTarget {
            address: self.doorbell_address,
            token,
        });
        debug!("bound channel token={token}");
        token
    }

    /// Latched fault for `token`, if any
    pub fn fault(&self, token: u32) -> Option<&EngineFault> {
        self.bindings
            .iter()
            .find(|b| b.token == token)
            .and_then(|b| b.fault.as_ref())
    }

    /// Last token written to the doorbell register
    pub fn doorbell_value(&self, mem: &DeviceMemory) -> Result<u32> {
        mem.read_u32(self.doorbell_address)
    }

    /// Drain every bound channel once; returns descriptors retired
    pub fn tick(&mut self, mem: &mut DeviceMemory) -> u32 {
        let mut retired = 0;
        for binding in &mut self.bindings {
            if binding.fault.is_some() {
                continue;
            }
            retired += drain_binding(binding, mem);
        }
        retired
    }
}

/// Drain one binding until GET catches up with PUT or a fault parks it
///
/// PUT and GET both live in the userd block and are re-read each step, so
/// a setup path that pre-arms them (relay pipelines) stays consistent with
/// the engine's view without any side channel.
fn drain_binding(binding: &mut Binding, mem: &mut DeviceMemory) -> u32 {
    let mut retired = 0;
    loop {
        let indices = mem
            .device_read_u32(binding.userd_put)
            .and_then(|put| Ok((put, mem.device_read_u32(binding.userd_get)?)));
        let (put, get) = match indices {
            Ok((put, get)) => (put & binding.mask(), get & binding.mask()),
            Err(err) => {
                fault(binding, EngineFault::Memory(err.to_string()));
                return retired;
            }
        };
        if get == put {
            return retired;
        }

        if let Err(f) = execute_descriptor(binding, mem, get) {
            fault(binding, f);
            return retired;
        }

        let next = (get + 1) & binding.mask();
        if let Err(err) = mem.device_write_u32(binding.userd_get, next) {
            fault(binding, EngineFault::Memory(err.to_string()));
            return retired;
        }
        retired += 1;
    }
}

fn fault(binding: &mut Binding, f: EngineFault) {
    error!("engine fault on token {}: {f}", binding.token);
    binding.fault = Some(f);
}

/// Fetch, validate and execute the descriptor at ring index `get`
fn execute_descriptor(
    binding: &mut Binding,
    mem: &mut DeviceMemory,
    get: u32,
) -> std::result::Result<(), EngineFault> {
    let slot = binding.ring_base + get as u64 * Descriptor::SIZE_BYTES as u64;
    let words = mem
        .device_read_words(slot, 4)
        .map_err(|e| EngineFault::Memory(e.to_string()))?;
    let descriptor = Descriptor::decode([words[0], words[1], words[2], words[3]])
        .map_err(|_| EngineFault::BadDescriptor("unknown flag bits"))?;

    // Size-accounting corruption is fatal: a descriptor must reference
    // exactly one segment of this channel's arena.
    let arena_bytes = binding.segment_count as u64 * binding.segment_size as u64;
    if descriptor.address < binding.arena_base
        || descriptor.address >= binding.arena_base + arena_bytes
    {
        return Err(EngineFault::BadDescriptor("segment address outside arena"));
    }
    if (descriptor.address - binding.arena_base) % binding.segment_size as u64 != 0 {
        return Err(EngineFault::BadDescriptor("segment address misaligned"));
    }
    if descriptor.length_words == 0
        || descriptor.length_words as u64 * 4 > binding.segment_size as u64
    {
        return Err(EngineFault::BadDescriptor(
            "length does not fit the segment boundary",
        ));
    }

    trace!(
        "token {} executing descriptor get={} addr=0x{:012X} len={}",
        binding.token,
        get,
        descriptor.address,
        descriptor.length_words
    );

    let stream = mem
        .device_read_words(descriptor.address, descriptor.length_words)
        .map_err(|e| EngineFault::Memory(e.to_string()))?;
    execute_stream(binding, mem, descriptor.address, &stream)
}

/// Walk one segment's method stream
fn execute_stream(
    binding: &mut Binding,
    mem: &mut DeviceMemory,
    base: u64,
    words: &[u32],
) -> std::result::Result<(), EngineFault> {
    let mut i = 0usize;
    while i < words.len() {
        let header = words[i];
        let op = header >> 29;
        let count = ((header >> 16) & 0x1FFF) as usize;
        let method = (header & 0x1FFF) << 2;

        match op {
            opcode::NOP => {
                i += 1;
            }
            opcode::CANARY => {
                return Err(EngineFault::Canary {
                    address: base + i as u64 * 4,
                });
            }
            opcode::IMMEDIATE => {
                // Value travels in the count field; only the header is
                // folded, matching the producer tracker.
                binding.crc_state = crc_fold(binding.crc_state, &header.to_le_bytes());
                dispatch(binding, mem, method, (header >> 16) & 0x1FFF)?;
                i += 1;
            }
            opcode::INCREMENT | opcode::NON_INCREMENT | opcode::ONE_INCREMENT | opcode::SOFTWARE => {
                if i + 1 + count > words.len() {
                    return Err(EngineFault::TruncatedStream);
                }
                if op != opcode::SOFTWARE {
                    for &word in &words[i..i + 1 + count] {
                        binding.crc_state = crc_fold(binding.crc_state, &word.to_le_bytes());
                    }
                }
                for (n, &value) in words[i + 1..i + 1 + count].iter().enumerate() {
                    let target = match op {
                        opcode::NON_INCREMENT => method,
                        opcode::ONE_INCREMENT => {
                            if n == 0 {
                                method
                            } else {
                                method + 4
                            }
                        }
                        _ => method + 4 * n as u32,
                    };
                    dispatch(binding, mem, target, value)?;
                }
                i += 1 + count;
            }
            _ => {
                return Err(EngineFault::UnsupportedOpcode { opcode: op });
            }
        }
    }
    Ok(())
}

/// Execute one method write against the engine's register file
fn dispatch(
    binding: &mut Binding,
    mem: &mut DeviceMemory,
    method: u32,
    value: u32,
) -> std::result::Result<(), EngineFault> {
    let regs = &mut binding.regs;
    match method {
        methods::SEM_ADDR_HI => regs.sem_addr_hi = value,
        methods::SEM_ADDR_LO => regs.sem_addr_lo = value,
        methods::SEM_PAYLOAD_LO => regs.sem_payload_lo = value,
        methods::SEM_PAYLOAD_HI => regs.sem_payload_hi = value,
        methods::SEM_EXECUTE => {
            if value & sem_execute::RELEASE != 0 {
                let address = (regs.sem_addr_hi as u64) << 32 | regs.sem_addr_lo as u64;
                let result = if value & sem_execute::SIZE64 != 0 {
                    let payload =
                        (regs.sem_payload_hi as u64) << 32 | regs.sem_payload_lo as u64;
                    trace!("release64 0x{payload:016X} -> 0x{address:012X}");
                    mem.device_write_u64(address, payload)
                } else {
                    trace!("release32 0x{:08X} -> 0x{address:012X}", regs.sem_payload_lo);
                    mem.device_write_u32(address, regs.sem_payload_lo)
                };
                result.map_err(|e| EngineFault::Memory(e.to_string()))?;
                // MEMBAR/SYSMEMBAR/WFI order real hardware; the model's
                // writes are already sequential.
            }
        }
        methods::COPY_SRC_HI => regs.copy_src_hi = value,
        methods::COPY_SRC_LO => regs.copy_src_lo = value,
        methods::COPY_DST_HI => regs.copy_dst_hi = value,
        methods::COPY_DST_LO => regs.copy_dst_lo = value,
        methods::COPY_SIZE => regs.copy_size = value,
        methods::COPY_KEY => regs.copy_key = value,
        methods::COPY_EXECUTE => {
            let src = (regs.copy_src_hi as u64) << 32 | regs.copy_src_lo as u64;
            let dst = (regs.copy_dst_hi as u64) << 32 | regs.copy_dst_lo as u64;
            let size = regs.copy_size;
            if size == 0 || size % 4 != 0 {
                return Err(EngineFault::BadCopy("size must be a nonzero multiple of 4"));
            }
            if value & copy_execute::UNMASK != 0 {
                let key = regs.copy_key;
                let mut data = mem
                    .device_read_words(src, size / 4)
                    .map_err(|e| EngineFault::Memory(e.to_string()))?;
                for word in &mut data {
                    *word ^= key;
                }
                mem.device_write_words(dst, &data)
                    .map_err(|e| EngineFault::Memory(e.to_string()))?;
                trace!("copy+unmask {size}B 0x{src:012X} -> 0x{dst:012X}");
            } else {
                mem.device_copy(src, dst, size)
                    .map_err(|e| EngineFault::Memory(e.to_string()))?;
                trace!("copy {size}B 0x{src:012X} -> 0x{dst:012X}");
            }
        }
        methods::CRC_CHECK => {
            let computed = crc_finish(binding.crc_state);
            binding.crc_state = CRC_INIT;
            if computed != value {
                return Err(EngineFault::CrcMismatch {
                    expected: value,
                    computed,
                });
            }
            debug!("token {} integrity check passed: 0x{computed:08X}", binding.token);
        }
        other => {
            // Writes to unmapped registers are absorbed, like real
            // hardware scratch space.
            warn!("ignoring write to unmapped method 0x{other:04X}");
        }
    }
    Ok(())
}
