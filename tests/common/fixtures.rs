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

//! Test fixtures for common submission scenarios

use ringbell::core::ring::DoorbellTarget;
use ringbell::core::{Channel, DeviceMemory, Dialect, Location, SimulatedEngine};

/// A host-visible channel bound to a simulated engine
pub struct Loopback {
    pub mem: DeviceMemory,
    pub engine: SimulatedEngine,
    pub channel: Channel,
    // Not every test target that links the fixtures reads the token.
    #[allow(dead_code)]
    pub token: u32,
}

/// Create a loopback setup with the given ring/segment geometry
pub fn loopback(dialect: Dialect, entries: u32, segment_bytes: u32) -> Loopback {
    let mut mem = DeviceMemory::new(4 * 1024 * 1024);
    let mut engine = SimulatedEngine::new(&mut mem).expect("engine construction");
    let mut channel = Channel::new(&mut mem, dialect, entries, segment_bytes, Location::HostVisible)
        .expect("channel construction");
    let token = engine.bind(&mut channel);
    Loopback {
        mem,
        engine,
        channel,
        token,
    }
}

/// A channel with a scratch doorbell and no consumer behind it
///
/// Useful for driving the completion cell by hand to pin down predicate
/// behavior.
pub fn manual_channel(dialect: Dialect, entries: u32, segment_bytes: u32) -> (DeviceMemory, Channel) {
    let mut mem = DeviceMemory::new(4 * 1024 * 1024);
    let doorbell = mem
        .alloc(4, 4, Location::HostVisible)
        .expect("doorbell allocation");
    let mut channel = Channel::new(&mut mem, dialect, entries, segment_bytes, Location::HostVisible)
        .expect("channel construction");
    channel.attach_doorbell(DoorbellTarget {
        address: doorbell.address,
        token: 1,
    });
    (mem, channel)
}
