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

//! Command-submission channel protocol library
//!
//! A producer on the host encodes variable-length command sequences into
//! segmented pushbuffers, publishes them through a bounded descriptor ring
//! with a doorbell, and observes retirement through a monotonically
//! increasing completion sequence. A tick-driven simulated engine plays
//! the consumer, and relay pipelines let one channel's command stream
//! drive another channel's ring for isolated submission.
//!
//! # Example
//!
//! ```
//! use ringbell::core::{Channel, Dialect, DeviceMemory, Location, SimulatedEngine, WaitStrategy};
//! use std::time::Duration;
//!
//! let mut mem = DeviceMemory::new(1024 * 1024);
//! let mut engine = SimulatedEngine::new(&mut mem).unwrap();
//! let mut channel =
//!     Channel::new(&mut mem, Dialect::host_v1(), 8, 1024, Location::HostVisible).unwrap();
//! engine.bind(&mut channel);
//!
//! channel.write_method(&mut mem, 0, 0x0040, 0x1234).unwrap();
//! channel
//!     .wait(
//!         &mut mem,
//!         true,
//!         Duration::from_millis(50),
//!         WaitStrategy::NoDelay,
//!         &mut |mem| {
//!             engine.tick(mem);
//!         },
//!     )
//!     .unwrap();
//! ```

pub mod core;
