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

//! Core submission protocol components
//!
//! This module contains every layer of the channel protocol:
//! - Device memory model (allocator, host/device views)
//! - Pushbuffer arena (segmented command storage)
//! - Command encoder (wire word format, dialects)
//! - Integrity tracker (producer-side running CRC)
//! - Descriptor ring (PUT/GET, doorbell publication)
//! - Completion notifier (sequence counter, bounded polling)
//! - Channel (flush/wait composition)
//! - Simulated engine (tick-driven consumer)
//! - Relay pipeline (channel-driven indirect submission)

pub mod arena;
pub mod channel;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod memory;
pub mod notify;
pub mod relay;
pub mod ring;

// Re-export commonly used types
pub use channel::{Channel, ChannelState};
pub use config::HarnessConfig;
pub use encoder::{CompletionPredicate, CopyFlush, Dialect, MethodMode, ReleaseFlags};
pub use engine::{EngineFault, SimulatedEngine};
pub use error::{ChannelError, Result};
pub use memory::{DeviceMemory, Location};
pub use notify::WaitStrategy;
pub use relay::{RelayLink, Transform};
pub use ring::{Descriptor, DescriptorRing, DoorbellTarget};
