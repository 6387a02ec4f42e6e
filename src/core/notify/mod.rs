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

//! Completion notifier
//!
//! A monotonically increasing 64-bit sequence counter in host-visible
//! device memory. The consumer writes it once per retired unit of work;
//! the producer polls it with bounded retries. The location has exactly
//! one writer (the consumer) and any number of polling readers.
//!
//! Polling is the only blocking point in the core and it is cooperative:
//! a caller-supplied hook runs between attempts (a scheduler yield, or in
//! tests, the tick that advances the simulated consumer), and the delay
//! between attempts comes from an injected [`WaitStrategy`] so platform
//! sleep details live in one seam.

use std::time::{Duration, Instant};

use log::trace;

use crate::core::error::{ChannelError, Result};
use crate::core::memory::DeviceMemory;


/// Producer-side view of the completion sequence location
///
/// Tracks the last observed value; the counter regressing is corruption,
/// never a legitimate consumer behavior.
pub struct CompletionSequence {
    address: u64,
    last_seen: u64,
}

impl CompletionSequence {
    pub fn new(address: u64) -> Self {
        Self {
            address,
            last_seen: 0,
        }
    }

    /// Device address of the counter (release-semaphore target)
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Last value observed by `read`
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Re-read the counter from device memory
    ///
    /// # Errors
    ///
    /// `SequenceRegression` (fatal) if the value moved backwards.
    pub fn read(&mut self, mem: &DeviceMemory) -> Result<u64> {
        let observed = mem.read_u64(self.address)?;
        if observed < self.last_seen {
            return Err(ChannelError::SequenceRegression {
                observed,
                last_seen: self.last_seen,
            });
        }
        self.last_seen = observed;
        Ok(observed)
    }
}

/// Delay schedule between poll attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Re-poll immediately (single-threaded tests driving a ticked consumer)
    NoDelay,
    /// Sleep a fixed interval between attempts
    Fixed(Duration),
}

impl WaitStrategy {
    pub fn delay(self, _attempt: u32) -> Duration {
        match self {
            WaitStrategy::NoDelay => Duration::ZERO,
            WaitStrategy::Fixed(interval) => interval,
        }
    }
}

/// Poll `predicate` until it holds or `timeout` elapses
///
/// The predicate is evaluated at least once, so a zero timeout still
/// observes already-completed work. `hook` runs between attempts with the
/// device memory handed back, which is how a caller-level scheduler (or a
/// test's consumer tick) interleaves with the poll loop. There is no
/// unbounded spin: every path out is success, a predicate error, or
/// `Timeout`.
pub fn poll_until<P, H>(
    mem: &mut DeviceMemory,
    timeout: Duration,
    strategy: WaitStrategy,
    hook: &mut H,
    mut predicate: P,
) -> Result<u32>
where
    P: FnMut(&mut DeviceMemory) -> Result<bool>,
    H: FnMut(&mut DeviceMemory),
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if predicate(mem)? {
            trace!("poll satisfied after {} attempts", attempts);
            return Ok(attempts);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ChannelError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                attempts,
            });
        }

        hook(mem);

        let delay = strategy.delay(attempts);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
