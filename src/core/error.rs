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

/// Channel error types
use thiserror::Error;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Main error type for the submission core
///
/// Errors fall into four categories:
/// - Caller-contract violations: invalid arguments, field overflows.
///   Never retried; no state is mutated.
/// - Resource exhaustion: ring full, segment full, out of device memory.
///   The caller may back off, call `wait(false)`, or reduce batch size.
/// - Timeout: the consumer did not retire expected work in budget.
///   Surfaced distinctly so callers can re-poll or escalate.
/// - Corruption: always fatal; the channel latches the first such error
///   and refuses to issue further descriptors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("method count {count} exceeds field limit {limit}")]
    MethodCountTooLarge { count: u32, limit: u32 },

    #[error("segment overflow: {requested} words requested, {remaining} remaining")]
    SegmentOverflow { requested: u32, remaining: u32 },

    #[error("descriptor ring full")]
    RingFull,

    #[error("out of device memory: {requested} bytes requested, {available} available")]
    OutOfDeviceMemory { requested: u64, available: u64 },

    #[error("device address 0x{address:012X} out of range ({len} bytes)")]
    InvalidDeviceAccess { address: u64, len: u64 },

    #[error("address 0x{address:012X} is not host-visible")]
    NotHostVisible { address: u64 },

    #[error("invalid allocation handle: {handle}")]
    InvalidHandle { handle: u32 },

    #[error("timed out after {elapsed_ms} ms ({attempts} poll attempts)")]
    Timeout { elapsed_ms: u64, attempts: u32 },

    #[error("descriptor ring corrupt: {0}")]
    RingCorrupt(&'static str),

    #[error("unsupported opcode {opcode} in method stream")]
    UnsupportedOpcode { opcode: u32 },

    #[error("completion sequence regressed: observed {observed} after {last_seen}")]
    SequenceRegression { observed: u64, last_seen: u64 },

    #[error("canary command executed at 0x{address:012X}")]
    CanaryExecuted { address: u64 },

    #[error("channel is disabled")]
    ChannelDisabled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io(err.to_string())
    }
}

impl ChannelError {
    /// Fatal errors abort the channel and must never be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::RingCorrupt(_)
                | ChannelError::UnsupportedOpcode { .. }
                | ChannelError::SequenceRegression { .. }
                | ChannelError::CanaryExecuted { .. }
        )
    }

    /// Retryable errors: the caller may back off and try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Timeout { .. }
                | ChannelError::RingFull
                | ChannelError::SegmentOverflow { .. }
                | ChannelError::OutOfDeviceMemory { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert!(ChannelError::RingCorrupt("length mismatch").is_fatal());
        assert!(ChannelError::UnsupportedOpcode { opcode: 6 }.is_fatal());
        assert!(!ChannelError::RingFull.is_fatal());

        assert!(ChannelError::RingFull.is_retryable());
        assert!(ChannelError::Timeout {
            elapsed_ms: 50,
            attempts: 3
        }
        .is_retryable());
        assert!(!ChannelError::InvalidArgument("zero size").is_retryable());
        assert!(!ChannelError::CanaryExecuted { address: 0 }.is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let err: ChannelError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing config").into();
        assert!(matches!(err, ChannelError::Io(_)));
    }
}
