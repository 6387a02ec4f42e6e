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

//! Harness configuration
//!
//! Geometry and timing knobs for a submission run, loadable from a TOML
//! file. Validation happens once here so the channel constructors can
//! assume sane values without re-checking at every call site.

use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::encoder::Dialect;
use crate::core::error::{ChannelError, Result};
use crate::core::notify::WaitStrategy;

/// One submission run's worth of tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Descriptor ring entries (power of two, >= 2)
    pub ring_entries: u32,
    /// Pushbuffer segment size in bytes (nonzero multiple of 4)
    pub segment_bytes: u32,
    /// Backing device memory pool size in bytes
    pub device_pool_bytes: u64,
    /// wait() budget per attempt batch
    pub timeout_ms: u64,
    /// Sleep between poll attempts; zero re-polls immediately
    pub poll_interval_us: u64,
    /// Consumer dialect name (`host-v1` or `host-v1-exact`)
    pub dialect: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ring_entries: 8,
            segment_bytes: 4096,
            device_pool_bytes: 16 * 1024 * 1024,
            timeout_ms: 50,
            poll_interval_us: 100,
            dialect: "host-v1".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ChannelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        debug!("loaded config from {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_entries < 2 || !self.ring_entries.is_power_of_two() {
            return Err(ChannelError::Config(format!(
                "ring_entries must be a power of two >= 2, got {}",
                self.ring_entries
            )));
        }
        if self.segment_bytes == 0 || self.segment_bytes % 4 != 0 {
            return Err(ChannelError::Config(format!(
                "segment_bytes must be a nonzero multiple of 4, got {}",
                self.segment_bytes
            )));
        }
        let arena = self.ring_entries as u64 * self.segment_bytes as u64;
        if self.device_pool_bytes < arena * 2 {
            return Err(ChannelError::Config(format!(
                "device_pool_bytes {} cannot hold {} bytes of arena plus staging",
                self.device_pool_bytes, arena
            )));
        }
        self.resolve_dialect()?;
        Ok(())
    }

    /// Resolve the configured dialect name
    pub fn resolve_dialect(&self) -> Result<Dialect> {
        match self.dialect.as_str() {
            "host-v1" => Ok(Dialect::host_v1()),
            "host-v1-exact" => Ok(Dialect::host_v1_exact()),
            other => Err(ChannelError::Config(format!("unknown dialect '{other}'"))),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        if self.poll_interval_us == 0 {
            WaitStrategy::NoDelay
        } else {
            WaitStrategy::Fixed(Duration::from_micros(self.poll_interval_us))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults_validate() {
        HarnessConfig::default().validate().unwrap();
    }

    #[test]
    fn test_from_toml_overrides_and_defaults() {
        let config = HarnessConfig::from_toml(
            r#"
            ring_entries = 4
            segment_bytes = 256
            dialect = "host-v1-exact"
            "#,
        )
        .unwrap();

        assert_eq!(config.ring_entries, 4);
        assert_eq!(config.segment_bytes, 256);
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.resolve_dialect().unwrap().name, "host-v1-exact");
    }

    #[test]
    fn test_rejects_non_power_of_two_entries() {
        let err = HarnessConfig::from_toml("ring_entries = 3").unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_rejects_misaligned_segment() {
        let err = HarnessConfig::from_toml("segment_bytes = 30").unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_rejects_undersized_pool() {
        let err = HarnessConfig::from_toml("device_pool_bytes = 1024").unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_dialect() {
        let err = HarnessConfig::from_toml(r#"dialect = "mystery""#).unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = HarnessConfig::from_toml("ring_size = 8").unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ring_entries = 16\npoll_interval_us = 0").unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.ring_entries, 16);
        assert_eq!(config.wait_strategy(), WaitStrategy::NoDelay);
    }
}
