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

use std::path::Path;

use clap::Parser;
use log::{error, info};
use ringbell::core::encoder::{encode_release_semaphore, ReleaseFlags};
use ringbell::core::error::Result;
use ringbell::core::relay::{RelayLink, Transform};
use ringbell::core::{Channel, DeviceMemory, HarnessConfig, Location, SimulatedEngine};

/// Command-submission channel loopback runner
#[derive(Parser)]
#[command(name = "ringbell")]
#[command(about = "Submission channel loopback runner", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Number of flush/wait rounds to run
    #[arg(short = 'n', long, default_value = "64")]
    rounds: u64,

    /// Also drive an isolated channel through a relay link
    #[arg(long)]
    relay: bool,
}

fn main() -> Result<()> {
    // Load .env if present, then initialize logger with default level INFO
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("ringbell v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {path}");
            HarnessConfig::load(Path::new(path))?
        }
        None => HarnessConfig::default(),
    };

    let mut mem = DeviceMemory::new(config.device_pool_bytes);
    let mut engine = SimulatedEngine::new(&mut mem)?;
    let mut channel = Channel::new(
        &mut mem,
        config.resolve_dialect()?,
        config.ring_entries,
        config.segment_bytes,
        Location::HostVisible,
    )?;
    engine.bind(&mut channel);

    info!(
        "Running {} rounds ({} ring entries, {} byte segments, dialect {})",
        args.rounds,
        config.ring_entries,
        config.segment_bytes,
        channel.dialect().name
    );

    let log_interval = (args.rounds / 10).max(1);
    let scratch = mem.alloc(8, 8, Location::HostVisible)?;

    for round in 0..args.rounds {
        if round % log_interval == 0 && round > 0 {
            info!(
                "Progress: {}/{} rounds | seq put={} get={}",
                round,
                args.rounds,
                channel.sequence_put(),
                channel.sequence_get()
            );
        }

        channel.release_semaphore(
            &mut mem,
            scratch.address,
            round,
            ReleaseFlags::empty(),
        )?;
        channel.flush_crc_check(&mut mem)?;

        if let Err(e) = channel.wait(
            &mut mem,
            true,
            config.timeout(),
            config.wait_strategy(),
            &mut |mem| {
                engine.tick(mem);
            },
        ) {
            error!("Round {round} failed: {e}");
            return Err(e);
        }
    }

    info!(
        "Loopback completed: {} sequences retired",
        channel.sequence_get()
    );

    if args.relay {
        run_relay(&mut mem, &mut engine, &mut channel, args.rounds.min(16))?;
    }

    channel.disable();
    Ok(())
}

/// Drive an isolated downstream channel through the loopback channel
fn run_relay(
    mem: &mut DeviceMemory,
    engine: &mut SimulatedEngine,
    upstream: &mut Channel,
    rounds: u64,
) -> Result<()> {
    info!("Starting relay stage: {rounds} payloads into an isolated channel");

    let mut downstream = Channel::new(
        mem,
        *upstream.dialect(),
        4,
        256,
        Location::DeviceOnly,
    )?;
    engine.bind(&mut downstream);

    let mut link = RelayLink::new(mem, &downstream, Transform::CopyXor { key: 0xA5A5_5A5A }, 0)?;
    link.arm(mem, &mut downstream)?;

    let result = mem.alloc(8, 8, Location::HostVisible)?;
    for round in 1..=rounds {
        let payload = encode_release_semaphore(result.address, round, ReleaseFlags::empty())?;
        link.stage(mem, upstream, &payload)?;
        upstream.flush(mem)?;
        while engine.tick(mem) > 0 {}

        let observed = mem.read_u32(result.address)?;
        if u64::from(observed) != round {
            error!("Relay round {round} observed {observed}");
            break;
        }
    }

    info!("Relay stage completed at put={}", link.shadow_put());
    Ok(())
}
