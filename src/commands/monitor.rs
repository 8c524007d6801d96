//! `roscope monitor` - run the engine and stream snapshots as JSON lines.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;

use crate::core::engine::runtime::{EngineCommand, EngineEvent, EngineRuntime};
use crate::core::engine::{EngineConfig, PollRequest};

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let domain = matches
        .get_one::<String>("domain")
        .cloned()
        .unwrap_or_else(|| "0".to_string());
    let interval_ms: u64 = *matches.get_one::<u64>("interval-ms").unwrap_or(&2_000);
    let count: u64 = *matches.get_one::<u64>("count").unwrap_or(&0);
    let heartbeats = matches.get_flag("heartbeats");

    let mut runtime =
        EngineRuntime::start(EngineConfig::default()).context("failed to start engine runtime")?;

    let mut emitted: u64 = 0;
    let mut last_version: u64 = 0;
    let mut last_etag = String::new();
    loop {
        let request = PollRequest {
            selected_domain: domain.clone(),
            since_version: last_version,
            if_none_match: last_etag.clone(),
            ..Default::default()
        };
        runtime
            .command_tx
            .blocking_send(EngineCommand::Poll(request))
            .context("engine task is gone")?;

        match runtime.event_rx.blocking_recv() {
            Some(EngineEvent::SnapshotReady(snapshot)) => {
                last_version = snapshot["sync_version"].as_u64().unwrap_or(last_version);
                if let Some(etag) = snapshot["etag"].as_str() {
                    last_etag = etag.to_string();
                }
                let is_heartbeat = snapshot["heartbeat_only"].as_bool().unwrap_or(false);
                if !is_heartbeat || heartbeats {
                    println!("{snapshot}");
                }
            }
            Some(_) => {}
            None => break,
        }

        emitted += 1;
        if count > 0 && emitted >= count {
            break;
        }
        std::thread::sleep(Duration::from_millis(interval_ms));
    }

    runtime.shutdown();
    Ok(())
}
