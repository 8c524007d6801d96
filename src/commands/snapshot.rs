//! `roscope snapshot` - one poll, exported to snapshots/ as JSON or YAML.

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use serde_json::json;

use crate::core::engine::runtime::{EngineCommand, EngineEvent, EngineRuntime};
use crate::core::engine::{EngineConfig, PollRequest};

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let domain = matches
        .get_one::<String>("domain")
        .cloned()
        .unwrap_or_else(|| "0".to_string());
    let format = matches
        .get_one::<String>("format")
        .cloned()
        .unwrap_or_else(|| "json".to_string());
    let action = if format.eq_ignore_ascii_case("yaml") {
        "snapshot_yaml"
    } else {
        "snapshot_json"
    };

    let mut runtime =
        EngineRuntime::start(EngineConfig::default()).context("failed to start engine runtime")?;

    let request = PollRequest {
        selected_domain: domain,
        ..Default::default()
    };
    runtime
        .command_tx
        .blocking_send(EngineCommand::Poll(request))
        .context("engine task is gone")?;
    let Some(EngineEvent::SnapshotReady(_)) = runtime.event_rx.blocking_recv() else {
        bail!("engine produced no snapshot");
    };

    runtime
        .command_tx
        .blocking_send(EngineCommand::Action {
            name: action.to_string(),
            payload: json!({}),
        })
        .context("engine task is gone")?;

    // The export result may be preceded by the action's follow-up snapshot.
    while let Some(event) = runtime.event_rx.blocking_recv() {
        if let EngineEvent::ActionFinished(result) = event {
            println!("{result}");
            if !result["success"].as_bool().unwrap_or(false) {
                runtime.shutdown();
                bail!("snapshot export failed");
            }
            break;
        }
    }

    runtime.shutdown();
    Ok(())
}
