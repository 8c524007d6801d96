//! `roscope fleet` - probe fleet targets or run a remote action.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::ArgMatches;

use crate::core::executor::Executor;
use crate::core::remote::RemoteMonitor;
use crate::core::telemetry::Telemetry;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let targets_path = matches
        .get_one::<String>("targets")
        .cloned()
        .unwrap_or_else(|| "fleet_targets.json".to_string());
    let action = matches.get_one::<String>("action").cloned();
    let target = matches.get_one::<String>("target").cloned();
    let domain = matches
        .get_one::<String>("domain")
        .cloned()
        .unwrap_or_else(|| "0".to_string());

    let telemetry = Telemetry::global();
    let runner = Arc::new(Executor::new(telemetry.clone()));
    let mut monitor = RemoteMonitor::new(runner, telemetry, &PathBuf::from("state"));

    let loaded = monitor.load_targets_from_file(&PathBuf::from(&targets_path));
    if !loaded["success"].as_bool().unwrap_or(false) {
        bail!("could not load fleet targets: {loaded}");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let result = match action {
        Some(action) => {
            let Some(target) = target else {
                bail!("--target is required with --action");
            };
            runtime.block_on(monitor.execute_remote_action(&target, &action, &domain, 4_500))
        }
        None => runtime.block_on(monitor.collect_fleet_status(4_500)),
    };
    println!("{result}");
    Ok(())
}
