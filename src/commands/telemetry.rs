//! `roscope telemetry` - dump the telemetry registry to a file or stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;

use crate::core::telemetry::Telemetry;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let telemetry = Telemetry::global();
    match matches.get_one::<String>("out") {
        Some(path) => {
            let path = PathBuf::from(path);
            telemetry
                .export_to_file(&path)
                .with_context(|| format!("failed to export telemetry to {}", path.display()))?;
            log::info!("telemetry exported to {}", path.display());
        }
        None => println!("{}", telemetry.snapshot()),
    }
    Ok(())
}
