//! `roscope processes` - paged process listing straight off the sampler.

use std::time::Duration;

use anyhow::Result;
use clap::ArgMatches;

use crate::core::process::ProcessSampler;
use crate::core::telemetry::Telemetry;

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let ros_only = matches.get_flag("ros-only");
    let query = matches
        .get_one::<String>("query")
        .cloned()
        .unwrap_or_default();
    let offset: usize = *matches.get_one::<usize>("offset").unwrap_or(&0);
    let limit: usize = *matches.get_one::<usize>("limit").unwrap_or(&40);
    let by_pid = matches.get_flag("by-pid");

    let mut sampler = ProcessSampler::new(Telemetry::global());

    // Two ticks so CPU percentages have a jiffie delta to work from.
    sampler.refresh(true);
    std::thread::sleep(Duration::from_millis(400));

    let page = sampler.list_processes_paged(ros_only, &query, true, offset, limit, !by_pid);
    for row in &page.rows {
        println!("{}", serde_json::to_string(row)?);
    }
    log::info!(
        "{} of {} matching processes shown (offset {})",
        page.rows.len(),
        page.total,
        offset
    );
    Ok(())
}
