use anyhow::Result;
use clap::{Arg, Command};
use roscope::commands;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("Starting roscope v{}", env!("CARGO_PKG_VERSION"));

    let matches = build_cli().get_matches();

    // Dispatch commands
    match matches.subcommand() {
        Some(("monitor", sub_matches)) => commands::monitor::execute(sub_matches),
        Some(("snapshot", sub_matches)) => commands::snapshot::execute(sub_matches),
        Some(("processes", sub_matches)) => commands::processes::execute(sub_matches),
        Some(("fleet", sub_matches)) => commands::fleet::execute(sub_matches),
        Some(("telemetry", sub_matches)) => commands::telemetry::execute(sub_matches),
        _ => {
            println!("roscope - ROS 2 runtime observability and control engine");
            println!("Use 'roscope --help' for more information.");
            Ok(())
        }
    }
}

fn build_cli() -> Command {
    Command::new("roscope")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Runtime observability and control engine for ROS 2 hosts")
        .subcommand(
            Command::new("monitor")
                .about("Run the engine and stream snapshots as JSON lines")
                .arg(
                    Arg::new("domain")
                        .short('d')
                        .long("domain")
                        .value_name("ID")
                        .help("ROS domain id to focus on")
                        .default_value("0"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .short('i')
                        .long("interval-ms")
                        .help("Delay between polls in milliseconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("2000"),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .help("Stop after N polls (0 = run until interrupted)")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("heartbeats")
                        .long("heartbeats")
                        .help("Print heartbeat responses too")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("snapshot")
                .about("Poll once and export a snapshot")
                .arg(
                    Arg::new("domain")
                        .short('d')
                        .long("domain")
                        .value_name("ID")
                        .help("ROS domain id to focus on")
                        .default_value("0"),
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .help("Export format: json or yaml")
                        .default_value("json"),
                ),
        )
        .subcommand(
            Command::new("processes")
                .about("List sampled processes as JSON lines")
                .arg(
                    Arg::new("ros-only")
                        .short('r')
                        .long("ros-only")
                        .help("Only show ROS processes")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("query")
                        .short('q')
                        .long("query")
                        .help("Substring filter over pid, name, exe and cmdline"),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .help("Pagination offset")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .help("Maximum rows to print")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("40"),
                )
                .arg(
                    Arg::new("by-pid")
                        .long("by-pid")
                        .help("Order by pid instead of CPU usage")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("fleet")
                .about("Probe fleet targets or run a remote action")
                .arg(
                    Arg::new("targets")
                        .short('t')
                        .long("targets")
                        .help("Path to the fleet targets JSON file")
                        .default_value("fleet_targets.json"),
                )
                .arg(
                    Arg::new("action")
                        .short('a')
                        .long("action")
                        .help("Remote action: restart_domain, kill_ros or isolate_domain"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .help("Target name the action applies to"),
                )
                .arg(
                    Arg::new("domain")
                        .short('d')
                        .long("domain")
                        .help("ROS domain id for the remote action")
                        .default_value("0"),
                ),
        )
        .subcommand(
            Command::new("telemetry")
                .about("Dump the telemetry registry")
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .help("Write to this file instead of stdout"),
                ),
        )
}
