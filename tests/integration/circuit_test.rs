//! Remote monitor scenarios: retries, circuit breaker, offline queue.

use std::sync::Arc;

use roscope::core::remote::{FleetTarget, RemoteMonitor};
use roscope::core::telemetry::Telemetry;

use super::support::ScriptedRunner;

fn target(name: &str) -> FleetTarget {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "host": format!("{name}.local"),
        "user": "ops",
    }))
    .unwrap()
}

fn monitor_with(
    runner: Arc<ScriptedRunner>,
    state_dir: &std::path::Path,
) -> RemoteMonitor {
    let mut monitor = RemoteMonitor::new(runner, Telemetry::new(), state_dir);
    monitor.set_targets(vec![target("robotA")]);
    monitor
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_consecutive_failures() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("ssh", ScriptedRunner::fail("connection refused"));
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner.clone(), dir.path());

    // Two failing actions burn through 6 attempts; the threshold is 4.
    for _ in 0..2 {
        let result = monitor
            .execute_remote_action("robotA", "restart_domain", "0", 1_000)
            .await;
        assert_eq!(result["success"], false);
    }
    let ssh_calls_before = runner.call_count_containing("ssh");
    assert!(ssh_calls_before >= 4);

    // Circuit open: rejected without touching ssh.
    let result = monitor
        .execute_remote_action("robotA", "restart_domain", "0", 1_000)
        .await;
    assert_eq!(result["success"], false);
    assert!(result["error"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("circuit"));
    assert_eq!(runner.call_count_containing("ssh"), ssh_calls_before);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_cooldown_expiry_permits_attempts() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("ssh", ScriptedRunner::ok("done"));
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner.clone(), dir.path());

    // Open until one millisecond in the past: the next attempt goes through
    // and the success clears the breaker.
    monitor.force_open("robotA|restart_domain", roscope::core::telemetry::epoch_ms() - 1);
    let result = monitor
        .execute_remote_action("robotA", "restart_domain", "0", 1_000)
        .await;
    assert_eq!(result["success"], true);
    assert_eq!(runner.call_count_containing("ssh"), 1);

    // While genuinely open, no attempt is made.
    monitor.force_open(
        "robotA|restart_domain",
        roscope::core::telemetry::epoch_ms() + 30_000,
    );
    let result = monitor
        .execute_remote_action("robotA", "restart_domain", "0", 1_000)
        .await;
    assert_eq!(result["success"], false);
    assert_eq!(runner.call_count_containing("ssh"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_enqueues_offline() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("ssh", ScriptedRunner::fail("unreachable"));
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner.clone(), dir.path());

    let result = monitor
        .execute_remote_action("robotA", "kill_ros", "3", 1_000)
        .await;
    assert_eq!(result["success"], false);
    assert_eq!(monitor.queue_len(), 1);
    let queued = monitor.queued_actions();
    assert_eq!(queued[0].target, "robotA");
    assert_eq!(queued[0].action, "kill_ros");
    assert_eq!(queued[0].domain_id, "3");

    // The queue file on disk is valid JSON and reloads to the same state.
    let reloaded = RemoteMonitor::new(runner, Telemetry::new(), dir.path());
    assert_eq!(reloaded.queue_len(), 1);
    assert_eq!(reloaded.queued_actions()[0].target, "robotA");
}

#[tokio::test(start_paused = true)]
async fn test_resume_replays_queue_in_order() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("ssh", ScriptedRunner::fail("down"));
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner.clone(), dir.path());
    monitor.set_targets(vec![target("robotA"), target("robotB")]);

    monitor
        .execute_remote_action("robotA", "kill_ros", "0", 1_000)
        .await;
    monitor
        .execute_remote_action("robotB", "kill_ros", "0", 1_000)
        .await;
    assert_eq!(monitor.queue_len(), 2);

    // Hosts come back: a fresh monitor picks the queue up from disk.
    let runner2 = Arc::new(ScriptedRunner::new());
    runner2.on("ssh", ScriptedRunner::ok("ok"));
    let mut revived = RemoteMonitor::new(runner2, Telemetry::new(), dir.path());
    revived.set_targets(vec![target("robotA"), target("robotB")]);

    let result = revived.resume_queued_actions(2, 1_000).await;
    assert_eq!(result["resumed_count"], 2);
    assert_eq!(result["remaining_queue"], 0);
    assert_eq!(revived.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fleet_status_skips_open_circuit() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("ssh", ScriptedRunner::ok("robo|4|0.52|2048000"));
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner.clone(), dir.path());

    let status = monitor.collect_fleet_status(1_000).await;
    assert_eq!(status["healthy_count"], 1);
    let robot = &status["robots"][0];
    assert_eq!(robot["remote_hostname"], "robo");
    assert_eq!(robot["node_count"], 4);
    assert_eq!(robot["load_1m"], 0.52);

    monitor.force_open(
        "robotA|status",
        roscope::core::telemetry::epoch_ms() + 30_000,
    );
    let calls_before = runner.call_count_containing("ssh");
    let status = monitor.collect_fleet_status(1_000).await;
    assert_eq!(status["healthy_count"], 0);
    assert!(status["robots"][0]["error"]
        .as_str()
        .unwrap()
        .contains("Circuit"));
    assert_eq!(runner.call_count_containing("ssh"), calls_before);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_target_and_action_are_errors() {
    let runner = Arc::new(ScriptedRunner::new());
    let dir = tempfile::tempdir().unwrap();
    let mut monitor = monitor_with(runner, dir.path());

    let result = monitor
        .execute_remote_action("ghost", "kill_ros", "0", 1_000)
        .await;
    assert_eq!(result["error"], "Remote target not found.");

    let result = monitor
        .execute_remote_action("robotA", "reboot_into_space", "0", 1_000)
        .await;
    assert_eq!(result["error"], "Unsupported remote action.");
}
