//! End-to-end engine scenarios: fingerprint stability, heartbeats, action
//! dispatch and preset persistence, all over scripted externals.

use std::sync::Arc;

use roscope::core::engine::{EngineConfig, PollRequest, RuntimeEngine};
use roscope::core::telemetry::Telemetry;
use roscope::platform::{Signal, Signaler};
use serde_json::json;

use super::support::{write_proc_globals, write_proc_pid, ScriptedRunner};

struct AlwaysOkSignaler;

impl Signaler for AlwaysOkSignaler {
    fn signal(&self, _pid: i64, _signal: Signal) -> bool {
        true
    }
}

struct Fixture {
    engine: RuntimeEngine,
    _runner: Arc<ScriptedRunner>,
    _base: tempfile::TempDir,
    _proc: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let base = tempfile::tempdir().unwrap();
    let proc_dir = tempfile::tempdir().unwrap();
    write_proc_globals(proc_dir.path(), "100 0 50 800 20 0 10 0 0 0");
    write_proc_pid(
        proc_dir.path(),
        42,
        1,
        "talker",
        &["/opt/ros/humble/lib/demo/talker", "--ros-args", "-r", "__node:=talker"],
        &[("ROS_DOMAIN_ID", "0")],
    );

    let runner = Arc::new(ScriptedRunner::new());
    runner.on("command -v ros2", ScriptedRunner::ok("OK\n"));
    runner.on("ros2 node list", ScriptedRunner::ok("/talker\n"));
    runner.on(
        "ros2 node info",
        ScriptedRunner::ok(
            "/talker\n  Publishers:\n    /chatter: std_msgs/msg/String\n  Subscribers:\n",
        ),
    );
    runner.on("ros2 topic list", ScriptedRunner::ok("/chatter [std_msgs/msg/String]\n"));
    runner.on("ros2 lifecycle", ScriptedRunner::fail("not lifecycle"));
    runner.on("ros2 param", ScriptedRunner::fail("no params"));
    runner.on("ros2 topic info", ScriptedRunner::fail("no info"));
    runner.on("ros2 topic hz", ScriptedRunner::fail("no hz"));
    runner.on("ros2 topic bw", ScriptedRunner::fail("no bw"));
    runner.on("ros2 topic echo", ScriptedRunner::fail("no sample"));
    runner.on("ros2 daemon", ScriptedRunner::ok(""));
    runner.on("dmesg", ScriptedRunner::ok("kernel line\n"));

    let config = EngineConfig {
        base_dir: base.path().to_path_buf(),
        proc_root: proc_dir.path().to_path_buf(),
        probe_hardware: false,
        min_poll_interval_ms: 0,
        ..Default::default()
    };
    let engine = RuntimeEngine::with_parts(
        config,
        runner.clone(),
        Box::new(AlwaysOkSignaler),
        Telemetry::new(),
    );
    Fixture {
        engine,
        _runner: runner,
        _base: base,
        _proc: proc_dir,
    }
}

#[tokio::test]
async fn test_fingerprint_stability_and_heartbeat() {
    let mut fixture = fixture();

    let first = fixture.engine.poll(PollRequest::default()).await;
    assert_eq!(first["sync_version"], 1);
    assert_eq!(first["changed"], true);
    assert_eq!(first["heartbeat_only"], false);
    assert!(first["etag"].as_str().unwrap().len() == 40);

    // Same world: version must not advance.
    let second = fixture.engine.poll(PollRequest::default()).await;
    assert_eq!(second["sync_version"], 1);
    assert_eq!(second["changed"], false);
    assert_eq!(second["heartbeat_only"], false);
    assert_eq!(second["etag"], first["etag"]);

    // Caller is up to date: stripped heartbeat.
    let request = PollRequest {
        since_version: 1,
        ..Default::default()
    };
    let third = fixture.engine.poll(request).await;
    assert_eq!(third["heartbeat_only"], true);
    assert_eq!(third["sync_version"], 1);
    assert!(third.get("graph").is_none());
    assert!(third.get("processes_visible").is_none());

    // Idle backoff doubled while nothing changed.
    assert!(third["idle_backoff_ms"].as_u64().unwrap() >= 2_000);
}

#[tokio::test]
async fn test_snapshot_sections_are_populated() {
    let mut fixture = fixture();
    let snapshot = fixture.engine.poll(PollRequest::default()).await;

    let processes = snapshot["processes_visible"].as_array().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0]["node_name"], "talker");
    assert_eq!(snapshot["process_total_filtered"], 1);

    let graph_nodes = snapshot["graph"]["nodes"].as_array().unwrap();
    assert_eq!(graph_nodes.len(), 1);
    assert_eq!(graph_nodes[0]["full_name"], "/talker");
    assert_eq!(graph_nodes[0]["pid"], 42);

    // /chatter has a publisher and no subscriber: health degrades to warning.
    assert_eq!(snapshot["health"]["status"], "warning");
    assert_eq!(
        snapshot["health"]["publishers_without_subscribers"],
        json!(["/chatter"])
    );
    assert_eq!(snapshot["tf_nav2"]["domain_id"], "0");
    assert!(snapshot["tf_nav2"].get("nav2").is_some());
    assert!(snapshot["advanced"]["runtime_stability_score"].is_number());
    assert_eq!(snapshot["logs"], "kernel line\n");

    let sections = snapshot["changed_sections"].as_object().unwrap();
    for key in [
        "processes_visible",
        "domains",
        "graph",
        "tf",
        "system",
        "health",
        "advanced",
        "fleet",
        "session",
        "watchdog",
        "logs",
    ] {
        assert!(sections.contains_key(key), "missing section hash {key}");
    }
}

#[tokio::test]
async fn test_unsupported_action_contract() {
    let mut fixture = fixture();
    let (result, repoll) = fixture.engine.run_action("defragment_robot", &json!({})).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["message"], "Unsupported action");
    assert_eq!(result["action"], "defragment_robot");
    assert!(repoll);
}

#[tokio::test]
async fn test_restart_workspace_requires_path() {
    let mut fixture = fixture();
    let (result, _) = fixture
        .engine
        .run_action("restart_workspace", &json!({ "workspace_path": "  " }))
        .await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error"], "Workspace path is required.");
}

#[tokio::test]
async fn test_watchdog_toggle_actions() {
    let mut fixture = fixture();
    let (enabled, repoll) = fixture.engine.run_action("watchdog_enable", &json!({})).await;
    assert_eq!(enabled["success"], true);
    assert!(repoll);

    let snapshot = fixture.engine.poll(PollRequest::default()).await;
    assert_eq!(snapshot["watchdog"]["enabled"], true);

    let (disabled, _) = fixture.engine.run_action("watchdog_disable", &json!({})).await;
    assert_eq!(disabled["success"], true);
    let snapshot = fixture.engine.poll(PollRequest::default()).await;
    assert_eq!(snapshot["watchdog"]["enabled"], false);
}

#[tokio::test]
async fn test_preset_roundtrip_through_actions() {
    let mut fixture = fixture();
    fixture.engine.poll(PollRequest::default()).await;

    let (enabled, _) = fixture.engine.run_action("watchdog_enable", &json!({})).await;
    assert_eq!(enabled["success"], true);
    let (saved, _) = fixture
        .engine
        .run_action("save_preset", &json!({ "name": "bench" }))
        .await;
    assert_eq!(saved["success"], true);

    fixture.engine.run_action("watchdog_disable", &json!({})).await;
    let (loaded, _) = fixture
        .engine
        .run_action("load_preset", &json!({ "name": "bench" }))
        .await;
    assert_eq!(loaded["success"], true);
    assert_eq!(loaded["preset_name"], "bench");

    let snapshot = fixture.engine.poll(PollRequest::default()).await;
    assert_eq!(snapshot["watchdog"]["enabled"], true);
    assert_eq!(snapshot["preset_name"], "bench");
}

#[tokio::test]
async fn test_snapshot_export_action_writes_file() {
    let mut fixture = fixture();
    fixture.engine.poll(PollRequest::default()).await;

    let (result, repoll) = fixture.engine.run_action("snapshot_json", &json!({})).await;
    assert_eq!(result["success"], true);
    assert!(!repoll, "snapshot export must not trigger a re-poll");
    let path = result["path"].as_str().unwrap();
    let raw = std::fs::read_to_string(path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["graph"]["nodes"][0]["full_name"], "/talker");
    assert!(parsed.get("advanced").is_some());
}

#[tokio::test]
async fn test_compare_with_previous_after_two_polls() {
    let mut fixture = fixture();
    fixture.engine.poll(PollRequest::default()).await;

    let (early, _) = fixture
        .engine
        .run_action("compare_with_previous", &json!({}))
        .await;
    assert_eq!(early["success"], false);

    fixture.engine.poll(PollRequest::default()).await;
    let (diff, _) = fixture
        .engine
        .run_action("compare_with_previous", &json!({}))
        .await;
    assert_eq!(diff["success"], true);
    assert_eq!(diff["summary"]["nodes_added"], 0);
    assert_eq!(diff["summary"]["nodes_removed"], 0);
}

#[test]
fn test_engine_runtime_round_trip() {
    use roscope::core::engine::runtime::{EngineCommand, EngineEvent, EngineRuntime};

    let base = tempfile::tempdir().unwrap();
    let proc_dir = tempfile::tempdir().unwrap();
    write_proc_globals(proc_dir.path(), "100 0 50 800 20 0 10 0 0 0");
    write_proc_pid(proc_dir.path(), 77, 1, "idle", &["idle"], &[]);

    let runner = Arc::new(ScriptedRunner::new());
    runner.on("command -v ros2", ScriptedRunner::fail("not installed"));
    runner.on("dmesg", ScriptedRunner::ok("boot\n"));

    let config = EngineConfig {
        base_dir: base.path().to_path_buf(),
        proc_root: proc_dir.path().to_path_buf(),
        probe_hardware: false,
        min_poll_interval_ms: 0,
        ..Default::default()
    };
    let mut runtime = EngineRuntime::start_with_parts(
        config,
        runner,
        Box::new(AlwaysOkSignaler),
        Telemetry::new(),
    )
    .unwrap();

    runtime
        .command_tx
        .blocking_send(EngineCommand::Poll(PollRequest::default()))
        .unwrap();
    let Some(EngineEvent::SnapshotReady(snapshot)) = runtime.event_rx.blocking_recv() else {
        panic!("expected a snapshot event");
    };
    assert_eq!(snapshot["sync_version"], 1);
    // ros2 is unavailable: the graph degrades with an error marker.
    assert!(snapshot["graph"]["error"].as_str().unwrap().contains("ros2"));

    runtime
        .command_tx
        .blocking_send(EngineCommand::Action {
            name: "watchdog_enable".to_string(),
            payload: json!({}),
        })
        .unwrap();
    let Some(EngineEvent::ActionFinished(result)) = runtime.event_rx.blocking_recv() else {
        panic!("expected an action event");
    };
    assert_eq!(result["success"], true);

    // A mutating action schedules a follow-up poll with the last request.
    let Some(EngineEvent::SnapshotReady(followup)) = runtime.event_rx.blocking_recv() else {
        panic!("expected the follow-up snapshot");
    };
    assert_eq!(followup["watchdog"]["enabled"], true);

    runtime.shutdown();
}

#[tokio::test]
async fn test_session_recording_lifecycle() {
    let mut fixture = fixture();

    let (started, _) = fixture
        .engine
        .run_action("session_start", &json!({ "session_name": "bringup" }))
        .await;
    assert_eq!(started["success"], true);

    fixture.engine.poll(PollRequest::default()).await;
    fixture.engine.poll(PollRequest::default()).await;

    let (stopped, _) = fixture.engine.run_action("session_stop", &json!({})).await;
    assert_eq!(stopped["sample_count"], 2);

    let (exported, _) = fixture
        .engine
        .run_action("session_export", &json!({ "format": "json" }))
        .await;
    assert_eq!(exported["success"], true);
    assert!(exported["path"].as_str().unwrap().contains("bringup"));
}
