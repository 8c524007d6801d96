//! Process sampler scenarios over a synthetic proc root.

use std::sync::Arc;

use roscope::core::process::ProcessSampler;
use roscope::core::telemetry::Telemetry;
use roscope::platform::Signal;

use super::support::{
    remove_proc_pid, write_proc_globals, write_proc_pid, RecordingSignaler, SharedSignaler,
};

fn sampler_over(
    proc_root: &std::path::Path,
) -> (ProcessSampler, Arc<RecordingSignaler>) {
    let recorder = Arc::new(RecordingSignaler::new());
    let sampler = ProcessSampler::with_roots(
        proc_root.to_path_buf(),
        Box::new(SharedSignaler(recorder.clone())),
        Telemetry::new(),
    );
    (sampler, recorder)
}

#[test]
fn test_pid_index_follows_proc_churn() {
    let dir = tempfile::tempdir().unwrap();
    write_proc_globals(dir.path(), "100 0 50 800 20 0 10 0 0 0");
    write_proc_pid(dir.path(), 100, 1, "alpha", &["alpha"], &[]);
    write_proc_pid(dir.path(), 200, 1, "beta", &["beta"], &[]);

    let (mut sampler, _) = sampler_over(dir.path());
    sampler.refresh(true);
    assert_eq!(sampler.tracked_pids(), vec![100, 200]);

    // One pid vanishes, another appears: the index matches the latest scan.
    remove_proc_pid(dir.path(), 100);
    write_proc_pid(dir.path(), 300, 1, "gamma", &["gamma"], &[]);
    sampler.refresh(true);
    assert_eq!(sampler.tracked_pids(), vec![200, 300]);
    assert!(sampler.heavy_details(100).is_none());

    remove_proc_pid(dir.path(), 200);
    remove_proc_pid(dir.path(), 300);
    sampler.refresh(true);
    assert!(sampler.tracked_pids().is_empty());
}

#[test]
fn test_kill_process_tree_signals_every_descendant_once() {
    let dir = tempfile::tempdir().unwrap();
    write_proc_globals(dir.path(), "100 0 50 800 20 0 10 0 0 0");
    // Tree: 100 -> {101, 102}, 101 -> {103}
    write_proc_pid(dir.path(), 100, 1, "root", &["root"], &[]);
    write_proc_pid(dir.path(), 101, 100, "mid", &["mid"], &[]);
    write_proc_pid(dir.path(), 102, 100, "leaf_a", &["leaf_a"], &[]);
    write_proc_pid(dir.path(), 103, 101, "leaf_b", &["leaf_b"], &[]);
    write_proc_pid(dir.path(), 999, 1, "bystander", &["bystander"], &[]);

    let (sampler, recorder) = sampler_over(dir.path());
    assert!(sampler.kill_process_tree(100, true));

    let signals = recorder.signals();
    let mut pids: Vec<i64> = signals.iter().map(|(pid, _)| *pid).collect();
    pids.sort_unstable();
    assert_eq!(pids, vec![100, 101, 102, 103]);
    assert!(signals.iter().all(|(_, signal)| *signal == Signal::Kill));
}

#[test]
fn test_ros_classification_from_environ() {
    let dir = tempfile::tempdir().unwrap();
    write_proc_globals(dir.path(), "100 0 50 800 20 0 10 0 0 0");
    write_proc_pid(
        dir.path(),
        42,
        1,
        "talker",
        &["/opt/ros/humble/lib/demo_nodes_cpp/talker", "--ros-args", "-r", "__node:=talker"],
        &[("ROS_DOMAIN_ID", "7"), ("ROS_VERSION", "2")],
    );
    write_proc_pid(dir.path(), 43, 1, "editor", &["/usr/bin/editor"], &[]);

    let (mut sampler, _) = sampler_over(dir.path());
    let rows = sampler.list_processes(true, "", true);
    assert_eq!(rows.len(), 1);
    let talker = &rows[0];
    assert_eq!(talker.pid, 42);
    assert_eq!(talker.ros_domain_id, "7");
    assert_eq!(talker.node_name, "talker");
    assert_eq!(talker.workspace_origin, "/opt/ros/humble");
}

#[test]
fn test_paged_listing_by_pid_streams_with_total() {
    let dir = tempfile::tempdir().unwrap();
    write_proc_globals(dir.path(), "100 0 50 800 20 0 10 0 0 0");
    for pid in [10, 11, 12, 13, 14] {
        write_proc_pid(dir.path(), pid, 1, "worker", &["worker"], &[]);
    }

    let (mut sampler, _) = sampler_over(dir.path());
    let page = sampler.list_processes_paged(false, "", false, 1, 2, false);
    assert_eq!(page.total, 5);
    let pids: Vec<i64> = page.rows.iter().map(|row| row.pid).collect();
    assert_eq!(pids, vec![11, 12]);
}

#[test]
fn test_query_filter_matches_cmdline() {
    let dir = tempfile::tempdir().unwrap();
    write_proc_globals(dir.path(), "100 0 50 800 20 0 10 0 0 0");
    write_proc_pid(dir.path(), 50, 1, "nav", &["nav", "planner.launch.py"], &[]);
    write_proc_pid(dir.path(), 51, 1, "other", &["other"], &[]);

    let (mut sampler, _) = sampler_over(dir.path());
    let rows = sampler.list_processes(false, "launch.py", true);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pid, 50);
    assert_eq!(rows[0].launch_source, "planner.launch.py");
}
