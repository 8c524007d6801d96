//! Operator control actions composed over a caller-supplied process list.
//!
//! The caller owns list freshness; these routines only combine tree kills
//! with the daemon / shared-memory / workspace shell steps.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::core::executor::{ros_env, CommandRunner};
use crate::core::process::{ProcessRecord, ProcessSampler};

pub struct ControlActions {
    runner: Arc<dyn CommandRunner>,
}

impl ControlActions {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Force-kills the process tree of every ROS process in the list.
    pub fn kill_all_ros(&self, sampler: &ProcessSampler, processes: &[ProcessRecord]) -> Value {
        let mut killed = 0;
        let mut failed = 0;
        for proc in processes {
            if !proc.is_ros || proc.pid <= 0 {
                continue;
            }
            if sampler.kill_process_tree(proc.pid, true) {
                killed += 1;
            } else {
                failed += 1;
            }
        }
        json!({
            "action": "kill_all_ros_processes",
            "killed_count": killed,
            "failed_count": failed,
            "success": failed == 0,
        })
    }

    /// Kills a domain's ROS trees, then bounces the ros2 daemon for it.
    pub async fn restart_domain(
        &self,
        sampler: &ProcessSampler,
        domain_id: &str,
        processes: &[ProcessRecord],
    ) -> Value {
        let mut terminated = 0;
        let mut failed = 0;
        for proc in processes {
            if !proc.is_ros || proc.ros_domain_id != domain_id || proc.pid <= 0 {
                continue;
            }
            if sampler.kill_process_tree(proc.pid, true) {
                terminated += 1;
            } else {
                failed += 1;
            }
        }

        let env = ros_env(domain_id);
        let stop = self
            .runner
            .run("ros2", &to_args(&["daemon", "stop"]), 3_000, &env)
            .await;
        let start = self
            .runner
            .run("ros2", &to_args(&["daemon", "start"]), 3_000, &env)
            .await;

        json!({
            "action": "restart_domain",
            "domain_id": domain_id,
            "terminated_processes": terminated,
            "failed_processes": failed,
            "daemon_stop_ok": stop.success(),
            "daemon_start_ok": start.success(),
            "success": failed == 0 && start.success(),
            "details": format!("{}\n{}", stop.stderr, start.stderr),
        })
    }

    /// Removes DDS shared-memory segments and stale SysV IPC segments.
    pub async fn clear_shared_memory(&self) -> Value {
        let rm = self
            .runner
            .run_shell(
                "rm -f /dev/shm/fastrtps* /dev/shm/fastdds* /dev/shm/cyclonedds* /dev/shm/iceoryx*",
                5_000,
                &[],
            )
            .await;
        let ipcs = self
            .runner
            .run_shell("ipcs -m | awk 'NR>3 {print $2}' | xargs -r -n1 ipcrm -m", 5_000, &[])
            .await;

        json!({
            "action": "clear_shared_memory",
            "filesystem_cleanup_ok": rm.success(),
            "ipcs_cleanup_ok": ipcs.success(),
            "success": rm.success() || ipcs.success(),
            "details": format!("{}\n{}", rm.stderr, ipcs.stderr),
        })
    }

    /// Kills ROS trees originating from `workspace_path`, optionally
    /// relaunching from the workspace's setup script.
    pub async fn restart_workspace(
        &self,
        sampler: &ProcessSampler,
        workspace_path: &str,
        relaunch_command: &str,
        processes: &[ProcessRecord],
    ) -> Value {
        let workspace = workspace_path.trim();
        if workspace.is_empty() {
            return json!({
                "action": "restart_workspace",
                "workspace_path": workspace_path,
                "success": false,
                "error": "Workspace path is required.",
            });
        }

        let mut terminated = 0;
        let mut failed = 0;
        for proc in processes {
            if !proc.is_ros || proc.pid <= 0 {
                continue;
            }
            if !proc.workspace_origin.contains(workspace) {
                continue;
            }
            if sampler.kill_process_tree(proc.pid, true) {
                terminated += 1;
            } else {
                failed += 1;
            }
        }

        let mut relaunched = false;
        let mut relaunch_output = String::new();
        let relaunch = relaunch_command.trim();
        if !relaunch.is_empty() {
            let command = format!("source {workspace}/setup.bash && {relaunch}");
            let outcome = self.runner.run_shell(&command, 4_000, &[]).await;
            relaunched = outcome.success();
            relaunch_output = format!("{}\n{}", outcome.stdout, outcome.stderr);
        }

        json!({
            "action": "restart_workspace",
            "workspace_path": workspace_path,
            "terminated_processes": terminated,
            "failed_processes": failed,
            "relaunched": relaunched,
            "relaunch_output": relaunch_output,
            "success": failed == 0,
        })
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
