//! Action dispatch: the closed set of operator intents the engine honors.
//!
//! Every handler returns the action result object; the second half of the
//! returned pair says whether the action mutated runtime state and therefore
//! warrants an immediate re-poll.

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::executor::ros_env;
use crate::core::presets::{self, PresetPayload};
use crate::core::snapshot::{self, diff};

use super::RuntimeEngine;

/// Actions that only read or export state; everything else re-polls.
const READ_ONLY_ACTIONS: [&str; 6] = [
    "snapshot_json",
    "snapshot_yaml",
    "compare_snapshots",
    "compare_with_previous",
    "session_export",
    "export_telemetry",
];

impl RuntimeEngine {
    /// Dispatches one action; returns (result, wants_repoll).
    pub async fn run_action(&mut self, action: &str, payload: &Value) -> (Value, bool) {
        let mut result = match action {
            "terminate_pid" => {
                let pid = payload["pid"].as_i64().unwrap_or(-1);
                let ok = self.sampler.terminate(pid);
                json!({
                    "success": ok,
                    "message": if ok {
                        format!("SIGTERM sent to {pid}")
                    } else {
                        format!("Failed to SIGTERM {pid}")
                    },
                })
            }
            "kill_pid" => {
                let pid = payload["pid"].as_i64().unwrap_or(-1);
                let ok = self.sampler.force_kill(pid);
                json!({
                    "success": ok,
                    "message": if ok {
                        format!("SIGKILL sent to {pid}")
                    } else {
                        format!("Failed to SIGKILL {pid}")
                    },
                })
            }
            "kill_tree" => {
                let pid = payload["pid"].as_i64().unwrap_or(-1);
                let ok = self.sampler.kill_process_tree(pid, true);
                json!({
                    "success": ok,
                    "message": if ok {
                        format!("Killed process tree for {pid}")
                    } else {
                        format!("Failed killing process tree for {pid}")
                    },
                })
            }
            "kill_all_ros" => {
                let mut result = self
                    .control
                    .kill_all_ros(&self.sampler, &self.last_all_processes);
                let message = format!(
                    "Killed {} ROS processes, {} failed.",
                    result["killed_count"], result["failed_count"]
                );
                result["message"] = json!(message);
                result
            }
            "restart_domain" => {
                let domain_id = payload["domain_id"].as_str().unwrap_or("0").to_string();
                let mut result = self
                    .control
                    .restart_domain(&self.sampler, &domain_id, &self.last_all_processes)
                    .await;
                let message = format!(
                    "Domain {domain_id} restart: {} terminated.",
                    result["terminated_processes"]
                );
                result["message"] = json!(message);
                result
            }
            "clear_shared_memory" => {
                let mut result = self.control.clear_shared_memory().await;
                result["message"] = json!("Shared memory cleanup executed.");
                result
            }
            "restart_workspace" => {
                let mut result = self
                    .control
                    .restart_workspace(
                        &self.sampler,
                        payload["workspace_path"].as_str().unwrap_or(""),
                        payload["relaunch_command"].as_str().unwrap_or(""),
                        &self.last_all_processes,
                    )
                    .await;
                let message = format!(
                    "Workspace restart: {} terminated.",
                    result["terminated_processes"]
                );
                result["message"] = json!(message);
                result
            }
            "isolate_domain" => self.isolate_domain(payload).await,
            "snapshot_json" => self.export_runtime_snapshot("json").await,
            "snapshot_yaml" => self.export_runtime_snapshot("yaml").await,
            "compare_snapshots" => {
                let left = payload["left_path"].as_str().unwrap_or("");
                let right = payload["right_path"].as_str().unwrap_or("");
                diff::compare_files(std::path::Path::new(left), std::path::Path::new(right))
            }
            "compare_with_previous" => {
                if self.penultimate_snapshot.is_null() {
                    json!({
                        "success": false,
                        "error": "No previous snapshot available for diff.",
                    })
                } else {
                    let mut result =
                        diff::compare(&self.penultimate_snapshot, &self.previous_snapshot);
                    result["success"] = json!(true);
                    result
                }
            }
            "session_start" => {
                let name = payload["session_name"].as_str().unwrap_or("runtime_session");
                let mut result = self.recorder.start(name);
                result["success"] = json!(true);
                result
            }
            "session_stop" => {
                let mut result = self.recorder.stop();
                result["success"] = json!(true);
                result
            }
            "session_export" => {
                let format = payload["format"].as_str().unwrap_or("json");
                self.recorder.export(&self.config.base_dir, format)
            }
            "save_preset" => {
                let name = payload["name"].as_str().unwrap_or("default");
                let selected_domain = self
                    .last_graph
                    .as_ref()
                    .map(|graph| graph.domain_id.clone())
                    .unwrap_or_else(|| "0".to_string());
                presets::save(
                    &self.config.base_dir,
                    PresetPayload {
                        preset_name: name.to_string(),
                        selected_domain,
                        watchdog_enabled: self.watchdog_enabled,
                        expected_profile: self.diagnostics.expected_profile().clone(),
                        remote_targets: self.remote.targets().to_vec(),
                        timestamp_utc: String::new(),
                    },
                )
            }
            "load_preset" => {
                let name = payload["name"].as_str().unwrap_or("default");
                match presets::load(&self.config.base_dir, name) {
                    Ok(preset) => {
                        let selected_domain = preset.selected_domain.clone();
                        self.apply_preset(preset);
                        json!({
                            "success": true,
                            "preset_name": self.preset_name,
                            "selected_domain": selected_domain,
                        })
                    }
                    Err(error) => error,
                }
            }
            "watchdog_enable" => {
                self.set_watchdog_enabled(true);
                json!({ "success": true, "message": "Watchdog enabled." })
            }
            "watchdog_disable" => {
                self.set_watchdog_enabled(false);
                json!({ "success": true, "message": "Watchdog disabled." })
            }
            "fleet_load_targets" => {
                let default_path = self.config.base_dir.join("fleet_targets.json");
                let path = payload["path"]
                    .as_str()
                    .map(std::path::PathBuf::from)
                    .unwrap_or(default_path);
                self.remote.load_targets_from_file(&path)
            }
            "fleet_refresh" => {
                self.last_fleet = self.remote.collect_fleet_status(4_500).await;
                json!({
                    "success": true,
                    "fleet": self.last_fleet,
                    "message": "Fleet refresh complete.",
                })
            }
            "remote_action" => {
                let target = payload["target"].as_str().unwrap_or("");
                let remote_action = payload["remote_action"].as_str().unwrap_or("");
                let domain_id = payload["domain_id"].as_str().unwrap_or("0");
                let mut result = self
                    .remote
                    .execute_remote_action(target, remote_action, domain_id, 4_500)
                    .await;
                self.last_fleet = self.remote.collect_fleet_status(4_500).await;
                result["fleet"] = self.last_fleet.clone();
                result
            }
            "export_telemetry" => {
                let stamp = Utc::now().format("%Y%m%d_%H%M%S");
                let path = self
                    .config
                    .base_dir
                    .join("logs")
                    .join(format!("telemetry_{stamp}.json"));
                match self.telemetry.export_to_file(&path) {
                    Ok(()) => json!({
                        "success": true,
                        "path": path.display().to_string(),
                    }),
                    Err(err) => json!({
                        "success": false,
                        "error": err.to_string(),
                        "path": path.display().to_string(),
                    }),
                }
            }
            _ => json!({ "success": false, "message": "Unsupported action" }),
        };

        if let Value::Object(map) = &mut result {
            map.entry("success".to_string()).or_insert(json!(false));
            map.insert("action".to_string(), json!(action));
        }
        let mutating = !READ_ONLY_ACTIONS.contains(&action);
        (result, mutating)
    }

    async fn isolate_domain(&mut self, payload: &Value) -> Value {
        let domain_id = payload["domain_id"].as_str().unwrap_or("0").to_string();
        let mut killed = 0;
        let mut failed = 0;
        for proc in &self.last_all_processes {
            if !proc.is_ros || proc.ros_domain_id != domain_id || proc.pid <= 0 {
                continue;
            }
            if self.sampler.kill_process_tree(proc.pid, true) {
                killed += 1;
            } else {
                failed += 1;
            }
        }
        let stop = self
            .runner
            .run(
                "ros2",
                &["daemon".to_string(), "stop".to_string()],
                3_000,
                &ros_env(&domain_id),
            )
            .await;
        json!({
            "success": failed == 0,
            "killed_count": killed,
            "failed_count": failed,
            "daemon_stop_ok": stop.success(),
            "message": format!("Domain {domain_id} isolated: {killed} killed, {failed} failed."),
        })
    }

    /// Harvests parameters for any graph node not yet cached, then exports
    /// the enriched snapshot.
    async fn export_runtime_snapshot(&mut self, format: &str) -> Value {
        let graph = self.last_graph.clone().unwrap_or_default();
        let tf = self.last_tf.clone().unwrap_or_default();

        let node_names: Vec<String> = graph
            .nodes
            .iter()
            .map(|node| node.full_name.clone())
            .filter(|name| !name.is_empty() && !self.parameter_cache.contains_key(name))
            .collect();
        for name in node_names {
            let params = self
                .inspector
                .fetch_node_parameters(&graph.domain_id, &name)
                .await;
            if params.success {
                self.parameter_cache.insert(name, params.parameters);
            }
        }

        let mut tf_value = serde_json::to_value(&tf).unwrap_or_default();
        if let Value::Object(map) = &mut tf_value {
            let runtime = map.get("runtime").cloned().unwrap_or(Value::Null);
            map.insert("nav2".to_string(), runtime);
        }

        let mut snapshot = snapshot::build_snapshot(
            &serde_json::to_value(&self.last_all_processes).unwrap_or_default(),
            &serde_json::to_value(&self.last_details).unwrap_or_default(),
            &serde_json::to_value(&graph).unwrap_or_default(),
            &tf_value,
            &serde_json::to_value(&self.last_system).unwrap_or_default(),
            &serde_json::to_value(&self.last_health).unwrap_or_default(),
            &serde_json::to_value(&self.parameter_cache).unwrap_or_default(),
        );
        if let Value::Object(map) = &mut snapshot {
            map.insert("advanced".to_string(), self.last_advanced.clone());
            map.insert("fleet".to_string(), self.last_fleet.clone());
            map.insert("session".to_string(), self.recorder.status());
            map.insert("watchdog".to_string(), self.last_watchdog.clone());
            map.insert("preset_name".to_string(), json!(self.preset_name));
        }
        snapshot::export_snapshot(&self.config.base_dir, &snapshot, format)
    }
}
