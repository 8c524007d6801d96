//! Remote fleet monitor: SSH fanout with retry, jitter, a per-(target,
//! action) circuit breaker and a durable offline queue.
//!
//! The monitor assumes serialized callers (the engine task); its only durable
//! side effect, the queue file, is written atomically.

mod queue;

pub use queue::{OfflineQueue, QueuedAction};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::core::executor::CommandRunner;
use crate::core::telemetry::{epoch_ms, utc_now_iso, Telemetry};

const MAX_RETRIES: u32 = 3;
const CIRCUIT_FAILURE_THRESHOLD: u32 = 4;
const CIRCUIT_COOLDOWN_MS: i64 = 30_000;
const STATUS_ATTEMPTS: u32 = 2;
const STATUS_BACKOFF_MS: u64 = 150;
const STATUS_JITTER_MS: u64 = 200;
const ACTION_BACKOFF_BASE_MS: u64 = 250;
const ACTION_JITTER_MS: u64 = 350;
const ACTION_BACKOFF_CAP_MS: u64 = 9_000;
const QUEUE_FILE: &str = "offline_remote_queue.json";

fn default_port() -> u16 {
    22
}

fn default_domain() -> String {
    "0".to_string()
}

fn default_ros_setup() -> String {
    "/opt/ros/humble/setup.bash".to_string()
}

/// One fleet peer reachable over SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetTarget {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_domain")]
    pub domain_id: String,
    #[serde(default = "default_ros_setup")]
    pub ros_setup: String,
}

impl FleetTarget {
    /// SSH destination: `user@host`, user omitted when empty.
    pub fn host_key(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CircuitState {
    failures: u32,
    open_until_ms: i64,
}

/// Time-derived jitter in `0..=max_ms`; good enough for retry spreading
/// without pulling in a random-number dependency.
fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        % (max_ms as u128 + 1)) as u64
}

pub struct RemoteMonitor {
    runner: Arc<dyn CommandRunner>,
    telemetry: Telemetry,
    targets: Vec<FleetTarget>,
    circuit: HashMap<String, CircuitState>,
    queue: OfflineQueue,
}

impl RemoteMonitor {
    /// `state_dir` receives the offline queue file.
    pub fn new(runner: Arc<dyn CommandRunner>, telemetry: Telemetry, state_dir: &Path) -> Self {
        let queue = OfflineQueue::open(state_dir.join(QUEUE_FILE));
        telemetry.set_queue_size("offline_remote_actions", queue.len());
        Self {
            runner,
            telemetry,
            targets: Vec::new(),
            circuit: HashMap::new(),
            queue,
        }
    }

    pub fn targets(&self) -> &[FleetTarget] {
        &self.targets
    }

    pub fn set_targets(&mut self, targets: Vec<FleetTarget>) {
        self.targets = targets;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_actions(&self) -> Vec<QueuedAction> {
        self.queue.entries().cloned().collect()
    }

    /// Loads targets from a JSON array file; prior targets are untouched on
    /// any failure.
    pub fn load_targets_from_file(&mut self, path: &Path) -> Value {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                return json!({
                    "success": false,
                    "error": "Failed to open remote targets file.",
                    "path": path.display().to_string(),
                });
            }
        };
        let targets: Vec<FleetTarget> = match serde_json::from_str(&raw) {
            Ok(targets) => targets,
            Err(_) => {
                return json!({
                    "success": false,
                    "error": "Remote targets file must contain a JSON array.",
                    "path": path.display().to_string(),
                });
            }
        };

        self.targets = targets;
        self.telemetry
            .set_gauge("fleet.targets_count", self.targets.len() as f64);
        self.telemetry
            .set_queue_size("offline_remote_actions", self.queue.len());
        json!({
            "success": true,
            "loaded_targets": self.targets.len(),
            "path": path.display().to_string(),
        })
    }

    fn is_circuit_open(&self, key: &str) -> bool {
        self.circuit
            .get(key)
            .is_some_and(|state| state.open_until_ms > epoch_ms())
    }

    fn on_circuit_success(&mut self, key: &str) {
        self.circuit.remove(key);
    }

    fn on_circuit_failure(&mut self, key: &str) {
        let state = self.circuit.entry(key.to_string()).or_default();
        state.failures += 1;
        if state.failures >= CIRCUIT_FAILURE_THRESHOLD {
            state.open_until_ms = epoch_ms() + CIRCUIT_COOLDOWN_MS;
            self.telemetry.record_event(
                "circuit_open",
                json!({ "key": key, "cooldown_ms": CIRCUIT_COOLDOWN_MS }),
            );
        }
    }

    /// Forces the circuit for `key` open until `until_ms` (testing hook).
    pub fn force_open(&mut self, key: &str, until_ms: i64) {
        self.circuit.insert(
            key.to_string(),
            CircuitState {
                failures: CIRCUIT_FAILURE_THRESHOLD,
                open_until_ms: until_ms,
            },
        );
    }

    /// Clears the circuit for `key` (testing hook).
    pub fn force_closed(&mut self, key: &str) {
        self.circuit.remove(key);
    }

    fn ssh_args(target: &FleetTarget, script: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=3".to_string(),
            "-p".to_string(),
            target.port.to_string(),
            target.host_key(),
            "bash".to_string(),
            "-lc".to_string(),
            script.to_string(),
        ]
    }

    /// Probes every target for node count, load and available memory.
    pub async fn collect_fleet_status(&mut self, timeout_ms: u64) -> Value {
        let targets = self.targets.clone();
        let mut robots = Vec::new();

        for target in targets {
            if target.host.is_empty() {
                continue;
            }
            let key = format!("{}|status", target.name);
            let mut robot = serde_json::to_value(&target).unwrap_or_default();

            if self.is_circuit_open(&key) {
                robot["reachable"] = json!(false);
                robot["error"] = json!("Circuit breaker open (cooldown).");
                robots.push(robot);
                self.telemetry
                    .increment_counter("fleet.status.circuit_open", 1);
                continue;
            }

            let script = format!(
                "source {} >/dev/null 2>&1; \
                 nodes=$(ros2 node list 2>/dev/null | wc -l); \
                 load=$(awk '{{print $1}}' /proc/loadavg); \
                 mem=$(awk '/MemAvailable/ {{print $2}}' /proc/meminfo); \
                 host=$(hostname); \
                 echo \"$host|$nodes|$load|$mem\"",
                target.ros_setup
            );
            let args = Self::ssh_args(&target, &script);

            let mut outcome = Default::default();
            for attempt in 0..STATUS_ATTEMPTS {
                self.telemetry.record_request();
                outcome = self.runner.run("ssh", &args, timeout_ms, &[]).await;
                if outcome.success() {
                    self.on_circuit_success(&key);
                    break;
                }
                self.on_circuit_failure(&key);
                self.telemetry
                    .increment_counter("fleet.status.retry_count", 1);
                if attempt + 1 < STATUS_ATTEMPTS {
                    sleep(Duration::from_millis(
                        STATUS_BACKOFF_MS + jitter_ms(STATUS_JITTER_MS),
                    ))
                    .await;
                }
            }

            robot["reachable"] = json!(outcome.success());
            if outcome.success() {
                let parts: Vec<&str> = outcome.stdout.trim().split('|').collect();
                if parts.len() >= 4 {
                    robot["remote_hostname"] = json!(parts[0]);
                    robot["node_count"] = json!(parts[1].trim().parse::<i64>().unwrap_or(0));
                    robot["load_1m"] = json!(parts[2].trim().parse::<f64>().unwrap_or(0.0));
                    robot["mem_available_kb"] =
                        json!(parts[3].trim().parse::<i64>().unwrap_or(0));
                }
            } else {
                robot["error"] = json!(outcome.stderr.trim());
            }
            robots.push(robot);
        }

        let healthy = robots
            .iter()
            .filter(|robot| robot["reachable"].as_bool().unwrap_or(false))
            .count();
        json!({
            "robots": robots,
            "healthy_count": healthy,
            "total_count": robots.len(),
            "offline_queue_size": self.queue.len(),
        })
    }

    fn remote_script(target: &FleetTarget, action: &str, domain_id: &str) -> Option<String> {
        match action {
            "restart_domain" => Some(format!(
                "source {} >/dev/null 2>&1; export ROS_DOMAIN_ID={}; ros2 daemon stop; ros2 daemon start;",
                target.ros_setup, domain_id
            )),
            "kill_ros" => Some(
                "pkill -9 -f -- '--ros-args|rclcpp|rclpy|/opt/ros|ament' || true".to_string(),
            ),
            "isolate_domain" => Some(format!(
                "source {} >/dev/null 2>&1; export ROS_DOMAIN_ID={}; ros2 daemon stop;",
                target.ros_setup, domain_id
            )),
            _ => None,
        }
    }

    async fn execute_remote_action_internal(
        &mut self,
        target_name: &str,
        action: &str,
        domain_id: &str,
        timeout_ms: u64,
        allow_queue_write: bool,
    ) -> Value {
        let Some(target) = self
            .targets
            .iter()
            .find(|target| target.name == target_name)
            .cloned()
        else {
            return json!({
                "success": false,
                "error": "Remote target not found.",
                "target": target_name,
            });
        };

        let circuit_key = format!("{}|{}", target.name, action);
        if self.is_circuit_open(&circuit_key) {
            self.telemetry
                .increment_counter("fleet.action.circuit_open", 1);
            return json!({
                "success": false,
                "error": "Circuit breaker open; cooldown active.",
                "target": target_name,
                "action": action,
            });
        }

        let Some(script) = Self::remote_script(&target, action, domain_id) else {
            return json!({
                "success": false,
                "error": "Unsupported remote action.",
                "target": target_name,
            });
        };
        let args = Self::ssh_args(&target, &script);

        let mut outcome = Default::default();
        let mut retries_used = 0;
        for attempt in 0..MAX_RETRIES {
            self.telemetry.record_request();
            outcome = self.runner.run("ssh", &args, timeout_ms, &[]).await;
            if outcome.success() {
                self.on_circuit_success(&circuit_key);
                break;
            }
            retries_used = attempt + 1;
            self.on_circuit_failure(&circuit_key);
            self.telemetry
                .increment_counter("fleet.action.retry_count", 1);
            if attempt + 1 < MAX_RETRIES {
                let base = ACTION_BACKOFF_BASE_MS << attempt;
                let backoff = (base + jitter_ms(ACTION_JITTER_MS)).min(ACTION_BACKOFF_CAP_MS);
                sleep(Duration::from_millis(backoff)).await;
            }
        }

        if !outcome.success() && allow_queue_write {
            let queued = QueuedAction {
                target: target_name.to_string(),
                action: action.to_string(),
                domain_id: domain_id.to_string(),
                queued_utc: utc_now_iso(),
            };
            if let Err(err) = self.queue.push(queued) {
                log::warn!("failed to persist offline queue: {err}");
            }
            self.telemetry
                .increment_counter("fleet.action.offline_queued", 1);
            self.telemetry
                .set_queue_size("offline_remote_actions", self.queue.len());
        }

        json!({
            "success": outcome.success(),
            "target": target_name,
            "action": action,
            "retry_count": retries_used,
            "stderr": outcome.stderr.trim(),
            "offline_queue_size": self.queue.len(),
        })
    }

    /// Runs one of the known remote actions against a named target, queueing
    /// it offline on persistent failure.
    pub async fn execute_remote_action(
        &mut self,
        target_name: &str,
        action: &str,
        domain_id: &str,
        timeout_ms: u64,
    ) -> Value {
        self.execute_remote_action_internal(target_name, action, domain_id, timeout_ms, true)
            .await
    }

    /// Replays up to `budget` queued actions in order. Successes leave the
    /// queue, failures keep their position; the queue is persisted once after
    /// the batch.
    pub async fn resume_queued_actions(&mut self, budget: usize, timeout_ms: u64) -> Value {
        if self.queue.is_empty() || budget == 0 {
            return json!({
                "success": true,
                "resumed_count": 0,
                "remaining_queue": self.queue.len(),
            });
        }

        let mut resumed = 0;
        let mut failed = 0;
        let mut index = 0;
        while index < self.queue.len() && resumed < budget {
            let Some(request) = self.queue.get(index).cloned() else {
                break;
            };
            let result = self
                .execute_remote_action_internal(
                    &request.target,
                    &request.action,
                    &request.domain_id,
                    timeout_ms,
                    false,
                )
                .await;
            if result["success"].as_bool().unwrap_or(false) {
                self.queue.remove(index);
                resumed += 1;
            } else {
                failed += 1;
                index += 1;
            }
        }

        if let Err(err) = self.queue.persist() {
            log::warn!("failed to persist offline queue: {err}");
        }
        self.telemetry
            .set_queue_size("offline_remote_actions", self.queue.len());
        json!({
            "success": true,
            "resumed_count": resumed,
            "failed_count": failed,
            "remaining_queue": self.queue.len(),
        })
    }
}
