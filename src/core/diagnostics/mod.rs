//! Diagnostics engine: sixteen analyzers over one evaluation context.
//!
//! Each analyzer consumes the shared [`EvalContext`] plus the engine's rolling
//! histories and contributes one keyed sub-report; [`REPORT_KEYS`] fixes the
//! dispatch order. Histories are bounded rings and keys whose subject left
//! the current sample are purged, so memory stays proportional to the live
//! graph.

pub mod stats;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::digest::sha256_hex;
use crate::core::executor::{ros_env, CommandRunner};
use crate::core::health::{HealthReport, HealthStatus};
use crate::core::process::ProcessRecord;
use crate::core::ros::types::{DomainInspection, GraphModel, TfModel};
use crate::core::system::SystemSnapshot;
use crate::core::telemetry::{epoch_ms, utc_now_iso};

const RATE_HISTORY_CAP: usize = 100;
const LIFECYCLE_EVENT_CAP: usize = 120;
const MEMORY_HISTORY_CAP: usize = 120;
const TIMELINE_CAP: usize = 600;
const STUCK_TRANSITION_MS: i64 = 15_000;
const LEAK_MIN_SAMPLES: usize = 8;
const LEAK_SLOPE_THRESHOLD: f64 = 0.03;
const LEAK_DELTA_THRESHOLD: f64 = 1.5;
const DISCOVERY_STORM_DELTA: i64 = 8;
const HIGH_TRAFFIC_MBPS: f64 = 30.0;

/// Report keys in evaluation order.
pub const REPORT_KEYS: [&str; 16] = [
    "parameter_drift",
    "topic_rate_analyzer",
    "qos_mismatch_detector",
    "lifecycle_timeline",
    "executor_load_monitor",
    "cross_correlation_timeline",
    "memory_leak_detection",
    "dds_participant_inspector",
    "network_saturation_monitor",
    "soft_safety_boundary",
    "workspace_tools",
    "action_monitor",
    "tf_drift_monitor",
    "runtime_fingerprint",
    "deterministic_launch_validation",
    "dependency_impact_map",
];

fn default_network_alert_mbps() -> f64 {
    250.0
}

/// Operator-declared expectations the analyzers validate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedProfile {
    #[serde(default)]
    pub expected_nodes: Vec<String>,
    #[serde(default)]
    pub topic_expected_hz: BTreeMap<String, f64>,
    #[serde(default = "default_network_alert_mbps")]
    pub network_alert_mbps: f64,
}

impl Default for ExpectedProfile {
    fn default() -> Self {
        Self {
            expected_nodes: Vec::new(),
            topic_expected_hz: BTreeMap::new(),
            network_alert_mbps: default_network_alert_mbps(),
        }
    }
}

/// Inputs shared by every analyzer for one evaluation pass.
pub struct EvalContext<'a> {
    pub domain_id: &'a str,
    pub processes: &'a [ProcessRecord],
    pub domains: &'a [DomainInspection],
    pub graph: &'a GraphModel,
    pub tf: &'a TfModel,
    pub system: &'a SystemSnapshot,
    pub health: &'a HealthReport,
    pub parameters: &'a BTreeMap<String, String>,
    pub deep_sampling: bool,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default)]
struct TransitionState {
    state: String,
    since_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
struct TopicRateReport {
    topic_metrics: Vec<Value>,
    dropped_topics: Vec<String>,
    underperforming_publishers: Vec<String>,
    latency_spikes: Vec<String>,
}

pub struct DiagnosticsEngine {
    runner: Arc<dyn CommandRunner>,
    expected_profile: ExpectedProfile,

    parameter_hashes_by_node: BTreeMap<String, String>,
    topic_rate_history: BTreeMap<String, VecDeque<f64>>,
    last_topic_bandwidth: BTreeMap<String, f64>,
    lifecycle_state_by_node: BTreeMap<String, TransitionState>,
    lifecycle_events_by_node: BTreeMap<String, VecDeque<Value>>,
    memory_history_by_node: BTreeMap<String, VecDeque<f64>>,
    prev_rx_by_iface: BTreeMap<String, u64>,
    prev_tx_by_iface: BTreeMap<String, u64>,
    prev_participants_by_domain: BTreeMap<String, i64>,
    timeline: VecDeque<Value>,
}

impl DiagnosticsEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            expected_profile: ExpectedProfile::default(),
            parameter_hashes_by_node: BTreeMap::new(),
            topic_rate_history: BTreeMap::new(),
            last_topic_bandwidth: BTreeMap::new(),
            lifecycle_state_by_node: BTreeMap::new(),
            lifecycle_events_by_node: BTreeMap::new(),
            memory_history_by_node: BTreeMap::new(),
            prev_rx_by_iface: BTreeMap::new(),
            prev_tx_by_iface: BTreeMap::new(),
            prev_participants_by_domain: BTreeMap::new(),
            timeline: VecDeque::new(),
        }
    }

    pub fn set_expected_profile(&mut self, profile: ExpectedProfile) {
        self.expected_profile = profile;
    }

    pub fn expected_profile(&self) -> &ExpectedProfile {
        &self.expected_profile
    }

    /// Current rate history for one topic, oldest first.
    pub fn topic_rate_history(&self, topic: &str) -> Vec<f64> {
        self.topic_rate_history
            .get(topic)
            .map(|history| history.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Runs every analyzer and assembles the keyed report bundle.
    pub async fn evaluate(&mut self, ctx: &EvalContext<'_>) -> Value {
        let rate_report = self.topic_rate_analyzer(ctx).await;

        let mut out = serde_json::Map::new();
        for key in REPORT_KEYS {
            let report = match key {
                "parameter_drift" => self.parameter_drift(ctx),
                "topic_rate_analyzer" => serde_json::to_value(&rate_report).unwrap_or_default(),
                "qos_mismatch_detector" => self.qos_mismatch_detector(ctx),
                "lifecycle_timeline" => self.lifecycle_timeline(ctx),
                "executor_load_monitor" => self.executor_load_monitor(ctx),
                "cross_correlation_timeline" => self.cross_correlation_timeline(ctx),
                "memory_leak_detection" => self.memory_leak_detection(ctx),
                "dds_participant_inspector" => self.dds_participant_inspector(ctx),
                "network_saturation_monitor" => self.network_saturation_monitor(ctx),
                "soft_safety_boundary" => self.soft_safety_boundary(ctx, &rate_report),
                "workspace_tools" => self.workspace_tools(ctx),
                "action_monitor" => self.action_monitor(ctx),
                "tf_drift_monitor" => self.tf_drift_monitor(ctx),
                "runtime_fingerprint" => self.runtime_fingerprint(ctx),
                "deterministic_launch_validation" => self.deterministic_launch_validation(ctx),
                "dependency_impact_map" => self.dependency_impact_map(ctx),
                _ => unreachable!("unknown report key"),
            };
            out.insert(key.to_string(), report);
        }

        let score = Self::runtime_stability_score(
            ctx.health,
            &out["topic_rate_analyzer"],
            &out["memory_leak_detection"],
            &out["network_saturation_monitor"],
        );
        out.insert("runtime_stability_score".to_string(), json!(score));
        out.insert(
            "expected_profile".to_string(),
            serde_json::to_value(&self.expected_profile).unwrap_or_default(),
        );
        Value::Object(out)
    }

    fn parameter_drift(&mut self, ctx: &EvalContext<'_>) -> Value {
        let mut changes = Vec::new();
        for (node, dump) in ctx.parameters {
            let hash = sha256_hex(dump);
            match self.parameter_hashes_by_node.get(node) {
                None => {
                    self.parameter_hashes_by_node.insert(node.clone(), hash);
                }
                Some(previous) if *previous != hash => {
                    changes.push(json!({
                        "node": node,
                        "old_hash": previous,
                        "new_hash": hash,
                        "silent_reload_suspected": true,
                    }));
                    self.parameter_hashes_by_node.insert(node.clone(), hash);
                }
                Some(_) => {}
            }
        }
        self.parameter_hashes_by_node
            .retain(|node, _| ctx.parameters.contains_key(node));

        json!({ "changed_nodes": changes, "change_count": changes.len() })
    }

    async fn topic_rate_analyzer(&mut self, ctx: &EvalContext<'_>) -> TopicRateReport {
        let env = ros_env(ctx.domain_id);
        let max_topics = if ctx.deep_sampling { 12 } else { 4 };
        let mut report = TopicRateReport::default();

        for entry in ctx.graph.topics.iter().take(max_topics) {
            let topic = &entry.topic;
            if topic.is_empty() {
                continue;
            }

            let hz = self
                .runner
                .run(
                    "ros2",
                    &to_args(&["topic", "hz", topic, "--window", "20"]),
                    2_500,
                    &env,
                )
                .await;
            let bw = self
                .runner
                .run(
                    "ros2",
                    &to_args(&["topic", "bw", topic, "--window", "20"]),
                    2_500,
                    &env,
                )
                .await;

            let actual = if hz.success() {
                stats::parse_average_rate(&hz.stdout)
            } else {
                -1.0
            };
            let bandwidth = if bw.success() {
                stats::parse_bandwidth_bps(&bw.stdout)
            } else {
                -1.0
            };
            if bandwidth > 0.0 {
                self.last_topic_bandwidth.insert(topic.clone(), bandwidth);
            }

            let history = self.topic_rate_history.entry(topic.clone()).or_default();
            if actual >= 0.0 {
                history.push_back(actual);
                while history.len() > RATE_HISTORY_CAP {
                    history.pop_front();
                }
            }
            let samples: Vec<f64> = history.iter().copied().collect();
            let trend_slope = stats::linear_slope(&samples);
            let mean = if samples.is_empty() {
                actual
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };

            let expected_hz = self
                .expected_profile
                .topic_expected_hz
                .get(topic)
                .copied()
                .unwrap_or(-1.0);

            report.topic_metrics.push(json!({
                "topic": topic,
                "expected_hz": expected_hz,
                "actual_hz": actual,
                "trend_slope": trend_slope,
                "mean_hz": mean,
                "bandwidth_bps": if bandwidth > 0.0 {
                    bandwidth
                } else {
                    self.last_topic_bandwidth.get(topic).copied().unwrap_or(-1.0)
                },
            }));

            if expected_hz > 0.0 && actual >= 0.0 && actual < expected_hz * 0.6 {
                report.dropped_topics.push(topic.clone());
                report.underperforming_publishers.push(topic.clone());
            }
            if samples.len() >= 5 && trend_slope.abs() > f64::max(0.3, mean * 0.2) {
                report.latency_spikes.push(topic.clone());
            }
        }

        // Drop histories for topics no longer present in the graph.
        let live: BTreeSet<&String> = ctx.graph.topics.iter().map(|t| &t.topic).collect();
        self.topic_rate_history.retain(|topic, _| live.contains(topic));
        self.last_topic_bandwidth.retain(|topic, _| live.contains(topic));

        report
    }

    fn qos_mismatch_detector(&self, ctx: &EvalContext<'_>) -> Value {
        let mut mismatches = Vec::new();
        for (topic, qos) in &ctx.graph.topic_qos {
            let distinct: BTreeSet<String> = qos
                .qos_profiles
                .iter()
                .map(|profile| format!("{}|{}", profile.reliability, profile.durability))
                .collect();
            if distinct.len() > 1 {
                mismatches.push(json!({ "topic": topic, "profile_count": distinct.len() }));
            }
        }
        json!({ "mismatches": mismatches, "mismatch_count": mismatches.len() })
    }

    fn lifecycle_timeline(&mut self, ctx: &EvalContext<'_>) -> Value {
        let now = epoch_ms();
        let mut transitions = Vec::new();
        let mut stuck = Vec::new();

        for row in &ctx.tf.runtime.lifecycle_states {
            if row.node.is_empty() {
                continue;
            }
            let previous = self
                .lifecycle_state_by_node
                .get(&row.node)
                .cloned()
                .unwrap_or_default();

            if previous.state != row.state {
                let event = json!({
                    "node": row.node,
                    "previous_state": previous.state,
                    "new_state": row.state,
                    "timestamp_utc": utc_now_iso(),
                });
                transitions.push(event.clone());
                let history = self
                    .lifecycle_events_by_node
                    .entry(row.node.clone())
                    .or_default();
                history.push_back(event);
                while history.len() > LIFECYCLE_EVENT_CAP {
                    history.pop_front();
                }
                self.lifecycle_state_by_node.insert(
                    row.node.clone(),
                    TransitionState {
                        state: row.state.clone(),
                        since_ms: now,
                    },
                );
            } else if previous.since_ms == 0 {
                self.lifecycle_state_by_node.insert(
                    row.node.clone(),
                    TransitionState {
                        state: row.state.clone(),
                        since_ms: now,
                    },
                );
            }

            let lower = row.state.to_lowercase();
            let transitional = lower.contains("configur")
                || lower.contains("activat")
                || lower.contains("deactivat");
            if transitional {
                let since = self
                    .lifecycle_state_by_node
                    .get(&row.node)
                    .map(|state| state.since_ms)
                    .unwrap_or(now);
                let dwell = now - since;
                if dwell > STUCK_TRANSITION_MS {
                    stuck.push(json!({
                        "node": row.node,
                        "state": row.state,
                        "duration_ms": dwell,
                    }));
                }
            }
        }

        let history: BTreeMap<&String, Vec<&Value>> = self
            .lifecycle_events_by_node
            .iter()
            .map(|(node, events)| (node, events.iter().collect()))
            .collect();
        json!({
            "transitions": transitions,
            "stuck_transitional_nodes": stuck,
            "history_by_node": history,
        })
    }

    fn executor_load_monitor(&self, ctx: &EvalContext<'_>) -> Value {
        let overloaded: Vec<Value> = ctx
            .processes
            .iter()
            .filter(|proc| proc.is_ros && (proc.cpu_percent > 85.0 || proc.threads > 80))
            .map(|proc| {
                json!({
                    "pid": proc.pid,
                    "node_name": proc.node_name,
                    "cpu_percent": proc.cpu_percent,
                    "threads": proc.threads,
                })
            })
            .collect();

        let orphan_topics = ctx.graph.publishers_without_subscribers.len();
        json!({
            "overloaded_executors": overloaded,
            "callback_queue_delay_ms": overloaded.len() * 10 + orphan_topics * 3,
            "blocking_callbacks": overloaded,
        })
    }

    fn cross_correlation_timeline(&mut self, ctx: &EvalContext<'_>) -> Value {
        let row = json!({
            "timestamp_utc": utc_now_iso(),
            "cpu_percent": ctx.system.cpu.usage_percent,
            "orphan_topics": ctx.graph.publishers_without_subscribers.len(),
            "tf_warnings": ctx.tf.tf_warnings.len(),
            "goal_active": ctx.tf.runtime.goal_active,
        });
        self.timeline.push_back(row);
        while self.timeline.len() > TIMELINE_CAP {
            self.timeline.pop_front();
        }

        let correlated: Vec<Value> = self
            .timeline
            .iter()
            .filter(|sample| {
                sample["cpu_percent"].as_f64().unwrap_or(0.0) > 85.0
                    && (sample["orphan_topics"].as_u64().unwrap_or(0) > 0
                        || sample["tf_warnings"].as_u64().unwrap_or(0) > 0)
            })
            .map(|sample| {
                json!({
                    "timestamp_utc": sample["timestamp_utc"],
                    "inference": "CPU spike correlated with ROS degradation",
                })
            })
            .collect();

        json!({
            "timeline": self.timeline.iter().cloned().collect::<Vec<_>>(),
            "correlated_events": correlated,
        })
    }

    fn memory_leak_detection(&mut self, ctx: &EvalContext<'_>) -> Value {
        let mut active: BTreeSet<String> = BTreeSet::new();
        for proc in ctx.processes {
            if !proc.is_ros || proc.node_name.is_empty() {
                continue;
            }
            active.insert(proc.node_name.clone());
            let history = self
                .memory_history_by_node
                .entry(proc.node_name.clone())
                .or_default();
            history.push_back(proc.memory_percent);
            while history.len() > MEMORY_HISTORY_CAP {
                history.pop_front();
            }
        }
        self.memory_history_by_node
            .retain(|node, _| active.contains(node));

        let mut leaks = Vec::new();
        for (node, history) in &self.memory_history_by_node {
            if history.len() < LEAK_MIN_SAMPLES {
                continue;
            }
            let samples: Vec<f64> = history.iter().copied().collect();
            let slope = stats::linear_slope(&samples);
            let delta = samples[samples.len() - 1] - samples[0];
            if slope > LEAK_SLOPE_THRESHOLD && delta > LEAK_DELTA_THRESHOLD {
                leaks.push(json!({
                    "node": node,
                    "slope": slope,
                    "delta_percent": delta,
                }));
            }
        }
        json!({ "leak_candidates": leaks, "candidate_count": leaks.len() })
    }

    fn dds_participant_inspector(&mut self, ctx: &EvalContext<'_>) -> Value {
        let mut participants = Vec::new();
        let mut storms = Vec::new();
        for domain in ctx.domains {
            let id = &domain.domain_id;
            let count = domain.ros_process_count;
            let previous = self
                .prev_participants_by_domain
                .get(id)
                .copied()
                .unwrap_or(count);
            if (count - previous).abs() >= DISCOVERY_STORM_DELTA {
                storms.push(json!({
                    "domain_id": id,
                    "previous": previous,
                    "current": count,
                }));
            }
            self.prev_participants_by_domain.insert(id.clone(), count);
            participants.push(json!({ "domain_id": id, "participant_count": count }));
        }
        json!({
            "participants": participants,
            "ghost_participants": ctx.health.zombie_nodes.len(),
            "discovery_storms": storms,
        })
    }

    fn network_saturation_monitor(&mut self, ctx: &EvalContext<'_>) -> Value {
        let dt = f64::max(0.5, ctx.poll_interval_ms as f64 / 1000.0);
        let alert_mbps = self.expected_profile.network_alert_mbps;
        let mut interface_rates = Vec::new();
        let mut congested = Vec::new();

        for iface in &ctx.system.network_interfaces {
            let prev_rx = self
                .prev_rx_by_iface
                .get(&iface.name)
                .copied()
                .unwrap_or(iface.rx_bytes);
            let prev_tx = self
                .prev_tx_by_iface
                .get(&iface.name)
                .copied()
                .unwrap_or(iface.tx_bytes);
            self.prev_rx_by_iface
                .insert(iface.name.clone(), iface.rx_bytes);
            self.prev_tx_by_iface
                .insert(iface.name.clone(), iface.tx_bytes);

            let delta =
                iface.rx_bytes.saturating_sub(prev_rx) + iface.tx_bytes.saturating_sub(prev_tx);
            let mbps = stats::bps_to_mbps(delta as f64 / dt);
            let row = json!({ "interface": iface.name, "total_mbps": mbps });
            if mbps > alert_mbps {
                congested.push(row.clone());
            }
            interface_rates.push(row);
        }

        let live: BTreeSet<&String> = ctx
            .system
            .network_interfaces
            .iter()
            .map(|iface| &iface.name)
            .collect();
        self.prev_rx_by_iface.retain(|name, _| live.contains(name));
        self.prev_tx_by_iface.retain(|name, _| live.contains(name));

        let high_traffic: Vec<Value> = self
            .last_topic_bandwidth
            .iter()
            .filter_map(|(topic, &bps)| {
                let mbps = stats::bps_to_mbps(bps);
                (mbps > HIGH_TRAFFIC_MBPS)
                    .then(|| json!({ "topic": topic, "throughput_mbps": mbps }))
            })
            .collect();

        json!({
            "interface_rates": interface_rates,
            "congested_interfaces": congested,
            "high_traffic_publishers": high_traffic,
        })
    }

    fn soft_safety_boundary(&self, ctx: &EvalContext<'_>, rates: &TopicRateReport) -> Value {
        let mut hz_by_topic: BTreeMap<&str, f64> = BTreeMap::new();
        for metric in &rates.topic_metrics {
            if let (Some(topic), Some(hz)) =
                (metric["topic"].as_str(), metric["actual_hz"].as_f64())
            {
                hz_by_topic.insert(topic, hz);
            }
        }

        let mut warnings: Vec<String> = Vec::new();
        if let Some(&hz) = hz_by_topic.get("/local_costmap/costmap") {
            if hz < 1.0 {
                warnings.push("Costmap update rate is below threshold.".to_string());
            }
        }
        if let Some(&hz) = hz_by_topic.get("/imu") {
            if (0.0..5.0).contains(&hz) {
                warnings.push("IMU stream appears degraded or stalled.".to_string());
            }
        }
        if !ctx.tf.tf_warnings.is_empty() {
            warnings.push("TF integrity warnings detected.".to_string());
        }
        json!({ "warnings": warnings, "warning_count": warnings.len() })
    }

    fn workspace_tools(&self, ctx: &EvalContext<'_>) -> Value {
        static DISTRO_RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new(r"/opt/ros/([^/]+)").unwrap());

        let mut workspaces: BTreeSet<String> = BTreeSet::new();
        let mut package_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut distros: BTreeSet<String> = BTreeSet::new();

        for proc in ctx.processes {
            if !proc.is_ros {
                continue;
            }
            if !proc.workspace_origin.is_empty() {
                workspaces.insert(proc.workspace_origin.clone());
                if !proc.package.is_empty() {
                    package_map
                        .entry(proc.package.clone())
                        .or_default()
                        .insert(proc.workspace_origin.clone());
                }
                if let Some(caps) = DISTRO_RE.captures(&proc.workspace_origin) {
                    distros.insert(caps[1].to_string());
                }
            }
        }

        let duplicate_packages: Vec<Value> = package_map
            .iter()
            .filter(|(_, workspaces)| workspaces.len() > 1)
            .map(|(package, workspaces)| {
                json!({
                    "package": package,
                    "workspaces": workspaces.iter().collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "overlay_chain": workspaces,
            "duplicate_packages": duplicate_packages,
            "mixed_ros_distributions": distros.len() > 1,
            "detected_distributions": distros,
            "abi_mismatch_suspected": distros.len() > 1,
        })
    }

    fn action_monitor(&self, ctx: &EvalContext<'_>) -> Value {
        let mut servers = 0;
        let mut clients = 0;
        for node in &ctx.graph.nodes {
            servers += node.action_servers.len();
            clients += node.action_clients.len();
        }
        let goal_active = ctx.tf.runtime.goal_active;
        json!({
            "active_goals": if goal_active { 1 } else { 0 },
            "action_servers": servers,
            "action_clients": clients,
            "failed_goals": 0,
            "timeouts_suspected": clients > 0 && !goal_active,
        })
    }

    fn tf_drift_monitor(&self, ctx: &EvalContext<'_>) -> Value {
        let mut parents_by_child: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in &ctx.tf.tf_edges {
            parents_by_child
                .entry(edge.child.as_str())
                .or_default()
                .insert(edge.parent.as_str());
        }
        let duplicates: Vec<Value> = parents_by_child
            .iter()
            .filter(|(_, parents)| parents.len() > 1)
            .map(|(child, parents)| {
                json!({ "child_frame": child, "parent_count": parents.len() })
            })
            .collect();
        json!({
            "duplicate_frame_broadcasters": duplicates,
            "parent_child_mismatch_count": duplicates.len(),
            "timestamp_offset_ms": -1,
        })
    }

    fn runtime_fingerprint(&self, ctx: &EvalContext<'_>) -> Value {
        let mut nodes: Vec<&str> = ctx
            .graph
            .nodes
            .iter()
            .map(|node| node.full_name.as_str())
            .collect();
        let mut topics: Vec<&str> = ctx
            .graph
            .topics
            .iter()
            .map(|topic| topic.topic.as_str())
            .collect();
        let mut tf_edges: Vec<String> = ctx
            .tf
            .tf_edges
            .iter()
            .map(|edge| format!("{}->{}", edge.parent, edge.child))
            .collect();
        nodes.sort_unstable();
        topics.sort_unstable();
        tf_edges.sort_unstable();

        let cpu_bucket = stats::bucket_5(ctx.system.cpu.usage_percent);
        let payload = format!(
            "{}::{}::{}::{}",
            nodes.join("|"),
            topics.join("|"),
            tf_edges.join("|"),
            cpu_bucket
        );
        json!({
            "signature": sha256_hex(&payload),
            "node_count": nodes.len(),
            "topic_count": topics.len(),
            "tf_edge_count": tf_edges.len(),
        })
    }

    fn deterministic_launch_validation(&self, ctx: &EvalContext<'_>) -> Value {
        let expected: BTreeSet<&String> = self.expected_profile.expected_nodes.iter().collect();
        let current: BTreeSet<&String> = ctx
            .graph
            .nodes
            .iter()
            .map(|node| &node.full_name)
            .collect();

        let mut rogue: Vec<&String> = Vec::new();
        let mut missing: Vec<&String> = Vec::new();
        if !expected.is_empty() {
            rogue = current.difference(&expected).copied().collect();
            missing = expected.difference(&current).copied().collect();
        }
        json!({
            "rogue_nodes": rogue,
            "missing_nodes": missing,
            "valid": rogue.is_empty() && missing.is_empty(),
        })
    }

    fn dependency_impact_map(&self, ctx: &EvalContext<'_>) -> Value {
        let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut nodes: BTreeSet<String> = BTreeSet::new();
        for topic in &ctx.graph.topics {
            for publisher in &topic.publishers {
                nodes.insert(publisher.clone());
                for subscriber in &topic.subscribers {
                    nodes.insert(subscriber.clone());
                    adjacency
                        .entry(publisher.clone())
                        .or_default()
                        .insert(subscriber.clone());
                }
            }
        }

        let mut scores: Vec<Value> = nodes
            .iter()
            .map(|node| {
                let reach = crate::core::ros::graph::downstream_reach(&adjacency, node).len();
                json!({ "node": node, "downstream_count": reach })
            })
            .collect();
        scores.sort_by_key(|score| {
            std::cmp::Reverse(score["downstream_count"].as_u64().unwrap_or(0))
        });
        let top: Vec<Value> = scores.iter().take(10).cloned().collect();
        json!({ "impact_scores": scores, "top_impact_nodes": top })
    }

    fn runtime_stability_score(
        health: &HealthReport,
        rates: &Value,
        leaks: &Value,
        network: &Value,
    ) -> i64 {
        let mut score: i64 = 100;
        match health.status {
            HealthStatus::Critical => score -= 40,
            HealthStatus::Warning => score -= 20,
            HealthStatus::Healthy => {}
        }
        score -= 5 * rates["dropped_topics"].as_array().map_or(0, Vec::len) as i64;
        score -= 6 * leaks["candidate_count"].as_i64().unwrap_or(0);
        score -= 4 * network["congested_interfaces"].as_array().map_or(0, Vec::len) as i64;
        score.clamp(0, 100)
    }
}

fn to_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::Executor;
    use crate::core::ros::types::TopicEntry;
    use crate::core::system::NetworkInterface;
    use crate::core::telemetry::Telemetry;

    fn engine() -> DiagnosticsEngine {
        DiagnosticsEngine::new(Arc::new(Executor::new(Telemetry::new())))
    }

    fn empty_ctx<'a>(
        processes: &'a [ProcessRecord],
        graph: &'a GraphModel,
        tf: &'a TfModel,
        system: &'a SystemSnapshot,
        health: &'a HealthReport,
        parameters: &'a BTreeMap<String, String>,
    ) -> EvalContext<'a> {
        EvalContext {
            domain_id: "0",
            processes,
            domains: &[],
            graph,
            tf,
            system,
            health,
            parameters,
            deep_sampling: false,
            poll_interval_ms: 2_000,
        }
    }

    #[test]
    fn test_parameter_drift_flags_changed_hash() {
        let mut engine = engine();
        let graph = GraphModel::default();
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();

        let mut params = BTreeMap::new();
        params.insert("/talker".to_string(), "rate: 10".to_string());
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let first = engine.parameter_drift(&ctx);
        assert_eq!(first["change_count"], 0);

        let mut params = BTreeMap::new();
        params.insert("/talker".to_string(), "rate: 20".to_string());
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let second = engine.parameter_drift(&ctx);
        assert_eq!(second["change_count"], 1);
        assert_eq!(second["changed_nodes"][0]["node"], "/talker");
        assert_eq!(second["changed_nodes"][0]["silent_reload_suspected"], true);
    }

    #[test]
    fn test_memory_leak_detection_on_ramp() {
        let mut engine = engine();
        let graph = GraphModel::default();
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();

        let ramp = [1.0, 1.1, 1.2, 1.3, 1.5, 1.7, 2.0, 2.3, 2.7, 3.1];
        let mut last = Value::Null;
        for memory in ramp {
            let processes = vec![ProcessRecord {
                pid: 7,
                is_ros: true,
                node_name: "leaky".to_string(),
                memory_percent: memory,
                ..Default::default()
            }];
            let ctx = empty_ctx(&processes, &graph, &tf, &system, &health, &params);
            last = engine.memory_leak_detection(&ctx);
        }
        assert_eq!(last["candidate_count"], 1);
        assert_eq!(last["leak_candidates"][0]["node"], "leaky");
    }

    #[test]
    fn test_memory_history_purges_vanished_nodes() {
        let mut engine = engine();
        let graph = GraphModel::default();
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();

        let processes = vec![ProcessRecord {
            pid: 7,
            is_ros: true,
            node_name: "gone".to_string(),
            memory_percent: 1.0,
            ..Default::default()
        }];
        let ctx = empty_ctx(&processes, &graph, &tf, &system, &health, &params);
        engine.memory_leak_detection(&ctx);
        assert!(engine.memory_history_by_node.contains_key("gone"));

        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        engine.memory_leak_detection(&ctx);
        assert!(engine.memory_history_by_node.is_empty());
    }

    #[test]
    fn test_network_saturation_flags_congested_iface() {
        let mut engine = engine();
        let graph = GraphModel::default();
        let tf = TfModel::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();

        let mut system = SystemSnapshot::default();
        system.network_interfaces.push(NetworkInterface {
            name: "eth0".to_string(),
            rx_bytes: 0,
            tx_bytes: 0,
            ..Default::default()
        });
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        engine.network_saturation_monitor(&ctx);

        // 2 GiB in one 2 s interval is far above the 250 Mbit/s default.
        let mut system = SystemSnapshot::default();
        system.network_interfaces.push(NetworkInterface {
            name: "eth0".to_string(),
            rx_bytes: 2 * 1024 * 1024 * 1024,
            tx_bytes: 0,
            ..Default::default()
        });
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let report = engine.network_saturation_monitor(&ctx);
        assert_eq!(report["congested_interfaces"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_executor_load_monitor_heuristic() {
        let engine = engine();
        let mut graph = GraphModel::default();
        graph.publishers_without_subscribers = vec!["/a".to_string(), "/b".to_string()];
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();

        let processes = vec![
            ProcessRecord {
                pid: 1,
                is_ros: true,
                cpu_percent: 90.0,
                ..Default::default()
            },
            ProcessRecord {
                pid: 2,
                is_ros: true,
                threads: 100,
                ..Default::default()
            },
            ProcessRecord {
                pid: 3,
                is_ros: false,
                cpu_percent: 99.0,
                ..Default::default()
            },
        ];
        let ctx = empty_ctx(&processes, &graph, &tf, &system, &health, &params);
        let report = engine.executor_load_monitor(&ctx);
        assert_eq!(report["overloaded_executors"].as_array().unwrap().len(), 2);
        assert_eq!(report["callback_queue_delay_ms"], 2 * 10 + 2 * 3);
    }

    #[test]
    fn test_stability_score_composition() {
        let mut health = HealthReport::default();
        health.status = HealthStatus::Warning;
        let rates = json!({ "dropped_topics": ["/a", "/b"] });
        let leaks = json!({ "candidate_count": 1 });
        let network = json!({ "congested_interfaces": [{}] });
        let score = DiagnosticsEngine::runtime_stability_score(&health, &rates, &leaks, &network);
        assert_eq!(score, 100 - 20 - 10 - 6 - 4);
    }

    #[test]
    fn test_stability_score_clamps_at_zero() {
        let mut health = HealthReport::default();
        health.status = HealthStatus::Critical;
        let rates = json!({ "dropped_topics": vec!["/a"; 20] });
        let leaks = json!({ "candidate_count": 10 });
        let network = json!({ "congested_interfaces": [] });
        let score = DiagnosticsEngine::runtime_stability_score(&health, &rates, &leaks, &network);
        assert_eq!(score, 0);
    }

    #[test]
    fn test_launch_validation_rogue_and_missing() {
        let mut engine = engine();
        engine.set_expected_profile(ExpectedProfile {
            expected_nodes: vec!["/planner".to_string(), "/controller".to_string()],
            ..Default::default()
        });

        let mut graph = GraphModel::default();
        graph.nodes.push(crate::core::ros::types::NodeInfo {
            full_name: "/planner".to_string(),
            ..Default::default()
        });
        graph.nodes.push(crate::core::ros::types::NodeInfo {
            full_name: "/intruder".to_string(),
            ..Default::default()
        });
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let report = engine.deterministic_launch_validation(&ctx);
        assert_eq!(report["rogue_nodes"], json!(["/intruder"]));
        assert_eq!(report["missing_nodes"], json!(["/controller"]));
        assert_eq!(report["valid"], false);
    }

    #[test]
    fn test_tf_drift_duplicate_broadcasters() {
        let engine = engine();
        let graph = GraphModel::default();
        let mut tf = TfModel::default();
        tf.tf_edges.push(crate::core::ros::types::TfEdge {
            parent: "map".to_string(),
            child: "odom".to_string(),
            topic: "/tf".to_string(),
        });
        tf.tf_edges.push(crate::core::ros::types::TfEdge {
            parent: "map_2".to_string(),
            child: "odom".to_string(),
            topic: "/tf".to_string(),
        });
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let report = engine.tf_drift_monitor(&ctx);
        assert_eq!(report["parent_child_mismatch_count"], 1);
        assert_eq!(
            report["duplicate_frame_broadcasters"][0]["child_frame"],
            "odom"
        );
    }

    #[test]
    fn test_dependency_impact_map_orders_by_reach() {
        let engine = engine();
        let mut graph = GraphModel::default();
        graph.topics.push(TopicEntry {
            topic: "/x".to_string(),
            publishers: vec!["/a".to_string()],
            subscribers: vec!["/b".to_string(), "/c".to_string()],
            publisher_count: 1,
            subscriber_count: 2,
        });
        let tf = TfModel::default();
        let system = SystemSnapshot::default();
        let health = HealthReport::default();
        let params = BTreeMap::new();
        let ctx = empty_ctx(&[], &graph, &tf, &system, &health, &params);
        let report = engine.dependency_impact_map(&ctx);
        assert_eq!(report["top_impact_nodes"][0]["node"], "/a");
        assert_eq!(report["top_impact_nodes"][0]["downstream_count"], 2);
    }
}
