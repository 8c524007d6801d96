//! ROS 2 graph inspector.
//!
//! Drives the `ros2` CLI (node, topic, lifecycle, param, daemon subcommands)
//! with a `ROS_DOMAIN_ID` overlay and turns the captured text into the typed
//! graph model. Probe failures degrade the affected sub-object; nothing here
//! is fatal to a poll.

pub mod graph;
pub mod parse;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::Mutex;

use log::debug;

use crate::core::executor::{ros_env, CommandRunner};
use crate::core::process::ProcessRecord;

pub use types::{
    ActionStatusRow, DomainInspection, DomainSummary, GraphModel, LifecycleStateRow, NodeInfo,
    NodeParameters, TfEdge, TfModel, TfRuntime,
};

const ROS2_UNAVAILABLE: &str = "ros2 CLI is not available in PATH.";
const MAX_TF_TOPICS: usize = 6;
const MAX_ACTION_STATUS_TOPICS: usize = 10;
const MAX_PLUGIN_HINTS: usize = 6;

pub struct RosInspector {
    runner: Arc<dyn CommandRunner>,
    availability: Mutex<Option<bool>>,
}

impl RosInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            availability: Mutex::new(None),
        }
    }

    /// Whether the `ros2` CLI is on PATH; probed once and cached.
    pub async fn is_ros2_available(&self) -> bool {
        if let Some(available) = *self.availability.lock().unwrap() {
            return available;
        }
        let check = self
            .runner
            .run_shell("command -v ros2 >/dev/null 2>&1 && echo OK", 2_000, &[])
            .await;
        let available = check.stdout.contains("OK");
        *self.availability.lock().unwrap() = Some(available);
        available
    }

    /// Per-domain aggregates from the process table; domain "0" is always
    /// listed, numeric ids sort numerically.
    pub fn list_domains(&self, processes: &[ProcessRecord]) -> Vec<DomainSummary> {
        let mut domains: BTreeSet<String> = BTreeSet::new();
        let mut ros_count: BTreeMap<String, i64> = BTreeMap::new();
        let mut cpu: BTreeMap<String, f64> = BTreeMap::new();
        let mut memory: BTreeMap<String, f64> = BTreeMap::new();
        let mut workspaces: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        domains.insert("0".to_string());
        for proc in processes {
            if !proc.is_ros {
                continue;
            }
            let domain = proc.ros_domain_id.clone();
            domains.insert(domain.clone());
            *ros_count.entry(domain.clone()).or_insert(0) += 1;
            *cpu.entry(domain.clone()).or_insert(0.0) += proc.cpu_percent;
            *memory.entry(domain.clone()).or_insert(0.0) += proc.memory_percent;
            if !proc.workspace_origin.is_empty() {
                workspaces
                    .entry(domain)
                    .or_default()
                    .insert(proc.workspace_origin.clone());
            }
        }

        let mut ordered: Vec<String> = domains.into_iter().collect();
        ordered.sort_by(|a, b| match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });

        ordered
            .into_iter()
            .map(|domain| DomainSummary {
                ros_process_count: ros_count.get(&domain).copied().unwrap_or(0),
                dds_participant_count: ros_count.get(&domain).copied().unwrap_or(0),
                domain_cpu_percent: cpu.get(&domain).copied().unwrap_or(0.0),
                domain_memory_percent: memory.get(&domain).copied().unwrap_or(0.0),
                workspace_count: workspaces.get(&domain).map_or(0, |set| set.len() as i64),
                domain_id: domain,
            })
            .collect()
    }

    /// Correlates a graph node to a local process record.
    fn find_process_for_node<'a>(
        full_node_name: &str,
        processes: &'a [ProcessRecord],
    ) -> Option<&'a ProcessRecord> {
        let node = parse::base_node_name(full_node_name);
        let namespace = parse::node_namespace(full_node_name);

        processes.iter().filter(|proc| proc.is_ros).find(|proc| {
            if !proc.node_name.is_empty()
                && proc.node_name == node
                && (proc.namespace == namespace || proc.namespace == "/" || namespace == "/")
            {
                return true;
            }
            proc.command_line.contains(full_node_name)
                || proc.command_line.contains(&format!("__node:={node}"))
        })
    }

    pub async fn inspect_domain(
        &self,
        domain_id: &str,
        processes: &[ProcessRecord],
        include_graph_details: bool,
    ) -> DomainInspection {
        let mut out = DomainInspection {
            domain_id: domain_id.to_string(),
            ..Default::default()
        };

        if !self.is_ros2_available().await {
            out.error = Some(ROS2_UNAVAILABLE.to_string());
            return out;
        }

        let env = ros_env(domain_id);
        let node_list = self
            .runner
            .run("ros2", &args(&["node", "list"]), 5_000, &env)
            .await;
        if !node_list.success() {
            out.error = Some("Failed to query ROS nodes.".to_string());
            out.details = Some(node_list.stderr);
            return out;
        }

        for full_name in parse::parse_lines(&node_list.stdout) {
            let node = self
                .inspect_node(domain_id, &full_name, processes, include_graph_details, &env)
                .await;
            out.nodes.push(node);
        }

        if include_graph_details {
            let mut unique_topics: BTreeSet<String> = BTreeSet::new();
            for node in &out.nodes {
                for endpoint in node.publishers.iter().chain(node.subscribers.iter()) {
                    if !endpoint.name.is_empty() {
                        unique_topics.insert(endpoint.name.clone());
                    }
                }
            }
            for topic in unique_topics {
                let info = self
                    .runner
                    .run("ros2", &args(&["topic", "info", "-v", &topic]), 4_000, &env)
                    .await;
                if info.success() {
                    out.topic_qos
                        .insert(topic, parse::parse_topic_info_verbose(&info.stdout));
                }
            }
        }

        out
    }

    async fn inspect_node(
        &self,
        domain_id: &str,
        full_name: &str,
        processes: &[ProcessRecord],
        include_graph_details: bool,
        env: &[(String, String)],
    ) -> NodeInfo {
        let mut node = NodeInfo {
            domain_id: domain_id.to_string(),
            full_name: full_name.to_string(),
            node_name: parse::base_node_name(full_name),
            namespace: parse::node_namespace(full_name),
            pid: -1,
            ..Default::default()
        };

        if let Some(proc) = Self::find_process_for_node(full_name, processes) {
            node.pid = proc.pid;
            node.executable = proc.executable.clone();
            node.package = proc.package.clone();
            node.workspace_origin = proc.workspace_origin.clone();
            node.launch_source = proc.launch_source.clone();
            node.cpu_percent = proc.cpu_percent;
            node.memory_percent = proc.memory_percent;
            node.threads = proc.threads;
        }

        if include_graph_details {
            let info = self
                .runner
                .run("ros2", &args(&["node", "info", full_name]), 5_000, env)
                .await;
            if info.success() {
                let endpoints = parse::parse_node_info(&info.stdout);
                node.publishers = endpoints.publishers;
                node.subscribers = endpoints.subscribers;
                node.service_servers = endpoints.service_servers;
                node.service_clients = endpoints.service_clients;
                node.action_servers = endpoints.action_servers;
                node.action_clients = endpoints.action_clients;
            } else {
                debug!("node info failed for {full_name}: {}", info.stderr.trim());
            }
        }

        let lifecycle = self
            .runner
            .run("ros2", &args(&["lifecycle", "get", full_name]), 2_200, env)
            .await;
        node.lifecycle_capable = lifecycle.success();
        node.lifecycle_state = if lifecycle.success() {
            parse::parse_lifecycle_state(&lifecycle.stdout)
        } else {
            "unsupported".to_string()
        };

        if include_graph_details {
            let param_list = self
                .runner
                .run("ros2", &args(&["param", "list", full_name]), 3_500, env)
                .await;
            node.parameters_supported = param_list.success();
            if param_list.success() {
                let mut unique: BTreeSet<String> = BTreeSet::new();
                for raw in parse::parse_lines(&param_list.stdout) {
                    let line = raw.trim_start_matches(['*', '-']).trim();
                    if line.is_empty() || line.ends_with(':') || line == full_name {
                        continue;
                    }
                    unique.insert(line.to_string());
                }
                node.parameter_names = unique.into_iter().collect();
                node.parameter_count = node.parameter_names.len();

                let mut fetched = 0;
                for parameter in node.parameter_names.clone() {
                    if fetched >= MAX_PLUGIN_HINTS {
                        break;
                    }
                    if !parse::is_plugin_like_parameter(&parameter) {
                        continue;
                    }
                    let value = self
                        .runner
                        .run(
                            "ros2",
                            &args(&["param", "get", full_name, &parameter]),
                            2_000,
                            env,
                        )
                        .await;
                    node.plugin_hints.push(types::PluginHint {
                        parameter,
                        value: if value.success() {
                            value.stdout.trim().to_string()
                        } else {
                            "unavailable".to_string()
                        },
                    });
                    fetched += 1;
                }
            }
        }

        node.runtime_classification =
            parse::classify_runtime(node.cpu_percent, node.threads, node.publishers.len())
                .to_string();
        node.behavior_roles = parse::infer_behavior_roles(
            &node.publishers,
            &node.subscribers,
            &node.service_servers,
            &node.service_clients,
            &node.action_servers,
            &node.action_clients,
        );
        node.primary_behavior_role = node
            .behavior_roles
            .first()
            .cloned()
            .unwrap_or_else(|| "generic".to_string());

        node
    }

    /// Detailed inspection plus adjacency derivation.
    pub async fn inspect_graph(
        &self,
        domain_id: &str,
        processes: &[ProcessRecord],
    ) -> GraphModel {
        let domain = self.inspect_domain(domain_id, processes, true).await;
        graph::build_graph(domain, processes)
    }

    /// TF tree, lifecycle states and action goal activity for one domain.
    pub async fn inspect_tf_nav2(&self, domain_id: &str) -> TfModel {
        let mut out = TfModel {
            domain_id: domain_id.to_string(),
            ..Default::default()
        };

        if !self.is_ros2_available().await {
            out.error = Some(ROS2_UNAVAILABLE.to_string());
            return out;
        }

        let env = ros_env(domain_id);
        let topics = self
            .runner
            .run("ros2", &args(&["topic", "list", "-t"]), 4_500, &env)
            .await;

        let mut tf_topics: BTreeSet<String> = BTreeSet::new();
        let mut action_status_topics: BTreeSet<String> = BTreeSet::new();
        if topics.success() {
            for (topic, type_name) in parse::parse_topic_list_with_types(&topics.stdout) {
                if type_name == "tf2_msgs/msg/TFMessage"
                    || topic == "/tf"
                    || topic == "/tf_static"
                    || topic.ends_with("/tf")
                    || topic.ends_with("/tf_static")
                {
                    tf_topics.insert(topic.clone());
                }
                if type_name == "action_msgs/msg/GoalStatusArray"
                    && topic.contains("_action/status")
                {
                    action_status_topics.insert(topic);
                }
            }
        }
        out.tf_topics = tf_topics.iter().cloned().collect();

        let mut edge_keys: BTreeSet<String> = BTreeSet::new();
        for topic in out.tf_topics.iter().take(MAX_TF_TOPICS) {
            let echo = self
                .runner
                .run(
                    "ros2",
                    &args(&["topic", "echo", topic, "--once"]),
                    2_600,
                    &env,
                )
                .await;
            if echo.success() {
                for (parent, child) in parse::parse_tf_edges(&echo.stdout) {
                    let key = format!("{parent}->{child}");
                    if edge_keys.insert(key) {
                        out.tf_edges.push(TfEdge {
                            parent,
                            child,
                            topic: topic.clone(),
                        });
                    }
                }
            }

            let info = self
                .runner
                .run("ros2", &args(&["topic", "info", "-v", topic]), 2_800, &env)
                .await;
            if info.success() && parse::count_topic_info_publishers(&info.stdout) > 1 {
                out.tf_warnings
                    .push(format!("Multiple publishers detected on {topic}"));
            }
        }

        let mut child_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for edge in &out.tf_edges {
            *child_counts.entry(edge.child.as_str()).or_insert(0) += 1;
        }
        for (child, count) in child_counts {
            if count > 1 {
                out.tf_warnings.push(format!(
                    "Frame '{child}' appears with multiple parents/publishers."
                ));
            }
        }

        let lifecycle_nodes = self
            .runner
            .run("ros2", &args(&["lifecycle", "nodes"]), 3_500, &env)
            .await;
        if lifecycle_nodes.success() {
            for node in parse::parse_lines(&lifecycle_nodes.stdout) {
                if !node.starts_with('/') {
                    continue;
                }
                let state = self
                    .runner
                    .run("ros2", &args(&["lifecycle", "get", &node]), 2_600, &env)
                    .await;
                out.runtime.lifecycle_states.push(LifecycleStateRow {
                    node,
                    state: if state.success() {
                        parse::parse_lifecycle_state(&state.stdout)
                    } else {
                        "unknown".to_string()
                    },
                });
            }
        }

        for topic in action_status_topics.iter().take(MAX_ACTION_STATUS_TOPICS) {
            let status = self
                .runner
                .run(
                    "ros2",
                    &args(&["topic", "echo", topic, "--once"]),
                    2_400,
                    &env,
                )
                .await;
            let active = status.success() && !status.stdout.contains("status_list: []");
            if active {
                out.runtime.goal_active = true;
                out.runtime.active_action_topics.push(topic.clone());
            }
            let sample = if status.success() {
                &status.stdout
            } else {
                &status.stderr
            };
            out.runtime.action_status.push(ActionStatusRow {
                topic: topic.clone(),
                active,
                sample: sample.chars().take(280).collect::<String>().trim().to_string(),
            });
        }

        out
    }

    /// `ros2 param dump` for one node, stdout verbatim on success.
    pub async fn fetch_node_parameters(&self, domain_id: &str, node: &str) -> NodeParameters {
        let mut out = NodeParameters {
            domain_id: domain_id.to_string(),
            node: node.to_string(),
            ..Default::default()
        };

        if !self.is_ros2_available().await {
            out.error = ROS2_UNAVAILABLE.to_string();
            return out;
        }

        let result = self
            .runner
            .run(
                "ros2",
                &args(&["param", "dump", node]),
                6_000,
                &ros_env(domain_id),
            )
            .await;
        out.success = result.success();
        out.parameters = result.stdout;
        out.error = result.stderr;
        out
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
