//! Typed model of the inspected ROS 2 graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named, typed graph endpoint (topic, service or action interface).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointRef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginHint {
    pub parameter: String,
    pub value: String,
}

/// One ROS node, merged with the process record backing it (pid < 0 when no
/// local process could be correlated).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    pub domain_id: String,
    pub full_name: String,
    pub node_name: String,
    pub namespace: String,
    pub pid: i64,
    pub executable: String,
    pub package: String,
    pub workspace_origin: String,
    pub launch_source: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub threads: i64,
    pub publishers: Vec<EndpointRef>,
    pub subscribers: Vec<EndpointRef>,
    pub service_servers: Vec<EndpointRef>,
    pub service_clients: Vec<EndpointRef>,
    pub action_servers: Vec<EndpointRef>,
    pub action_clients: Vec<EndpointRef>,
    pub lifecycle_capable: bool,
    pub lifecycle_state: String,
    pub parameters_supported: bool,
    pub parameter_names: Vec<String>,
    pub parameter_count: usize,
    pub plugin_hints: Vec<PluginHint>,
    pub runtime_classification: String,
    pub behavior_roles: Vec<String>,
    pub primary_behavior_role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QosProfile {
    pub reliability: String,
    pub durability: String,
    pub history_depth: String,
}

/// Parsed `ros2 topic info -v` output for one topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicQos {
    pub raw: String,
    pub publisher_count: i64,
    pub subscription_count: i64,
    pub qos_profiles: Vec<QosProfile>,
}

/// Per-domain aggregate derived from the process table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain_id: String,
    pub ros_process_count: i64,
    pub dds_participant_count: i64,
    pub domain_cpu_percent: f64,
    pub domain_memory_percent: f64,
    pub workspace_count: i64,
}

/// Result of inspecting one domain; summary fields are merged in by the
/// engine so detail rows are self-contained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainInspection {
    pub domain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub nodes: Vec<NodeInfo>,
    pub topic_qos: BTreeMap<String, TopicQos>,
    pub ros_process_count: i64,
    pub domain_cpu_percent: f64,
    pub domain_memory_percent: f64,
    pub workspace_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic: String,
    pub publishers: Vec<String>,
    pub subscribers: Vec<String>,
    pub publisher_count: usize,
    pub subscriber_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub service: String,
    pub client_node: String,
    pub server_node: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionEdge {
    pub action: String,
    pub client_node: String,
    pub server_node: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissingServiceServer {
    pub service: String,
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissingActionServer {
    pub action: String,
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateNode {
    pub node: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactScore {
    pub node: String,
    pub downstream_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MisinitializedProcess {
    pub pid: i64,
    pub node_name: String,
    pub executable: String,
    pub workspace_origin: String,
}

/// Full graph view of one domain with every derived relation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphModel {
    pub domain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub nodes: Vec<NodeInfo>,
    pub node_to_pid: BTreeMap<String, i64>,
    pub topics: Vec<TopicEntry>,
    pub topic_qos: BTreeMap<String, TopicQos>,
    pub publishers_without_subscribers: Vec<String>,
    pub subscribers_without_publishers: Vec<String>,
    pub missing_service_servers: Vec<MissingServiceServer>,
    pub missing_action_servers: Vec<MissingActionServer>,
    pub service_edges: Vec<ServiceEdge>,
    pub action_edges: Vec<ActionEdge>,
    pub isolated_nodes: Vec<String>,
    pub circular_dependencies: Vec<String>,
    pub single_points_of_failure: Vec<ImpactScore>,
    pub duplicate_node_names: Vec<DuplicateNode>,
    pub misinitialized_processes: Vec<MisinitializedProcess>,
    pub tf_warnings: Vec<String>,
    pub role_summary: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfEdge {
    pub parent: String,
    pub child: String,
    pub topic: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleStateRow {
    pub node: String,
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionStatusRow {
    pub topic: String,
    pub active: bool,
    pub sample: String,
}

/// Lifecycle and action-goal state sampled alongside TF.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfRuntime {
    pub lifecycle_states: Vec<LifecycleStateRow>,
    pub action_status: Vec<ActionStatusRow>,
    pub active_action_topics: Vec<String>,
    pub goal_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TfModel {
    pub domain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tf_topics: Vec<String>,
    pub tf_edges: Vec<TfEdge>,
    pub tf_warnings: Vec<String>,
    pub runtime: TfRuntime,
}

/// Result of a `ros2 param dump` fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeParameters {
    pub domain_id: String,
    pub node: String,
    pub success: bool,
    pub parameters: String,
    pub error: String,
}
