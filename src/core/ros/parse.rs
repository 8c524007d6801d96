//! Pure parsers for `ros2` CLI output.
//!
//! All functions here take the captured stdout text and return typed values;
//! nothing in this module performs I/O.

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{EndpointRef, QosProfile, TopicQos};

static TOPIC_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S+)\s*\[([^\]]+)\]\s*$").unwrap());

/// Trimmed, non-empty lines.
pub fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Base name of a fully qualified node name ("/ns/node" -> "node").
pub fn base_node_name(full_name: &str) -> String {
    match full_name.rfind('/') {
        Some(idx) => full_name[idx + 1..].to_string(),
        None => full_name.to_string(),
    }
}

/// Namespace of a fully qualified node name ("/ns/node" -> "/ns").
pub fn node_namespace(full_name: &str) -> String {
    if !full_name.starts_with('/') {
        return "/".to_string();
    }
    match full_name.rfind('/') {
        Some(idx) if idx > 0 => full_name[..idx].to_string(),
        _ => "/".to_string(),
    }
}

/// Strips leading list markers (`*`, `-`) from a graph entry line.
fn clean_graph_entry_line(value: &str) -> &str {
    let mut line = value.trim();
    if let Some(rest) = line.strip_prefix('*') {
        line = rest.trim();
    }
    if let Some(rest) = line.strip_prefix('-') {
        line = rest.trim();
    }
    line
}

/// Extracts the state from `ros2 lifecycle get` output.
///
/// Takes the value of the first "...state...:" line, otherwise the first
/// non-empty line verbatim.
pub fn parse_lifecycle_state(text: &str) -> String {
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.to_lowercase().contains("state") {
                return value.trim().to_string();
            }
        }
        return line.to_string();
    }
    String::new()
}

/// Parameters worth `ros2 param get`-ing for plugin/library hints.
pub fn is_plugin_like_parameter(parameter: &str) -> bool {
    let lower = parameter.to_lowercase();
    lower.contains("plugin")
        || lower.contains("library")
        || lower.contains("libraries")
        || lower.contains("class")
        || lower.contains("type")
}

/// The six categorized endpoint sections of `ros2 node info`.
#[derive(Debug, Clone, Default)]
pub struct NodeEndpoints {
    pub publishers: Vec<EndpointRef>,
    pub subscribers: Vec<EndpointRef>,
    pub service_servers: Vec<EndpointRef>,
    pub service_clients: Vec<EndpointRef>,
    pub action_servers: Vec<EndpointRef>,
    pub action_clients: Vec<EndpointRef>,
}

/// Parses `ros2 node info` output into its categorized endpoint sections.
/// Entries are `name: type`; the type is everything after the last colon.
pub fn parse_node_info(text: &str) -> NodeEndpoints {
    let mut endpoints = NodeEndpoints::default();
    let mut current: Option<usize> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "Publishers:" => {
                current = Some(0);
                continue;
            }
            "Subscribers:" => {
                current = Some(1);
                continue;
            }
            "Service Servers:" => {
                current = Some(2);
                continue;
            }
            "Service Clients:" => {
                current = Some(3);
                continue;
            }
            "Action Servers:" => {
                current = Some(4);
                continue;
            }
            "Action Clients:" => {
                current = Some(5);
                continue;
            }
            _ => {}
        }
        if line.starts_with("Node name:") {
            continue;
        }
        let Some(section) = current else {
            continue;
        };

        let entry = clean_graph_entry_line(line);
        let (name, type_name) = match entry.rfind(':') {
            Some(idx) if idx > 0 => (
                entry[..idx].trim().to_string(),
                entry[idx + 1..].trim().to_string(),
            ),
            _ => (entry.to_string(), String::new()),
        };
        let target = match section {
            0 => &mut endpoints.publishers,
            1 => &mut endpoints.subscribers,
            2 => &mut endpoints.service_servers,
            3 => &mut endpoints.service_clients,
            4 => &mut endpoints.action_servers,
            _ => &mut endpoints.action_clients,
        };
        target.push(EndpointRef { name, type_name });
    }
    endpoints
}

/// `ros2 topic list -t` lines: `/topic [pkg/msg/Type]`.
pub fn parse_topic_list_with_types(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            TOPIC_TYPE_RE.captures(line.trim()).map(|caps| {
                (
                    caps[1].trim().to_string(),
                    caps[2].trim().to_string(),
                )
            })
        })
        .collect()
}

/// `ros2 topic info -v` output: endpoint counts plus one QoS triple per
/// `History (Depth):` terminator.
pub fn parse_topic_info_verbose(text: &str) -> TopicQos {
    let mut qos = TopicQos {
        raw: text.chars().take(4096).collect(),
        ..Default::default()
    };

    let mut reliability = String::new();
    let mut durability = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(value) = line.strip_prefix("Publisher count:") {
            qos.publisher_count = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("Subscription count:") {
            qos.subscription_count = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("Reliability:") {
            reliability = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Durability:") {
            durability = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("History (Depth):") {
            qos.qos_profiles.push(QosProfile {
                reliability: std::mem::take(&mut reliability),
                durability: std::mem::take(&mut durability),
                history_depth: value.trim().to_string(),
            });
        }
    }
    qos
}

/// Counts `Node name:` endpoint headers in verbose topic info.
pub fn count_topic_info_publishers(text: &str) -> usize {
    text.lines()
        .filter(|line| line.trim().starts_with("Node name:"))
        .count()
}

/// `(frame_id, child_frame_id)` pairs from `ros2 topic echo` TF samples.
pub fn parse_tf_edges(text: &str) -> Vec<(String, String)> {
    let mut edges = Vec::new();
    let mut parent = String::new();

    for raw in text.lines() {
        let line = raw.trim();
        if let Some(value) = line.strip_prefix("frame_id:") {
            parent = value.trim().replace('"', "");
        } else if let Some(value) = line.strip_prefix("child_frame_id:") {
            let child = value.trim().replace('"', "");
            if !parent.is_empty() && !child.is_empty() {
                edges.push((parent.clone(), child));
            }
        }
    }
    edges
}

/// Behavior roles inferred from the message types a node touches.
pub fn infer_behavior_roles(
    publishers: &[EndpointRef],
    subscribers: &[EndpointRef],
    service_servers: &[EndpointRef],
    service_clients: &[EndpointRef],
    action_servers: &[EndpointRef],
    action_clients: &[EndpointRef],
) -> Vec<String> {
    let mut roles: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

    for publisher in publishers {
        let type_lower = publisher.type_name.to_lowercase();
        if type_lower.contains("geometry_msgs/msg/twist") {
            roles.insert("controller");
        }
        if type_lower.contains("nav_msgs/msg/path") {
            roles.insert("planner");
        }
        if type_lower.contains("sensor_msgs/msg/image") {
            roles.insert("perception");
        }
        if type_lower.contains("sensor_msgs/msg/pointcloud2") {
            roles.insert("lidar_pipeline");
        }
        if type_lower.contains("tf2_msgs/msg/tfmessage")
            || publisher.name == "/tf"
            || publisher.name == "/tf_static"
        {
            roles.insert("state_estimation");
            roles.insert("transform_broadcaster");
        }
    }

    for subscriber in subscribers {
        let type_lower = subscriber.type_name.to_lowercase();
        if type_lower.contains("sensor_msgs/msg/image")
            || type_lower.contains("sensor_msgs/msg/pointcloud2")
        {
            roles.insert("perception");
        }
    }

    if !action_servers.is_empty() || !action_clients.is_empty() {
        roles.insert("task_executor");
    }
    if !service_servers.is_empty() || !service_clients.is_empty() {
        roles.insert("service_oriented");
    }
    if roles.is_empty() {
        roles.insert("generic");
    }

    roles.into_iter().map(str::to_string).collect()
}

/// Runtime classification from load shape and fan-out.
pub fn classify_runtime(cpu_percent: f64, threads: i64, publisher_count: usize) -> &'static str {
    if cpu_percent >= 70.0 {
        "cpu_bound"
    } else if threads >= 40 && cpu_percent < 50.0 {
        "io_bound"
    } else if publisher_count >= 6 {
        "network_heavy"
    } else if cpu_percent >= 15.0 {
        "active"
    } else {
        "idle"
    }
}
