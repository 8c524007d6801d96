//! Set-based comparison of two snapshots.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};

use crate::core::digest::sha256_hex;

fn node_set(snapshot: &Value) -> BTreeSet<String> {
    snapshot["graph"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|node| node["full_name"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn topic_set(snapshot: &Value) -> BTreeSet<String> {
    snapshot["graph"]["topics"]
        .as_array()
        .map(|topics| {
            topics
                .iter()
                .filter_map(|topic| topic["topic"].as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn domain_set(snapshot: &Value) -> BTreeSet<String> {
    snapshot["domains"]
        .as_array()
        .map(|domains| {
            domains
                .iter()
                .map(|domain| {
                    domain["domain_id"]
                        .as_str()
                        .unwrap_or("0")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parameter_hashes(snapshot: &Value) -> Vec<(String, String)> {
    snapshot["parameters"]
        .as_object()
        .map(|params| {
            params
                .iter()
                .map(|(node, dump)| {
                    (
                        node.clone(),
                        sha256_hex(dump.as_str().unwrap_or_default()),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn sorted(set: BTreeSet<String>) -> Vec<String> {
    set.into_iter().collect()
}

/// Set differences over graph nodes, topics, domains and parameter hashes.
pub fn compare(left: &Value, right: &Value) -> Value {
    let left_nodes = node_set(left);
    let right_nodes = node_set(right);
    let left_topics = topic_set(left);
    let right_topics = topic_set(right);
    let left_domains = domain_set(left);
    let right_domains = domain_set(right);

    let nodes_added = sorted(&right_nodes - &left_nodes);
    let nodes_removed = sorted(&left_nodes - &right_nodes);
    let topics_added = sorted(&right_topics - &left_topics);
    let topics_removed = sorted(&left_topics - &right_topics);
    let domains_added = sorted(&right_domains - &left_domains);
    let domains_removed = sorted(&left_domains - &right_domains);

    let left_params: std::collections::BTreeMap<String, String> =
        parameter_hashes(left).into_iter().collect();
    let right_params: std::collections::BTreeMap<String, String> =
        parameter_hashes(right).into_iter().collect();
    let mut all_param_nodes: BTreeSet<&String> = left_params.keys().collect();
    all_param_nodes.extend(right_params.keys());

    let parameters_changed: Vec<&String> = all_param_nodes
        .into_iter()
        .filter(|node| left_params.get(*node) != right_params.get(*node))
        .collect();

    json!({
        "summary": {
            "nodes_added": nodes_added.len(),
            "nodes_removed": nodes_removed.len(),
            "topics_added": topics_added.len(),
            "topics_removed": topics_removed.len(),
            "domains_added": domains_added.len(),
            "domains_removed": domains_removed.len(),
            "parameters_changed": parameters_changed.len(),
        },
        "nodes_added": nodes_added,
        "nodes_removed": nodes_removed,
        "topics_added": topics_added,
        "topics_removed": topics_removed,
        "domains_added": domains_added,
        "domains_removed": domains_removed,
        "parameters_changed": parameters_changed,
    })
}

/// Compares two snapshot files; both must parse to JSON objects.
pub fn compare_files(left_path: &Path, right_path: &Path) -> Value {
    let Ok(left_raw) = fs::read_to_string(left_path) else {
        return json!({ "success": false, "error": "Failed to open left snapshot." });
    };
    let Ok(right_raw) = fs::read_to_string(right_path) else {
        return json!({ "success": false, "error": "Failed to open right snapshot." });
    };
    let (Ok(left), Ok(right)) = (
        serde_json::from_str::<Value>(&left_raw),
        serde_json::from_str::<Value>(&right_raw),
    ) else {
        return json!({ "success": false, "error": "Snapshot files must be JSON objects." });
    };
    if !left.is_object() || !right.is_object() {
        return json!({ "success": false, "error": "Snapshot files must be JSON objects." });
    }

    let mut out = compare(&left, &right);
    out["success"] = json!(true);
    out["left_path"] = json!(left_path.display().to_string());
    out["right_path"] = json!(right_path.display().to_string());
    out
}
