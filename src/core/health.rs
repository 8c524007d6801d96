//! Health evaluation over the inspected graph.
//!
//! Pure function of the domain inspections, graph and TF models: no I/O, no
//! retained state.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::ros::types::{
    DomainInspection, DuplicateNode, GraphModel, MisinitializedProcess, MissingActionServer,
    MissingServiceServer, TfModel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Healthy
    }
}

/// A graph node with no local process backing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZombieNode {
    pub domain_id: String,
    pub node: String,
}

/// The same full node name observed in more than one domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainConflict {
    pub node: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub duplicate_nodes: Vec<DuplicateNode>,
    pub zombie_nodes: Vec<ZombieNode>,
    pub domain_conflicts: Vec<DomainConflict>,
    pub publishers_without_subscribers: Vec<String>,
    pub subscribers_without_publishers: Vec<String>,
    pub missing_service_servers: Vec<MissingServiceServer>,
    pub missing_action_servers: Vec<MissingActionServer>,
    pub misinitialized_processes: Vec<MisinitializedProcess>,
    pub tf_warnings: Vec<String>,
    pub nav2_goal_active: bool,
}

/// Derives the overall health status.
///
/// Critical beats warning: zombies, domain conflicts and misinitialized
/// processes are operator-actionable faults, while duplicate names, orphan
/// topics, missing servers and TF warnings only degrade the grade.
pub fn evaluate(
    domains: &[DomainInspection],
    graph: &GraphModel,
    tf: &TfModel,
) -> HealthReport {
    let mut zombie_nodes = Vec::new();
    let mut node_domains: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for domain in domains {
        for node in &domain.nodes {
            node_domains
                .entry(node.full_name.clone())
                .or_default()
                .insert(domain.domain_id.clone());
            if node.pid < 0 {
                zombie_nodes.push(ZombieNode {
                    domain_id: domain.domain_id.clone(),
                    node: node.full_name.clone(),
                });
            }
        }
    }

    let domain_conflicts: Vec<DomainConflict> = node_domains
        .into_iter()
        .filter(|(_, domains)| domains.len() > 1)
        .map(|(node, domains)| DomainConflict {
            node,
            domains: domains.into_iter().collect(),
        })
        .collect();

    let status = if !zombie_nodes.is_empty()
        || !domain_conflicts.is_empty()
        || !graph.misinitialized_processes.is_empty()
    {
        HealthStatus::Critical
    } else if !graph.duplicate_node_names.is_empty()
        || !tf.tf_warnings.is_empty()
        || !graph.publishers_without_subscribers.is_empty()
        || !graph.subscribers_without_publishers.is_empty()
        || !graph.missing_service_servers.is_empty()
        || !graph.missing_action_servers.is_empty()
    {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        duplicate_nodes: graph.duplicate_node_names.clone(),
        zombie_nodes,
        domain_conflicts,
        publishers_without_subscribers: graph.publishers_without_subscribers.clone(),
        subscribers_without_publishers: graph.subscribers_without_publishers.clone(),
        missing_service_servers: graph.missing_service_servers.clone(),
        missing_action_servers: graph.missing_action_servers.clone(),
        misinitialized_processes: graph.misinitialized_processes.clone(),
        tf_warnings: tf.tf_warnings.clone(),
        nav2_goal_active: tf.runtime.goal_active,
    }
}
