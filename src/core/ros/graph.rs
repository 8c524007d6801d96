//! Graph derivation: adjacency, duplicates, orphan topics, cycles,
//! single-points-of-failure and misinitialized processes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::core::process::ProcessRecord;

use super::types::{
    ActionEdge, DomainInspection, DuplicateNode, GraphModel, ImpactScore, MisinitializedProcess,
    MissingActionServer, MissingServiceServer, ServiceEdge, TopicEntry,
};

type Adjacency = BTreeMap<String, BTreeSet<String>>;

/// Builds the full graph model from a detailed domain inspection.
pub fn build_graph(
    domain: DomainInspection,
    processes: &[ProcessRecord],
) -> GraphModel {
    let domain_id = domain.domain_id.clone();
    let nodes = domain.nodes;

    let mut publishers_by_topic: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut subscribers_by_topic: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut service_servers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut service_clients: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut action_servers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut action_clients: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut name_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut role_summary: BTreeMap<String, i64> = BTreeMap::new();
    let mut node_to_pid: BTreeMap<String, i64> = BTreeMap::new();
    let mut base_names: HashSet<String> = HashSet::new();
    let mut isolated_nodes: Vec<String> = Vec::new();

    for node in &nodes {
        *name_counts.entry(node.full_name.clone()).or_insert(0) += 1;
        base_names.insert(node.node_name.clone());
        node_to_pid.insert(node.full_name.clone(), node.pid);
        for role in &node.behavior_roles {
            *role_summary.entry(role.clone()).or_insert(0) += 1;
        }

        if node.publishers.is_empty()
            && node.subscribers.is_empty()
            && node.service_servers.is_empty()
            && node.service_clients.is_empty()
            && node.action_servers.is_empty()
            && node.action_clients.is_empty()
        {
            isolated_nodes.push(node.full_name.clone());
        }

        for endpoint in &node.publishers {
            if !endpoint.name.is_empty() {
                publishers_by_topic
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
        for endpoint in &node.subscribers {
            if !endpoint.name.is_empty() {
                subscribers_by_topic
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
        for endpoint in &node.service_servers {
            if !endpoint.name.is_empty() {
                service_servers
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
        for endpoint in &node.service_clients {
            if !endpoint.name.is_empty() {
                service_clients
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
        for endpoint in &node.action_servers {
            if !endpoint.name.is_empty() {
                action_servers
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
        for endpoint in &node.action_clients {
            if !endpoint.name.is_empty() {
                action_clients
                    .entry(endpoint.name.clone())
                    .or_default()
                    .insert(node.full_name.clone());
            }
        }
    }

    let mut all_topics: BTreeSet<String> = publishers_by_topic.keys().cloned().collect();
    all_topics.extend(subscribers_by_topic.keys().cloned());

    let mut topics = Vec::new();
    let mut no_subscriber_topics = Vec::new();
    let mut no_publisher_topics = Vec::new();
    let mut tf_warnings = Vec::new();
    let mut adjacency: Adjacency = BTreeMap::new();

    for topic in &all_topics {
        let empty = BTreeSet::new();
        let pubs = publishers_by_topic.get(topic).unwrap_or(&empty);
        let subs = subscribers_by_topic.get(topic).unwrap_or(&empty);

        topics.push(TopicEntry {
            topic: topic.clone(),
            publishers: pubs.iter().cloned().collect(),
            subscribers: subs.iter().cloned().collect(),
            publisher_count: pubs.len(),
            subscriber_count: subs.len(),
        });

        if !pubs.is_empty() && subs.is_empty() {
            no_subscriber_topics.push(topic.clone());
        }
        if pubs.is_empty() && !subs.is_empty() {
            no_publisher_topics.push(topic.clone());
        }
        if (topic == "/tf" || topic == "/tf_static") && pubs.len() > 1 {
            tf_warnings.push(format!("Multiple publishers detected on {topic}"));
        }

        for publisher in pubs {
            for subscriber in subs {
                if publisher != subscriber {
                    adjacency
                        .entry(publisher.clone())
                        .or_default()
                        .insert(subscriber.clone());
                }
            }
        }
    }

    let duplicate_node_names: Vec<DuplicateNode> = name_counts
        .iter()
        .filter(|(_, &count)| count > 1)
        .map(|(node, &count)| DuplicateNode {
            node: node.clone(),
            count,
        })
        .collect();

    let (service_edges, missing_service_servers) =
        service_relations(&service_servers, &service_clients);
    let (action_edges, missing_action_servers) =
        action_relations(&action_servers, &action_clients);

    let graph_nodes: BTreeSet<String> = nodes.iter().map(|node| node.full_name.clone()).collect();
    let circular_dependencies = find_cycles(&adjacency, &graph_nodes);
    let single_points_of_failure = single_points_of_failure(&adjacency, &graph_nodes);

    let misinitialized_processes: Vec<MisinitializedProcess> = processes
        .iter()
        .filter(|proc| {
            proc.is_ros
                && proc.ros_domain_id == domain_id
                && !proc.node_name.is_empty()
                && !base_names.contains(&proc.node_name)
        })
        .map(|proc| MisinitializedProcess {
            pid: proc.pid,
            node_name: proc.node_name.clone(),
            executable: proc.executable.clone(),
            workspace_origin: proc.workspace_origin.clone(),
        })
        .collect();

    GraphModel {
        domain_id,
        error: domain.error,
        nodes,
        node_to_pid,
        topics,
        topic_qos: domain.topic_qos,
        publishers_without_subscribers: no_subscriber_topics,
        subscribers_without_publishers: no_publisher_topics,
        missing_service_servers,
        missing_action_servers,
        service_edges,
        action_edges,
        isolated_nodes,
        circular_dependencies,
        single_points_of_failure,
        duplicate_node_names,
        misinitialized_processes,
        tf_warnings,
        role_summary,
    }
}

fn service_relations(
    servers: &BTreeMap<String, BTreeSet<String>>,
    clients: &BTreeMap<String, BTreeSet<String>>,
) -> (Vec<ServiceEdge>, Vec<MissingServiceServer>) {
    let mut names: BTreeSet<&String> = servers.keys().collect();
    names.extend(clients.keys());

    let mut edges = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        let empty = BTreeSet::new();
        let server_set = servers.get(name).unwrap_or(&empty);
        let client_set = clients.get(name).unwrap_or(&empty);
        if server_set.is_empty() && !client_set.is_empty() {
            missing.push(MissingServiceServer {
                service: name.clone(),
                clients: client_set.iter().cloned().collect(),
            });
        }
        for client in client_set {
            for server in server_set {
                edges.push(ServiceEdge {
                    service: name.clone(),
                    client_node: client.clone(),
                    server_node: server.clone(),
                });
            }
        }
    }
    (edges, missing)
}

fn action_relations(
    servers: &BTreeMap<String, BTreeSet<String>>,
    clients: &BTreeMap<String, BTreeSet<String>>,
) -> (Vec<ActionEdge>, Vec<MissingActionServer>) {
    let mut names: BTreeSet<&String> = servers.keys().collect();
    names.extend(clients.keys());

    let mut edges = Vec::new();
    let mut missing = Vec::new();
    for name in names {
        let empty = BTreeSet::new();
        let server_set = servers.get(name).unwrap_or(&empty);
        let client_set = clients.get(name).unwrap_or(&empty);
        if server_set.is_empty() && !client_set.is_empty() {
            missing.push(MissingActionServer {
                action: name.clone(),
                clients: client_set.iter().cloned().collect(),
            });
        }
        for client in client_set {
            for server in server_set {
                edges.push(ActionEdge {
                    action: name.clone(),
                    client_node: client.clone(),
                    server_node: server.clone(),
                });
            }
        }
    }
    (edges, missing)
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Cycle strings ("a -> b -> a") via iterative three-color DFS.
///
/// An explicit work stack keeps the walk safe on deep graphs; the path vector
/// mirrors the grey chain so a back edge can be rendered from its first
/// occurrence.
pub fn find_cycles(adjacency: &Adjacency, nodes: &BTreeSet<String>) -> Vec<String> {
    let empty = BTreeSet::new();
    let mut color: HashMap<String, Color> = HashMap::new();
    let mut cycles: BTreeSet<String> = BTreeSet::new();

    for start in nodes {
        if *color.get(start).unwrap_or(&Color::White) != Color::White {
            continue;
        }
        let mut stack: Vec<(String, std::collections::btree_set::Iter<'_, String>)> = Vec::new();
        let mut path: Vec<String> = Vec::new();

        color.insert(start.clone(), Color::Grey);
        path.push(start.clone());
        stack.push((start.clone(), adjacency.get(start).unwrap_or(&empty).iter()));

        while !stack.is_empty() {
            let next = stack
                .last_mut()
                .and_then(|(_, children)| children.next().cloned());
            match next {
                Some(child) => match color.get(&child).copied().unwrap_or(Color::White) {
                    Color::White => {
                        color.insert(child.clone(), Color::Grey);
                        path.push(child.clone());
                        let children = adjacency.get(&child).unwrap_or(&empty).iter();
                        stack.push((child, children));
                    }
                    Color::Grey => {
                        if let Some(idx) = path.iter().rposition(|node| *node == child) {
                            let mut cycle: Vec<&str> =
                                path[idx..].iter().map(String::as_str).collect();
                            cycle.push(&child);
                            cycles.insert(cycle.join(" -> "));
                        }
                    }
                    Color::Black => {}
                },
                None => {
                    let (node, _) = stack.pop().unwrap();
                    path.pop();
                    color.insert(node, Color::Black);
                }
            }
        }
    }
    cycles.into_iter().collect()
}

/// Distinct nodes reachable downstream of `node` through topic edges.
pub fn downstream_reach(adjacency: &Adjacency, node: &str) -> HashSet<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<&str> = vec![node];
    while let Some(current) = queue.pop() {
        if let Some(children) = adjacency.get(current) {
            for child in children {
                if visited.insert(child.clone()) {
                    queue.push(child);
                }
            }
        }
    }
    visited
}

/// Top 10 nodes by downstream reach, qualifying at reach >= 3.
fn single_points_of_failure(adjacency: &Adjacency, nodes: &BTreeSet<String>) -> Vec<ImpactScore> {
    let mut critical: Vec<ImpactScore> = nodes
        .iter()
        .filter_map(|node| {
            let reach = downstream_reach(adjacency, node).len();
            (reach >= 3).then(|| ImpactScore {
                node: node.clone(),
                downstream_count: reach,
            })
        })
        .collect();
    critical.sort_by(|a, b| {
        b.downstream_count
            .cmp(&a.downstream_count)
            .then_with(|| a.node.cmp(&b.node))
    });
    critical.truncate(10);
    critical
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency_of(edges: &[(&str, &str)]) -> Adjacency {
        let mut adjacency = Adjacency::new();
        for (from, to) in edges {
            adjacency
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string());
        }
        adjacency
    }

    fn node_set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_find_cycles_simple_loop() {
        let adjacency = adjacency_of(&[("/a", "/b"), ("/b", "/c"), ("/c", "/a")]);
        let cycles = find_cycles(&adjacency, &node_set(&["/a", "/b", "/c"]));
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].contains("->"));
        // Cycle closes on its starting node.
        let parts: Vec<&str> = cycles[0].split(" -> ").collect();
        assert_eq!(parts.first(), parts.last());
    }

    #[test]
    fn test_find_cycles_none_on_dag() {
        let adjacency = adjacency_of(&[("/a", "/b"), ("/a", "/c"), ("/b", "/c")]);
        assert!(find_cycles(&adjacency, &node_set(&["/a", "/b", "/c"])).is_empty());
    }

    #[test]
    fn test_find_cycles_self_loop() {
        let adjacency = adjacency_of(&[("/a", "/a")]);
        let cycles = find_cycles(&adjacency, &node_set(&["/a"]));
        assert_eq!(cycles, vec!["/a -> /a".to_string()]);
    }

    #[test]
    fn test_find_cycles_survives_deep_chains() {
        // A linear chain thousands of nodes long must not blow the stack.
        let mut adjacency = Adjacency::new();
        let mut nodes = BTreeSet::new();
        for i in 0..5000 {
            let from = format!("/n{i:05}");
            let to = format!("/n{:05}", i + 1);
            adjacency.entry(from.clone()).or_default().insert(to.clone());
            nodes.insert(from);
            nodes.insert(to);
        }
        assert!(find_cycles(&adjacency, &nodes).is_empty());
    }

    #[test]
    fn test_downstream_reach() {
        let adjacency = adjacency_of(&[("/a", "/b"), ("/b", "/c"), ("/b", "/d")]);
        let reach = downstream_reach(&adjacency, "/a");
        assert_eq!(reach.len(), 3);
        assert!(reach.contains("/d"));
        assert!(downstream_reach(&adjacency, "/c").is_empty());
    }

    #[test]
    fn test_single_points_of_failure_threshold() {
        let adjacency = adjacency_of(&[("/a", "/b"), ("/b", "/c"), ("/b", "/d")]);
        let nodes = node_set(&["/a", "/b", "/c", "/d"]);
        let spof = single_points_of_failure(&adjacency, &nodes);
        assert_eq!(spof.len(), 1);
        assert_eq!(spof[0].node, "/a");
        assert_eq!(spof[0].downstream_count, 3);
    }
}
