//! Diagnostics engine scenarios through the full evaluate path.

use std::collections::BTreeMap;
use std::sync::Arc;

use roscope::core::diagnostics::{DiagnosticsEngine, EvalContext, ExpectedProfile};
use roscope::core::health::HealthReport;
use roscope::core::process::ProcessRecord;
use roscope::core::ros::types::{GraphModel, TfModel, TopicEntry};
use roscope::core::system::SystemSnapshot;

use super::support::ScriptedRunner;

fn graph_with_topic(topic: &str) -> GraphModel {
    GraphModel {
        topics: vec![TopicEntry {
            topic: topic.to_string(),
            publishers: vec!["/sensor".to_string()],
            subscribers: vec!["/consumer".to_string()],
            publisher_count: 1,
            subscriber_count: 1,
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_rate_history_is_a_bounded_window() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("topic hz", ScriptedRunner::ok("average rate: 10.000\n"));
    runner.on("topic bw", ScriptedRunner::fail("no bw"));
    let mut engine = DiagnosticsEngine::new(runner);

    let graph = graph_with_topic("/scan");
    let tf = TfModel::default();
    let system = SystemSnapshot::default();
    let health = HealthReport::default();
    let parameters = BTreeMap::new();

    for _ in 0..105 {
        let ctx = EvalContext {
            domain_id: "0",
            processes: &[],
            domains: &[],
            graph: &graph,
            tf: &tf,
            system: &system,
            health: &health,
            parameters: &parameters,
            deep_sampling: true,
            poll_interval_ms: 2_000,
        };
        engine.evaluate(&ctx).await;
    }

    let history = engine.topic_rate_history("/scan");
    assert_eq!(history.len(), 100);
    assert!(history.iter().all(|&hz| hz == 10.0));
}

#[tokio::test]
async fn test_dropped_topic_against_expected_profile() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.on("topic hz", ScriptedRunner::ok("average rate: 4.2\n"));
    runner.on("topic bw", ScriptedRunner::ok("2 MB/s\n"));
    let mut engine = DiagnosticsEngine::new(runner);

    let mut expected_hz = BTreeMap::new();
    expected_hz.insert("/scan".to_string(), 10.0);
    engine.set_expected_profile(ExpectedProfile {
        topic_expected_hz: expected_hz,
        ..Default::default()
    });

    let graph = graph_with_topic("/scan");
    let tf = TfModel::default();
    let system = SystemSnapshot::default();
    let health = HealthReport::default();
    let parameters = BTreeMap::new();
    let ctx = EvalContext {
        domain_id: "0",
        processes: &[],
        domains: &[],
        graph: &graph,
        tf: &tf,
        system: &system,
        health: &health,
        parameters: &parameters,
        deep_sampling: true,
        poll_interval_ms: 2_000,
    };
    let report = engine.evaluate(&ctx).await;

    // 4.2 < 0.6 * 10 so the topic counts as dropped, and the report bundle
    // carries every analyzer key plus the score.
    assert_eq!(
        report["topic_rate_analyzer"]["dropped_topics"],
        serde_json::json!(["/scan"])
    );
    assert_eq!(report["runtime_stability_score"], 95);
    for key in roscope::core::diagnostics::REPORT_KEYS {
        assert!(report.get(key).is_some(), "missing report {key}");
    }
}

#[tokio::test]
async fn test_leak_candidate_over_full_evaluate() {
    let runner = Arc::new(ScriptedRunner::new());
    let mut engine = DiagnosticsEngine::new(runner);

    let graph = GraphModel::default();
    let tf = TfModel::default();
    let system = SystemSnapshot::default();
    let health = HealthReport::default();
    let parameters = BTreeMap::new();

    let ramp = [1.0, 1.1, 1.2, 1.3, 1.5, 1.7, 2.0, 2.3, 2.7, 3.1];
    let mut report = serde_json::Value::Null;
    for memory_percent in ramp {
        let processes = vec![ProcessRecord {
            pid: 11,
            is_ros: true,
            node_name: "mapper".to_string(),
            memory_percent,
            ..Default::default()
        }];
        let ctx = EvalContext {
            domain_id: "0",
            processes: &processes,
            domains: &[],
            graph: &graph,
            tf: &tf,
            system: &system,
            health: &health,
            parameters: &parameters,
            deep_sampling: false,
            poll_interval_ms: 2_000,
        };
        report = engine.evaluate(&ctx).await;
    }

    let leaks = &report["memory_leak_detection"];
    assert_eq!(leaks["candidate_count"], 1);
    assert_eq!(leaks["leak_candidates"][0]["node"], "mapper");
    assert!(leaks["leak_candidates"][0]["slope"].as_f64().unwrap() > 0.03);
    assert!(leaks["leak_candidates"][0]["delta_percent"].as_f64().unwrap() > 1.5);
}
