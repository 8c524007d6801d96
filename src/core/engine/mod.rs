//! Runtime engine: the serial scheduler tying every component together.
//!
//! One poll refreshes the process table, domain summaries, decimated ROS
//! probes, system state, health and diagnostics, then assembles a snapshot,
//! fingerprints it and decides between a full emit and a heartbeat. All work
//! happens on one task; callers talk to it through [`runtime::EngineRuntime`].

mod actions;
pub mod runtime;
mod watchdog;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::core::control::ControlActions;
use crate::core::diagnostics::{DiagnosticsEngine, EvalContext};
use crate::core::digest::sha1_hex;
use crate::core::executor::{CommandRunner, Executor};
use crate::core::health::{self, HealthReport};
use crate::core::presets;
use crate::core::process::{ProcessRecord, ProcessSampler};
use crate::core::remote::RemoteMonitor;
use crate::core::ros::{DomainInspection, DomainSummary, GraphModel, RosInspector, TfModel};
use crate::core::snapshot::SessionRecorder;
use crate::core::system::{SystemMonitor, SystemSnapshot};
use crate::core::telemetry::{epoch_ms, utc_now_iso, Telemetry};
use crate::platform::{KillSignaler, Signaler};

// Tabs the presentation layer reports in poll requests.
pub const TAB_PROCESSES: i64 = 0;
pub const TAB_DOMAINS: i64 = 1;
pub const TAB_NODES: i64 = 2;
pub const TAB_TF: i64 = 3;
pub const TAB_LOGS: i64 = 5;
pub const TAB_DIAGNOSTICS: i64 = 6;
pub const TAB_PERFORMANCE: i64 = 7;
pub const TAB_SAFETY: i64 = 8;
pub const TAB_FLEET: i64 = 10;

const SCOPE_ALL: &str = "All Processes";
const MIN_PROCESS_LIMIT: usize = 100;
const MAX_PROCESS_LIMIT: usize = 2_000;
const IDLE_POLLS_FOR_FAST_PATH: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1_000;
const FLEET_POLL_EVERY: u64 = 8;
const QUEUE_RESUME_EVERY: u64 = 6;
const QUEUE_RESUME_BUDGET: usize = 2;
const REMOTE_TIMEOUT_MS: u64 = 4_500;
const DMESG_LINES: usize = 300;

/// What the presentation layer asks for on every poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollRequest {
    pub ros_only: bool,
    pub process_query: String,
    pub process_scope: String,
    pub selected_domain: String,
    pub active_tab: i64,
    pub engineer_mode: bool,
    pub process_offset: usize,
    pub process_limit: usize,
    pub since_version: u64,
    pub if_none_match: String,
}

impl Default for PollRequest {
    fn default() -> Self {
        Self {
            ros_only: false,
            process_query: String::new(),
            process_scope: "ROS Only".to_string(),
            selected_domain: "0".to_string(),
            active_tab: TAB_PROCESSES,
            engineer_mode: true,
            process_offset: 0,
            process_limit: 400,
            since_version: 0,
            if_none_match: String::new(),
        }
    }
}

/// Engine construction knobs; the defaults match production use.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for presets/, state/, snapshots/, sessions/ and logs/.
    pub base_dir: PathBuf,
    pub proc_root: PathBuf,
    /// Off in synthetic environments: local hardware surfaces (disk, /dev,
    /// interface counters) report defaults instead of live values.
    pub probe_hardware: bool,
    pub min_poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    /// Interval hint handed to rate-based analyzers.
    pub poll_interval_hint_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            proc_root: PathBuf::from("/proc"),
            probe_hardware: true,
            min_poll_interval_ms: 500,
            max_backoff_ms: 12_000,
            poll_interval_hint_ms: 2_000,
        }
    }
}

pub struct RuntimeEngine {
    config: EngineConfig,
    telemetry: Telemetry,
    runner: Arc<dyn CommandRunner>,
    sampler: ProcessSampler,
    system: SystemMonitor,
    inspector: RosInspector,
    diagnostics: DiagnosticsEngine,
    remote: RemoteMonitor,
    control: ControlActions,
    recorder: SessionRecorder,

    last_request: PollRequest,
    poll_counter: u64,
    last_poll_ms: i64,

    last_all_processes: Vec<ProcessRecord>,
    last_summaries: Vec<DomainSummary>,
    last_details: Vec<DomainInspection>,
    last_graph: Option<GraphModel>,
    last_tf: Option<TfModel>,
    last_system: SystemSnapshot,
    last_health: HealthReport,
    last_logs: String,
    last_advanced: Value,
    last_fleet: Value,
    last_watchdog: Value,
    parameter_cache: BTreeMap<String, String>,

    sync_version: u64,
    last_fingerprint: String,
    consecutive_no_change: u32,
    idle_backoff_ms: u64,

    watchdog_enabled: bool,
    last_watchdog_action_ms: i64,
    last_watchdog_message: String,
    preset_name: String,

    previous_snapshot: Value,
    penultimate_snapshot: Value,
}

impl RuntimeEngine {
    /// Production engine over the real `/proc`, signals and executor.
    pub fn new(config: EngineConfig) -> Self {
        let telemetry = Telemetry::global();
        let runner: Arc<dyn CommandRunner> = Arc::new(Executor::new(telemetry.clone()));
        Self::with_parts(config, runner, Box::new(KillSignaler), telemetry)
    }

    /// Fully injectable constructor (scripted runner, recording signaler,
    /// synthetic proc root) used by tests and embedders.
    pub fn with_parts(
        config: EngineConfig,
        runner: Arc<dyn CommandRunner>,
        signaler: Box<dyn Signaler>,
        telemetry: Telemetry,
    ) -> Self {
        let sampler = ProcessSampler::with_roots(
            config.proc_root.clone(),
            signaler,
            telemetry.clone(),
        );
        let system = SystemMonitor::with_probes(
            runner.clone(),
            config.proc_root.clone(),
            config.probe_hardware,
        );
        let inspector = RosInspector::new(runner.clone());
        let diagnostics = DiagnosticsEngine::new(runner.clone());
        let remote = RemoteMonitor::new(
            runner.clone(),
            telemetry.clone(),
            &config.base_dir.join("state"),
        );
        let control = ControlActions::new(runner.clone());

        let mut engine = Self {
            config,
            telemetry,
            runner,
            sampler,
            system,
            inspector,
            diagnostics,
            remote,
            control,
            recorder: SessionRecorder::new(),
            last_request: PollRequest::default(),
            poll_counter: 0,
            last_poll_ms: 0,
            last_all_processes: Vec::new(),
            last_summaries: Vec::new(),
            last_details: Vec::new(),
            last_graph: None,
            last_tf: None,
            last_system: SystemSnapshot::default(),
            last_health: HealthReport::default(),
            last_logs: String::new(),
            last_advanced: Value::Null,
            last_fleet: Value::Null,
            last_watchdog: Value::Null,
            parameter_cache: BTreeMap::new(),
            sync_version: 0,
            last_fingerprint: String::new(),
            consecutive_no_change: 0,
            idle_backoff_ms: INITIAL_BACKOFF_MS,
            watchdog_enabled: false,
            last_watchdog_action_ms: 0,
            last_watchdog_message: String::new(),
            preset_name: "default".to_string(),
            previous_snapshot: Value::Null,
            penultimate_snapshot: Value::Null,
        };

        if presets::preset_exists(&engine.config.base_dir, "default") {
            if let Ok(payload) = presets::load(&engine.config.base_dir, "default") {
                engine.apply_preset(payload);
            }
        }
        let fleet_path = engine.config.base_dir.join("fleet_targets.json");
        if fleet_path.exists() {
            let result = engine.remote.load_targets_from_file(&fleet_path);
            debug!("fleet target load: {result}");
        }

        engine
    }

    pub fn last_request(&self) -> PollRequest {
        self.last_request.clone()
    }

    pub fn sync_version(&self) -> u64 {
        self.sync_version
    }

    pub fn remote_mut(&mut self) -> &mut RemoteMonitor {
        &mut self.remote
    }

    fn apply_preset(&mut self, payload: presets::PresetPayload) {
        self.diagnostics.set_expected_profile(payload.expected_profile);
        self.remote.set_targets(payload.remote_targets);
        self.watchdog_enabled = payload.watchdog_enabled;
        self.preset_name = payload.preset_name;
        info!("applied preset '{}'", self.preset_name);
    }

    fn scope_matches(scope: &str, record: &ProcessRecord) -> bool {
        if scope.is_empty() || scope == SCOPE_ALL {
            return true;
        }
        if scope == "ROS Only" {
            return record.is_ros;
        }
        if let Some(domain) = scope.strip_prefix("Domain ") {
            return record.is_ros && record.ros_domain_id == domain.trim();
        }
        true
    }

    fn filter_processes(&self, request: &PollRequest) -> Vec<ProcessRecord> {
        let query = request.process_query.trim().to_lowercase();
        self.last_all_processes
            .iter()
            .filter(|record| Self::scope_matches(&request.process_scope, record))
            .filter(|record| !request.ros_only || record.is_ros)
            .filter(|record| {
                if query.is_empty() {
                    return true;
                }
                format!(
                    "{} {} {} {}",
                    record.pid, record.name, record.executable, record.command_line
                )
                .to_lowercase()
                .contains(&query)
            })
            .cloned()
            .collect()
    }

    /// One full poll cycle; returns the snapshot (or heartbeat) to emit.
    pub async fn poll(&mut self, request: PollRequest) -> Value {
        let now = epoch_ms();
        let elapsed = (now - self.last_poll_ms) as u64;
        if self.last_poll_ms > 0 && elapsed < self.config.min_poll_interval_ms {
            sleep(Duration::from_millis(
                self.config.min_poll_interval_ms - elapsed,
            ))
            .await;
        }
        self.last_poll_ms = epoch_ms();
        self.last_request = request.clone();
        self.poll_counter += 1;

        let deep_processes = request.process_scope != SCOPE_ALL;
        let tab = request.active_tab;

        // Idle fast-path: skip the full /proc sweep on alternating polls when
        // nothing changed recently and nobody is looking at process data.
        let skip_sweep = self.consecutive_no_change >= IDLE_POLLS_FOR_FAST_PATH
            && tab != TAB_PROCESSES
            && tab != TAB_DOMAINS
            && self.poll_counter % 2 == 0
            && !self.last_all_processes.is_empty();
        if !skip_sweep {
            self.last_all_processes = self.sampler.list_processes(false, "", deep_processes);
            self.last_summaries = self.inspector.list_domains(&self.last_all_processes);
        }

        let filtered = self.filter_processes(&request);
        let total_filtered = filtered.len();
        let limit = request
            .process_limit
            .clamp(MIN_PROCESS_LIMIT, MAX_PROCESS_LIMIT);
        let offset = request.process_offset.min(total_filtered);
        let visible: Vec<&ProcessRecord> = filtered.iter().skip(offset).take(limit).collect();

        let known_domains: Vec<String> = self
            .last_summaries
            .iter()
            .map(|summary| summary.domain_id.clone())
            .collect();
        let selected_domain = if !request.selected_domain.is_empty()
            && known_domains.contains(&request.selected_domain)
        {
            request.selected_domain.clone()
        } else {
            known_domains.first().cloned().unwrap_or_else(|| "0".to_string())
        };

        self.refresh_domain_details(tab, &known_domains, &selected_domain)
            .await;

        // Heavy ROS probes are decimated; idle backoff widens the stride.
        let engineer = request.engineer_mode;
        let graph_tab = matches!(
            tab,
            TAB_NODES | TAB_DIAGNOSTICS | TAB_PERFORMANCE | TAB_SAFETY
        );
        let idle_stride_graph = if self.idle_backoff_ms >= 4_000 { 18 } else { 10 };
        let need_graph = (engineer && (graph_tab || self.poll_counter % 4 == 0))
            || (!engineer && self.poll_counter % idle_stride_graph == 0);
        let tf_tab = matches!(
            tab,
            TAB_TF | TAB_DIAGNOSTICS | TAB_PERFORMANCE | TAB_SAFETY
        );
        let idle_stride_tf = if self.idle_backoff_ms >= 4_000 { 15 } else { 5 };
        let need_tf = (engineer && (tf_tab || self.poll_counter % 5 == 0))
            || (!engineer && self.poll_counter % idle_stride_tf == 0);
        let need_logs = (engineer && (tab == TAB_LOGS || self.poll_counter % 4 == 0))
            || (!engineer && self.poll_counter % 8 == 0);

        let graph_stale = self
            .last_graph
            .as_ref()
            .map_or(true, |graph| graph.domain_id != selected_domain);
        if need_graph || graph_stale {
            self.last_graph = Some(
                self.inspector
                    .inspect_graph(&selected_domain, &self.last_all_processes)
                    .await,
            );
        }
        let tf_stale = self
            .last_tf
            .as_ref()
            .map_or(true, |tf| tf.domain_id != selected_domain);
        if need_tf || tf_stale {
            self.last_tf = Some(self.inspector.inspect_tf_nav2(&selected_domain).await);
        }

        self.last_system = self.system.collect_system().await;
        if need_logs || self.last_logs.is_empty() {
            self.last_logs = self.system.tail_dmesg(DMESG_LINES).await;
        }

        let graph = self.last_graph.clone().unwrap_or_default();
        let tf = self.last_tf.clone().unwrap_or_default();
        self.last_health = health::evaluate(&self.last_details, &graph, &tf);

        let deep_sampling = engineer && (graph_tab || tab == TAB_TF || self.poll_counter % 3 == 0);
        let ctx = EvalContext {
            domain_id: &selected_domain,
            processes: &self.last_all_processes,
            domains: &self.last_details,
            graph: &graph,
            tf: &tf,
            system: &self.last_system,
            health: &self.last_health,
            parameters: &self.parameter_cache,
            deep_sampling,
            poll_interval_ms: self.config.poll_interval_hint_ms,
        };
        self.last_advanced = self.diagnostics.evaluate(&ctx).await;

        if self.watchdog_enabled {
            self.apply_watchdog(&selected_domain).await;
        }

        if tab == TAB_FLEET || self.poll_counter % FLEET_POLL_EVERY == 0 {
            self.last_fleet = self.remote.collect_fleet_status(REMOTE_TIMEOUT_MS).await;
        }
        if self.poll_counter % QUEUE_RESUME_EVERY == 0 {
            let resumed = self
                .remote
                .resume_queued_actions(QUEUE_RESUME_BUDGET, REMOTE_TIMEOUT_MS)
                .await;
            debug!("offline queue resume: {resumed}");
        }

        let soft_warnings = self.last_advanced["soft_safety_boundary"]["warning_count"]
            .as_i64()
            .unwrap_or(0);
        self.last_watchdog = json!({
            "enabled": self.watchdog_enabled,
            "last_action_epoch_ms": self.last_watchdog_action_ms,
            "last_action_message": self.last_watchdog_message,
            "soft_boundary_warnings": soft_warnings,
        });

        let sections = self.build_sections(&visible, &graph, &tf);
        let section_hashes: BTreeMap<&str, String> = sections
            .iter()
            .map(|(name, value)| {
                let stripped = strip_volatile(value);
                (
                    *name,
                    sha1_hex(&serde_json::to_string(&stripped).unwrap_or_default()),
                )
            })
            .collect();
        let fingerprint = sha1_hex(
            &serde_json::to_string(&section_hashes).unwrap_or_default(),
        );

        let changed = fingerprint != self.last_fingerprint;
        if changed {
            self.sync_version += 1;
            self.consecutive_no_change = 0;
            self.idle_backoff_ms = INITIAL_BACKOFF_MS;
        } else {
            self.consecutive_no_change += 1;
            self.idle_backoff_ms = (self.idle_backoff_ms * 2).min(self.config.max_backoff_ms);
        }
        self.last_fingerprint = fingerprint.clone();

        self.telemetry.set_gauge("engine.sync_version", self.sync_version as f64);
        self.telemetry
            .set_gauge("engine.idle_backoff_ms", self.idle_backoff_ms as f64);

        let mut snapshot = serde_json::Map::new();
        snapshot.insert("timestamp_utc".to_string(), json!(utc_now_iso()));
        snapshot.insert("preset_name".to_string(), json!(self.preset_name));
        snapshot.insert("selected_domain".to_string(), json!(selected_domain));
        snapshot.insert("process_offset".to_string(), json!(offset));
        snapshot.insert("process_limit".to_string(), json!(limit));
        snapshot.insert("process_total_filtered".to_string(), json!(total_filtered));
        for (name, value) in &sections {
            let key = match *name {
                "tf" => "tf_nav2",
                other => other,
            };
            snapshot.insert(key.to_string(), value.clone());
        }
        snapshot.insert(
            "node_parameters".to_string(),
            serde_json::to_value(&self.parameter_cache).unwrap_or_default(),
        );
        snapshot.insert("sync_version".to_string(), json!(self.sync_version));
        snapshot.insert("etag".to_string(), json!(fingerprint));
        snapshot.insert("changed".to_string(), json!(changed));
        snapshot.insert(
            "changed_sections".to_string(),
            serde_json::to_value(&section_hashes).unwrap_or_default(),
        );
        snapshot.insert("idle_backoff_ms".to_string(), json!(self.idle_backoff_ms));
        snapshot.insert("heartbeat_only".to_string(), json!(false));
        let snapshot = Value::Object(snapshot);

        self.penultimate_snapshot =
            std::mem::replace(&mut self.previous_snapshot, snapshot.clone());
        self.recorder.record_sample(&snapshot);

        let heartbeat_eligible = !changed
            && (request.since_version == self.sync_version
                || request.if_none_match == fingerprint);
        if heartbeat_eligible {
            return json!({
                "timestamp_utc": utc_now_iso(),
                "heartbeat_only": true,
                "sync_version": self.sync_version,
                "etag": fingerprint,
                "changed": false,
                "changed_sections": section_hashes,
                "idle_backoff_ms": self.idle_backoff_ms,
                "selected_domain": selected_domain,
                "preset_name": self.preset_name,
                "process_total_filtered": total_filtered,
            });
        }
        snapshot
    }

    async fn refresh_domain_details(
        &mut self,
        tab: i64,
        known_domains: &[String],
        selected_domain: &str,
    ) {
        let refresh_all =
            tab == TAB_DOMAINS || self.poll_counter % 4 == 0 || self.last_details.is_empty();
        let refresh_selected = tab == TAB_NODES || tab == TAB_TF;

        let mut detail_by_domain: BTreeMap<String, DomainInspection> = self
            .last_details
            .drain(..)
            .map(|detail| (detail.domain_id.clone(), detail))
            .collect();

        if refresh_all {
            detail_by_domain.clear();
            for domain_id in known_domains {
                let detail = self
                    .inspector
                    .inspect_domain(domain_id, &self.last_all_processes, false)
                    .await;
                detail_by_domain.insert(domain_id.clone(), detail);
            }
        } else if refresh_selected {
            let detail = self
                .inspector
                .inspect_domain(selected_domain, &self.last_all_processes, false)
                .await;
            detail_by_domain.insert(selected_domain.to_string(), detail);
        }

        self.last_details = self
            .last_summaries
            .iter()
            .map(|summary| {
                let mut detail = detail_by_domain
                    .remove(&summary.domain_id)
                    .unwrap_or_else(|| DomainInspection {
                        domain_id: summary.domain_id.clone(),
                        ..Default::default()
                    });
                detail.ros_process_count = summary.ros_process_count;
                detail.domain_cpu_percent = summary.domain_cpu_percent;
                detail.domain_memory_percent = summary.domain_memory_percent;
                detail.workspace_count = summary.workspace_count;
                detail
            })
            .collect();
    }

    fn build_sections(
        &self,
        visible: &[&ProcessRecord],
        graph: &GraphModel,
        tf: &TfModel,
    ) -> Vec<(&'static str, Value)> {
        let mut tf_value = serde_json::to_value(tf).unwrap_or_default();
        if let Value::Object(map) = &mut tf_value {
            let runtime = map.get("runtime").cloned().unwrap_or(Value::Null);
            map.insert("nav2".to_string(), runtime);
        }

        vec![
            (
                "processes_visible",
                serde_json::to_value(visible).unwrap_or_default(),
            ),
            (
                "domain_summaries",
                serde_json::to_value(&self.last_summaries).unwrap_or_default(),
            ),
            (
                "domains",
                serde_json::to_value(&self.last_details).unwrap_or_default(),
            ),
            ("graph", serde_json::to_value(graph).unwrap_or_default()),
            ("tf", tf_value),
            (
                "system",
                serde_json::to_value(&self.last_system).unwrap_or_default(),
            ),
            (
                "health",
                serde_json::to_value(&self.last_health).unwrap_or_default(),
            ),
            ("advanced", self.last_advanced.clone()),
            ("fleet", self.last_fleet.clone()),
            ("session", self.recorder.status()),
            ("watchdog", self.last_watchdog.clone()),
            ("logs", json!(self.last_logs)),
        ]
    }

    /// Fetches parameters for one node and caches the dump on success.
    pub async fn fetch_node_parameters(&mut self, domain_id: &str, node: &str) -> Value {
        let result = self.inspector.fetch_node_parameters(domain_id, node).await;
        if result.success {
            self.parameter_cache
                .insert(node.to_string(), result.parameters.clone());
        }
        serde_json::to_value(&result).unwrap_or_default()
    }
}

/// Removes per-tick volatile fields before hashing: timestamps, the
/// always-appending correlation timeline and the session sample counter.
/// The emitted snapshot keeps them; only the digest ignores them.
fn strip_volatile(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| {
                    !matches!(
                        key.as_str(),
                        "timestamp_utc" | "epoch_ms" | "timeline" | "sample_count"
                    )
                })
                .map(|(key, item)| (key.clone(), strip_volatile(item)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_volatile).collect()),
        other => other.clone(),
    }
}
