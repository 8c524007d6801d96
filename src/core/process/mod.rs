//! Incremental process sampler.
//!
//! Maintains a pid index over `/proc` with a round-robin update ring so each
//! tick does a bounded amount of file I/O regardless of how many processes
//! the host runs. CPU percentages come from per-pid jiffie deltas against the
//! system total; heavy details (environ, cgroup, fd counts) are prefetched
//! only for the top consumers and held in a bounded LRU.

mod classify;
pub(crate) mod procfs;

pub use classify::is_ros_process;
pub use procfs::{parse_stat, ProcStat};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::telemetry::Telemetry;
use crate::platform::{KillSignaler, Signal, Signaler};

const TOP_K: usize = 20;
const HEAVY_PREFETCH_PER_TICK: usize = 4;
const MAX_HEAVY_CACHE: usize = 256;
const INITIAL_BUDGET: usize = 260;
const MIN_BUDGET: usize = 60;
const MAX_BUDGET: usize = 900;
const MAX_CMDLINE_LEN: usize = 320;

/// One live process as seen by the sampler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: i64,
    pub ppid: i64,
    pub name: String,
    pub state: String,
    pub executable: String,
    pub command_line: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default)]
    pub rss_kb: u64,
    pub threads: i64,
    pub uptime_seconds: f64,
    pub uptime_human: String,
    pub ros_domain_id: String,
    pub is_ros: bool,
    pub node_name: String,
    pub namespace: String,
    pub package: String,
    pub workspace_origin: String,
    pub launch_source: String,
    #[serde(skip)]
    pub last_seen_tick: u64,
}

/// Expensive per-pid details, cached for the top CPU/memory consumers only.
#[derive(Debug, Clone, Default)]
pub struct HeavyDetails {
    pub cmdline: String,
    pub env: std::collections::BTreeMap<String, String>,
    pub cgroup: String,
    pub open_fd_count: usize,
    pub thread_count: i64,
}

/// Page of process rows plus the total filtered count.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PagedProcesses {
    pub rows: Vec<ProcessRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    metric: f64,
    pid: i64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.metric.total_cmp(&other.metric).is_eq() && self.pid == other.pid
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.metric
            .total_cmp(&other.metric)
            .then_with(|| self.pid.cmp(&other.pid))
    }
}

pub struct ProcessSampler {
    proc_root: PathBuf,
    signaler: Box<dyn Signaler>,
    telemetry: Telemetry,

    index: HashMap<i64, ProcessRecord>,
    ring: Vec<i64>,
    cursor: usize,
    tick: u64,

    prev_proc_jiffies: HashMap<i64, u64>,
    prev_total_jiffies: u64,
    first_cpu_sample: bool,
    clock_ticks: i64,
    cpu_cores: usize,
    mem_total_kb: u64,
    tick_total_jiffies: u64,
    tick_uptime_seconds: f64,

    heavy: HashMap<i64, HeavyDetails>,
    heavy_lru: VecDeque<i64>,
    budget: usize,
}

impl ProcessSampler {
    pub fn new(telemetry: Telemetry) -> Self {
        Self::with_roots(PathBuf::from("/proc"), Box::new(KillSignaler), telemetry)
    }

    /// Builds a sampler over an arbitrary proc root and signaler (test seam).
    pub fn with_roots(
        proc_root: PathBuf,
        signaler: Box<dyn Signaler>,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            proc_root,
            signaler,
            telemetry,
            index: HashMap::new(),
            ring: Vec::new(),
            cursor: 0,
            tick: 0,
            prev_proc_jiffies: HashMap::new(),
            prev_total_jiffies: 0,
            first_cpu_sample: true,
            clock_ticks: crate::platform::clock_ticks_per_second(),
            cpu_cores: crate::platform::online_cpu_count(),
            mem_total_kb: 0,
            tick_total_jiffies: 0,
            tick_uptime_seconds: 0.0,
            heavy: HashMap::new(),
            heavy_lru: VecDeque::new(),
            budget: INITIAL_BUDGET,
        }
    }

    pub fn mem_total_kb(&self) -> u64 {
        self.mem_total_kb
    }

    pub fn budget_per_tick(&self) -> usize {
        self.budget
    }

    pub fn heavy_details(&self, pid: i64) -> Option<&HeavyDetails> {
        self.heavy.get(&pid)
    }

    /// Pids currently held in the index, sorted.
    pub fn tracked_pids(&self) -> Vec<i64> {
        let mut pids: Vec<i64> = self.index.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// One incremental tick over `/proc`.
    pub fn refresh(&mut self, deep_ros_inspection: bool) {
        self.tick += 1;

        let current_total_jiffies = procfs::total_jiffies(&self.proc_root);
        self.mem_total_kb = procfs::mem_total_kb(&self.proc_root);
        self.tick_total_jiffies = current_total_jiffies;
        self.tick_uptime_seconds = procfs::system_uptime_seconds(&self.proc_root);

        let current_pids = procfs::list_pids(&self.proc_root);
        for &pid in &current_pids {
            match self.index.get_mut(&pid) {
                Some(record) => record.last_seen_tick = self.tick,
                None => {
                    let record = ProcessRecord {
                        pid,
                        namespace: "/".to_string(),
                        ros_domain_id: "0".to_string(),
                        last_seen_tick: self.tick,
                        ..Default::default()
                    };
                    self.index.insert(pid, record);
                    self.ring.push(pid);
                }
            }
        }

        let mut updated = 0;
        let mut scanned = 0;
        let ring_len = self.ring.len();
        while updated < self.budget && scanned < ring_len.max(1) && ring_len > 0 {
            if self.cursor >= self.ring.len() {
                self.cursor = 0;
            }
            let pid = self.ring[self.cursor];
            self.cursor += 1;
            scanned += 1;
            if !self.index.contains_key(&pid) {
                continue;
            }
            if self.collect_lite(pid, deep_ros_inspection) {
                updated += 1;
            }
        }

        // Purge pids that vanished from /proc, together with their shadow state.
        let dead: Vec<i64> = self
            .index
            .iter()
            .filter(|(_, record)| record.last_seen_tick != self.tick)
            .map(|(&pid, _)| pid)
            .collect();
        for pid in dead {
            self.index.remove(&pid);
            self.prev_proc_jiffies.remove(&pid);
            self.heavy.remove(&pid);
        }
        self.ring.retain(|pid| self.index.contains_key(pid));
        if self.cursor >= self.ring.len() {
            self.cursor = 0;
        }

        let top_cpu = self.top_k(|record| record.cpu_percent);
        let top_mem = self.top_k(|record| record.rss_kb as f64);
        self.prefetch_heavy(&top_cpu, &top_mem);

        let delta_total = current_total_jiffies.saturating_sub(self.prev_total_jiffies);
        self.prev_total_jiffies = current_total_jiffies;
        self.first_cpu_sample = false;

        if delta_total == 0 || updated < self.budget / 2 {
            self.budget = ((self.budget as f64 * 0.85) as usize).max(MIN_BUDGET);
        } else {
            self.budget = (self.budget + 12).min(MAX_BUDGET);
        }
    }

    fn collect_lite(&mut self, pid: i64, deep: bool) -> bool {
        let pid_dir = procfs::pid_path(&self.proc_root, pid);
        let Some(stat) = procfs::read_stat(&self.proc_root, pid) else {
            return false;
        };

        let record = self.index.entry(pid).or_default();
        record.pid = pid;
        record.name = stat.comm;
        record.state = stat.state;
        record.ppid = stat.ppid;
        record.threads = stat.threads;

        let proc_jiffies = stat.utime + stat.stime;
        let delta_total = self.tick_total_jiffies.saturating_sub(self.prev_total_jiffies);
        record.cpu_percent = match self.prev_proc_jiffies.get(&pid) {
            Some(&prev) if !self.first_cpu_sample && delta_total > 0 => {
                let delta_proc = proc_jiffies.saturating_sub(prev);
                (100.0 * delta_proc as f64 * self.cpu_cores as f64) / delta_total as f64
            }
            _ => 0.0,
        }
        .max(0.0);
        self.prev_proc_jiffies.insert(pid, proc_jiffies);

        let status = procfs::read_status(&pid_dir);
        record.rss_kb = procfs::vm_rss_kb(&status);
        record.memory_percent = memory_percent_kb(record.rss_kb, self.mem_total_kb);
        record.uptime_seconds =
            self.tick_uptime_seconds - (stat.starttime as f64 / self.clock_ticks as f64);
        record.uptime_human = uptime_string(record.uptime_seconds);

        if deep {
            let cmdline = procfs::read_cmdline(&pid_dir);
            record.command_line = cmdline.chars().take(MAX_CMDLINE_LEN).collect();
            record.executable = procfs::read_exe_path(&pid_dir);
            let env = procfs::read_environ(&pid_dir);
            record.ros_domain_id = env
                .get("ROS_DOMAIN_ID")
                .cloned()
                .unwrap_or_else(|| "0".to_string());
            record.is_ros =
                classify::is_ros_process(&pid_dir, &record.executable, &record.command_line, &env);
            record.node_name = classify::detect_node_name(&record.command_line);
            record.namespace = classify::detect_namespace(&record.command_line);
            record.workspace_origin = classify::detect_workspace_origin(&record.executable, &env);
            record.package = classify::detect_package(&record.executable, &record.command_line);
            record.launch_source = classify::detect_launch_source(&record.command_line);
        } else {
            record.command_line.clear();
            record.executable.clear();
            record.ros_domain_id = "0".to_string();
            record.is_ros = false;
            record.node_name.clear();
            record.namespace = "/".to_string();
            record.workspace_origin.clear();
            record.package.clear();
            record.launch_source.clear();
        }

        record.last_seen_tick = self.tick;
        true
    }

    /// Bounded min-heap selection of the K largest entries by metric.
    fn top_k(&self, metric: impl Fn(&ProcessRecord) -> f64) -> Vec<HeapEntry> {
        let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::with_capacity(TOP_K + 1);
        for (&pid, record) in &self.index {
            let entry = HeapEntry {
                metric: metric(record),
                pid,
            };
            if heap.len() < TOP_K {
                heap.push(Reverse(entry));
            } else if let Some(smallest) = heap.peek() {
                if entry.metric > smallest.0.metric {
                    heap.pop();
                    heap.push(Reverse(entry));
                }
            }
        }
        heap.into_iter().map(|Reverse(entry)| entry).collect()
    }

    fn prefetch_heavy(&mut self, top_cpu: &[HeapEntry], top_mem: &[HeapEntry]) {
        let mut candidates: HashSet<i64> = HashSet::new();
        candidates.extend(top_cpu.iter().map(|entry| entry.pid));
        candidates.extend(top_mem.iter().map(|entry| entry.pid));

        let mut fetched = 0;
        for pid in candidates {
            if fetched >= HEAVY_PREFETCH_PER_TICK {
                break;
            }
            if self.heavy.contains_key(&pid) || !self.index.contains_key(&pid) {
                continue;
            }
            let pid_dir = procfs::pid_path(&self.proc_root, pid);
            let status = procfs::read_status(&pid_dir);
            let details = HeavyDetails {
                cmdline: procfs::read_cmdline(&pid_dir),
                env: procfs::read_environ(&pid_dir),
                cgroup: procfs::read_cgroup(&pid_dir),
                open_fd_count: procfs::count_open_fds(&pid_dir),
                thread_count: procfs::thread_count(&status),
            };
            self.heavy.insert(pid, details);
            self.heavy_lru.push_back(pid);
            fetched += 1;
        }

        while self.heavy.len() > MAX_HEAVY_CACHE {
            let Some(victim) = self.heavy_lru.pop_front() else {
                break;
            };
            self.heavy.remove(&victim);
        }
    }

    /// Refreshes and returns all matching records sorted descending by CPU.
    pub fn list_processes(&mut self, ros_only: bool, query: &str, deep: bool) -> Vec<ProcessRecord> {
        let started = Instant::now();
        self.refresh(deep);

        let query_lower = query.trim().to_lowercase();
        let mut rows: Vec<ProcessRecord> = self
            .index
            .values()
            .filter(|record| record_matches(record, ros_only, &query_lower))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));

        self.telemetry.increment_counter("process.list_queries", 1);
        self.telemetry
            .set_gauge("process.last_result_size", rows.len() as f64);
        self.telemetry
            .set_gauge("process.budget_per_tick", self.budget as f64);
        self.telemetry
            .set_gauge("process.cache.heavy_size", self.heavy.len() as f64);
        self.telemetry
            .record_duration_ms("process.query_ms", started.elapsed().as_millis() as u64);
        rows
    }

    /// Paged listing. The pid-ordered path streams without copying or sorting
    /// the whole filtered set.
    pub fn list_processes_paged(
        &mut self,
        ros_only: bool,
        query: &str,
        deep: bool,
        offset: usize,
        limit: usize,
        sort_by_cpu: bool,
    ) -> PagedProcesses {
        let started = Instant::now();
        self.refresh(deep);

        let query_lower = query.trim().to_lowercase();
        let limit = limit.max(1);
        let mut out = PagedProcesses::default();

        if sort_by_cpu {
            let mut filtered: Vec<&ProcessRecord> = self
                .index
                .values()
                .filter(|record| record_matches(record, ros_only, &query_lower))
                .collect();
            out.total = filtered.len();
            filtered.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
            out.rows = filtered
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect();
        } else {
            let mut pids: Vec<i64> = self.index.keys().copied().collect();
            pids.sort_unstable();
            for pid in pids {
                let record = &self.index[&pid];
                if !record_matches(record, ros_only, &query_lower) {
                    continue;
                }
                if out.total >= offset && out.rows.len() < limit {
                    out.rows.push(record.clone());
                }
                out.total += 1;
            }
        }

        self.telemetry
            .increment_counter("process.list_paged_queries", 1);
        self.telemetry
            .set_gauge("process.last_result_size", out.rows.len() as f64);
        self.telemetry
            .set_gauge("process.last_total_filtered", out.total as f64);
        self.telemetry
            .record_duration_ms("process.query_ms", started.elapsed().as_millis() as u64);
        out
    }

    pub fn terminate(&self, pid: i64) -> bool {
        self.signaler.signal(pid, Signal::Term)
    }

    pub fn force_kill(&self, pid: i64) -> bool {
        self.signaler.signal(pid, Signal::Kill)
    }

    /// Signals every transitive descendant of `pid`, then `pid` itself.
    ///
    /// The parent relation is rebuilt from a single `/proc` scan and walked
    /// depth-first; returns false when any signal failed.
    pub fn kill_process_tree(&self, pid: i64, force: bool) -> bool {
        let signal = if force { Signal::Kill } else { Signal::Term };

        let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
        for candidate in procfs::list_pids(&self.proc_root) {
            if let Some(stat) = procfs::read_stat(&self.proc_root, candidate) {
                children_of.entry(stat.ppid).or_default().push(candidate);
            }
        }

        let mut descendants: Vec<i64> = Vec::new();
        let mut seen: HashSet<i64> = HashSet::new();
        let mut stack = vec![pid];
        while let Some(current) = stack.pop() {
            if let Some(children) = children_of.get(&current) {
                for &child in children {
                    if seen.insert(child) {
                        descendants.push(child);
                        stack.push(child);
                    }
                }
            }
        }

        let mut success = true;
        for child in descendants {
            if !self.signaler.signal(child, signal) {
                success = false;
            }
        }
        if !self.signaler.signal(pid, signal) {
            success = false;
        }
        success
    }

    pub fn filter_ros(processes: &[ProcessRecord]) -> Vec<ProcessRecord> {
        processes
            .iter()
            .filter(|record| record.is_ros)
            .cloned()
            .collect()
    }

    /// Sorted unique workspace origins across a process list.
    pub fn workspace_origins(processes: &[ProcessRecord]) -> Vec<String> {
        let mut origins: Vec<String> = processes
            .iter()
            .filter(|record| !record.workspace_origin.is_empty())
            .map(|record| record.workspace_origin.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        origins.sort();
        origins
    }
}

fn record_matches(record: &ProcessRecord, ros_only: bool, query_lower: &str) -> bool {
    if ros_only && !record.is_ros {
        return false;
    }
    if query_lower.is_empty() {
        return true;
    }
    let searchable = format!(
        "{} {} {} {}",
        record.pid, record.name, record.executable, record.command_line
    );
    searchable.to_lowercase().contains(query_lower)
}

pub fn memory_percent_kb(rss_kb: u64, mem_total_kb: u64) -> f64 {
    if mem_total_kb == 0 {
        return 0.0;
    }
    100.0 * rss_kb as f64 / mem_total_kb as f64
}

fn uptime_string(seconds: f64) -> String {
    if seconds < 0.0 {
        return "0s".to_string();
    }
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_string() {
        assert_eq!(uptime_string(-5.0), "0s");
        assert_eq!(uptime_string(42.0), "42s");
        assert_eq!(uptime_string(125.0), "2m 5s");
        assert_eq!(uptime_string(3725.0), "1h 2m 5s");
    }

    #[test]
    fn test_memory_percent() {
        assert_eq!(memory_percent_kb(512, 0), 0.0);
        assert_eq!(memory_percent_kb(512, 1024), 50.0);
    }

    #[test]
    fn test_record_matches_query_across_fields() {
        let record = ProcessRecord {
            pid: 321,
            name: "talker".to_string(),
            executable: "/opt/ros/humble/lib/demo/talker".to_string(),
            command_line: "talker --ros-args".to_string(),
            is_ros: true,
            ..Default::default()
        };
        assert!(record_matches(&record, false, "321"));
        assert!(record_matches(&record, false, "humble"));
        assert!(record_matches(&record, true, "talker"));
        assert!(!record_matches(&record, false, "listener"));

        let plain = ProcessRecord::default();
        assert!(!record_matches(&plain, true, ""));
    }
}
