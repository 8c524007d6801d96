//! Raw `/proc` readers and parsers.
//!
//! All readers are rooted at an injectable proc directory so tests can build
//! synthetic process trees. File-open failures are silent skips: entries
//! disappear mid-read all the time and the sampler must shrug that off.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Fields lifted from `/proc/<pid>/stat`.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub comm: String,
    pub state: String,
    pub ppid: i64,
    pub utime: u64,
    pub stime: u64,
    pub threads: i64,
    pub starttime: u64,
}

pub fn read_file(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

/// Lists the numeric entries of the proc root.
pub fn list_pids(proc_root: &Path) -> Vec<i64> {
    let Ok(entries) = fs::read_dir(proc_root) else {
        return Vec::new();
    };
    let mut pids = Vec::new();
    for entry in entries.flatten() {
        if let Some(name) = entry.file_name().to_str() {
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(pid) = name.parse::<i64>() {
                    pids.push(pid);
                }
            }
        }
    }
    pids
}

pub fn pid_path(proc_root: &Path, pid: i64) -> PathBuf {
    proc_root.join(pid.to_string())
}

/// Parses a `/proc/<pid>/stat` line. The comm field sits between the first
/// `(` and the last `)` and may itself contain spaces or parentheses.
pub fn parse_stat(content: &str) -> Option<ProcStat> {
    let start = content.find('(')?;
    let end = content.rfind(')')?;
    if end <= start {
        return None;
    }
    let comm: String = content[start + 1..end].chars().take(64).collect();
    let rest = content.get(end + 2..)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }
    Some(ProcStat {
        comm,
        state: fields[0].to_string(),
        ppid: fields[1].parse().ok()?,
        utime: fields[11].parse().unwrap_or(0),
        stime: fields[12].parse().unwrap_or(0),
        threads: fields[17].parse().unwrap_or(0),
        starttime: fields[19].parse().unwrap_or(0),
    })
}

pub fn read_stat(proc_root: &Path, pid: i64) -> Option<ProcStat> {
    let content = read_file(&pid_path(proc_root, pid).join("stat"));
    if content.is_empty() {
        return None;
    }
    parse_stat(&content)
}

/// Key/value view of `/proc/<pid>/status`.
pub fn read_status(pid_dir: &Path) -> BTreeMap<String, String> {
    let mut status = BTreeMap::new();
    for line in read_file(&pid_dir.join("status")).lines() {
        if let Some((key, value)) = line.split_once(':') {
            status.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    status
}

/// VmRSS in KiB from a parsed status map ("VmRSS:   1234 kB").
pub fn vm_rss_kb(status: &BTreeMap<String, String>) -> u64 {
    status
        .get("VmRSS")
        .and_then(|value| value.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
        .unwrap_or(0)
}

pub fn thread_count(status: &BTreeMap<String, String>) -> i64 {
    status
        .get("Threads")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// NUL-separated cmdline flattened to a space-separated string.
pub fn read_cmdline(pid_dir: &Path) -> String {
    let Ok(raw) = fs::read(pid_dir.join("cmdline")) else {
        return String::new();
    };
    let text: String = raw
        .iter()
        .map(|&b| if b == 0 { ' ' } else { b as char })
        .collect();
    text.trim().to_string()
}

/// NUL-separated KEY=VALUE environment entries.
pub fn read_environ(pid_dir: &Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let Ok(raw) = fs::read(pid_dir.join("environ")) else {
        return env;
    };
    for entry in raw.split(|&b| b == 0) {
        if entry.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(entry);
        if let Some((key, value)) = text.split_once('=') {
            if !key.is_empty() {
                env.insert(key.to_string(), value.to_string());
            }
        }
    }
    env
}

pub fn read_exe_path(pid_dir: &Path) -> String {
    fs::read_link(pid_dir.join("exe"))
        .map(|target| target.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn read_cgroup(pid_dir: &Path) -> String {
    let content = read_file(&pid_dir.join("cgroup"));
    content.chars().take(2048).collect()
}

pub fn count_open_fds(pid_dir: &Path) -> usize {
    fs::read_dir(pid_dir.join("fd"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Sum of all jiffie columns on the aggregate cpu line of `/proc/stat`.
pub fn total_jiffies(proc_root: &Path) -> u64 {
    let stat = read_file(&proc_root.join("stat"));
    let Some(first) = stat.lines().next() else {
        return 0;
    };
    let fields: Vec<&str> = first.split_whitespace().collect();
    if fields.len() < 8 {
        return 0;
    }
    fields[1..]
        .iter()
        .filter_map(|field| field.parse::<u64>().ok())
        .sum()
}

/// (total, idle) jiffies where idle includes iowait.
pub fn cpu_times(proc_root: &Path) -> (u64, u64) {
    let stat = read_file(&proc_root.join("stat"));
    let Some(first) = stat.lines().next() else {
        return (0, 0);
    };
    let fields: Vec<u64> = first
        .split_whitespace()
        .skip(1)
        .filter_map(|field| field.parse().ok())
        .collect();
    if fields.len() < 7 {
        return (0, 0);
    }
    let total = fields.iter().sum();
    let idle = fields[3] + fields[4];
    (total, idle)
}

pub fn mem_total_kb(proc_root: &Path) -> u64 {
    meminfo_value(proc_root, "MemTotal")
}

pub fn meminfo_value(proc_root: &Path, key: &str) -> u64 {
    for line in read_file(&proc_root.join("meminfo")).lines() {
        if let Some(rest) = line.strip_prefix(key) {
            if let Some(value) = rest.trim_start_matches(':').split_whitespace().next() {
                return value.parse().unwrap_or(0);
            }
        }
    }
    0
}

pub fn system_uptime_seconds(proc_root: &Path) -> f64 {
    read_file(&proc_root.join("uptime"))
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0.0)
}
