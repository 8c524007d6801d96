//! Host system snapshot: CPU, memory, disk, GPU, USB/serial/CAN, network.
//!
//! CPU usage is a delta between successive `/proc/stat` reads, so the first
//! collect reports 0. Hardware probes shell out to their usual tools and
//! degrade to empty arrays when a tool is missing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::Networks;

use crate::core::executor::CommandRunner;
use crate::core::process::procfs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_kb: u64,
    pub used_kb: u64,
    pub available_kb: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub utilization_percent: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub is_up: bool,
    pub is_running: bool,
    pub addresses: Vec<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub gpus: Vec<GpuInfo>,
    pub usb_devices: Vec<String>,
    pub serial_ports: Vec<String>,
    pub can_interfaces: Vec<String>,
    pub network_interfaces: Vec<NetworkInterface>,
}

pub struct SystemMonitor {
    runner: Arc<dyn CommandRunner>,
    proc_root: PathBuf,
    /// When false, the local-hardware surfaces (statvfs, /dev scan, interface
    /// enumeration) return defaults. Synthetic environments set this off so
    /// snapshots stay deterministic.
    probe_hardware: bool,
    prev_cpu_total: u64,
    prev_cpu_idle: u64,
    first_cpu_sample: bool,
}

impl SystemMonitor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_probes(runner, PathBuf::from("/proc"), true)
    }

    pub fn with_probes(
        runner: Arc<dyn CommandRunner>,
        proc_root: PathBuf,
        probe_hardware: bool,
    ) -> Self {
        Self {
            runner,
            proc_root,
            probe_hardware,
            prev_cpu_total: 0,
            prev_cpu_idle: 0,
            first_cpu_sample: true,
        }
    }

    pub async fn collect_system(&mut self) -> SystemSnapshot {
        SystemSnapshot {
            cpu: self.cpu_snapshot(),
            memory: self.memory_snapshot(),
            disk: if self.probe_hardware {
                disk_snapshot()
            } else {
                DiskUsage::default()
            },
            gpus: self.gpu_snapshot().await,
            usb_devices: self.usb_devices().await,
            serial_ports: if self.probe_hardware {
                serial_ports(Path::new("/dev"))
            } else {
                Vec::new()
            },
            can_interfaces: self.can_interfaces().await,
            network_interfaces: if self.probe_hardware {
                network_interfaces()
            } else {
                Vec::new()
            },
        }
    }

    fn cpu_snapshot(&mut self) -> CpuUsage {
        let (total, idle) = procfs::cpu_times(&self.proc_root);
        let mut usage = 0.0;
        if !self.first_cpu_sample && total > self.prev_cpu_total {
            let delta_total = (total - self.prev_cpu_total) as f64;
            let delta_idle = idle.saturating_sub(self.prev_cpu_idle) as f64;
            usage = (100.0 * (1.0 - delta_idle / delta_total)).max(0.0);
        }
        self.prev_cpu_total = total;
        self.prev_cpu_idle = idle;
        self.first_cpu_sample = false;
        CpuUsage {
            usage_percent: usage,
        }
    }

    fn memory_snapshot(&self) -> MemoryUsage {
        let total = procfs::meminfo_value(&self.proc_root, "MemTotal");
        let available = procfs::meminfo_value(&self.proc_root, "MemAvailable");
        let used = total.saturating_sub(available);
        MemoryUsage {
            total_kb: total,
            used_kb: used,
            available_kb: available,
            used_percent: if total == 0 {
                0.0
            } else {
                100.0 * used as f64 / total as f64
            },
        }
    }

    async fn gpu_snapshot(&self) -> Vec<GpuInfo> {
        let outcome = self
            .runner
            .run(
                "nvidia-smi",
                &[
                    "--query-gpu=name,utilization.gpu,memory.used,memory.total".to_string(),
                    "--format=csv,noheader,nounits".to_string(),
                ],
                2_500,
                &[],
            )
            .await;
        if !outcome.success() {
            return Vec::new();
        }
        parse_nvidia_smi_csv(&outcome.stdout)
    }

    async fn usb_devices(&self) -> Vec<String> {
        let outcome = self.runner.run("lsusb", &[], 2_500, &[]).await;
        if !outcome.success() {
            return Vec::new();
        }
        outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    async fn can_interfaces(&self) -> Vec<String> {
        let args: Vec<String> = ["-details", "-brief", "link", "show", "type", "can"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcome = self.runner.run("ip", &args, 2_500, &[]).await;
        if !outcome.success() {
            return Vec::new();
        }
        outcome
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Last N kernel log lines, or the tool's error text when unavailable.
    pub async fn tail_dmesg(&self, lines: usize) -> String {
        let outcome = self
            .runner
            .run_shell(
                &format!("dmesg --ctime --color=never | tail -n {lines}"),
                4_000,
                &[],
            )
            .await;
        if outcome.success() {
            outcome.stdout
        } else if outcome.stderr.is_empty() {
            "dmesg is unavailable.".to_string()
        } else {
            outcome.stderr
        }
    }
}

fn disk_snapshot() -> DiskUsage {
    let Some((total, free)) = crate::platform::statvfs_root() else {
        return DiskUsage::default();
    };
    let used = total.saturating_sub(free);
    DiskUsage {
        total_bytes: total,
        used_bytes: used,
        free_bytes: free,
        used_percent: if total == 0 {
            0.0
        } else {
            100.0 * used as f64 / total as f64
        },
    }
}

/// Serial device nodes under `/dev` matching the usual tty prefixes.
pub fn serial_ports(dev_dir: &Path) -> Vec<String> {
    const PREFIXES: [&str; 4] = ["ttyUSB", "ttyACM", "ttyS", "ttyAMA"];
    let Ok(entries) = fs::read_dir(dev_dir) else {
        return Vec::new();
    };
    let mut ports: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
        .map(|name| format!("/dev/{name}"))
        .collect();
    ports.sort();
    ports
}

/// Interface enumeration via sysinfo, counters and link state from sysfs.
fn network_interfaces() -> Vec<NetworkInterface> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<NetworkInterface> = networks
        .iter()
        .map(|(name, data)| {
            let sys_base = PathBuf::from("/sys/class/net").join(name);
            let flags = read_iface_flags(&sys_base);
            let addresses = data
                .ip_networks()
                .iter()
                .map(|network| network.addr.to_string())
                .collect();
            NetworkInterface {
                name: name.clone(),
                is_up: flags & 0x1 != 0,
                is_running: flags & 0x40 != 0,
                addresses,
                rx_bytes: read_sys_counter(&sys_base, "rx_bytes").unwrap_or(data.total_received()),
                tx_bytes: read_sys_counter(&sys_base, "tx_bytes")
                    .unwrap_or(data.total_transmitted()),
            }
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}

fn read_iface_flags(sys_base: &Path) -> u32 {
    fs::read_to_string(sys_base.join("flags"))
        .ok()
        .and_then(|text| u32::from_str_radix(text.trim().trim_start_matches("0x"), 16).ok())
        .unwrap_or(0)
}

fn read_sys_counter(sys_base: &Path, name: &str) -> Option<u64> {
    fs::read_to_string(sys_base.join("statistics").join(name))
        .ok()
        .and_then(|text| text.trim().parse().ok())
}

/// nvidia-smi CSV rows: name, utilization %, memory used MB, memory total MB.
pub fn parse_nvidia_smi_csv(text: &str) -> Vec<GpuInfo> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 4 {
                return None;
            }
            Some(GpuInfo {
                name: parts[0].to_string(),
                utilization_percent: parts[1].parse().unwrap_or(0.0),
                memory_used_mb: parts[2].parse().unwrap_or(0.0),
                memory_total_mb: parts[3].parse().unwrap_or(0.0),
            })
        })
        .collect()
}
