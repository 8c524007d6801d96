//! ROS process classification and launch-context derivation.
//!
//! Decides whether a pid belongs to a ROS 2 runtime and extracts node name,
//! namespace, workspace origin, package and launch source from its command
//! line, executable path and environment.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

/// Library hints that mark a process as ROS without looking at `maps`.
const ROS_HINTS: [&str; 8] = [
    "ros2",
    "rclcpp",
    "rclpy",
    "librclcpp",
    "librclpy",
    "libfastrtps",
    "libcyclonedds",
    "libdds",
];

/// Shared-object names looked up in `/proc/<pid>/maps` as a last resort.
const MAPS_HINTS: [&str; 7] = [
    "librclcpp",
    "librclpy",
    "librmw",
    "libfastrtps",
    "libfastdds",
    "libcyclonedds",
    "libdds",
];

/// Cap on the `maps` read; the file can be enormous under many mappings.
const MAPS_READ_LIMIT: usize = 256 * 1024;

static NODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__node:=([^\s]+)").unwrap());
static NS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__ns:=([^\s]+)").unwrap());
static INSTALL_PKG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/install/([^/]+)/").unwrap());
static INSTALL_ORIGIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*/install/[^/]+)").unwrap());
static ROS_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ros2\s+run\s+([^\s]+)\s+").unwrap());

fn first_path_entry(value: &str) -> Option<&str> {
    value.split(':').find(|entry| !entry.is_empty())
}

/// Decides whether the process belongs to a ROS 2 runtime.
///
/// Cheap evidence first: environment markers, command-line markers, library
/// hints in the executable path or command line. Only when the shallow text
/// already smells like ROS does it fall back to a bounded read of `maps`.
pub fn is_ros_process(
    pid_dir: &Path,
    exe_path: &str,
    cmdline: &str,
    env: &BTreeMap<String, String>,
) -> bool {
    if env.contains_key("ROS_DOMAIN_ID")
        || env.contains_key("ROS_VERSION")
        || env.contains_key("AMENT_PREFIX_PATH")
        || env.contains_key("COLCON_PREFIX_PATH")
    {
        return true;
    }

    let cmdline_lower = cmdline.to_lowercase();
    if cmdline_lower.contains("--ros-args")
        || cmdline_lower.contains("__node:=")
        || cmdline_lower.contains("__ns:=")
        || cmdline_lower.contains("ros2 ")
    {
        return true;
    }

    let haystack = format!("{} {}", exe_path.to_lowercase(), cmdline_lower);
    if ROS_HINTS.iter().any(|hint| haystack.contains(hint)) {
        return true;
    }

    if !haystack.contains("ros")
        && !haystack.contains("rcl")
        && !haystack.contains("dds")
        && !haystack.contains("fast")
        && !haystack.contains("cyclone")
    {
        return false;
    }

    let Ok(mut file) = File::open(pid_dir.join("maps")) else {
        return false;
    };
    let mut chunk = vec![0u8; MAPS_READ_LIMIT];
    let read = file.read(&mut chunk).unwrap_or(0);
    chunk.truncate(read);
    let maps = String::from_utf8_lossy(&chunk).to_lowercase();
    MAPS_HINTS.iter().any(|hint| maps.contains(hint))
}

/// Node base name from a `__node:=<name>` remap token.
pub fn detect_node_name(cmdline: &str) -> String {
    NODE_RE
        .captures(cmdline)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// Namespace from a `__ns:=<ns>` remap token, "/" when absent.
pub fn detect_namespace(cmdline: &str) -> String {
    NS_RE
        .captures(cmdline)
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Workspace install prefix the executable was launched from.
///
/// Precedence: AMENT_PREFIX_PATH head, COLCON_PREFIX_PATH head,
/// `/opt/ros/<distro>` executable prefix, `.../install/<pkg>` path match.
pub fn detect_workspace_origin(exe_path: &str, env: &BTreeMap<String, String>) -> String {
    if let Some(ament) = env.get("AMENT_PREFIX_PATH").and_then(|v| first_path_entry(v)) {
        return ament.to_string();
    }
    if let Some(colcon) = env.get("COLCON_PREFIX_PATH").and_then(|v| first_path_entry(v)) {
        return colcon.to_string();
    }
    if exe_path.starts_with("/opt/ros/") {
        let parts: Vec<&str> = exe_path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 3 {
            return format!("/{}/{}/{}", parts[0], parts[1], parts[2]);
        }
    }
    INSTALL_ORIGIN_RE
        .captures(exe_path)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// Package name from the install path or a `ros2 run <pkg>` invocation.
pub fn detect_package(exe_path: &str, cmdline: &str) -> String {
    if let Some(caps) = INSTALL_PKG_RE.captures(exe_path) {
        return caps[1].to_string();
    }
    ROS_RUN_RE
        .captures(cmdline)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// First launch-file token on the command line.
pub fn detect_launch_source(cmdline: &str) -> String {
    cmdline
        .split_whitespace()
        .find(|token| {
            token.contains(".launch.py")
                || token.contains(".launch.xml")
                || token.contains(".launch.yaml")
                || token.contains(".launch.yml")
        })
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn env_with(key: &str) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(key.to_string(), "x".to_string());
        env
    }

    #[test]
    fn test_env_markers_classify_as_ros() {
        let dir = tempfile::tempdir().unwrap();
        for key in ["ROS_DOMAIN_ID", "ROS_VERSION", "AMENT_PREFIX_PATH", "COLCON_PREFIX_PATH"] {
            assert!(is_ros_process(dir.path(), "/usr/bin/app", "app", &env_with(key)));
        }
    }

    #[test]
    fn test_cmdline_markers_classify_as_ros() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        assert!(is_ros_process(dir.path(), "", "/x/talker --ros-args -r __node:=talker", &env));
        assert!(is_ros_process(dir.path(), "", "python3 -m thing __ns:=/robot", &env));
        assert!(is_ros_process(dir.path(), "", "ros2 launch demo demo.launch.py", &env));
    }

    #[test]
    fn test_plain_process_is_not_ros() {
        let dir = tempfile::tempdir().unwrap();
        let env = BTreeMap::new();
        assert!(!is_ros_process(dir.path(), "/usr/bin/firefox", "firefox", &env));
    }

    #[test]
    fn test_maps_fallback_requires_shallow_hint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("maps"),
            "7f0000000000-7f0000001000 r-xp 0 0:0 0 /usr/lib/librclcpp.so\n",
        )
        .unwrap();
        let env = BTreeMap::new();
        // "roscore_like" contains the "ros" shallow hint, so maps is consulted.
        assert!(is_ros_process(dir.path(), "/usr/bin/roscore_like", "roscore_like", &env));
        // No shallow hint at all: maps must not be read.
        assert!(!is_ros_process(dir.path(), "/usr/bin/editor", "editor", &env));
    }

    #[test]
    fn test_detect_node_and_namespace() {
        let cmdline = "/ws/install/nav/lib/nav/planner --ros-args -r __node:=planner -r __ns:=/robot1";
        assert_eq!(detect_node_name(cmdline), "planner");
        assert_eq!(detect_namespace(cmdline), "/robot1");
        assert_eq!(detect_namespace("bare"), "/");
    }

    #[test]
    fn test_detect_workspace_origin_precedence() {
        let mut env = BTreeMap::new();
        env.insert(
            "AMENT_PREFIX_PATH".to_string(),
            "/ws/install/nav:/opt/ros/humble".to_string(),
        );
        assert_eq!(detect_workspace_origin("/opt/ros/humble/bin/x", &env), "/ws/install/nav");

        let env = BTreeMap::new();
        assert_eq!(
            detect_workspace_origin("/opt/ros/humble/lib/demo/talker", &env),
            "/opt/ros/humble"
        );
        assert_eq!(
            detect_workspace_origin("/home/op/ws/install/nav/lib/nav/planner", &env),
            "/home/op/ws/install/nav"
        );
        assert_eq!(detect_workspace_origin("/usr/bin/bash", &env), "");
    }

    #[test]
    fn test_detect_package() {
        assert_eq!(detect_package("/ws/install/nav2_planner/lib/planner", ""), "nav2_planner");
        assert_eq!(detect_package("", "ros2 run demo_nodes_cpp talker"), "demo_nodes_cpp");
        assert_eq!(detect_package("/usr/bin/x", "x"), "");
    }

    #[test]
    fn test_detect_launch_source() {
        assert_eq!(
            detect_launch_source("python3 /opt/ros/humble/bin/ros2 launch nav nav.launch.py"),
            "nav.launch.py"
        );
        assert_eq!(detect_launch_source("./talker"), "");
    }
}
