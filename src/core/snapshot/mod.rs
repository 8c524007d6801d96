//! Canonical snapshot assembly and export.

pub mod diff;
pub mod session;
pub mod yaml;

pub use session::SessionRecorder;

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::telemetry::utc_now_iso;

/// Assembles the canonical snapshot object. serde_json objects keep sorted
/// key order, so the serialized form is stable.
#[allow(clippy::too_many_arguments)]
pub fn build_snapshot(
    processes: &Value,
    domains: &Value,
    graph: &Value,
    tf_nav2: &Value,
    system: &Value,
    health: &Value,
    parameters: &Value,
) -> Value {
    json!({
        "timestamp_utc": utc_now_iso(),
        "processes": processes,
        "domains": domains,
        "graph": graph,
        "tf_nav2": tf_nav2,
        "parameters": parameters,
        "system": system,
        "health": health,
    })
}

/// Writes `snapshots/roscope_snapshot_<stamp>.{json,yaml}` under `base_dir`.
pub fn export_snapshot(base_dir: &Path, snapshot: &Value, format: &str) -> Value {
    let ext = if format.trim().eq_ignore_ascii_case("yaml") {
        "yaml"
    } else {
        "json"
    };
    let dir = base_dir.join("snapshots");
    if let Err(err) = fs::create_dir_all(&dir) {
        return json!({
            "success": false,
            "error": format!("Failed to create snapshots directory: {err}"),
        });
    }

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("roscope_snapshot_{stamp}.{ext}"));
    let text = if ext == "yaml" {
        yaml::to_yaml(snapshot)
    } else {
        serde_json::to_string_pretty(snapshot).unwrap_or_default()
    };

    match fs::write(&path, text) {
        Ok(()) => json!({
            "success": true,
            "path": path.display().to_string(),
            "format": ext,
        }),
        Err(err) => json!({
            "success": false,
            "path": path.display().to_string(),
            "error": format!("Failed to open snapshot file for writing: {err}"),
        }),
    }
}
