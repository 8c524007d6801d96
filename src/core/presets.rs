//! Runtime preset persistence under `presets/<name>.json`.
//!
//! A preset captures the operator-facing engine configuration: selected
//! domain, watchdog toggle, expected profile and fleet targets. Malformed
//! files surface an error object and leave the in-memory state untouched.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::diagnostics::ExpectedProfile;
use crate::core::remote::FleetTarget;
use crate::core::telemetry::utc_now_iso;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetPayload {
    pub preset_name: String,
    #[serde(default)]
    pub selected_domain: String,
    #[serde(default)]
    pub watchdog_enabled: bool,
    #[serde(default)]
    pub expected_profile: ExpectedProfile,
    #[serde(default)]
    pub remote_targets: Vec<FleetTarget>,
    #[serde(default)]
    pub timestamp_utc: String,
}

fn preset_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join("presets").join(format!("{name}.json"))
}

fn normalized(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn preset_exists(base_dir: &Path, name: &str) -> bool {
    preset_path(base_dir, &normalized(name)).exists()
}

/// Writes the preset, creating `presets/` on demand.
pub fn save(base_dir: &Path, mut payload: PresetPayload) -> Value {
    payload.preset_name = normalized(&payload.preset_name);
    payload.timestamp_utc = utc_now_iso();
    let path = preset_path(base_dir, &payload.preset_name);

    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return json!({
                "success": false,
                "error": format!("Failed to create presets directory: {err}"),
                "path": path.display().to_string(),
            });
        }
    }

    let text = match serde_json::to_string_pretty(&payload) {
        Ok(text) => text,
        Err(err) => {
            return json!({
                "success": false,
                "error": format!("Failed to serialize preset: {err}"),
                "path": path.display().to_string(),
            });
        }
    };
    match fs::write(&path, text) {
        Ok(()) => json!({
            "success": true,
            "path": path.display().to_string(),
            "preset_name": payload.preset_name,
        }),
        Err(_) => json!({
            "success": false,
            "error": "Failed to open preset file for writing.",
            "path": path.display().to_string(),
        }),
    }
}

/// Loads a preset; the error variant is the ready-to-emit action result.
pub fn load(base_dir: &Path, name: &str) -> Result<PresetPayload, Value> {
    let preset = normalized(name);
    let path = preset_path(base_dir, &preset);

    let raw = fs::read_to_string(&path).map_err(|_| {
        json!({
            "success": false,
            "error": "Failed to read preset file.",
            "path": path.display().to_string(),
        })
    })?;
    let mut payload: PresetPayload = serde_json::from_str(&raw).map_err(|_| {
        json!({
            "success": false,
            "error": "Preset file is not a valid JSON object.",
            "path": path.display().to_string(),
        })
    })?;
    if payload.preset_name.trim().is_empty() {
        payload.preset_name = preset;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let payload = PresetPayload {
            preset_name: "bench".to_string(),
            selected_domain: "7".to_string(),
            watchdog_enabled: true,
            ..Default::default()
        };
        let saved = save(dir.path(), payload);
        assert_eq!(saved["success"], true);

        let loaded = load(dir.path(), "bench").unwrap();
        assert_eq!(loaded.preset_name, "bench");
        assert_eq!(loaded.selected_domain, "7");
        assert!(loaded.watchdog_enabled);
    }

    #[test]
    fn test_blank_name_becomes_default() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save(dir.path(), PresetPayload::default());
        assert_eq!(saved["preset_name"], "default");
        assert!(preset_exists(dir.path(), "  "));
    }

    #[test]
    fn test_missing_preset_is_an_error_object() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path(), "nope").unwrap_err();
        assert_eq!(err["success"], false);
        assert!(err["path"].as_str().unwrap().ends_with("nope.json"));
    }

    #[test]
    fn test_malformed_preset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("broken.json"), "[1, 2").unwrap();
        let err = load(dir.path(), "broken").unwrap_err();
        assert_eq!(err["success"], false);
    }
}
