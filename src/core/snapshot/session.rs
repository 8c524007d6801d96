//! Bounded session recorder.
//!
//! While active, every poll snapshot is appended (minus the log payload) to a
//! capped ring; the session can be exported as JSON or YAML.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};

use super::yaml;
use crate::core::telemetry::utc_now_iso;

const MAX_SAMPLES: usize = 5_000;
const DEFAULT_SESSION_NAME: &str = "runtime_session";

#[derive(Debug, Default)]
pub struct SessionRecorder {
    active: bool,
    session_name: String,
    started_utc: String,
    ended_utc: String,
    samples: std::collections::VecDeque<Value>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Enters the active state with a fresh sample ring.
    pub fn start(&mut self, name: &str) -> Value {
        self.active = true;
        self.session_name = if name.trim().is_empty() {
            DEFAULT_SESSION_NAME.to_string()
        } else {
            name.trim().to_string()
        };
        self.started_utc = utc_now_iso();
        self.ended_utc.clear();
        self.samples.clear();
        self.status()
    }

    pub fn stop(&mut self) -> Value {
        self.active = false;
        self.ended_utc = utc_now_iso();
        self.status()
    }

    /// Appends a snapshot when active; the log payload is stripped to keep
    /// samples small.
    pub fn record_sample(&mut self, snapshot: &Value) {
        if !self.active {
            return;
        }
        let mut compact = snapshot.clone();
        if let Some(map) = compact.as_object_mut() {
            map.remove("logs");
        }
        self.samples.push_back(compact);
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "active": self.active,
            "session_name": self.session_name,
            "started_utc": self.started_utc,
            "ended_utc": self.ended_utc,
            "sample_count": self.samples.len(),
        })
    }

    /// Writes `sessions/<name>_<ts>.{json,yaml}` under `base_dir`.
    pub fn export(&self, base_dir: &Path, format: &str) -> Value {
        if self.samples.is_empty() {
            return json!({
                "success": false,
                "error": "No recorded samples to export.",
            });
        }

        let ext = if format.trim().eq_ignore_ascii_case("yaml") {
            "yaml"
        } else {
            "json"
        };
        let sessions_dir: PathBuf = base_dir.join("sessions");
        if let Err(err) = fs::create_dir_all(&sessions_dir) {
            return json!({
                "success": false,
                "error": format!("Failed to create sessions directory: {err}"),
            });
        }

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = sessions_dir.join(format!("{}_{stamp}.{ext}", self.session_name));

        let payload = json!({
            "session_name": self.session_name,
            "started_utc": self.started_utc,
            "ended_utc": self.ended_utc,
            "samples": self.samples.iter().cloned().collect::<Vec<_>>(),
        });
        let text = if ext == "yaml" {
            yaml::to_yaml(&payload)
        } else {
            serde_json::to_string_pretty(&payload).unwrap_or_default()
        };

        match fs::write(&path, text) {
            Ok(()) => json!({
                "success": true,
                "path": path.display().to_string(),
                "sample_count": self.samples.len(),
            }),
            Err(err) => json!({
                "success": false,
                "error": format!("Failed to open session file: {err}"),
                "path": path.display().to_string(),
            }),
        }
    }
}
