//! Process-wide telemetry registry.
//!
//! Counters, gauges, duration statistics, a bounded event ring and a
//! request-rate window, all behind one mutex. Components receive a cloned
//! `Telemetry` handle at construction; `Telemetry::global()` exists as a
//! convenience for the binary entry point.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, RoscopeError};

const MAX_EVENTS: usize = 1500;
const MAX_REQUEST_SAMPLES: usize = 2400;
const REQUEST_WINDOW_MS: i64 = 60_000;

static GLOBAL: Lazy<Telemetry> = Lazy::new(Telemetry::new);

/// Rolling duration statistics for one key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Default)]
struct TelemetryInner {
    counters: BTreeMap<String, i64>,
    gauges: BTreeMap<String, f64>,
    durations: BTreeMap<String, DurationStats>,
    events: VecDeque<Value>,
    request_times_ms: VecDeque<i64>,
}

impl TelemetryInner {
    fn trim_events(&mut self) {
        while self.events.len() > MAX_EVENTS {
            self.events.pop_front();
        }
    }

    fn trim_request_times(&mut self, now_ms: i64) {
        while self.request_times_ms.len() > MAX_REQUEST_SAMPLES {
            self.request_times_ms.pop_front();
        }
        let cutoff = now_ms - REQUEST_WINDOW_MS;
        while self
            .request_times_ms
            .front()
            .is_some_and(|&sample| sample < cutoff)
        {
            self.request_times_ms.pop_front();
        }
    }
}

/// Cloneable handle to the shared telemetry registry.
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Arc<Mutex<TelemetryInner>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry instance.
    pub fn global() -> Telemetry {
        GLOBAL.clone()
    }

    pub fn increment_counter(&self, key: &str, delta: i64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counters.entry(key.to_string()).or_insert(0) += delta;
    }

    pub fn set_gauge(&self, key: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.gauges.insert(key.to_string(), value);
    }

    pub fn record_duration_ms(&self, key: &str, duration_ms: u64) {
        let mut inner = self.inner.lock().unwrap();
        let stats = inner.durations.entry(key.to_string()).or_default();
        stats.count += 1;
        stats.total_ms += duration_ms;
        stats.max_ms = stats.max_ms.max(duration_ms);
        stats.avg_ms = stats.total_ms as f64 / stats.count as f64;
    }

    pub fn record_event(&self, event_type: &str, payload: Value) {
        let mut row = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                if !other.is_null() {
                    map.insert("payload".to_string(), other);
                }
                map
            }
        };
        row.insert("type".to_string(), json!(event_type));
        row.insert("timestamp_utc".to_string(), json!(utc_now_iso()));
        row.insert("epoch_ms".to_string(), json!(epoch_ms()));

        let mut inner = self.inner.lock().unwrap();
        inner.events.push_back(Value::Object(row));
        inner.trim_events();
    }

    /// Marks one outbound request for the requests-per-minute window.
    pub fn record_request(&self) {
        let now = epoch_ms();
        let mut inner = self.inner.lock().unwrap();
        inner.request_times_ms.push_back(now);
        inner.trim_request_times(now);
    }

    pub fn set_queue_size(&self, name: &str, size: usize) {
        self.set_gauge(&format!("queue.{name}"), size as f64);
    }

    pub fn counter(&self, key: &str) -> i64 {
        let inner = self.inner.lock().unwrap();
        inner.counters.get(key).copied().unwrap_or(0)
    }

    pub fn gauge(&self, key: &str) -> Option<f64> {
        let inner = self.inner.lock().unwrap();
        inner.gauges.get(key).copied()
    }

    /// Serializes the full registry state; reads copy, writers are never held up.
    pub fn snapshot(&self) -> Value {
        let mut inner = self.inner.lock().unwrap();
        inner.trim_request_times(epoch_ms());
        json!({
            "counters": inner.counters,
            "gauges": inner.gauges,
            "durations": inner.durations,
            "events": inner.events.iter().cloned().collect::<Vec<_>>(),
            "requests_per_minute": inner.request_times_ms.len(),
            "timestamp_utc": utc_now_iso(),
        })
    }

    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let payload = self.snapshot();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(path, text).map_err(|err| {
            RoscopeError::Telemetry(format!("failed to write {}: {err}", path.display()))
        })
    }
}

/// Current UTC time, ISO-8601 with seconds precision.
pub fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}
