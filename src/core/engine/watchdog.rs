//! Watchdog escalation state machine.
//!
//! While enabled, at most one action fires per 12-second window, evaluated in
//! priority order: zombie nodes trigger a domain restart, critical load an
//! emergency stop, repeated soft-safety warnings a logged escalation only.

use log::warn;
use serde_json::json;

use crate::core::health::HealthStatus;
use crate::core::telemetry::epoch_ms;

use super::RuntimeEngine;

const WATCHDOG_SPACING_MS: i64 = 12_000;
const CPU_EMERGENCY_PERCENT: f64 = 95.0;
const SOFT_WARNING_ESCALATION: i64 = 4;

impl RuntimeEngine {
    pub(super) async fn apply_watchdog(&mut self, selected_domain: &str) {
        let now = epoch_ms();
        if now - self.last_watchdog_action_ms < WATCHDOG_SPACING_MS {
            return;
        }

        let zombie_count = self.last_health.zombie_nodes.len();
        let cpu = self.last_system.cpu.usage_percent;
        let critical = self.last_health.status == HealthStatus::Critical;
        let soft_warnings = self.last_advanced["soft_safety_boundary"]["warning_count"]
            .as_i64()
            .unwrap_or(0);

        let mut action_taken = false;
        let mut message = String::new();
        if zombie_count > 0 {
            let result = self
                .control
                .restart_domain(&self.sampler, selected_domain, &self.last_all_processes)
                .await;
            action_taken = result["success"].as_bool().unwrap_or(false);
            message = format!(
                "Watchdog restart domain {selected_domain} ({zombie_count} zombies)"
            );
        } else if cpu > CPU_EMERGENCY_PERCENT || critical {
            let result = self
                .control
                .kill_all_ros(&self.sampler, &self.last_all_processes);
            action_taken = result["success"].as_bool().unwrap_or(false);
            message = "Watchdog emergency stop due to critical load".to_string();
        } else if soft_warnings >= SOFT_WARNING_ESCALATION {
            action_taken = true;
            message = "Watchdog warning escalation without kill action".to_string();
        }

        if action_taken {
            self.last_watchdog_action_ms = now;
            self.last_watchdog_message = message.clone();
            warn!("{message}");
            self.telemetry.record_event(
                "watchdog_action",
                json!({ "message": message, "domain_id": selected_domain }),
            );
        }
    }

    pub(super) fn set_watchdog_enabled(&mut self, enabled: bool) {
        self.watchdog_enabled = enabled;
    }
}
