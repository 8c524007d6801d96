//! External command execution with timeout, env overlay and captured output.
//!
//! Every external binary the engine drives (`ros2`, `ssh`, `nvidia-smi`,
//! `lsusb`, `ip`, `dmesg`, `ipcs`/`ipcrm`) goes through the [`CommandRunner`]
//! seam so probes can be scripted in tests.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::telemetry::Telemetry;

/// Result of one external command invocation.
///
/// OS-level spawn failures are folded into `timed_out = true` with a
/// human-readable stderr so callers only have one failure shape to handle.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Seam for spawning external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout_ms: u64,
        env: &[(String, String)],
    ) -> CommandOutcome;

    /// Wraps the command line in a login shell.
    async fn run_shell(
        &self,
        command_line: &str,
        timeout_ms: u64,
        env: &[(String, String)],
    ) -> CommandOutcome {
        self.run(
            "/bin/bash",
            &["-lc".to_string(), command_line.to_string()],
            timeout_ms,
            env,
        )
        .await
    }
}

/// Production command runner backed by `tokio::process`.
pub struct Executor {
    telemetry: Telemetry,
}

impl Executor {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }
}

#[async_trait]
impl CommandRunner for Executor {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout_ms: u64,
        env: &[(String, String)],
    ) -> CommandOutcome {
        let started = Instant::now();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        let mut outcome = CommandOutcome::default();
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                outcome.timed_out = true;
                outcome.stderr = format!("Failed to start process: {err}");
                self.telemetry.increment_counter("commands.start_failures", 1);
                self.telemetry.record_duration_ms(
                    "commands.duration_ms",
                    started.elapsed().as_millis() as u64,
                );
                return outcome;
            }
        };

        match timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await {
            Ok(Ok(output)) => {
                outcome.exit_code = output.status.code().unwrap_or(-1);
                outcome.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                outcome.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                self.telemetry.increment_counter("commands.count", 1);
                if outcome.exit_code != 0 {
                    self.telemetry.increment_counter("commands.non_zero_exit", 1);
                }
            }
            Ok(Err(err)) => {
                outcome.timed_out = true;
                outcome.stderr = format!("Failed to collect process output: {err}");
                self.telemetry.increment_counter("commands.start_failures", 1);
            }
            Err(_elapsed) => {
                // wait_with_output consumed the child; kill_on_drop reaps it.
                outcome.timed_out = true;
                outcome.stderr = "Command timed out.".to_string();
                self.telemetry.increment_counter("commands.timeouts", 1);
            }
        }

        self.telemetry.record_duration_ms(
            "commands.duration_ms",
            started.elapsed().as_millis() as u64,
        );
        outcome
    }
}

/// Builds the `ROS_DOMAIN_ID` overlay used by every `ros2` invocation.
pub fn ros_env(domain_id: &str) -> Vec<(String, String)> {
    vec![("ROS_DOMAIN_ID".to_string(), domain_id.to_string())]
}
