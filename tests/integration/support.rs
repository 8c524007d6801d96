//! Shared fixtures: a scripted command runner, a recording signaler and a
//! synthetic /proc builder.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use roscope::core::executor::{CommandOutcome, CommandRunner};
use roscope::platform::{Signal, Signaler};

/// Command runner that replays scripted outcomes.
///
/// Rules are matched by substring against `"<program> <args...>"`; each rule
/// holds a FIFO of outcomes, the last of which keeps repeating. Unmatched
/// commands fail with a non-zero exit.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, VecDeque<CommandOutcome>)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(stdout: &str) -> CommandOutcome {
        CommandOutcome {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    pub fn fail(stderr: &str) -> CommandOutcome {
        CommandOutcome {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    /// Registers a repeating outcome for commands containing `pattern`.
    pub fn on(&self, pattern: &str, outcome: CommandOutcome) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), VecDeque::from([outcome])));
    }

    /// Registers a sequence of outcomes; the final one repeats.
    pub fn on_sequence(&self, pattern: &str, outcomes: Vec<CommandOutcome>) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), outcomes.into()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count_containing(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout_ms: u64,
        _env: &[(String, String)],
    ) -> CommandOutcome {
        let line = format!("{program} {}", args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        for (pattern, outcomes) in rules.iter_mut() {
            if line.contains(pattern.as_str()) {
                return if outcomes.len() > 1 {
                    outcomes.pop_front().unwrap()
                } else {
                    outcomes.front().cloned().unwrap_or_default()
                };
            }
        }
        ScriptedRunner::fail("scripted runner: no rule for command")
    }
}

/// Signaler that records every delivered signal instead of killing anything.
#[derive(Default)]
pub struct RecordingSignaler {
    signals: Mutex<Vec<(i64, Signal)>>,
}

impl RecordingSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<(i64, Signal)> {
        self.signals.lock().unwrap().clone()
    }
}

impl Signaler for RecordingSignaler {
    fn signal(&self, pid: i64, signal: Signal) -> bool {
        self.signals.lock().unwrap().push((pid, signal));
        true
    }
}

/// Shared recorder handle usable as a `Box<dyn Signaler>` while the test
/// keeps a reading half.
pub struct SharedSignaler(pub std::sync::Arc<RecordingSignaler>);

impl Signaler for SharedSignaler {
    fn signal(&self, pid: i64, signal: Signal) -> bool {
        self.0.signal(pid, signal)
    }
}

/// Writes the global files of a synthetic proc root.
pub fn write_proc_globals(proc_root: &Path, total_jiffies_tail: &str) {
    fs::write(
        proc_root.join("stat"),
        format!("cpu  {total_jiffies_tail}\n"),
    )
    .unwrap();
    fs::write(
        proc_root.join("meminfo"),
        "MemTotal:       8388608 kB\nMemAvailable:   4194304 kB\n",
    )
    .unwrap();
    fs::write(proc_root.join("uptime"), "5000.00 9000.00\n").unwrap();
}

/// Adds one pid directory with stat/status/cmdline/environ files.
pub fn write_proc_pid(
    proc_root: &Path,
    pid: i64,
    ppid: i64,
    comm: &str,
    cmdline: &[&str],
    env: &[(&str, &str)],
) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("stat"),
        format!(
            "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194560 100 0 0 0 \
             10 5 0 0 20 0 2 0 1000 10000000 256 18446744073709551615 \
             1 1 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0\n"
        ),
    )
    .unwrap();
    fs::write(
        dir.join("status"),
        format!("Name:\t{comm}\nVmRSS:\t 1024 kB\nThreads:\t2\n"),
    )
    .unwrap();
    let mut cmdline_bytes: Vec<u8> = Vec::new();
    for token in cmdline {
        cmdline_bytes.extend_from_slice(token.as_bytes());
        cmdline_bytes.push(0);
    }
    fs::write(dir.join("cmdline"), cmdline_bytes).unwrap();
    if let Some(first) = cmdline.first() {
        let _ = std::os::unix::fs::symlink(first, dir.join("exe"));
    }
    let mut environ_bytes: Vec<u8> = Vec::new();
    for (key, value) in env {
        environ_bytes.extend_from_slice(format!("{key}={value}").as_bytes());
        environ_bytes.push(0);
    }
    fs::write(dir.join("environ"), environ_bytes).unwrap();
}

pub fn remove_proc_pid(proc_root: &Path, pid: i64) {
    let _ = fs::remove_dir_all(proc_root.join(pid.to_string()));
}
