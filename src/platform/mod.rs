//! Platform-specific primitives: signal delivery, filesystem stats, clock probes.
//!
//! Everything here degrades gracefully off Linux: signal operations report
//! failure and probes return safe defaults, so the engine keeps running with
//! empty data instead of erroring upwards.

/// Signals the engine is allowed to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

/// Seam for delivering signals to processes.
///
/// The production implementation calls `kill(2)`; tests substitute a recorder
/// to assert which pids were signaled.
pub trait Signaler: Send + Sync {
    /// Returns true when the signal was delivered.
    fn signal(&self, pid: i64, signal: Signal) -> bool;
}

/// Production signaler backed by `kill(2)`.
#[derive(Debug, Default)]
pub struct KillSignaler;

#[cfg(target_os = "linux")]
impl Signaler for KillSignaler {
    fn signal(&self, pid: i64, signal: Signal) -> bool {
        if pid <= 0 {
            return false;
        }
        let code = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        unsafe { libc::kill(pid as libc::pid_t, code) == 0 }
    }
}

#[cfg(not(target_os = "linux"))]
impl Signaler for KillSignaler {
    fn signal(&self, _pid: i64, _signal: Signal) -> bool {
        false
    }
}

/// Root filesystem usage in bytes: (total, free).
#[cfg(target_os = "linux")]
pub fn statvfs_root() -> Option<(u64, u64)> {
    let path = std::ffi::CString::new("/").ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let total = stat.f_blocks as u64 * stat.f_frsize as u64;
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    Some((total, free))
}

#[cfg(not(target_os = "linux"))]
pub fn statvfs_root() -> Option<(u64, u64)> {
    None
}

/// Kernel clock ticks per second (`_SC_CLK_TCK`), 100 when unavailable.
#[cfg(target_os = "linux")]
pub fn clock_ticks_per_second() -> i64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks
    } else {
        100
    }
}

#[cfg(not(target_os = "linux"))]
pub fn clock_ticks_per_second() -> i64 {
    100
}

/// Online CPU count (`_SC_NPROCESSORS_ONLN`), at least 1.
#[cfg(target_os = "linux")]
pub fn online_cpu_count() -> usize {
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count > 0 {
        count as usize
    } else {
        1
    }
}

#[cfg(not(target_os = "linux"))]
pub fn online_cpu_count() -> usize {
    1
}
