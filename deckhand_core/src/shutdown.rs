//! Process-wide shutdown registry.
//!
//! Every process that reaches health is registered here; the drain sends
//! SIGTERM to each registered process group, waits out a grace window, and
//! SIGKILLs whatever is still alive. The drain runs at most once no matter
//! which trigger fires first (operator signal or normal exit), and a
//! failure to signal one process never prevents signalling the rest.

use crate::error::{DeckhandError, DeckhandResult};
use crate::supervise::ManagedProcess;
use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    pub name: String,
    pub pid: u32,
    pub pgid: i32,
}

pub struct ShutdownRegistry {
    entries: Mutex<Vec<RegisteredProcess>>,
    drained: AtomicBool,
    grace: Duration,
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::with_grace(Duration::from_secs(5))
    }

    /// Grace window between SIGTERM and the deferred SIGKILL.
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            drained: AtomicBool::new(false),
            grace,
        }
    }

    /// Append a healthy process. Called exactly once per process, by the
    /// supervisor, on the success path only.
    pub fn register(&self, proc: &ManagedProcess) {
        tracing::debug!("registering {} (pid {})", proc.name(), proc.pid());
        self.entries.lock().unwrap().push(RegisteredProcess {
            name: proc.name().to_string(),
            pid: proc.pid(),
            pgid: proc.pgid(),
        });
    }

    /// Snapshot of the registered processes.
    pub fn registered(&self) -> Vec<RegisteredProcess> {
        self.entries.lock().unwrap().clone()
    }

    /// Drain the registry: graceful-then-forceful termination of every
    /// registered process group. Subsequent calls are no-ops.
    pub fn shutdown_all(&self) {
        if self.drained.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries = std::mem::take(&mut *self.entries.lock().unwrap());
        if entries.is_empty() {
            return;
        }

        println!(
            "\n{} Shutting down {} process(es)...",
            "→".yellow(),
            entries.len()
        );
        for entry in &entries {
            send_term(entry.pid, entry.pgid);
            println!("  {} Sent SIGTERM to [{}]", "→".yellow(), entry.name);
        }

        // Grace window; leave early once everything is gone.
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            if entries.iter().all(|e| !is_alive(e.pid)) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for entry in &entries {
            // Liveness-guarded: a vanished pid, or one that now belongs to
            // somebody else, is left alone.
            if is_alive(entry.pid) {
                send_kill(entry.pid, entry.pgid);
                println!("  {} Killed [{}]", "✗".red(), entry.name);
            }
        }
    }
}

/// Hook the registry drain up to operator signals (SIGINT, SIGTERM,
/// SIGHUP). This is the single entry point signal handlers go through.
pub fn install_signal_handlers(registry: Arc<ShutdownRegistry>) -> DeckhandResult<()> {
    ctrlc::set_handler(move || {
        registry.shutdown_all();
        std::process::exit(130);
    })
    .map_err(|e| DeckhandError::Config(format!("failed to install signal handler: {}", e)))
}

#[cfg(unix)]
pub(crate) fn send_term(pid: u32, pgid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Negative pid reaches the whole group; fall back to the pid itself.
    if let Err(group_err) = kill(Pid::from_raw(-pgid), Signal::SIGTERM) {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!("could not signal pid {}: {} (group: {})", pid, e, group_err);
        }
    }
}

#[cfg(unix)]
fn send_kill(pid: u32, pgid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(group_err) = kill(Pid::from_raw(-pgid), Signal::SIGKILL) {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::warn!("could not kill pid {}: {} (group: {})", pid, e, group_err);
        }
    }
}

/// Zero-signal probe. "Permission denied" means the pid has been reused by
/// a process we do not own, which counts as gone.
#[cfg(unix)]
pub(crate) fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub(crate) fn send_term(_pid: u32, _pgid: i32) {
    tracing::warn!("process-group signalling is unsupported on this platform");
}

#[cfg(not(unix))]
fn send_kill(_pid: u32, _pgid: i32) {}

#[cfg(not(unix))]
pub(crate) fn is_alive(_pid: u32) -> bool {
    false
}
