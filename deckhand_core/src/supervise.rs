//! Process supervision: spawn a service detached in its own process
//! group, tee its output to the terminal, and poll its health endpoint on
//! a fixed cadence until it is healthy, dead, or out of time.

use crate::error::{DeckhandError, DeckhandResult};
use crate::health::ReadinessProbe;
use crate::shutdown::{self, ShutdownRegistry};
use colored::*;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Running, health not yet established.
    Spawned,
    /// First successful health probe seen; handed to the shutdown registry.
    Healthy,
    /// Exited on its own before reaching health.
    Closed,
    /// Termination was dispatched by us.
    Killed,
}

/// An OS process (plus its process group) tracked from spawn to
/// termination.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
    pid: u32,
    pgid: i32,
    state: ProcessState,
    attached: Arc<AtomicBool>,
    tee_handles: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Process group id; signalling its negative reaches every descendant.
    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Unhook the output streams from the terminal. The tee threads keep
    /// draining the pipes (so the child never blocks on a full buffer) but
    /// drop every line from here on.
    pub fn detach_output(&mut self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Non-blocking exit check.
    pub fn try_wait(&mut self) -> DeckhandResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the tee threads to drain after the child has exited.
    pub fn join_output(&mut self) {
        for handle in self.tee_handles.drain(..) {
            handle.join().ok();
        }
    }

    fn terminate(&mut self) {
        shutdown::send_term(self.pid, self.pgid);
        self.state = ProcessState::Killed;
    }
}

pub struct Supervisor {
    /// Cadence between health probe starts.
    interval: Duration,
    /// Granularity of child-exit checks while waiting out the cadence.
    exit_poll: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(5),
            exit_poll: Duration::from_millis(100),
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            exit_poll: Duration::from_millis(10).min(interval),
        }
    }

    /// Spawn `executable` as a detached child in its own process group,
    /// streaming its output to the terminal under a colored `[name]`
    /// prefix.
    pub fn start(
        &self,
        name: &str,
        color: Color,
        executable: &Path,
        args: &[String],
        cwd: &Path,
    ) -> DeckhandResult<ManagedProcess> {
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: the dashboard forks workers, and shutdown
            // signals the group, not just the leader.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| DeckhandError::StartupFailed {
            name: name.to_string(),
            detail: format!("failed to spawn {}: {}", executable.display(), e),
        })?;

        let pid = child.id();
        let pgid = pid as i32; // group leader, so pgid == pid
        let attached = Arc::new(AtomicBool::new(true));
        let mut tee_handles = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            tee_handles.push(spawn_tee(name, color, stdout, attached.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tee_handles.push(spawn_tee(name, color, stderr, attached.clone(), true));
        }

        println!(
            "  {} Started [{}] (pid {})",
            "✓".green(),
            name.color(color),
            pid
        );

        Ok(ManagedProcess {
            name: name.to_string(),
            child,
            pid,
            pgid,
            state: ProcessState::Spawned,
            attached,
            tee_handles,
        })
    }

    /// Poll `probe` until it reports healthy, the child dies, or `timeout`
    /// elapses. Each iteration starts `interval` after the previous
    /// attempt's start, not its end, so probe latency never compounds the
    /// wait. A child exit is noticed mid-wait and ends the loop at once.
    ///
    /// On success the handle is detached from the terminal and registered
    /// with `registry`. On either failure the process is sent SIGTERM and
    /// is never registered.
    pub fn await_health(
        &self,
        mut proc: ManagedProcess,
        probe: &dyn ReadinessProbe,
        timeout: Duration,
        registry: &ShutdownRegistry,
    ) -> DeckhandResult<ManagedProcess> {
        let started = Instant::now();
        loop {
            if let Some(status) = proc.try_wait()? {
                return Err(fail_closed(proc, status));
            }

            let attempt_started = Instant::now();
            if probe.check() == Some(true) {
                proc.detach_output();
                proc.state = ProcessState::Healthy;
                registry.register(&proc);
                return Ok(proc);
            }

            if started.elapsed() >= timeout {
                let name = proc.name.clone();
                proc.terminate();
                return Err(DeckhandError::StartupTimeout {
                    name,
                    timeout_secs: timeout.as_secs(),
                });
            }

            // Wait out the rest of the cadence, watching for an early exit.
            while attempt_started.elapsed() < self.interval {
                if let Some(status) = proc.try_wait()? {
                    return Err(fail_closed(proc, status));
                }
                let remaining = self.interval.saturating_sub(attempt_started.elapsed());
                thread::sleep(remaining.min(self.exit_poll));
            }
        }
    }
}

/// The child exited before health: SIGTERM (harmless when already gone)
/// and report. The handle is dropped without registration; a process
/// that never reached health is not supervised further.
fn fail_closed(mut proc: ManagedProcess, status: ExitStatus) -> DeckhandError {
    proc.state = ProcessState::Closed;
    shutdown::send_term(proc.pid, proc.pgid);
    let detail = match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    DeckhandError::StartupFailed {
        name: proc.name.clone(),
        detail,
    }
}

fn spawn_tee(
    name: &str,
    color: Color,
    stream: impl Read + Send + 'static,
    attached: Arc<AtomicBool>,
    is_stderr: bool,
) -> JoinHandle<()> {
    let name = name.to_string();
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if attached.load(Ordering::SeqCst) {
                let prefix = format!("[{}]", name).color(color);
                if is_stderr {
                    eprintln!("{} {}", prefix, line);
                } else {
                    println!("{} {}", prefix, line);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownRegistry;
    use std::sync::atomic::AtomicUsize;

    /// Scripted probe: false for `false_count` checks, then true.
    struct ScriptedProbe {
        false_count: usize,
        checks: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(false_count: usize) -> Self {
            Self {
                false_count,
                checks: AtomicUsize::new(0),
            }
        }

        fn checks(&self) -> usize {
            self.checks.load(Ordering::SeqCst)
        }
    }

    impl ReadinessProbe for ScriptedProbe {
        fn check(&self) -> Option<bool> {
            let seen = self.checks.fetch_add(1, Ordering::SeqCst);
            if seen < self.false_count {
                Some(false)
            } else {
                Some(true)
            }
        }
    }

    struct NeverHealthy;

    impl ReadinessProbe for NeverHealthy {
        fn check(&self) -> Option<bool> {
            None
        }
    }

    fn start_sleeper(supervisor: &Supervisor, cwd: &Path) -> ManagedProcess {
        supervisor
            .start(
                "svc",
                Color::Cyan,
                Path::new("/bin/sh"),
                &["-c".to_string(), "sleep 30".to_string()],
                cwd,
            )
            .unwrap()
    }

    #[test]
    fn healthy_on_third_probe_and_registered_once() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::with_interval(Duration::from_millis(30));
        let registry = ShutdownRegistry::with_grace(Duration::from_millis(100));
        let probe = ScriptedProbe::new(2);

        let proc = start_sleeper(&supervisor, dir.path());
        let pid = proc.pid();
        let proc = supervisor
            .await_health(proc, &probe, Duration::from_secs(10), &registry)
            .unwrap();

        assert_eq!(proc.state(), ProcessState::Healthy);
        assert_eq!(probe.checks(), 3);
        let registered = registry.registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].pid, pid);

        registry.shutdown_all();
    }

    #[test]
    fn timeout_is_bounded_and_skips_registration() {
        let dir = tempfile::tempdir().unwrap();
        let interval = Duration::from_millis(50);
        let timeout = Duration::from_millis(300);
        let supervisor = Supervisor::with_interval(interval);
        let registry = ShutdownRegistry::with_grace(Duration::from_millis(100));

        let proc = start_sleeper(&supervisor, dir.path());
        let started = Instant::now();
        let err = supervisor
            .await_health(proc, &NeverHealthy, timeout, &registry)
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, DeckhandError::StartupTimeout { .. }));
        // No sooner than the budget, no later than budget + one cadence
        // (plus scheduling slack).
        assert!(elapsed >= timeout, "returned after {:?}", elapsed);
        assert!(
            elapsed < timeout + interval + Duration::from_millis(200),
            "returned after {:?}",
            elapsed
        );
        assert!(registry.registered().is_empty());
    }

    #[test]
    fn early_exit_fails_without_waiting_for_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::with_interval(Duration::from_millis(50));
        let registry = ShutdownRegistry::with_grace(Duration::from_millis(100));

        let proc = supervisor
            .start(
                "svc",
                Color::Cyan,
                Path::new("/bin/sh"),
                &["-c".to_string(), "exit 7".to_string()],
                dir.path(),
            )
            .unwrap();

        let started = Instant::now();
        let err = supervisor
            .await_health(proc, &NeverHealthy, Duration::from_secs(30), &registry)
            .unwrap_err();

        match err {
            DeckhandError::StartupFailed { detail, .. } => {
                assert!(detail.contains('7'), "detail was '{}'", detail)
            }
            other => panic!("expected StartupFailed, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(registry.registered().is_empty());
    }

    #[test]
    fn spawn_failure_is_startup_failed() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new();
        let err = supervisor
            .start(
                "svc",
                Color::Cyan,
                Path::new("/nonexistent/binary"),
                &[],
                dir.path(),
            )
            .unwrap_err();
        assert!(matches!(err, DeckhandError::StartupFailed { .. }));
    }
}
