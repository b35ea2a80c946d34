//! External build step.
//!
//! The build pipeline itself is opaque: the engine only hands it a
//! directory and inspects the pass/fail result.

use crate::error::{DeckhandError, DeckhandResult};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;

pub trait BuildRunner: Sync {
    /// Build the installation at `dir`. On success the returned directory
    /// contains a runnable installation.
    fn build(&self, dir: &Path) -> DeckhandResult<PathBuf>;
}

/// Runs a configured command in the installation directory and trusts its
/// exit status.
pub struct CommandBuildRunner {
    program: String,
    args: Vec<String>,
}

impl CommandBuildRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl BuildRunner for CommandBuildRunner {
    fn build(&self, dir: &Path) -> DeckhandResult<PathBuf> {
        tracing::debug!("running {} {:?} in {}", self.program, self.args, dir.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .status()
            .map_err(|e| {
                DeckhandError::BuildFailed(format!("failed to run {}: {}", self.program, e))
            })?;

        if !status.success() {
            return Err(DeckhandError::BuildFailed(format!(
                "{} exited with {} in {}",
                self.program,
                status.code().map_or("signal".to_string(), |c| c.to_string()),
                dir.display()
            )));
        }
        Ok(dir.to_path_buf())
    }
}

/// Build every plugin directory concurrently and wait for all of them
/// before reporting. The first failure wins, but no build is abandoned
/// mid-flight.
pub fn build_plugins(runner: &dyn BuildRunner, plugin_dirs: &[PathBuf]) -> DeckhandResult<()> {
    if plugin_dirs.is_empty() {
        return Ok(());
    }

    let mut first_failure = None;
    thread::scope(|scope| {
        let handles: Vec<_> = plugin_dirs
            .iter()
            .map(|dir| {
                let dir = dir.clone();
                scope.spawn(move || runner.build(&dir).map(|_| ()).map_err(|e| (dir, e)))
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err((dir, err))) => {
                    tracing::warn!("plugin build failed in {}: {}", dir.display(), err);
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
                Err(_) => {
                    if first_failure.is_none() {
                        first_failure =
                            Some(DeckhandError::BuildFailed("build worker panicked".into()));
                    }
                }
            }
        }
    });

    match first_failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingRunner {
        builds: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl BuildRunner for RecordingRunner {
        fn build(&self, dir: &Path) -> DeckhandResult<PathBuf> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(needle) = self.fail_on {
                if dir.to_string_lossy().contains(needle) {
                    return Err(DeckhandError::BuildFailed(format!(
                        "broken plugin at {}",
                        dir.display()
                    )));
                }
            }
            Ok(dir.to_path_buf())
        }
    }

    #[test]
    fn all_plugins_build_concurrently() {
        let runner = RecordingRunner {
            builds: AtomicUsize::new(0),
            fail_on: None,
        };
        let dirs = vec![
            PathBuf::from("/tmp/plugins/alerting"),
            PathBuf::from("/tmp/plugins/maps"),
            PathBuf::from("/tmp/plugins/notifications"),
        ];
        build_plugins(&runner, &dirs).unwrap();
        assert_eq!(runner.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn one_failure_does_not_skip_siblings() {
        let runner = RecordingRunner {
            builds: AtomicUsize::new(0),
            fail_on: Some("maps"),
        };
        let dirs = vec![
            PathBuf::from("/tmp/plugins/alerting"),
            PathBuf::from("/tmp/plugins/maps"),
            PathBuf::from("/tmp/plugins/notifications"),
        ];
        let err = build_plugins(&runner, &dirs).unwrap_err();
        assert!(matches!(err, DeckhandError::BuildFailed(_)));
        assert_eq!(runner.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_plugin_set_is_a_no_op() {
        let runner = RecordingRunner {
            builds: AtomicUsize::new(0),
            fail_on: None,
        };
        build_plugins(&runner, &[]).unwrap();
        assert_eq!(runner.builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn command_runner_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandBuildRunner::new("/bin/sh", vec!["-c".into(), "exit 3".into()]);
        let err = runner.build(dir.path()).unwrap_err();
        assert!(err.to_string().contains("exited with 3"));
    }

    #[test]
    fn command_runner_passes_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandBuildRunner::new("/bin/sh", vec!["-c".into(), "true".into()]);
        let out = runner.build(dir.path()).unwrap();
        assert_eq!(out, dir.path());
    }
}
