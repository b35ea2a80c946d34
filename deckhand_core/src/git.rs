//! Shallow clone wrapper over the system `git` binary.

use crate::error::{DeckhandError, DeckhandResult};
use crate::spec::SourceRef;
use std::fs;
use std::path::Path;
use std::process::Command;

/// Clone `source` at depth 1 into `dest`. Any pre-existing directory at
/// `dest` is removed first, and a failed clone never leaves a partial
/// checkout behind.
pub fn clone_shallow(source: &SourceRef, dest: &Path) -> DeckhandResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::debug!("cloning {} into {}", source, dest.display());
    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--single-branch", "--branch"])
        .arg(&source.branch)
        .arg(source.clone_url())
        .arg(dest)
        .output()
        .map_err(|e| DeckhandError::CloneFailed {
            repo: source.to_string(),
            reason: format!("failed to run git: {}", e),
        })?;

    if !output.status.success() {
        let _ = fs::remove_dir_all(dest);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DeckhandError::CloneFailed {
            repo: source.to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    Ok(())
}
