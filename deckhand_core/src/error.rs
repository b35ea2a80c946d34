//! Error types for the Deckhand lifecycle engine.

use std::path::PathBuf;
use thiserror::Error;

pub type DeckhandResult<T> = Result<T, DeckhandError>;

#[derive(Error, Debug)]
pub enum DeckhandError {
    /// User input that is neither a release version, a source reference,
    /// nor an existing path.
    #[error("unrecognized version or source spec '{0}' (expected a release version like 2.13.0, a source reference like github:owner/repo/branch, or an existing directory)")]
    InvalidSpec(String),

    /// A source reference shape we recognise but cannot resolve.
    #[error("unsupported source spec '{spec}': {reason}")]
    UnsupportedSpec { spec: String, reason: String },

    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("clone failed for {repo}: {reason}")]
    CloneFailed { repo: String, reason: String },

    /// Archive failed to extract; the cached copy is suspect.
    #[error("corrupt artifact {path}: {reason} (retry with --refresh-cache to discard the cached copy)")]
    CorruptArtifact { path: PathBuf, reason: String },

    /// The external build step reported failure; propagated verbatim.
    #[error("build failed: {0}")]
    BuildFailed(String),

    /// The child process exited before reaching health.
    #[error("{name} exited before becoming healthy ({detail})")]
    StartupFailed { name: String, detail: String },

    /// Health was never reached within the budget; the process was
    /// force-stopped.
    #[error("{name} did not become healthy within {timeout_secs}s")]
    StartupTimeout { name: String, timeout_secs: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
