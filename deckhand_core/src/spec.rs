//! Version and source resolution.
//!
//! Classifies a user-supplied identifier as a released version, a source
//! reference, or an existing local path, and resolves plugin source
//! references against the official repositories.

use crate::error::{DeckhandError, DeckhandResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Owner of the official engine, dashboard, and plugin repositories.
pub const OFFICIAL_OWNER: &str = "deckhand-project";

/// Branch used when no usable branch can be inherited.
pub const DEFAULT_BRANCH: &str = "main";

/// Scheme prefix recognised in source references.
pub const SOURCE_SCHEME: &str = "github";

/// Dashboard plugins cloned and built by default.
pub const DEFAULT_PLUGINS: &[&str] = &[
    "alerting",
    "anomaly-detection",
    "index-management",
    "maps",
    "notifications",
    "observability",
    "security-analytics",
];

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("version regex"))
}

fn release_branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.(x|\d+)$").expect("release branch regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    Engine,
    Dashboard,
}

impl ServiceKind {
    pub fn slug(&self) -> &'static str {
        match self {
            ServiceKind::Engine => "engine",
            ServiceKind::Dashboard => "dashboard",
        }
    }

    /// Repository name under the official owner.
    pub fn official_repo(&self) -> &'static str {
        self.slug()
    }

    pub fn default_port(&self) -> u16 {
        match self {
            ServiceKind::Engine => 9200,
            ServiceKind::Dashboard => 5601,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Fully resolved owner/repository/branch triple. Resolution either yields
/// all three fields or fails; partial references never escape this module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl SourceRef {
    pub fn official(repo: &str, branch: &str) -> Self {
        Self {
            owner: OFFICIAL_OWNER.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            SOURCE_SCHEME, self.owner, self.repo, self.branch
        )
    }
}

/// What the user asked for, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Release(String),
    Source(SourceRef),
    Local(PathBuf),
}

/// Immutable per-service install descriptor, created once per invocation.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub kind: ServiceKind,
    pub source: SourceSpec,
    pub destination_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub refresh_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Shape of a raw source string once the scheme prefix is stripped.
enum Segments {
    /// `owner/repo/branch`
    Full(String, String, String),
    /// `branch` after an explicit `scheme://`
    BranchShorthand(String),
    /// `owner/repo`, not resolvable to a full reference
    Pair,
}

/// Strip `github:` / `github://` and report whether the `//` marker was
/// present. Returns None when the string carries no recognised scheme.
fn strip_scheme(raw: &str) -> Option<(&str, bool)> {
    let rest = raw.strip_prefix(SOURCE_SCHEME)?.strip_prefix(':')?;
    match rest.strip_prefix("//") {
        Some(rest) => Some((rest, true)),
        None => Some((rest, false)),
    }
}

fn split_segments(rest: &str, explicit_shorthand: bool) -> Segments {
    let mut parts = rest.splitn(3, '/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), Some(branch)) => {
            Segments::Full(owner.to_string(), repo.to_string(), branch.to_string())
        }
        (Some(single), None, None) if explicit_shorthand => {
            Segments::BranchShorthand(single.to_string())
        }
        // A lone segment after `github:` (no `//`) is as ambiguous as a pair.
        (Some(_), _, None) => Segments::Pair,
        _ => Segments::Pair,
    }
}

/// Classify a raw identifier for the given service.
///
/// Recognised shapes, in order: a three-component numeric version, a source
/// reference (`github:owner/repo/branch` or `github://branch`), an existing
/// filesystem path. Bare tokens with no scheme separator and no existing
/// path are coerced to a branch shorthand against the official repository,
/// a deliberate usability fallback.
pub fn classify(raw: &str, kind: ServiceKind) -> DeckhandResult<SourceSpec> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DeckhandError::InvalidSpec(raw.to_string()));
    }

    if version_re().is_match(raw) {
        return Ok(SourceSpec::Release(raw.to_string()));
    }

    if let Some((rest, explicit)) = strip_scheme(raw) {
        return match split_segments(rest, explicit) {
            Segments::Full(owner, repo, branch) => Ok(SourceSpec::Source(SourceRef {
                owner,
                repo,
                branch,
            })),
            Segments::BranchShorthand(branch) => Ok(SourceSpec::Source(SourceRef::official(
                kind.official_repo(),
                &branch,
            ))),
            Segments::Pair => Err(DeckhandError::InvalidSpec(raw.to_string())),
        };
    }

    let path = Path::new(raw);
    if path.exists() {
        return Ok(SourceSpec::Local(path.to_path_buf()));
    }

    // Bare token: no scheme separator, not a path on disk.
    if !raw.contains(':') {
        return Ok(SourceSpec::Source(SourceRef::official(
            kind.official_repo(),
            raw,
        )));
    }

    Err(DeckhandError::InvalidSpec(raw.to_string()))
}

/// Official repository name for a dashboard plugin slug.
pub fn official_plugin_repo(slug: &str) -> String {
    format!("dashboard-{}", slug)
}

/// Resolve the source for a dashboard plugin.
///
/// A full three-part reference is used verbatim. A `github://branch`
/// shorthand resolves against the plugin's official repository. A bare
/// single segment or an owner/repo pair cannot produce a fully populated
/// reference and is rejected rather than guessed at. With no override the
/// official repository is used, on `inherited_branch` when that names a
/// numeric release branch, else on the default branch.
pub fn resolve_plugin_source(
    slug: &str,
    requested: Option<&str>,
    inherited_branch: Option<&str>,
) -> DeckhandResult<SourceRef> {
    if let Some(raw) = requested {
        let raw = raw.trim();
        let (rest, explicit) = strip_scheme(raw).unwrap_or((raw, false));
        return match split_segments(rest, explicit) {
            Segments::Full(owner, repo, branch) => Ok(SourceRef {
                owner,
                repo,
                branch,
            }),
            Segments::BranchShorthand(branch) => {
                Ok(SourceRef::official(&official_plugin_repo(slug), &branch))
            }
            Segments::Pair => Err(DeckhandError::UnsupportedSpec {
                spec: raw.to_string(),
                reason: format!(
                    "plugin '{}' needs a full owner/repo/branch reference or a github://branch shorthand",
                    slug
                ),
            }),
        };
    }

    let branch = match inherited_branch {
        Some(b) if release_branch_re().is_match(b) => b,
        _ => DEFAULT_BRANCH,
    };
    Ok(SourceRef::official(&official_plugin_repo(slug), branch))
}
