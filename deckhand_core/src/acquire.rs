//! Artifact acquisition: release downloads with an on-disk cache, source
//! clones, and local directories, all normalised into an [`Installation`].

use crate::error::{DeckhandError, DeckhandResult};
use crate::fetch::ArtifactFetcher;
use crate::git;
use crate::retry::with_retry;
use crate::spec::{ServiceKind, SourceRef};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where an installation came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Release(String),
    Source(SourceRef),
    Local,
}

/// A concrete on-disk installation, ready to configure and start. Owned by
/// the pipeline that created it; one per service per run.
#[derive(Debug, Clone)]
pub struct Installation {
    pub root_dir: PathBuf,
    pub kind: ServiceKind,
    pub origin: Origin,
    pub plugins_present: BTreeSet<String>,
}

impl Installation {
    pub fn config_file(&self) -> PathBuf {
        self.root_dir
            .join("config")
            .join(format!("{}.yml", self.kind.slug()))
    }

    /// Path of the executable to launch. A source build's output takes
    /// precedence over the packaged binary.
    pub fn executable(&self) -> PathBuf {
        let built = self.root_dir.join("build").join("bin").join(self.kind.slug());
        if built.exists() {
            return built;
        }
        self.root_dir.join("bin").join(self.kind.slug())
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root_dir.join("plugins")
    }
}

/// Sidecar metadata written next to each cached archive.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntryMeta {
    kind: String,
    version: String,
    sha256: String,
    created_at: chrono::DateTime<Utc>,
}

pub struct Acquirer<'a> {
    cache_dir: PathBuf,
    artifact_base_url: String,
    fetcher: &'a dyn ArtifactFetcher,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl<'a> Acquirer<'a> {
    pub fn new(cache_dir: PathBuf, artifact_base_url: String, fetcher: &'a dyn ArtifactFetcher) -> Self {
        Self {
            cache_dir,
            artifact_base_url,
            fetcher,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_retry_policy(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Per-user cache root, shared by every run.
    pub fn default_cache_dir() -> DeckhandResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| DeckhandError::Config("could not determine home directory".into()))?;
        Ok(home.join(".deckhand").join("cache"))
    }

    /// Deterministic cache file for a `(kind, version)` pair.
    pub fn cached_archive_path(&self, kind: ServiceKind, version: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}-{}-linux-x64.tar.gz", kind.slug(), version))
    }

    fn archive_url(&self, kind: ServiceKind, version: &str) -> String {
        format!(
            "{}/{}/{}-{}-linux-x64.tar.gz",
            self.artifact_base_url.trim_end_matches('/'),
            version,
            kind.slug(),
            version
        )
    }

    /// Download a release archive into the cache, or reuse the cached copy.
    ///
    /// The download streams into a temporary sibling file that is renamed
    /// over the destination only on full success, so an interrupted
    /// transfer never leaves a partial file where a later run would take it
    /// for a cache hit.
    pub fn download_release(
        &self,
        kind: ServiceKind,
        version: &str,
        refresh: bool,
    ) -> DeckhandResult<PathBuf> {
        let target = self.cached_archive_path(kind, version);
        if !refresh && target.exists() {
            tracing::debug!("cache hit for {} {}", kind, version);
            return Ok(target);
        }

        fs::create_dir_all(&self.cache_dir)?;
        let url = self.archive_url(kind, version);

        with_retry("download", self.retry_attempts, self.retry_delay, || {
            let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
            let mut hasher = Sha256::new();
            {
                let mut sink = TeeWriter {
                    inner: tmp.as_file_mut(),
                    hasher: &mut hasher,
                };
                self.fetcher.fetch(&url, &mut sink)?;
                sink.inner.flush()?;
            }
            let sha256 = format!("{:x}", hasher.finalize());

            tmp.persist(&target)
                .map_err(|e| DeckhandError::Io(e.error))?;
            self.write_meta(&target, kind, version, &sha256)?;
            tracing::debug!("downloaded {} ({})", target.display(), sha256);
            Ok(target.clone())
        })
    }

    fn write_meta(
        &self,
        archive: &Path,
        kind: ServiceKind,
        version: &str,
        sha256: &str,
    ) -> DeckhandResult<()> {
        let meta = CacheEntryMeta {
            kind: kind.slug().to_string(),
            version: version.to_string(),
            sha256: sha256.to_string(),
            created_at: Utc::now(),
        };
        let meta_path = meta_sidecar_path(archive);
        let body = serde_json::to_string_pretty(&meta)
            .map_err(|e| DeckhandError::Config(format!("failed to encode cache metadata: {}", e)))?;
        fs::write(meta_path, body)?;
        Ok(())
    }

    /// Resolve a release version into a runnable installation directory.
    pub fn acquire_release(
        &self,
        kind: ServiceKind,
        version: &str,
        refresh: bool,
        destination_root: &Path,
    ) -> DeckhandResult<Installation> {
        let archive = self.download_release(kind, version, refresh)?;
        let root_dir = extract_archive(&archive, destination_root, kind)?;
        let plugins_present = scan_plugins(&root_dir);
        Ok(Installation {
            root_dir,
            kind,
            origin: Origin::Release(version.to_string()),
            plugins_present,
        })
    }

    /// Clone a source reference (and, for the dashboard, its plugins) into
    /// a fresh directory under `destination_root`.
    pub fn acquire_from_source(
        &self,
        kind: ServiceKind,
        source: &SourceRef,
        destination_root: &Path,
        plugins: &[(String, SourceRef)],
    ) -> DeckhandResult<Installation> {
        let root_dir = destination_root.join(kind.slug());
        git::clone_shallow(source, &root_dir)?;

        let mut plugins_present = BTreeSet::new();
        if kind == ServiceKind::Dashboard {
            for (slug, plugin_source) in plugins {
                let plugin_dir = root_dir.join("plugins").join(slug);
                git::clone_shallow(plugin_source, &plugin_dir)?;
                plugins_present.insert(slug.clone());
            }
        }

        Ok(Installation {
            root_dir,
            kind,
            origin: Origin::Source(source.clone()),
            plugins_present,
        })
    }

    /// Use an existing directory as-is. When `refresh_plugins` is given the
    /// named plugin checkouts are re-cloned into it first.
    pub fn acquire_from_local(
        &self,
        kind: ServiceKind,
        path: &Path,
        refresh_plugins: &[(String, SourceRef)],
    ) -> DeckhandResult<Installation> {
        if !path.is_dir() {
            return Err(DeckhandError::Config(format!(
                "local installation {} is not a directory",
                path.display()
            )));
        }

        for (slug, plugin_source) in refresh_plugins {
            let plugin_dir = path.join("plugins").join(slug);
            git::clone_shallow(plugin_source, &plugin_dir)?;
        }

        Ok(Installation {
            root_dir: path.to_path_buf(),
            kind,
            origin: Origin::Local,
            plugins_present: scan_plugins(path),
        })
    }
}

fn meta_sidecar_path(archive: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    archive.with_file_name(name)
}

/// Unpack a gzipped tarball into `destination_root/<kind>`, replacing any
/// previous extraction. Archives carry a single versioned top-level
/// directory which is moved into place.
pub fn extract_archive(
    archive: &Path,
    destination_root: &Path,
    kind: ServiceKind,
) -> DeckhandResult<PathBuf> {
    let dest = destination_root.join(kind.slug());
    let staging = destination_root.join(format!(".{}-extract", kind.slug()));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let file = fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tarball = tar::Archive::new(decoder);
    if let Err(e) = tarball.unpack(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(DeckhandError::CorruptArtifact {
            path: archive.to_path_buf(),
            reason: e.to_string(),
        });
    }

    if dest.exists() {
        fs::remove_dir_all(&dest)?;
    }

    // Move the single extracted directory up; fall back to the staging
    // directory itself for flat archives.
    let mut entries: Vec<_> = fs::read_dir(&staging)?.collect::<Result<_, _>>()?;
    let top = if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        entries.remove(0).path()
    } else {
        staging.clone()
    };
    fs::rename(&top, &dest)?;
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }

    Ok(dest)
}

fn scan_plugins(root: &Path) -> BTreeSet<String> {
    let mut present = BTreeSet::new();
    if let Ok(entries) = fs::read_dir(root.join("plugins")) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                present.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    present
}

/// Feeds downloaded bytes to both the cache file and the checksum.
struct TeeWriter<'a> {
    inner: &'a mut fs::File,
    hasher: &'a mut Sha256,
}

impl Write for TeeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
