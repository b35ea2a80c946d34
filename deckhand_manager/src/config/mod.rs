//! User settings for the CLI.
//!
//! Loaded from `~/.deckhand/config.toml`; every value can also come from
//! the environment or fall back to a built-in default.

use anyhow::{Context, Result};
use deckhand_core::acquire::Acquirer;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Where release archives are downloaded from.
pub const DEFAULT_ARTIFACT_BASE_URL: &str = "https://artifacts.deckhand.dev/releases";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub artifact_base_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    pub fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".deckhand").join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn artifact_base_url(&self) -> String {
        resolve_runtime_value(
            env::var("DECKHAND_ARTIFACTS_URL").ok(),
            self.artifact_base_url.clone(),
            DEFAULT_ARTIFACT_BASE_URL.to_string(),
        )
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Acquirer::default_cache_dir()?),
        }
    }
}

/// Configuration precedence for runtime values:
/// 1. Environment variables (highest)
/// 2. Config file
/// 3. Built-in defaults (lowest)
pub fn resolve_runtime_value<T>(env_var: Option<T>, file_value: Option<T>, default: T) -> T {
    env_var.or(file_value).unwrap_or(default)
}
