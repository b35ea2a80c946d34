//! Artifact cache maintenance.

use crate::config::Settings;
use anyhow::{Context, Result};
use colored::*;
use serde_json::Value;
use std::fs;

/// List cached release archives with their recorded checksums.
pub fn execute_list() -> Result<()> {
    let settings = Settings::load()?;
    let cache_dir = settings.cache_dir()?;

    println!("{} Cached artifacts in {}:\n", "→".cyan(), cache_dir.display());
    if !cache_dir.exists() {
        println!("  No cached artifacts yet");
        return Ok(());
    }

    let mut found = false;
    for entry in fs::read_dir(&cache_dir)
        .with_context(|| format!("failed to read {}", cache_dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".tar.gz") {
            continue;
        }
        found = true;

        let size_mb = entry.metadata().map(|m| m.len() / (1024 * 1024)).unwrap_or(0);
        let meta_path = cache_dir.join(format!("{}.meta.json", name));
        let checksum = fs::read_to_string(&meta_path)
            .ok()
            .and_then(|body| serde_json::from_str::<Value>(&body).ok())
            .and_then(|meta| meta.get("sha256").and_then(Value::as_str).map(str::to_string));

        match checksum {
            Some(sum) => println!(
                "  {} {} ({} MB, sha256 {}…)",
                "•".cyan(),
                name.yellow(),
                size_mb,
                &sum[..12.min(sum.len())]
            ),
            None => println!("  {} {} ({} MB)", "•".cyan(), name.yellow(), size_mb),
        }
    }

    if !found {
        println!("  No cached artifacts yet");
    }
    Ok(())
}

/// Remove every cached archive, forcing fresh downloads on the next run.
pub fn execute_clean() -> Result<()> {
    let settings = Settings::load()?;
    let cache_dir = settings.cache_dir()?;

    if !cache_dir.exists() {
        println!("{} Cache is already empty", "✓".green());
        return Ok(());
    }

    let mut removed = 0usize;
    for entry in fs::read_dir(&cache_dir)
        .with_context(|| format!("failed to read {}", cache_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
    }

    println!("{} Removed {} cached file(s)", "✓".green(), removed);
    Ok(())
}
