//! Installation configuration rewriting.
//!
//! A deliberately coarse line-oriented transform over the service config
//! file: drop lines matching the removal keys, swap the survivors in
//! atomically (keeping a `.bak`), then append the computed keys. Running
//! the same configuration twice yields each appended key exactly once.

use crate::acquire::Installation;
use crate::error::DeckhandResult;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Plugin directory removed outright when security is disabled.
pub const SECURITY_PLUGIN: &str = "security";

/// Rewrite `config_file`: remove every line containing one of
/// `keys_to_remove` as a substring (or keyed by one of the appended keys,
/// which is what makes the transform idempotent), then append
/// `keys_to_append` in order. A missing file is treated as empty.
pub fn configure(
    config_file: &Path,
    keys_to_remove: &[String],
    keys_to_append: &[String],
) -> DeckhandResult<()> {
    let original = if config_file.exists() {
        fs::read_to_string(config_file)?
    } else {
        String::new()
    };

    let append_keys: Vec<String> = keys_to_append
        .iter()
        .filter_map(|line| line.split(':').next())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect();

    let survivors: Vec<&str> = original
        .lines()
        .filter(|line| {
            let removed = keys_to_remove.iter().any(|key| line.contains(key.as_str()));
            let shadowed = append_keys
                .iter()
                .any(|key| line.trim_start().starts_with(&format!("{}:", key)));
            !removed && !shadowed
        })
        .collect();

    let dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    for line in &survivors {
        writeln!(tmp, "{}", line)?;
    }
    tmp.flush()?;

    if config_file.exists() {
        fs::copy(config_file, backup_path(config_file))?;
    }
    tmp.persist(config_file).map_err(|e| e.error)?;

    let mut file = OpenOptions::new().append(true).open(config_file)?;
    for line in keys_to_append {
        writeln!(file, "{}", line)?;
    }

    Ok(())
}

fn backup_path(config_file: &Path) -> PathBuf {
    let mut name = config_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".bak");
    config_file.with_file_name(name)
}

/// With security disabled any bundled security plugin is removed outright.
pub fn remove_security_plugin(installation: &Installation) -> DeckhandResult<()> {
    let plugin_dir = installation.plugins_dir().join(SECURITY_PLUGIN);
    if plugin_dir.exists() {
        tracing::debug!("removing security plugin at {}", plugin_dir.display());
        fs::remove_dir_all(&plugin_dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrences(haystack: &str, needle: &str) -> usize {
        haystack.lines().filter(|l| l.contains(needle)).count()
    }

    #[test]
    fn removes_and_appends_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("engine.yml");
        fs::write(
            &config,
            "# engine configuration\nnetwork.host: 192.168.0.1\npath.data: /var/data\nhttp.port: 9300\n",
        )
        .unwrap();

        configure(
            &config,
            &["network.host".into(), "http.port".into()],
            &["network.host: 0.0.0.0".into(), "http.port: 9200".into()],
        )
        .unwrap();

        let out = fs::read_to_string(&config).unwrap();
        assert!(out.contains("network.host: 0.0.0.0"));
        assert!(out.contains("http.port: 9200"));
        assert!(!out.contains("192.168.0.1"));
        assert!(!out.contains("9300"));
        // Untouched lines survive in place.
        assert!(out.contains("path.data: /var/data"));
        assert!(out.contains("# engine configuration"));
    }

    #[test]
    fn reapplying_never_duplicates_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("dashboard.yml");
        fs::write(&config, "logging.quiet: true\n").unwrap();

        let remove = vec!["server.host".to_string(), "server.port".to_string()];
        let append = vec![
            "server.host: 0.0.0.0".to_string(),
            "server.port: 5601".to_string(),
        ];
        configure(&config, &remove, &append).unwrap();
        configure(&config, &remove, &append).unwrap();

        let out = fs::read_to_string(&config).unwrap();
        assert_eq!(occurrences(&out, "server.host"), 1);
        assert_eq!(occurrences(&out, "server.port"), 1);
        assert_eq!(occurrences(&out, "logging.quiet"), 1);
    }

    #[test]
    fn keeps_a_backup_of_the_pre_edit_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("engine.yml");
        fs::write(&config, "network.host: 10.0.0.1\n").unwrap();

        configure(
            &config,
            &["network.host".into()],
            &["network.host: 0.0.0.0".into()],
        )
        .unwrap();

        let backup = fs::read_to_string(dir.path().join("engine.yml.bak")).unwrap();
        assert!(backup.contains("10.0.0.1"));
    }

    #[test]
    fn missing_file_is_created_with_appended_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config").join("dashboard.yml");

        configure(&config, &[], &["server.port: 5601".into()]).unwrap();

        let out = fs::read_to_string(&config).unwrap();
        assert_eq!(out, "server.port: 5601\n");
    }

    #[test]
    fn appended_keys_are_idempotent_even_without_remove_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("engine.yml");
        fs::write(&config, "").unwrap();

        configure(&config, &[], &["discovery.type: single-node".into()]).unwrap();
        configure(&config, &[], &["discovery.type: single-node".into()]).unwrap();

        let out = fs::read_to_string(&config).unwrap();
        assert_eq!(occurrences(&out, "discovery.type"), 1);
    }
}
