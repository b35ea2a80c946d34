//! The `up` pipeline: resolve, acquire, configure, start, and supervise
//! the engine and dashboard until both are healthy, then keep the cluster
//! alive until it exits or the operator interrupts.

use crate::config::Settings;
use crate::security;
use anyhow::{bail, Context, Result};
use colored::*;
use deckhand_core::acquire::{Acquirer, Installation};
use deckhand_core::build::{build_plugins, BuildRunner, CommandBuildRunner};
use deckhand_core::configure;
use deckhand_core::fetch::HttpFetcher;
use deckhand_core::health::HealthProbe;
use deckhand_core::shutdown::{self, ShutdownRegistry};
use deckhand_core::spec::{
    classify, resolve_plugin_source, Credentials, InstallRequest, ServiceKind, SourceRef,
    SourceSpec, DEFAULT_PLUGINS,
};
use deckhand_core::supervise::{ManagedProcess, Supervisor};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct UpOptions {
    pub engine: String,
    pub dashboard: String,
    pub host: String,
    pub engine_port: u16,
    pub dashboard_port: u16,
    pub username: String,
    pub password: String,
    pub plugins: Option<Vec<String>>,
    pub exclude_plugins: Vec<String>,
    pub plugin_sources: Vec<String>,
    pub refresh_cache: bool,
    pub no_security: bool,
    pub skip_build: bool,
    pub skip_engine: bool,
    pub timeout_secs: u64,
    pub root: PathBuf,
}

pub fn execute_up(opts: UpOptions) -> Result<()> {
    let registry = Arc::new(ShutdownRegistry::new());
    shutdown::install_signal_handlers(registry.clone())?;

    // The drain runs on every way out of the pipeline. A dashboard that
    // fails to start must not leave an already-healthy engine running.
    let result = run_pipeline(&opts, &registry);
    registry.shutdown_all();
    result
}

fn run_pipeline(opts: &UpOptions, registry: &ShutdownRegistry) -> Result<()> {
    let settings = Settings::load()?;
    let security_enabled = !opts.no_security;
    let credentials = security_enabled.then(|| Credentials {
        username: opts.username.clone(),
        password: opts.password.clone(),
    });

    let fetcher = HttpFetcher::new()?;
    let acquirer = Acquirer::new(
        settings.cache_dir()?,
        settings.artifact_base_url(),
        &fetcher,
    );
    let supervisor = Supervisor::new();
    let timeout = Duration::from_secs(opts.timeout_secs);
    fs::create_dir_all(&opts.root)
        .with_context(|| format!("failed to create {}", opts.root.display()))?;

    let plugin_slugs = select_plugins(opts.plugins.as_deref(), &opts.exclude_plugins);
    let overrides = parse_plugin_overrides(&opts.plugin_sources)?;

    // Both services follow the security mode on the wire.
    let scheme = if security_enabled { "https" } else { "http" };
    let probe_host = probe_host(&opts.host);
    let mut running: Vec<ManagedProcess> = Vec::new();

    // The engine is fully healthy (or explicitly skipped) before the
    // dashboard starts: the dashboard's config embeds the engine endpoint.
    if opts.skip_engine {
        println!(
            "{} Skipping engine; expecting one at {}://{}:{}",
            "→".yellow(),
            scheme,
            probe_host,
            opts.engine_port
        );
    } else {
        let request = InstallRequest {
            kind: ServiceKind::Engine,
            source: classify(&opts.engine, ServiceKind::Engine)?,
            destination_root: opts.root.clone(),
            host: opts.host.clone(),
            port: opts.engine_port,
            credentials: credentials.clone(),
            refresh_cache: opts.refresh_cache,
        };
        println!(
            "{} Provisioning engine from {}...",
            "→".cyan(),
            describe_source(&request.source).yellow()
        );
        let installation = provision(&acquirer, &request, opts.skip_build, &[])?;

        let (remove, append) = engine_config_keys(&request, security_enabled);
        configure::configure(&installation.config_file(), &remove, &append)?;
        if security_enabled {
            security::ensure_material(&installation, request.credentials.as_ref())?;
        } else {
            configure::remove_security_plugin(&installation)?;
        }

        let probe = HealthProbe::for_service(
            ServiceKind::Engine,
            scheme,
            &probe_host,
            request.port,
            request.credentials.clone(),
        )?;
        let proc = launch(
            &supervisor,
            registry,
            &installation,
            "engine",
            Color::Cyan,
            &probe,
            timeout,
        )?;
        running.push(proc);
    }

    let request = InstallRequest {
        kind: ServiceKind::Dashboard,
        source: classify(&opts.dashboard, ServiceKind::Dashboard)?,
        destination_root: opts.root.clone(),
        host: opts.host.clone(),
        port: opts.dashboard_port,
        credentials: credentials.clone(),
        refresh_cache: opts.refresh_cache,
    };
    println!(
        "{} Provisioning dashboard from {}...",
        "→".cyan(),
        describe_source(&request.source).yellow()
    );

    // Plugins are only cloned for source and to-be-built local trees;
    // release archives already bundle theirs.
    let inherited_branch = match &request.source {
        SourceSpec::Source(r) => Some(r.branch.clone()),
        _ => None,
    };
    let plugin_refs = match &request.source {
        SourceSpec::Release(_) => Vec::new(),
        SourceSpec::Local(_) if opts.skip_build => Vec::new(),
        _ => resolve_plugin_refs(&plugin_slugs, &overrides, inherited_branch.as_deref())?,
    };

    let installation = provision(&acquirer, &request, opts.skip_build, &plugin_refs)?;

    let (remove, append) = dashboard_config_keys(&request, opts.engine_port, scheme, &probe_host);
    configure::configure(&installation.config_file(), &remove, &append)?;
    if security_enabled {
        // Same self-signed material as the engine; the realm file is
        // engine-only.
        security::ensure_material(&installation, None)?;
    } else {
        configure::remove_security_plugin(&installation)?;
    }

    let probe = HealthProbe::for_service(
        ServiceKind::Dashboard,
        scheme,
        &probe_host,
        request.port,
        request.credentials.clone(),
    )?;
    let proc = launch(
        &supervisor,
        registry,
        &installation,
        "dashboard",
        Color::Magenta,
        &probe,
        timeout,
    )?;
    running.push(proc);

    print_summary(&running, opts, scheme);

    wait_for_exit(&mut running);
    Ok(())
}

/// Turn an install request into an on-disk installation, running the
/// external build step for source and local trees unless skipped.
fn provision(
    acquirer: &Acquirer,
    request: &InstallRequest,
    skip_build: bool,
    plugin_refs: &[(String, SourceRef)],
) -> Result<Installation> {
    let installation = match &request.source {
        SourceSpec::Release(version) => acquirer.acquire_release(
            request.kind,
            version,
            request.refresh_cache,
            &request.destination_root,
        )?,
        SourceSpec::Source(source_ref) => acquirer.acquire_from_source(
            request.kind,
            source_ref,
            &request.destination_root,
            plugin_refs,
        )?,
        SourceSpec::Local(path) => {
            acquirer.acquire_from_local(request.kind, path, plugin_refs)?
        }
    };

    tracing::debug!(
        "{} installation ready at {}",
        request.kind,
        installation.root_dir.display()
    );

    let needs_build = !matches!(request.source, SourceSpec::Release(_)) && !skip_build;
    if needs_build {
        println!(
            "  {} Building {} (this can take a while)...",
            "→".cyan(),
            request.kind
        );
        let runner = build_runner(request.kind);
        runner
            .build(&installation.root_dir)
            .context("external build step failed")?;

        if request.kind == ServiceKind::Dashboard && !plugin_refs.is_empty() {
            println!(
                "  {} Building {} plugin(s) concurrently...",
                "→".cyan(),
                plugin_refs.len()
            );
            let plugin_dirs: Vec<PathBuf> = plugin_refs
                .iter()
                .map(|(slug, _)| installation.plugins_dir().join(slug))
                .collect();
            build_plugins(&plugin_runner(), &plugin_dirs)?;
        }
    }

    Ok(installation)
}

fn build_runner(kind: ServiceKind) -> CommandBuildRunner {
    match kind {
        ServiceKind::Engine => CommandBuildRunner::new("./gradlew", vec!["assemble".into()]),
        ServiceKind::Dashboard => CommandBuildRunner::new("yarn", vec!["build".into()]),
    }
}

fn plugin_runner() -> CommandBuildRunner {
    CommandBuildRunner::new("yarn", vec!["build".into()])
}

fn launch(
    supervisor: &Supervisor,
    registry: &ShutdownRegistry,
    installation: &Installation,
    name: &str,
    color: Color,
    probe: &HealthProbe,
    timeout: Duration,
) -> Result<ManagedProcess> {
    let executable = installation.executable();
    println!("{} Starting {}...", "→".cyan(), name.color(color));
    let proc = supervisor.start(name, color, &executable, &[], &installation.root_dir)?;
    println!(
        "  {} Waiting for {} ({}s budget)...",
        "→".cyan(),
        probe.url(),
        timeout.as_secs()
    );
    let proc = supervisor.await_health(proc, probe, timeout, registry)?;
    println!("  {} {} is healthy", "✓".green(), name.color(color));
    Ok(proc)
}

/// Default plugin set, minus explicit exclusions.
fn select_plugins(requested: Option<&[String]>, excluded: &[String]) -> Vec<String> {
    let base: Vec<String> = match requested {
        Some(list) => list.to_vec(),
        None => DEFAULT_PLUGINS.iter().map(|s| s.to_string()).collect(),
    };
    base.into_iter()
        .filter(|slug| !excluded.contains(slug))
        .collect()
}

/// Parse `slug=source` override pairs.
fn parse_plugin_overrides(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for pair in pairs {
        let Some((slug, source)) = pair.split_once('=') else {
            bail!("invalid --plugin-source '{}' (expected slug=source)", pair);
        };
        overrides.insert(slug.trim().to_string(), source.trim().to_string());
    }
    Ok(overrides)
}

fn resolve_plugin_refs(
    slugs: &[String],
    overrides: &HashMap<String, String>,
    inherited_branch: Option<&str>,
) -> Result<Vec<(String, SourceRef)>> {
    let mut refs = Vec::new();
    for slug in slugs {
        let requested = overrides.get(slug).map(String::as_str);
        let source_ref = resolve_plugin_source(slug, requested, inherited_branch)?;
        refs.push((slug.clone(), source_ref));
    }
    Ok(refs)
}

/// Health probes and embedded endpoints cannot target the wildcard
/// address.
fn probe_host(host: &str) -> String {
    if host == "0.0.0.0" {
        "127.0.0.1".to_string()
    } else {
        host.to_string()
    }
}

fn engine_config_keys(
    request: &InstallRequest,
    security_enabled: bool,
) -> (Vec<String>, Vec<String>) {
    let remove = vec![
        "network.host".to_string(),
        "http.port".to_string(),
        "discovery.type".to_string(),
        "plugins.security.disabled".to_string(),
    ];
    let mut append = vec![
        format!("network.host: {}", request.host),
        format!("http.port: {}", request.port),
        "discovery.type: single-node".to_string(),
    ];
    if !security_enabled {
        append.push("plugins.security.disabled: true".to_string());
    }
    (remove, append)
}

fn dashboard_config_keys(
    request: &InstallRequest,
    engine_port: u16,
    scheme: &str,
    probe_host: &str,
) -> (Vec<String>, Vec<String>) {
    let remove = vec![
        "server.host".to_string(),
        "server.port".to_string(),
        "server.ssl".to_string(),
        "engine.hosts".to_string(),
        "engine.username".to_string(),
        "engine.password".to_string(),
        "engine.ssl".to_string(),
    ];
    let mut append = vec![
        format!("server.host: {}", request.host),
        format!("server.port: {}", request.port),
        format!(
            "engine.hosts: [\"{}://{}:{}\"]",
            scheme, probe_host, engine_port
        ),
    ];
    if let Some(creds) = &request.credentials {
        append.push(format!("engine.username: {}", creds.username));
        append.push(format!("engine.password: {}", creds.password));
        append.push("engine.ssl.verificationMode: none".to_string());
        append.push("server.ssl.enabled: true".to_string());
        append.push("server.ssl.certificate: config/certs/node.pem".to_string());
        append.push("server.ssl.key: config/certs/node-key.pem".to_string());
    }
    (remove, append)
}

fn describe_source(source: &SourceSpec) -> String {
    match source {
        SourceSpec::Release(v) => format!("release {}", v),
        SourceSpec::Source(r) => format!("source {}", r),
        SourceSpec::Local(p) => format!("local directory {}", p.display()),
    }
}

fn print_summary(running: &[ManagedProcess], opts: &UpOptions, scheme: &str) {
    println!("\n{} Cluster is up:", "✓".green().bold());
    for proc in running {
        let port = match proc.name() {
            "engine" => opts.engine_port,
            _ => opts.dashboard_port,
        };
        println!(
            "  • {} at {}://{}:{} (pid {})",
            proc.name().bold(),
            scheme,
            probe_host(&opts.host),
            port,
            proc.pid()
        );
    }
    println!("\n{} Press Ctrl+C to stop.\n", "→".dimmed());
}

/// Block until every supervised process has exited. Operator interrupts
/// bypass this loop entirely: the signal handler drains the registry and
/// exits the process.
fn wait_for_exit(running: &mut Vec<ManagedProcess>) {
    loop {
        running.retain_mut(|proc| match proc.try_wait() {
            Ok(Some(status)) => {
                eprintln!(
                    "\n{} [{}] exited with code {}",
                    "!".yellow(),
                    proc.name(),
                    status.code().unwrap_or(-1)
                );
                proc.join_output();
                false
            }
            Ok(None) => true,
            Err(e) => {
                eprintln!("\n{} Error checking [{}]: {}", "✗".red(), proc.name(), e);
                false
            }
        });

        if running.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_request(security: bool) -> InstallRequest {
        InstallRequest {
            kind: ServiceKind::Engine,
            source: SourceSpec::Release("2.13.0".into()),
            destination_root: PathBuf::from("/tmp/deckhand-test"),
            host: "0.0.0.0".into(),
            port: 9200,
            credentials: security.then(|| Credentials {
                username: "admin".into(),
                password: "admin".into(),
            }),
            refresh_cache: false,
        }
    }

    fn dashboard_request(security: bool) -> InstallRequest {
        InstallRequest {
            kind: ServiceKind::Dashboard,
            source: SourceSpec::Release("2.13.0".into()),
            destination_root: PathBuf::from("/tmp/deckhand-test"),
            host: "0.0.0.0".into(),
            port: 5601,
            credentials: security.then(|| Credentials {
                username: "admin".into(),
                password: "admin".into(),
            }),
            refresh_cache: false,
        }
    }

    #[test]
    fn default_plugin_set_minus_exclusions() {
        let selected = select_plugins(None, &["maps".to_string()]);
        assert!(!selected.contains(&"maps".to_string()));
        assert_eq!(selected.len(), DEFAULT_PLUGINS.len() - 1);

        let explicit = select_plugins(
            Some(&["alerting".to_string(), "maps".to_string()]),
            &["maps".to_string()],
        );
        assert_eq!(explicit, vec!["alerting".to_string()]);
    }

    #[test]
    fn plugin_overrides_parse_and_reject_garbage() {
        let parsed =
            parse_plugin_overrides(&["alerting=github:acme/custom-alerting/dev".to_string()])
                .unwrap();
        assert_eq!(
            parsed.get("alerting").map(String::as_str),
            Some("github:acme/custom-alerting/dev")
        );

        assert!(parse_plugin_overrides(&["alerting".to_string()]).is_err());
    }

    #[test]
    fn plugin_refs_inherit_the_source_branch() {
        let refs = resolve_plugin_refs(
            &["alerting".to_string(), "maps".to_string()],
            &HashMap::new(),
            Some("2.x"),
        )
        .unwrap();
        assert!(refs.iter().all(|(_, r)| r.branch == "2.x"));

        let overridden: HashMap<String, String> = HashMap::from([(
            "maps".to_string(),
            "github:acme/custom-maps/dev".to_string(),
        )]);
        let refs =
            resolve_plugin_refs(&["maps".to_string()], &overridden, Some("2.x")).unwrap();
        assert_eq!(refs[0].1.owner, "acme");
        assert_eq!(refs[0].1.branch, "dev");
    }

    #[test]
    fn engine_keys_toggle_security() {
        let (_, secure) = engine_config_keys(&engine_request(true), true);
        assert!(secure.iter().all(|k| !k.contains("security.disabled")));

        let (_, open) = engine_config_keys(&engine_request(false), false);
        assert!(open.contains(&"plugins.security.disabled: true".to_string()));
        assert!(open.contains(&"network.host: 0.0.0.0".to_string()));
        assert!(open.contains(&"http.port: 9200".to_string()));
    }

    #[test]
    fn dashboard_keys_embed_the_engine_endpoint() {
        let (remove, append) =
            dashboard_config_keys(&dashboard_request(true), 9200, "https", "127.0.0.1");
        assert!(remove.contains(&"engine.hosts".to_string()));
        assert!(remove.contains(&"server.ssl".to_string()));
        assert!(append.contains(&"engine.hosts: [\"https://127.0.0.1:9200\"]".to_string()));
        assert!(append.contains(&"engine.username: admin".to_string()));
        assert!(append.contains(&"server.port: 5601".to_string()));
        // With security on the dashboard serves TLS itself.
        assert!(append.contains(&"server.ssl.enabled: true".to_string()));
        assert!(append.contains(&"server.ssl.certificate: config/certs/node.pem".to_string()));

        let (_, open) = dashboard_config_keys(&dashboard_request(false), 9200, "http", "127.0.0.1");
        assert!(open.contains(&"engine.hosts: [\"http://127.0.0.1:9200\"]".to_string()));
        assert!(open.iter().all(|k| !k.contains("engine.username")));
        assert!(open.iter().all(|k| !k.contains("server.ssl")));
    }

    #[test]
    fn wildcard_hosts_probe_loopback() {
        assert_eq!(probe_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(probe_host("192.168.1.5"), "192.168.1.5");
    }
}
