use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::generate;
use colored::*;
use std::io;
use std::path::PathBuf;

use deckhand_manager::{commands, version};

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "Deckhand - provision and launch a local engine + dashboard cluster")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision and launch the cluster, then supervise it
    Up {
        /// Engine to run: release version, source reference, or local path
        #[arg(long = "engine", default_value = "2.13.0")]
        engine: String,

        /// Dashboard to run: release version, source reference, or local path
        #[arg(long = "dashboard", default_value = "2.13.0")]
        dashboard: String,

        /// Address both services bind to
        #[arg(long = "host", default_value = "0.0.0.0")]
        host: String,

        /// Engine HTTP port
        #[arg(long = "engine-port", default_value_t = 9200)]
        engine_port: u16,

        /// Dashboard HTTP port
        #[arg(long = "dashboard-port", default_value_t = 5601)]
        dashboard_port: u16,

        /// Cluster admin username
        #[arg(short = 'u', long = "username", default_value = "admin")]
        username: String,

        /// Cluster admin password
        #[arg(short = 'p', long = "password", default_value = "admin")]
        password: String,

        /// Dashboard plugins to include (defaults to the official set)
        #[arg(long = "plugins", value_delimiter = ',')]
        plugins: Option<Vec<String>>,

        /// Plugins to leave out of the default set
        #[arg(long = "exclude-plugin")]
        exclude_plugins: Vec<String>,

        /// Per-plugin source override, as slug=source (repeatable)
        #[arg(long = "plugin-source")]
        plugin_sources: Vec<String>,

        /// Re-download release archives even when cached
        #[arg(long = "refresh-cache")]
        refresh_cache: bool,

        /// Disable the security plugin and credentials
        #[arg(long = "no-security")]
        no_security: bool,

        /// Skip the external build step for source and local trees
        #[arg(long = "skip-build")]
        skip_build: bool,

        /// Do not start an engine; use one that is already running
        #[arg(long = "skip-engine")]
        skip_engine: bool,

        /// Seconds to wait for each service to become healthy
        #[arg(long = "timeout", default_value_t = 300)]
        timeout: u64,

        /// Directory installations are placed under
        #[arg(long = "root", default_value = "./cluster")]
        root: PathBuf,
    },

    /// Manage the artifact cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Generate shell completion scripts
    #[command(hide = true)]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached release archives
    List,
    /// Remove every cached archive
    Clean,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deckhand=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run_command(cli.command) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Up {
            engine,
            dashboard,
            host,
            engine_port,
            dashboard_port,
            username,
            password,
            plugins,
            exclude_plugins,
            plugin_sources,
            refresh_cache,
            no_security,
            skip_build,
            skip_engine,
            timeout,
            root,
        } => commands::up::execute_up(commands::up::UpOptions {
            engine,
            dashboard,
            host,
            engine_port,
            dashboard_port,
            username,
            password,
            plugins,
            exclude_plugins,
            plugin_sources,
            refresh_cache,
            no_security,
            skip_build,
            skip_engine,
            timeout_secs: timeout,
            root,
        }),

        Commands::Cache { command } => match command {
            CacheCommands::List => commands::cache::execute_list(),
            CacheCommands::Clean => commands::cache::execute_clean(),
        },

        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }

        Commands::Version => {
            version::print_version_info();
            Ok(())
        }
    }
}
