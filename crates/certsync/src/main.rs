//! certsync - Main entry point
//!
//! Mirrors certificates issued by a Traefik ACME resolver into plain key and
//! certificate files, and points a live config file at them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use certsync::{SignalManager, Supervisor};
use certsync_common::{init_tracing, DomainName, LogFormat};
use certsync_config::{preflight, ConfigOverrides, SyncConfig};

/// certsync - Traefik ACME certificate sync
#[derive(Parser, Debug)]
#[command(name = "certsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short = 'c', long = "config", env = "CERTSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Scan once and exit (exit code 1 when nothing was synced)
    #[arg(long = "once")]
    once: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format: text or json
    #[arg(long = "log-format", env = "CERTSYNC_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that take precedence over the configuration file
#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Directory holding the ACME certificate store
    #[arg(long = "watch-dir", env = "TRAEFIK_CERTS_PATH", global = true)]
    watch_dir: Option<PathBuf>,

    /// Directory receiving <domain>.key and <domain>.crt
    #[arg(long = "output-dir", env = "CERT_OUTPUT_DIR", global = true)]
    output_dir: Option<PathBuf>,

    /// Domain whose certificate is mirrored
    #[arg(long = "domain", env = "DOMAIN", global = true)]
    domain: Option<DomainName>,

    /// Live config file whose key/certificate paths are patched
    #[arg(long = "live-config", env = "CONFIG_PATH", global = true)]
    live_config: Option<PathBuf>,

    /// Quiet period before a changed document is processed
    #[arg(long = "stability-ms", env = "CERTSYNC_STABILITY_MS", global = true)]
    stability_ms: Option<u64>,

    /// Size polling interval while waiting for quiet
    #[arg(long = "poll-ms", env = "CERTSYNC_POLL_MS", global = true)]
    poll_ms: Option<u64>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            watch_dir: args.watch_dir,
            output_dir: args.output_dir,
            domain: args.domain,
            live_config: args.live_config,
            stability_threshold_ms: args.stability_ms,
            poll_interval_ms: args.poll_ms,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit
    Check,
    /// Scan the watch directory once and exit
    Scan,
    /// Scan, then watch for changes (default)
    Run,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config_path = cli.config.as_deref();

    // Handle test flag or check subcommand
    if cli.test || matches!(cli.command, Some(Commands::Check)) {
        return test_config(config_path, cli.overrides.into());
    }

    let config = load_config(config_path, cli.overrides.into())?;

    match cli.command {
        Some(Commands::Scan) => scan(config),
        _ if cli.once => scan(config),
        _ => run(config),
    }
}

fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<SyncConfig> {
    match path {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("No configuration file specified, using defaults and environment"),
    }

    let config = SyncConfig::load(path, overrides).context("Failed to load configuration")?;

    for warning in preflight(&config).warnings {
        warn!("{}", warning);
    }
    Ok(config)
}

/// Test configuration and exit
fn test_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<ExitCode> {
    let config = SyncConfig::load(path, overrides).context("Configuration validation failed")?;
    let result = preflight(&config);

    info!("Configuration summary:");
    info!("  - domain: {}", config.domain);
    info!("  - watch dir: {}", config.watch_dir.display());
    info!("  - output dir: {}", config.output_dir.display());
    info!("  - live config: {}", config.live_config.display());
    info!(
        "  - debounce: {}ms stable, {}ms poll",
        config.debounce.stability_threshold_ms, config.debounce.poll_interval_ms
    );

    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        error!("{}", error);
    }

    let source = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    if result.is_ok() {
        println!("certsync: configuration {} test is successful", source);
        Ok(ExitCode::SUCCESS)
    } else {
        println!(
            "certsync: configuration {} test failed with {} error(s)",
            source,
            result.errors.len()
        );
        Ok(ExitCode::FAILURE)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Scan once and exit
fn scan(config: SyncConfig) -> Result<ExitCode> {
    let supervisor = Supervisor::new(config).context("Failed to build config patcher")?;
    let report = runtime()?.block_on(supervisor.rescan());

    Ok(if report.any_synced() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Scan, then watch until SIGINT/SIGTERM
fn run(config: SyncConfig) -> Result<ExitCode> {
    let supervisor = Supervisor::new(config).context("Failed to build config patcher")?;
    let runtime = runtime()?;

    runtime.block_on(async {
        let signals = SignalManager::install().context("Failed to register signal handlers")?;
        supervisor.run(signals).await.context("Certificate sync failed")
    })?;

    Ok(ExitCode::SUCCESS)
}
