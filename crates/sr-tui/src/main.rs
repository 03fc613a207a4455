//! superray-tui CLI
//!
//! With no subcommand the interactive screen opens. Headless subcommands:
//! - `servers` lists (and optionally ranks) the subscription's servers
//! - `config` shows, locates or initializes the configuration file

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sr_client::{install_panic_hook, Controller, EngineClient};
use sr_core::config::ClientConfig;
use sr_core::traits::{PrivilegeProbe, SystemPrivileges};
use sr_core::{ProxyEngine, RoutingMode};
use superray_tui::commands::{self, ConfigOverrides};
use superray_tui::output::print_error;
use superray_tui::ui;

#[derive(Parser)]
#[command(name = "superray-tui")]
#[command(author, version, about = "Terminal client for the SuperRay proxy engine")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subscription URL (overrides config and SUPERRAY_SUB_URL)
    #[arg(long, global = true)]
    subscription: Option<String>,

    /// Engine control address (overrides config and SUPERRAY_ENGINE_ADDR)
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Local SOCKS5 port; HTTP uses the next port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Start in system-wide routing mode (requires root)
    #[arg(long, global = true)]
    system_wide: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive screen (default)
    Run,

    /// Fetch the subscription and list its servers
    Servers {
        /// Test latency and sort by it
        #[arg(long)]
        probe: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the configuration file
    Show,
    /// Show the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    let overrides = ConfigOverrides {
        subscription_url: cli.subscription.clone(),
        engine_address: cli.engine.clone(),
        local_port: cli.port,
        system_wide: cli.system_wide,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Config { action } => {
            init_logging(log_level, None)?;
            match action {
                ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
                ConfigAction::Path => commands::config_path(cli.config.as_ref()),
                ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
            }
        }
        Commands::Servers { probe } => {
            let config = commands::load_client_config(cli.config.as_ref(), &overrides)?;
            init_logging(log_level, None)?;
            let controller = build_controller(config)?;
            commands::servers_command(&controller, probe).await?;
        }
        Commands::Run => {
            let config = commands::load_client_config(cli.config.as_ref(), &overrides)?;
            // The screen owns the terminal, so logs go to a file
            init_logging(log_level, Some(&config.log_file))?;
            install_panic_hook();
            tracing::info!("superray-tui {} starting", env!("CARGO_PKG_VERSION"));

            let controller = build_controller(config)?;
            if let Err(e) = ui::run(controller).await {
                print_error(&format!("Terminal error: {}", e));
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Install the global subscriber, writing to `log_file` when given and to
/// stderr otherwise.
fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
    );

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let stderr_layer = log_file.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn build_controller(config: ClientConfig) -> Result<Arc<Controller>> {
    let privileges = Arc::new(SystemPrivileges);
    if config.routing_mode == RoutingMode::SystemWide && !privileges.is_elevated() {
        anyhow::bail!("System-wide routing requires root privileges (try sudo, or drop --system-wide)");
    }

    tracing::debug!("Using engine at {}", config.engine_address);
    let engine: Arc<dyn ProxyEngine> = Arc::new(EngineClient::new(config.engine_address.clone()));
    Ok(Controller::new(config, engine, privileges))
}
