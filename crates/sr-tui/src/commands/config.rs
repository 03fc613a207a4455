//! Config command implementations and config loading

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use sr_core::config::{self, ClientConfig};
use sr_core::RoutingMode;

/// Values given on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub subscription_url: Option<String>,
    pub engine_address: Option<String>,
    pub local_port: Option<u16>,
    pub system_wide: bool,
}

impl ConfigOverrides {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.subscription_url {
            config.subscription_url = Some(url.clone());
        }
        if let Some(address) = &self.engine_address {
            config.engine_address = address.clone();
        }
        if let Some(port) = self.local_port {
            config.local_port = port;
        }
        if self.system_wide {
            config.routing_mode = RoutingMode::SystemWide;
        }
    }
}

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Build the effective configuration: defaults, then the TOML file, then
/// `.env` and process environment, then command-line flags.
///
/// An explicitly named file must exist; a missing default file just means
/// defaults.
pub fn load_client_config(
    config_path: Option<&PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<ClientConfig> {
    let mut config = match config_path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path)
                    .with_context(|| format!("Failed to load config from {:?}", default_path))?
            } else {
                tracing::debug!("No config file at {:?}, using defaults", default_path);
                ClientConfig::default()
            }
        }
    };

    config
        .apply_environment()
        .context("Invalid environment configuration")?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Show the configuration file
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'superray-tui config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    if let Err(e) = toml::from_str::<ClientConfig>(&content) {
        print_warning(&format!("File does not parse as a client config: {}", e));
    }

    Ok(())
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_path(config_path).display());
}

/// Write a default configuration file
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve_path(config_path);
    let config_dir = config_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_dir);

    if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        print_success(&format!("Created config directory: {:?}", config_dir));
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    let content = generate_default_config()?;
    std::fs::write(&config_file, content)
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    print_info("Set subscription_url (or SUPERRAY_SUB_URL) to load servers");

    Ok(())
}

fn generate_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&ClientConfig::default())
        .context("Failed to serialize default configuration")?;
    Ok(format!(
        "# superray-tui configuration\n\
         #\n\
         # Environment variables SUPERRAY_SUB_URL, SUPERRAY_LOCAL_PORT and\n\
         # SUPERRAY_ENGINE_ADDR override the values below.\n\
         # subscription_url = \"https://example.com/subscription\"\n\n{}",
        body
    ))
}
