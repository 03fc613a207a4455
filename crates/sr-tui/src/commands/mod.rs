//! CLI command implementations

mod config;
mod servers;

pub use config::{config_init, config_path, config_show, load_client_config, ConfigOverrides};
pub use servers::servers_command;
