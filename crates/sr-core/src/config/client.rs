//! Client configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use crate::traits::InterfaceSpec;
use crate::types::RoutingMode;

pub const ENV_SUB_URL: &str = "SUPERRAY_SUB_URL";
pub const ENV_LOCAL_PORT: &str = "SUPERRAY_LOCAL_PORT";
pub const ENV_ENGINE_ADDR: &str = "SUPERRAY_ENGINE_ADDR";
pub const ENV_ACCESS_LOG: &str = "ACCESS_LOG";
pub const ENV_ERROR_LOG: &str = "ERROR_LOG";
pub const ENV_DIRECT_COUNTRIES: &str = "DIRECT_COUNTRIES";

/// Configuration for the terminal client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of the engine daemon's control port
    pub engine_address: String,

    /// Subscription URL the catalog is fetched from
    pub subscription_url: Option<String>,

    /// Local SOCKS5 port. HTTP listens on `local_port + 1`.
    pub local_port: u16,

    /// Routing mode used for the next connect
    pub routing_mode: RoutingMode,

    /// Country codes whose traffic bypasses the proxy
    pub direct_countries: Vec<String>,

    /// Engine access log path
    pub access_log: Option<PathBuf>,

    /// Engine error log path
    pub error_log: Option<PathBuf>,

    /// Where the interactive client writes its own log
    pub log_file: PathBuf,

    /// Upper bound on establishing a session
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Upper bound on destroying a session
    #[serde(with = "duration_secs")]
    pub teardown_timeout: Duration,

    #[serde(with = "duration_secs")]
    pub telemetry_interval: Duration,

    /// Number of traffic samples kept for the chart
    pub history_capacity: usize,

    pub probe: ProbeConfig,

    pub routing: RoutingConfig,

    pub geoip: GeoIpConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            engine_address: "127.0.0.1:10890".to_string(),
            subscription_url: None,
            local_port: 10808,
            routing_mode: RoutingMode::DirectProxy,
            direct_countries: vec!["cn".to_string()],
            access_log: None,
            error_log: None,
            log_file: super::default_config_dir().join("superray-tui.log"),
            connect_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(10),
            telemetry_interval: Duration::from_secs(1),
            history_capacity: 300,
            probe: ProbeConfig::default(),
            routing: RoutingConfig::default(),
            geoip: GeoIpConfig::default(),
        }
    }
}

/// Latency probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Maximum probes in flight
    pub concurrency: usize,

    /// Per-attempt timeout
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Virtual interface used in system-wide mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub interface_name: String,
    pub addresses: Vec<String>,
    pub mtu: u32,
    /// Engine outbound that interface traffic is sent through
    pub outbound_tag: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            interface_name: "tun0".to_string(),
            addresses: vec!["10.255.0.1/24".to_string()],
            mtu: 1500,
            outbound_tag: "proxy".to_string(),
        }
    }
}

impl RoutingConfig {
    /// Interface parameters handed to the engine
    pub fn interface_spec(&self) -> InterfaceSpec {
        InterfaceSpec {
            name: self.interface_name.clone(),
            addresses: self.addresses.clone(),
            mtu: self.mtu,
            outbound_tag: self.outbound_tag.clone(),
        }
    }
}

/// GeoIP lookup for the selected server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    pub enabled: bool,

    /// Base URL; the IP is appended as a path segment
    pub endpoint: String,

    /// How long a lookup stays cached
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,

    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://ip-api.com/json".to_string(),
            cache_ttl: Duration::from_secs(30 * 60),
            timeout: Duration::from_millis(5000),
        }
    }
}

impl ClientConfig {
    /// Local HTTP proxy port
    pub fn http_port(&self) -> u16 {
        self.local_port.saturating_add(1)
    }

    /// Port of the transparent inbound used by the virtual interface
    pub fn tun_inbound_port(&self) -> u16 {
        self.local_port.saturating_add(10)
    }

    /// Apply `.env` files and process environment on top of this config.
    ///
    /// The first `.env` found (current directory, then next to the
    /// executable) is used. Process environment wins over `.env` values.
    pub fn apply_environment(&mut self) -> Result<(), ConfigError> {
        let mut candidates = vec![PathBuf::from(".env")];
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(dir.join(".env"));
        }

        let dotenv: HashMap<String, String> = candidates
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .map(|content| parse_dotenv(&content).into_iter().collect())
            .unwrap_or_default();

        self.apply_env_with(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| dotenv.get(key).cloned())
        })
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_SUB_URL) {
            self.subscription_url = Some(url);
        }
        if let Some(port) = get(ENV_LOCAL_PORT) {
            self.local_port = port.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{} is not a valid port: {}", ENV_LOCAL_PORT, port))
            })?;
        }
        if let Some(addr) = get(ENV_ENGINE_ADDR) {
            self.engine_address = addr;
        }
        if let Some(path) = get(ENV_ACCESS_LOG) {
            self.access_log = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_ERROR_LOG) {
            self.error_log = Some(PathBuf::from(path));
        }
        if let Some(countries) = get(ENV_DIRECT_COUNTRIES) {
            self.direct_countries = countries
                .split(',')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect();
        }

        Ok(())
    }
}

/// Parse `KEY=value` lines in `.env` syntax.
///
/// - blank lines and `#` comment lines are skipped, as are lines without `=`
/// - an optional `export ` prefix is accepted
/// - single-quoted values are literal
/// - double-quoted values understand `\n`, `\t`, `\r`, `\"` and `\\`
/// - unquoted values end at a ` #` inline comment
///
/// Lines with an unterminated quote are skipped.
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content.lines().filter_map(parse_dotenv_line).collect()
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_string(), dotenv_value(value.trim())?))
}

fn dotenv_value(raw: &str) -> Option<String> {
    if let Some(rest) = raw.strip_prefix('\'') {
        let end = rest.find('\'')?;
        return Some(rest[..end].to_string());
    }

    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return Some(value),
                '\\' => match chars.next()? {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    other => value.push(other),
                },
                c => value.push(c),
            }
        }
        return None;
    }

    if raw.starts_with('#') {
        return Some(String::new());
    }
    let end = raw
        .char_indices()
        .zip(raw.chars().skip(1))
        .find(|((_, c), next)| c.is_whitespace() && *next == '#')
        .map(|((i, _), _)| i)
        .unwrap_or(raw.len());
    Some(raw[..end].trim_end().to_string())
}
