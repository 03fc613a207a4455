//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a server inside the catalog.
///
/// Entries are matched by address and port, never by position, so that
/// selections and probe results survive re-sorting and catalog refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerKey {
    pub address: String,
    pub port: u16,
}

impl ServerKey {
    /// Create a new server key
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Result of the most recent latency probe for a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Latency {
    /// Never probed
    #[default]
    Untested,
    /// Probe succeeded with the given round trip in milliseconds
    Measured(u32),
    /// Probe failed, timed out, or produced no result for this server
    TimedOut,
}

impl Latency {
    /// Measured latency in milliseconds, if any
    pub fn millis(&self) -> Option<u32> {
        match self {
            Latency::Measured(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Whether a probe has produced a usable measurement
    pub fn is_measured(&self) -> bool {
        matches!(self, Latency::Measured(_))
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Untested => write!(f, "-"),
            Latency::Measured(ms) => write!(f, "{}ms", ms),
            Latency::TimedOut => write!(f, "timeout"),
        }
    }
}

/// A proxy server as delivered by the engine's subscription parser.
///
/// Everything except `latency` is immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    /// Human-readable name
    pub name: String,
    /// Protocol kind (`vmess`, `vless`, `trojan`, `shadowsocks`/`ss`, ...)
    pub protocol: String,
    pub address: String,
    pub port: u16,

    // Credentials
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    /// Shadowsocks cipher
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// VLESS flow control
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flow: String,
    /// VMess security or `reality`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub security: String,
    #[serde(rename = "alter_id", skip_serializing_if = "is_zero")]
    pub alter_id: u32,

    // Transport
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tls: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sni: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alpn: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(rename = "header_type", skip_serializing_if = "String::is_empty")]
    pub header_type: String,

    // Reality
    #[serde(rename = "publicKey", skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    #[serde(rename = "shortId", skip_serializing_if = "String::is_empty")]
    pub short_id: String,

    /// Original share link, if the engine kept it
    #[serde(skip_serializing_if = "String::is_empty")]
    pub link: String,

    /// Client-side probe state; never part of the engine payload
    #[serde(skip)]
    pub latency: Latency,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Server {
    /// Create a server with the minimum identifying fields
    pub fn new(
        name: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    /// Identity key (address + port)
    pub fn key(&self) -> ServerKey {
        ServerKey::new(self.address.clone(), self.port)
    }

    /// Whether this server has the given identity
    pub fn matches(&self, address: &str, port: u16) -> bool {
        self.address == address && self.port == port
    }

    /// Name for display, falling back to `address:port`
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.address, self.port)
        } else {
            self.name.clone()
        }
    }
}

/// Which traffic the proxy session covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// Only applications configured to use the local SOCKS/HTTP ports
    #[default]
    DirectProxy,
    /// All system traffic through a virtual network interface
    SystemWide,
}

impl RoutingMode {
    /// The other mode
    pub fn toggled(self) -> Self {
        match self {
            RoutingMode::DirectProxy => RoutingMode::SystemWide,
            RoutingMode::SystemWide => RoutingMode::DirectProxy,
        }
    }

    /// Short label for the status line
    pub fn label(&self) -> &'static str {
        match self {
            RoutingMode::DirectProxy => "SOCKS5",
            RoutingMode::SystemWide => "TUN",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingMode::DirectProxy => write!(f, "direct-proxy"),
            RoutingMode::SystemWide => write!(f, "system-wide"),
        }
    }
}

/// Lifecycle status of the proxy session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No session
    #[default]
    Disconnected,
    /// Session is being established
    Connecting,
    /// Session is established
    Connected,
    /// Session is being torn down
    Disconnecting,
}

impl ConnectionStatus {
    /// Whether a lifecycle transition is currently in flight
    pub fn in_transition(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Disconnecting => write!(f, "disconnecting"),
        }
    }
}
