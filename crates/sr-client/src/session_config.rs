//! Engine session document
//!
//! Turns a [`Server`] and the routing mode into the JSON configuration the
//! engine starts a session from: one proxy outbound, `direct` and `block`
//! outbounds, local SOCKS/HTTP inbounds (plus a transparent inbound for
//! system-wide mode) and routing rules that keep private ranges and the
//! configured countries off the proxy.

use serde_json::{json, Map, Value};

use sr_core::config::ClientConfig;
use sr_core::traits::SessionRequest;
use sr_core::{RoutingMode, Server, SrError};

pub const PROXY_TAG: &str = "proxy";
pub const DIRECT_TAG: &str = "direct";
pub const BLOCK_TAG: &str = "block";

/// Private, loopback, link-local, multicast and reserved ranges
pub const PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "100.64.0.0/10",
    "169.254.0.0/16",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

pub struct SessionConfigBuilder<'a> {
    config: &'a ClientConfig,
}

impl<'a> SessionConfigBuilder<'a> {
    pub fn new(config: &'a ClientConfig) -> Self {
        Self { config }
    }

    /// Full request for `server` in `mode`
    pub fn request(&self, server: &Server, mode: RoutingMode) -> Result<SessionRequest, SrError> {
        Ok(SessionRequest {
            server: server.clone(),
            routing_mode: mode,
            config: self.document(server, mode)?,
        })
    }

    /// Engine configuration document. Fails before anything is sent to the
    /// engine if the protocol is unknown.
    pub fn document(&self, server: &Server, mode: RoutingMode) -> Result<Value, SrError> {
        let outbound = build_outbound(server, PROXY_TAG)?;

        Ok(json!({
            "stats": {},
            "policy": {
                "system": {
                    "statsInboundUplink": true,
                    "statsInboundDownlink": true,
                    "statsOutboundUplink": true,
                    "statsOutboundDownlink": true
                }
            },
            "log": self.log_section(),
            "inbounds": self.inbounds(mode),
            "outbounds": [
                outbound,
                { "tag": DIRECT_TAG, "protocol": "freedom" },
                { "tag": BLOCK_TAG, "protocol": "blackhole" }
            ],
            "routing": {
                "domainStrategy": "IPIfNonMatch",
                "rules": self.rules()
            }
        }))
    }

    fn log_section(&self) -> Value {
        let path = |p: &Option<std::path::PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        json!({
            "loglevel": "warning",
            "access": path(&self.config.access_log),
            "error": path(&self.config.error_log)
        })
    }

    fn inbounds(&self, mode: RoutingMode) -> Vec<Value> {
        let mut inbounds = Vec::with_capacity(3);
        if mode == RoutingMode::SystemWide {
            inbounds.push(json!({
                "tag": "tun-in",
                "protocol": "dokodemo-door",
                "listen": "127.0.0.1",
                "port": self.config.tun_inbound_port(),
                "settings": { "network": "tcp,udp", "followRedirect": true },
                "sniffing": { "enabled": true, "destOverride": ["http", "tls", "quic"] }
            }));
        }
        inbounds.push(json!({
            "tag": "socks-in",
            "protocol": "socks",
            "listen": "127.0.0.1",
            "port": self.config.local_port,
            "settings": { "udp": true }
        }));
        inbounds.push(json!({
            "tag": "http-in",
            "protocol": "http",
            "listen": "127.0.0.1",
            "port": self.config.http_port()
        }));
        inbounds
    }

    fn rules(&self) -> Vec<Value> {
        let mut rules = vec![json!({
            "type": "field",
            "ip": PRIVATE_RANGES,
            "outboundTag": DIRECT_TAG
        })];

        if !self.config.direct_countries.is_empty() {
            let geoips: Vec<String> = self
                .config
                .direct_countries
                .iter()
                .map(|cc| format!("geoip:{}", cc))
                .collect();
            rules.push(json!({
                "type": "field",
                "ip": geoips,
                "outboundTag": DIRECT_TAG
            }));
        }

        rules.push(json!({
            "type": "field",
            "network": "tcp,udp",
            "outboundTag": PROXY_TAG
        }));
        rules
    }
}

/// Proxy outbound for `server`
pub fn build_outbound(server: &Server, tag: &str) -> Result<Value, SrError> {
    let outbound = match server.protocol.as_str() {
        "vmess" => {
            let security = if server.security.is_empty() {
                "auto"
            } else {
                server.security.as_str()
            };
            json!({
                "protocol": "vmess",
                "tag": tag,
                "settings": {
                    "vnext": [{
                        "address": server.address,
                        "port": server.port,
                        "users": [{ "id": server.uuid, "alterId": 0, "security": security }]
                    }]
                },
                "streamSettings": stream_settings(server)
            })
        }
        "vless" => json!({
            "protocol": "vless",
            "tag": tag,
            "settings": {
                "vnext": [{
                    "address": server.address,
                    "port": server.port,
                    "users": [{ "id": server.uuid, "encryption": "none", "flow": server.flow }]
                }]
            },
            "streamSettings": stream_settings(server)
        }),
        "trojan" => json!({
            "protocol": "trojan",
            "tag": tag,
            "settings": {
                "servers": [{
                    "address": server.address,
                    "port": server.port,
                    "password": server.password
                }]
            },
            "streamSettings": stream_settings(server)
        }),
        "shadowsocks" | "ss" => json!({
            "protocol": "shadowsocks",
            "tag": tag,
            "settings": {
                "servers": [{
                    "address": server.address,
                    "port": server.port,
                    "method": server.method,
                    "password": server.password
                }]
            }
        }),
        other => return Err(SrError::UnsupportedProtocol(other.to_string())),
    };
    Ok(outbound)
}

/// Transport and security settings
pub fn stream_settings(server: &Server) -> Value {
    let network = if server.network.is_empty() {
        "tcp"
    } else {
        server.network.as_str()
    };

    let mut stream = Map::new();
    stream.insert("network".into(), json!(network));

    if server.tls == "tls" || server.tls == "true" {
        let mut tls = Map::new();
        if !server.sni.is_empty() {
            tls.insert("serverName".into(), json!(server.sni));
        }
        if !server.fingerprint.is_empty() {
            tls.insert("fingerprint".into(), json!(server.fingerprint));
        }
        stream.insert("security".into(), json!("tls"));
        stream.insert("tlsSettings".into(), Value::Object(tls));
    } else if server.security == "reality" {
        stream.insert("security".into(), json!("reality"));
        stream.insert(
            "realitySettings".into(),
            json!({
                "serverName": server.sni,
                "fingerprint": server.fingerprint,
                "publicKey": server.public_key,
                "shortId": server.short_id
            }),
        );
    }

    match network {
        "ws" => {
            let mut ws = Map::new();
            if !server.path.is_empty() {
                ws.insert("path".into(), json!(server.path));
            }
            if !server.host.is_empty() {
                ws.insert("headers".into(), json!({ "Host": server.host }));
            }
            stream.insert("wsSettings".into(), Value::Object(ws));
        }
        "grpc" => {
            let mut grpc = Map::new();
            if !server.path.is_empty() {
                grpc.insert("serviceName".into(), json!(server.path));
            }
            stream.insert("grpcSettings".into(), Value::Object(grpc));
        }
        "h2" | "http" => {
            let mut http = Map::new();
            if !server.path.is_empty() {
                http.insert("path".into(), json!(server.path));
            }
            if !server.host.is_empty() {
                http.insert("host".into(), json!([server.host]));
            }
            stream.insert("httpSettings".into(), Value::Object(http));
        }
        _ => {}
    }

    Value::Object(stream)
}
