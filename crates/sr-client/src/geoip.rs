//! GeoIP lookup for the selected server

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sr_core::config::GeoIpConfig;
use sr_core::ServerKey;

use crate::state::ClientState;

const FIELDS: &str = "status,country,countryCode,region,regionName,city,isp,org,as,asname,query";

/// Location record as returned by the lookup endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoInfo {
    pub ip: String,
    pub country: String,
    #[serde(rename = "countryCode")]
    pub country_code: String,
    pub region: String,
    #[serde(rename = "regionName")]
    pub region_name: String,
    pub city: String,
    pub isp: String,
    pub org: String,
    #[serde(rename = "as")]
    pub as_number: String,
    #[serde(rename = "asname")]
    pub as_name: String,
    pub query: String,
    pub status: String,
}

impl GeoInfo {
    /// Placeholder for a failed lookup
    pub fn unknown(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            country: "Unknown".to_string(),
            status: "fail".to_string(),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Country and city, e.g. `Japan Tokyo`
    pub fn format_location(&self) -> String {
        if !self.is_success() {
            return "Unknown".to_string();
        }
        let mut location = self.country.clone();
        if !self.city.is_empty() && self.city != self.country {
            if !location.is_empty() {
                location.push(' ');
            }
            location.push_str(&self.city);
        }
        location
    }

    /// Organization, falling back to ISP and then AS name
    pub fn format_org(&self) -> &str {
        [&self.org, &self.isp, &self.as_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Cached lookups against an ip-api compatible endpoint
pub struct GeoIpResolver {
    client: reqwest::Client,
    config: GeoIpConfig,
    cache: DashMap<String, (Instant, GeoInfo)>,
}

impl GeoIpResolver {
    pub fn new(config: GeoIpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            cache: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up `host`, resolving it first when it is not an IP address.
    /// Never fails; an unknown record is returned instead.
    pub async fn lookup(&self, host: &str) -> GeoInfo {
        let ip = match resolve(host).await {
            Some(ip) => ip.to_string(),
            None => return GeoInfo::unknown(host),
        };

        if let Some(entry) = self.cache.get(&ip) {
            let (stored_at, info) = entry.value();
            if stored_at.elapsed() < self.config.cache_ttl {
                return info.clone();
            }
        }

        let info = self.query(&ip).await;
        self.cache.insert(ip, (Instant::now(), info.clone()));
        info
    }

    async fn query(&self, ip: &str) -> GeoInfo {
        let url = format!(
            "{}/{}?fields={}",
            self.config.endpoint.trim_end_matches('/'),
            ip,
            FIELDS
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(%ip, status = %response.status(), "GeoIP lookup rejected");
                return GeoInfo::unknown(ip);
            }
            Err(e) => {
                tracing::debug!(%ip, "GeoIP lookup failed: {}", e);
                return GeoInfo::unknown(ip);
            }
        };

        match response.json::<GeoInfo>().await {
            Ok(mut info) => {
                info.ip = ip.to_string();
                info
            }
            Err(e) => {
                tracing::debug!(%ip, "GeoIP response undecodable: {}", e);
                GeoInfo::unknown(ip)
            }
        }
    }

    /// Resolve the selected server and publish the result, unless the
    /// selection moved on while the lookup ran.
    pub async fn refresh_selected(self: Arc<Self>, state: Arc<ClientState>) {
        if !self.enabled() {
            return;
        }
        let selected = {
            let shared = state.read();
            shared.catalog.selected().map(|s| s.key())
        };
        let Some(key) = selected else {
            return;
        };
        let info = self.lookup(&key.address).await;
        apply_if_selected(&state, key, info);
    }

    #[cfg(test)]
    fn expire_all(&self, by: std::time::Duration) {
        for mut entry in self.cache.iter_mut() {
            let (stored_at, _) = entry.value_mut();
            *stored_at = stored_at.checked_sub(by).unwrap_or(*stored_at);
        }
    }
}

fn apply_if_selected(state: &ClientState, key: ServerKey, info: GeoInfo) {
    state.update(|shared| {
        if shared.catalog.selected().map(|s| s.key()).as_ref() == Some(&key) {
            shared.geo = Some((key, info));
        }
    });
}

async fn resolve(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .ok()?
        .next()
        .map(|addr| addr.ip())
}
