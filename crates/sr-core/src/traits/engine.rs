//! Proxy engine contract
//!
//! The engine is an external black box that owns the actual proxy sessions,
//! the virtual routing interface and the subscription parser. The client
//! core only ever talks to it through [`ProxyEngine`].

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::EngineError;
use crate::types::{RoutingMode, Server};

/// Opaque identifier of one engine-managed proxy session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of an engine-managed virtual interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceHandle(pub String);

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cumulative byte counters of a session since it began
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub upload: u64,
    pub download: u64,
}

/// Whether a tagged counter belongs to an engine inbound or outbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for TagDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TagDirection::Inbound => "inbound",
            TagDirection::Outbound => "outbound",
        })
    }
}

/// Byte counters of one inbound or outbound, keyed by its engine tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCounters {
    pub tag: String,
    pub direction: TagDirection,
    #[serde(flatten)]
    pub counters: TrafficCounters,
}

/// Reply to a counter query: session totals plus the per-tag breakdown.
///
/// Engines that do not report tags leave `tags` empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReport {
    #[serde(flatten)]
    pub totals: TrafficCounters,
    #[serde(default)]
    pub tags: Vec<TagCounters>,
}

impl CounterReport {
    /// Tags in display order: inbounds first, then outbounds, each by name
    pub fn sorted_tags(mut self) -> Vec<TagCounters> {
        self.tags
            .sort_by(|a, b| (a.direction, &a.tag).cmp(&(b.direction, &b.tag)));
        self.tags
    }
}

/// Everything the engine needs to start a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Server the session proxies through
    pub server: Server,
    /// Routing mode at the time of the request
    pub routing_mode: RoutingMode,
    /// Engine configuration document
    pub config: serde_json::Value,
}

/// Parameters of the virtual routing interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub name: String,
    pub addresses: Vec<String>,
    pub mtu: u32,
    /// Engine outbound that interface traffic is handed to
    pub outbound_tag: String,
}

/// A single server to probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&Server> for ProbeTarget {
    fn from(server: &Server) -> Self {
        Self {
            address: server.address.clone(),
            port: server.port,
            name: (!server.name.is_empty()).then(|| server.name.clone()),
        }
    }
}

/// Outcome of probing one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyResult {
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u32>,
    pub succeeded: bool,
}

impl LatencyResult {
    /// Successful probe of `target`
    pub fn success(target: ProbeTarget, latency_ms: u32) -> Self {
        Self {
            address: target.address,
            port: target.port,
            name: target.name,
            latency_ms: Some(latency_ms),
            succeeded: true,
        }
    }

    /// Failed or timed-out probe of `target`
    pub fn failure(target: ProbeTarget) -> Self {
        Self {
            address: target.address,
            port: target.port,
            name: target.name,
            latency_ms: None,
            succeeded: false,
        }
    }
}

/// Abstraction over the proxy engine
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    /// Start a proxy session
    async fn begin_session(&self, request: &SessionRequest)
        -> Result<SessionHandle, EngineError>;

    /// Stop a proxy session. Ending an unknown session is not an error.
    async fn end_session(&self, session: &SessionHandle) -> Result<(), EngineError>;

    /// Cumulative traffic counters of a session
    async fn query_counters(&self, session: &SessionHandle)
        -> Result<CounterReport, EngineError>;

    /// Measure round-trip latency to a server in milliseconds
    async fn probe_reachability(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<u32, EngineError>;

    /// Probe many servers with at most `concurrency` probes in flight.
    ///
    /// Each attempt is bounded by `timeout` on this side as well, so a
    /// stuck engine call yields a failed result rather than stalling the
    /// batch. Results are in target order.
    async fn probe_batch(
        &self,
        targets: &[ProbeTarget],
        concurrency: usize,
        timeout: Duration,
    ) -> Result<Vec<LatencyResult>, EngineError> {
        let permits = Semaphore::new(concurrency.max(1));
        let probes = targets.iter().cloned().map(|target| {
            let permits = &permits;
            async move {
                // Never closed, so acquiring only waits for a free slot
                let _permit = permits.acquire().await;
                let attempt = self.probe_reachability(&target.address, target.port, timeout);
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(Ok(ms)) => LatencyResult::success(target, ms),
                    Ok(Err(_)) | Err(_) => LatencyResult::failure(target),
                }
            }
        });
        Ok(join_all(probes).await)
    }

    /// Create the virtual routing interface
    async fn enable_routing_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<InterfaceHandle, EngineError>;

    /// Hand interface traffic to a session's outbound
    async fn attach_interface(
        &self,
        iface: &InterfaceHandle,
        session: &SessionHandle,
        outbound_tag: &str,
    ) -> Result<(), EngineError>;

    /// Route system traffic into the interface, excluding the proxy server
    async fn install_routes(
        &self,
        iface: &InterfaceHandle,
        exclude_address: &str,
    ) -> Result<(), EngineError>;

    /// Undo [`install_routes`](ProxyEngine::install_routes)
    async fn remove_routes(&self, iface: &InterfaceHandle) -> Result<(), EngineError>;

    /// Undo [`attach_interface`](ProxyEngine::attach_interface)
    async fn detach_interface(&self, iface: &InterfaceHandle) -> Result<(), EngineError>;

    /// Destroy one interface
    async fn close_interface(&self, iface: &InterfaceHandle) -> Result<(), EngineError>;

    /// Destroy every interface the engine knows about
    async fn close_all_interfaces(&self) -> Result<(), EngineError>;

    /// Fetch and parse a subscription into servers
    async fn fetch_catalog(&self, url: &str) -> Result<Vec<Server>, EngineError>;

    /// Engine version string
    async fn version(&self) -> Result<String, EngineError>;
}
