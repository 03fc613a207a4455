//! Engine daemon client
//!
//! Speaks the line-delimited JSON control protocol from
//! [`sr_core::protocol`] over TCP. Each request opens its own connection,
//! writes one line and reads one reply line.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use sr_core::error::EngineError;
use sr_core::protocol::{EngineReply, EngineRequest, InterfaceCreated, ProbeReply, SessionStarted};
use sr_core::traits::{
    CounterReport, InterfaceHandle, InterfaceSpec, SessionHandle, SessionRequest,
};
use sr_core::{ProxyEngine, Server};

/// Upper bound on a single request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// [`ProxyEngine`] backed by the engine daemon's control port
#[derive(Debug, Clone)]
pub struct EngineClient {
    address: String,
    request_timeout: Duration,
}

impl EngineClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one request and read its reply envelope
    async fn call(&self, request: EngineRequest) -> Result<EngineReply, EngineError> {
        match tokio::time::timeout(self.request_timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(self.request_timeout)),
        }
    }

    async fn exchange(&self, request: &EngineRequest) -> Result<EngineReply, EngineError> {
        tracing::trace!(address = %self.address, ?request, "Engine request");

        let mut stream = TcpStream::connect(&self.address).await.map_err(|e| {
            EngineError::Unavailable(format!(
                "failed to connect to engine at {}: {}",
                self.address, e
            ))
        })?;

        let mut line =
            serde_json::to_string(request).map_err(|e| EngineError::Protocol(e.to_string()))?;
        line.push('\n');

        let (reader, mut writer) = stream.split();
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        let n = reader
            .read_line(&mut response)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        if n == 0 {
            return Err(EngineError::Unavailable(
                "engine closed the connection without replying".to_string(),
            ));
        }

        serde_json::from_str(response.trim_end())
            .map_err(|e| EngineError::Protocol(format!("undecodable reply: {}", e)))
    }
}

#[async_trait]
impl ProxyEngine for EngineClient {
    async fn begin_session(
        &self,
        request: &SessionRequest,
    ) -> Result<SessionHandle, EngineError> {
        let started: SessionStarted = self
            .call(EngineRequest::BeginSession {
                config: request.config.clone(),
            })
            .await?
            .into_data()?;
        Ok(SessionHandle(started.session_id))
    }

    async fn end_session(&self, session: &SessionHandle) -> Result<(), EngineError> {
        self.call(EngineRequest::EndSession {
            session_id: session.0.clone(),
        })
        .await?
        .into_unit()
    }

    async fn query_counters(
        &self,
        session: &SessionHandle,
    ) -> Result<CounterReport, EngineError> {
        self.call(EngineRequest::QueryCounters {
            session_id: session.0.clone(),
        })
        .await?
        .into_data()
    }

    async fn probe_reachability(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<u32, EngineError> {
        let reply: ProbeReply = self
            .call(EngineRequest::Probe {
                address: address.to_string(),
                port,
                timeout_ms: timeout.as_millis() as u64,
            })
            .await?
            .into_data()?;
        Ok(reply.latency_ms)
    }

    async fn enable_routing_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<InterfaceHandle, EngineError> {
        let created: InterfaceCreated = self
            .call(EngineRequest::CreateInterface(spec.clone()))
            .await?
            .into_data()?;
        Ok(InterfaceHandle(created.interface))
    }

    async fn attach_interface(
        &self,
        iface: &InterfaceHandle,
        session: &SessionHandle,
        outbound_tag: &str,
    ) -> Result<(), EngineError> {
        self.call(EngineRequest::AttachInterface {
            interface: iface.0.clone(),
            session_id: session.0.clone(),
            outbound_tag: outbound_tag.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn install_routes(
        &self,
        iface: &InterfaceHandle,
        exclude_address: &str,
    ) -> Result<(), EngineError> {
        self.call(EngineRequest::InstallRoutes {
            interface: iface.0.clone(),
            exclude_address: exclude_address.to_string(),
        })
        .await?
        .into_unit()
    }

    async fn remove_routes(&self, iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.call(EngineRequest::RemoveRoutes {
            interface: iface.0.clone(),
        })
        .await?
        .into_unit()
    }

    async fn detach_interface(&self, iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.call(EngineRequest::DetachInterface {
            interface: iface.0.clone(),
        })
        .await?
        .into_unit()
    }

    async fn close_interface(&self, iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.call(EngineRequest::CloseInterface {
            interface: iface.0.clone(),
        })
        .await?
        .into_unit()
    }

    async fn close_all_interfaces(&self) -> Result<(), EngineError> {
        self.call(EngineRequest::CloseAllInterfaces)
            .await?
            .into_unit()
    }

    async fn fetch_catalog(&self, url: &str) -> Result<Vec<Server>, EngineError> {
        self.call(EngineRequest::FetchCatalog {
            url: url.to_string(),
        })
        .await?
        .into_data()
    }

    async fn version(&self) -> Result<String, EngineError> {
        self.call(EngineRequest::Version).await?.into_data()
    }
}
