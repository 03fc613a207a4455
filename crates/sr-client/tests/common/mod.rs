//! Shared fixtures for sr-client integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sr_core::config::ClientConfig;
use sr_core::error::EngineError;
use sr_core::traits::{
    CounterReport, InterfaceHandle, InterfaceSpec, PrivilegeProbe, SessionHandle,
    SessionRequest, TagCounters, TagDirection, TrafficCounters,
};
use sr_core::{ProxyEngine, Server};

/// Scriptable in-memory engine
#[derive(Default)]
pub struct MockEngine {
    pub begin_delay: Mutex<Duration>,
    pub begin_error: Mutex<Option<EngineError>>,
    pub fail_create: AtomicBool,
    pub fail_attach: AtomicBool,
    pub fail_routes: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_catalog: AtomicBool,
    /// Number of upcoming counter queries that panic
    pub counter_panics: AtomicUsize,
    pub counters: Mutex<CounterReport>,
    pub catalog: Mutex<Vec<Server>>,
    /// Probe result per address; missing addresses fail
    pub latencies: Mutex<HashMap<String, u32>>,
    pub probe_delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    ended: Mutex<Vec<SessionHandle>>,
    next_session: AtomicUsize,
    counter_queries: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_begin_delay(&self, delay: Duration) {
        *self.begin_delay.lock() = delay;
    }

    pub fn set_counters(&self, upload: u64, download: u64) {
        self.counters.lock().totals = TrafficCounters { upload, download };
    }

    pub fn set_tag(&self, tag: &str, direction: TagDirection, upload: u64, download: u64) {
        let mut report = self.counters.lock();
        report.tags.retain(|t| t.tag != tag);
        report.tags.push(TagCounters {
            tag: tag.to_string(),
            direction,
            counters: TrafficCounters { upload, download },
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn ended(&self) -> Vec<SessionHandle> {
        self.ended.lock().clone()
    }

    pub fn counter_queries(&self) -> usize {
        self.counter_queries.load(Ordering::SeqCst)
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }

    fn failing(flag: &AtomicBool, step: &str) -> Result<(), EngineError> {
        if flag.load(Ordering::SeqCst) {
            Err(EngineError::Rejected(format!("{} refused", step)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProxyEngine for MockEngine {
    async fn begin_session(
        &self,
        _request: &SessionRequest,
    ) -> Result<SessionHandle, EngineError> {
        self.record("begin_session");
        let delay = *self.begin_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.begin_error.lock().clone() {
            return Err(err);
        }
        let n = self.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionHandle(format!("session-{}", n)))
    }

    async fn end_session(&self, session: &SessionHandle) -> Result<(), EngineError> {
        self.record("end_session");
        self.ended.lock().push(session.clone());
        Ok(())
    }

    async fn query_counters(
        &self,
        _session: &SessionHandle,
    ) -> Result<CounterReport, EngineError> {
        self.counter_queries.fetch_add(1, Ordering::SeqCst);
        let panics = self.counter_panics.load(Ordering::SeqCst);
        if panics > 0 {
            self.counter_panics.store(panics - 1, Ordering::SeqCst);
            panic!("counter query exploded");
        }
        Ok(self.counters.lock().clone())
    }

    async fn probe_reachability(
        &self,
        address: &str,
        _port: u16,
        _timeout: Duration,
    ) -> Result<u32, EngineError> {
        let delay = *self.probe_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let latency = self.latencies.lock().get(address).copied();
        latency.ok_or_else(|| EngineError::Unavailable(format!("{} unreachable", address)))
    }

    async fn enable_routing_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<InterfaceHandle, EngineError> {
        self.record("create_interface");
        Self::failing(&self.fail_create, "create")?;
        Ok(InterfaceHandle(spec.name.clone()))
    }

    async fn attach_interface(
        &self,
        _iface: &InterfaceHandle,
        _session: &SessionHandle,
        _outbound_tag: &str,
    ) -> Result<(), EngineError> {
        self.record("attach_interface");
        Self::failing(&self.fail_attach, "attach")
    }

    async fn install_routes(
        &self,
        _iface: &InterfaceHandle,
        _exclude_address: &str,
    ) -> Result<(), EngineError> {
        self.record("install_routes");
        Self::failing(&self.fail_routes, "routes")
    }

    async fn remove_routes(&self, _iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.record("remove_routes");
        Ok(())
    }

    async fn detach_interface(&self, _iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.record("detach_interface");
        Ok(())
    }

    async fn close_interface(&self, _iface: &InterfaceHandle) -> Result<(), EngineError> {
        self.record("close_interface");
        Self::failing(&self.fail_close, "close")
    }

    async fn close_all_interfaces(&self) -> Result<(), EngineError> {
        self.record("close_all_interfaces");
        Ok(())
    }

    async fn fetch_catalog(&self, _url: &str) -> Result<Vec<Server>, EngineError> {
        self.record("fetch_catalog");
        Self::failing(&self.fail_catalog, "subscription")?;
        Ok(self.catalog.lock().clone())
    }

    async fn version(&self) -> Result<String, EngineError> {
        Ok("mock-1.0".to_string())
    }
}

/// Privilege probe with a fixed answer
pub struct FakePrivileges(pub bool);

impl PrivilegeProbe for FakePrivileges {
    fn is_elevated(&self) -> bool {
        self.0
    }
}

pub fn sample_servers() -> Vec<Server> {
    vec![
        Server::new("Tokyo", "vmess", "192.0.2.10", 443),
        Server::new("Osaka", "vless", "192.0.2.11", 443),
        Server::new("Frankfurt", "trojan", "192.0.2.12", 8443),
        Server::new("Singapore", "ss", "192.0.2.13", 8388),
    ]
}

/// Config with GeoIP off so tests never touch the network
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.geoip.enabled = false;
    config
}
