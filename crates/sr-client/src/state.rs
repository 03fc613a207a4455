//! Shared client state
//!
//! [`ClientState`] is the single context object every component receives
//! by `Arc`. One `RwLock` guards the session state, the server catalog,
//! telemetry and the GeoIP display field, so that any mutation spanning
//! several of them is observed atomically.
//!
//! # Locking discipline
//!
//! The lock is never held while the engine is called. Callers copy what
//! they need out of a read guard, drop it, call the engine, then apply the
//! result under a fresh write guard after re-validating that the session
//! has not moved on (see [`SessionState::attempt`]). The `parking_lot`
//! guards are not `Send`, which makes holding one across `.await` in a
//! spawned task a compile error.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use sr_core::config::ClientConfig;
use sr_core::traits::{SessionHandle, TagCounters, TrafficCounters};
use sr_core::{ConnectionStatus, RoutingMode, Server, ServerKey, SrError};

use crate::activity::{ActivityLine, ActivityLog};
use crate::catalog::ServerCatalog;
use crate::geoip::GeoInfo;
use crate::routing::RoutingResources;
use crate::telemetry::{RateEstimate, TelemetryState};

/// Session left behind by a previous lifecycle, to be torn down
#[derive(Debug, Clone)]
pub struct DetachedSession {
    pub handle: SessionHandle,
    pub server: Option<Server>,
    pub routing: Option<RoutingResources>,
}

/// Whether we are connected, to whom and in which mode.
///
/// Invariants (checked by [`SessionState::invariants_hold`]):
/// - `active_server` and `session_handle` are set iff `Connected`
/// - `system_routing` is only set while `Connected`
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub status: ConnectionStatus,
    pub routing_mode: RoutingMode,
    pub active_server: Option<Server>,
    pub session_handle: Option<SessionHandle>,
    pub system_routing: Option<RoutingResources>,
    /// Session generation. Bumped whenever a connect or disconnect starts;
    /// work that captured an older value must discard its result.
    pub attempt: u64,
    /// Set once the client starts shutting down; no new connect may begin
    pub closing: bool,
}

impl SessionState {
    pub fn new(routing_mode: RoutingMode) -> Self {
        Self {
            routing_mode,
            ..Default::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Error for a lifecycle request that conflicts with the current status
    pub fn transition_error(&self) -> SrError {
        match self.status {
            ConnectionStatus::Disconnecting => SrError::AlreadyInProgress("disconnect"),
            ConnectionStatus::Connected => SrError::AlreadyInProgress("session"),
            ConnectionStatus::Connecting | ConnectionStatus::Disconnected => {
                SrError::AlreadyInProgress("connect")
            }
        }
    }

    /// Move to `Connecting`. Only allowed from `Disconnected`.
    ///
    /// Returns the new attempt number and whatever stale session was still
    /// recorded, which the caller must tear down.
    pub fn begin_connect(&mut self) -> Result<(u64, Option<DetachedSession>), SrError> {
        if self.closing {
            return Err(SrError::InvalidState("client is shutting down".into()));
        }
        if self.status != ConnectionStatus::Disconnected {
            return Err(self.transition_error());
        }
        self.attempt += 1;
        self.status = ConnectionStatus::Connecting;
        Ok((self.attempt, self.detach()))
    }

    /// Record a successful connect. Returns false if `attempt` is stale,
    /// in which case nothing is changed and the caller owns `handle`.
    pub fn finish_connect(&mut self, attempt: u64, server: Server, handle: SessionHandle) -> bool {
        if self.attempt != attempt || self.status != ConnectionStatus::Connecting {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.active_server = Some(server);
        self.session_handle = Some(handle);
        true
    }

    /// Revert a failed connect to `Disconnected`
    pub fn fail_connect(&mut self, attempt: u64) {
        if self.attempt == attempt && self.status == ConnectionStatus::Connecting {
            self.status = ConnectionStatus::Disconnected;
        }
    }

    /// Move to `Disconnecting` and take ownership of the live session.
    ///
    /// `Ok(None)` means there was nothing to do.
    pub fn begin_disconnect(&mut self) -> Result<Option<DetachedSession>, SrError> {
        match self.status {
            ConnectionStatus::Disconnected => Ok(None),
            ConnectionStatus::Connecting | ConnectionStatus::Disconnecting => {
                Err(self.transition_error())
            }
            ConnectionStatus::Connected => {
                self.attempt += 1;
                self.status = ConnectionStatus::Disconnecting;
                Ok(self.detach())
            }
        }
    }

    pub fn finish_disconnect(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.active_server = None;
        self.session_handle = None;
        self.system_routing = None;
    }

    /// Attach routing resources created for `attempt`. Returns the
    /// resources back if the session has moved on.
    pub fn attach_routing(
        &mut self,
        attempt: u64,
        resources: RoutingResources,
    ) -> Result<(), RoutingResources> {
        if self.attempt == attempt && self.is_connected() {
            self.system_routing = Some(resources);
            Ok(())
        } else {
            Err(resources)
        }
    }

    fn detach(&mut self) -> Option<DetachedSession> {
        let server = self.active_server.take();
        let routing = self.system_routing.take();
        self.session_handle.take().map(|handle| DetachedSession {
            handle,
            server,
            routing,
        })
    }

    pub fn invariants_hold(&self) -> bool {
        let connected = self.is_connected();
        connected == self.active_server.is_some()
            && connected == self.session_handle.is_some()
            && (connected || self.system_routing.is_none())
    }
}

/// Everything behind the lock
#[derive(Debug)]
pub struct Shared {
    pub session: SessionState,
    pub catalog: ServerCatalog,
    pub telemetry: TelemetryState,
    /// GeoIP result for the server it was resolved for
    pub geo: Option<(ServerKey, GeoInfo)>,
    pub subscription_url: Option<String>,
    /// Set while a probe batch runs; only one batch at a time
    pub probe_running: bool,
    /// Set while a catalog refresh runs
    pub refresh_running: bool,
}

/// Read-only copy of the state handed to rendering
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub routing_mode: RoutingMode,
    pub active_server: Option<Server>,
    pub routing_active: bool,
    pub servers: Vec<Server>,
    pub selected_index: Option<usize>,
    pub rate: RateEstimate,
    pub totals: TrafficCounters,
    /// Per inbound/outbound counters, empty unless connected
    pub connections: Vec<TagCounters>,
    pub download_history: Vec<f64>,
    pub geo: Option<GeoInfo>,
    pub subscription_url: Option<String>,
    pub probe_running: bool,
    pub local_port: u16,
    pub activity: Vec<ActivityLine>,
}

impl Snapshot {
    pub fn selected(&self) -> Option<&Server> {
        self.selected_index.and_then(|i| self.servers.get(i))
    }

    /// Whether the selection differs from the active server
    pub fn selection_pending(&self) -> bool {
        match (self.active_server.as_ref(), self.selected()) {
            (Some(active), Some(selected)) => active.key() != selected.key(),
            _ => false,
        }
    }
}

/// Context object shared by every component
pub struct ClientState {
    pub config: ClientConfig,
    inner: RwLock<Shared>,
    pub activity: ActivityLog,
    redraw: watch::Sender<u64>,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        let shared = Shared {
            session: SessionState::new(config.routing_mode),
            catalog: ServerCatalog::new(),
            telemetry: TelemetryState::new(config.history_capacity),
            geo: None,
            subscription_url: config.subscription_url.clone(),
            probe_running: false,
            refresh_running: false,
        };
        let (redraw, _) = watch::channel(0);
        Self {
            config,
            inner: RwLock::new(shared),
            activity: ActivityLog::default(),
            redraw,
        }
    }

    /// Shared view
    pub fn read(&self) -> RwLockReadGuard<'_, Shared> {
        self.inner.read()
    }

    /// Exclusive view. Prefer [`update`](Self::update), which also
    /// signals a redraw.
    pub fn write(&self) -> RwLockWriteGuard<'_, Shared> {
        self.inner.write()
    }

    /// Mutate under the exclusive lock, then signal a redraw
    pub fn update<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let result = {
            let mut shared = self.inner.write();
            f(&mut shared)
        };
        self.request_redraw();
        result
    }

    pub fn request_redraw(&self) {
        self.redraw.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Receiver that changes whenever a redraw is requested
    pub fn subscribe_redraw(&self) -> watch::Receiver<u64> {
        self.redraw.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        let shared = self.inner.read();
        let selected_key = shared.catalog.selected().map(Server::key);
        let geo = match (&shared.geo, &selected_key) {
            (Some((key, info)), Some(selected)) if key == selected => Some(info.clone()),
            _ => None,
        };
        Snapshot {
            status: shared.session.status,
            routing_mode: shared.session.routing_mode,
            active_server: shared.session.active_server.clone(),
            routing_active: shared.session.system_routing.is_some(),
            servers: shared.catalog.servers().to_vec(),
            selected_index: shared.catalog.selected_index(),
            rate: shared.telemetry.rate,
            totals: shared.telemetry.totals,
            connections: shared.telemetry.connections.clone(),
            download_history: shared.telemetry.history.download_rates(),
            geo,
            subscription_url: shared.subscription_url.clone(),
            probe_running: shared.probe_running,
            local_port: self.config.local_port,
            activity: self.activity.lines(),
        }
    }
}
