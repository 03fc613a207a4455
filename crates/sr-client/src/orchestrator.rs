//! Connection lifecycle
//!
//! [`ConnectionOrchestrator`] drives `Disconnected -> Connecting ->
//! Connected -> Disconnecting -> Disconnected`. Lifecycle operations are
//! mutually exclusive through the status check in [`SessionState`]; a
//! request that arrives mid-transition is rejected, never queued.
//!
//! Errors are returned to the caller, which owns reporting them. Progress
//! and teardown warnings go to the activity log from here.
//!
//! [`SessionState`]: crate::state::SessionState

use std::sync::Arc;

use tokio::sync::oneshot;

use sr_core::error::EngineError;
use sr_core::traits::{PrivilegeProbe, SessionHandle, SessionRequest};
use sr_core::{ConnectionStatus, ProxyEngine, RoutingMode, Server, SrError};

use crate::routing::SystemRouting;
use crate::session_config::SessionConfigBuilder;
use crate::state::{ClientState, DetachedSession};
use crate::supervisor::TaskSupervisor;
use crate::telemetry::RateEstimate;

pub struct ConnectionOrchestrator {
    state: Arc<ClientState>,
    engine: Arc<dyn ProxyEngine>,
    routing: SystemRouting,
    supervisor: Arc<TaskSupervisor>,
}

impl ConnectionOrchestrator {
    pub fn new(
        state: Arc<ClientState>,
        engine: Arc<dyn ProxyEngine>,
        privileges: Arc<dyn PrivilegeProbe>,
        supervisor: Arc<TaskSupervisor>,
    ) -> Self {
        let routing = SystemRouting::new(
            Arc::clone(&engine),
            privileges,
            state.config.routing.interface_spec(),
        );
        Self {
            state,
            engine,
            routing,
            supervisor,
        }
    }

    pub fn has_privilege(&self) -> bool {
        self.routing.has_privilege()
    }

    /// Connect to the catalog entry at `index`.
    ///
    /// Fails with `AlreadyInProgress` unless disconnected. In system-wide
    /// mode a routing failure is reported but leaves the proxy session up,
    /// so this still returns `Ok`.
    pub async fn connect(&self, index: usize) -> Result<(), SrError> {
        let (server, mode, attempt, stale) = {
            let mut shared = self.state.write();
            if shared.session.status != ConnectionStatus::Disconnected {
                return Err(shared.session.transition_error());
            }
            let len = shared.catalog.len();
            let server = shared
                .catalog
                .get(index)
                .cloned()
                .ok_or(SrError::InvalidSelection { index, len })?;
            let mode = shared.session.routing_mode;
            let (attempt, stale) = shared.session.begin_connect()?;
            (server, mode, attempt, stale)
        };
        self.state.request_redraw();
        self.state
            .activity
            .info(format!("Connecting to {}...", server.display_name()));

        if let Some(stale) = stale {
            tracing::info!(session = %stale.handle, "Tearing down stale session");
            self.teardown(stale).await;
        }

        let request = match SessionConfigBuilder::new(&self.state.config).request(&server, mode) {
            Ok(request) => request,
            Err(e) => {
                self.state.update(|shared| shared.session.fail_connect(attempt));
                return Err(e);
            }
        };

        let handle = match self.begin_session_bounded(request).await {
            Ok(handle) => handle,
            Err(e) => {
                self.state.update(|shared| shared.session.fail_connect(attempt));
                return Err(e.into());
            }
        };

        let recorded = self.state.update(|shared| {
            let recorded = shared
                .session
                .finish_connect(attempt, server.clone(), handle.clone());
            if recorded {
                shared.telemetry.reset();
            }
            recorded
        });
        if !recorded {
            self.end_session(&handle).await;
            return Err(SrError::InvalidState(
                "session changed while connecting".to_string(),
            ));
        }

        tracing::info!(session = %handle, server = %server.key(), "Session established");
        self.state.activity.success(format!(
            "Connected to {} | SOCKS5: 127.0.0.1:{} | HTTP: 127.0.0.1:{}",
            server.display_name(),
            self.state.config.local_port,
            self.state.config.http_port()
        ));

        if mode == RoutingMode::SystemWide {
            self.enable_system_routing(attempt, &handle, &server).await;
        }
        Ok(())
    }

    /// Start a session with a hard deadline.
    ///
    /// The engine call runs in its own supervised task. If the deadline
    /// passes first the result channel is closed; a session that still
    /// comes up afterwards is ended instead of being recorded.
    async fn begin_session_bounded(
        &self,
        request: SessionRequest,
    ) -> Result<SessionHandle, EngineError> {
        let (tx, mut rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        self.supervisor.spawn("begin session", async move {
            let result = engine.begin_session(&request).await;
            if let Err(Ok(late)) = tx.send(result) {
                tracing::warn!(session = %late, "Session started after connect gave up, ending it");
                if let Err(e) = engine.end_session(&late).await {
                    tracing::warn!(session = %late, "Failed to end late session: {}", e);
                }
            }
        });

        let deadline = self.state.config.connect_timeout;
        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Unavailable(
                "session task ended without a result".to_string(),
            )),
            Err(_) => {
                rx.close();
                // Sent between the deadline and close()
                if let Ok(Ok(late)) = rx.try_recv() {
                    self.spawn_end_session(late);
                }
                Err(EngineError::Timeout(deadline))
            }
        }
    }

    async fn enable_system_routing(&self, attempt: u64, handle: &SessionHandle, server: &Server) {
        let outcome = match self.routing.enable(handle, &server.address).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state.activity.warn(format!(
                    "System-wide routing failed: {}; proxy remains available on 127.0.0.1:{}",
                    e, self.state.config.local_port
                ));
                return;
            }
        };

        let (resources, degraded) = outcome.into_parts();

        let attached = self
            .state
            .update(|shared| shared.session.attach_routing(attempt, resources));
        if let Err(resources) = attached {
            tracing::info!("Session ended while routing was being enabled, rolling back");
            self.routing.disable(resources).await;
            return;
        }

        match degraded {
            None => self.state.activity.success(format!(
                "System-wide routing active via {}",
                self.state.config.routing.interface_name
            )),
            Some(e) => self.state.activity.warn(format!(
                "Routing interface is up but routes failed: {}; routes may need manual configuration",
                e
            )),
        }
    }

    /// Disconnect the live session.
    ///
    /// A no-op when already disconnected. Routing teardown and session
    /// shutdown are best-effort; the status always ends `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), SrError> {
        let Some(detached) = self
            .state
            .update(|shared| shared.session.begin_disconnect())?
        else {
            return Ok(());
        };

        let name = detached
            .server
            .as_ref()
            .map(Server::display_name)
            .unwrap_or_else(|| detached.handle.to_string());
        self.state
            .activity
            .info(format!("Disconnecting from {}...", name));

        self.teardown(detached).await;

        self.state.update(|shared| {
            shared.session.finish_disconnect();
            shared.telemetry.rate = RateEstimate::default();
            shared.telemetry.connections.clear();
        });
        self.state.activity.success("Disconnected");
        Ok(())
    }

    async fn teardown(&self, detached: DetachedSession) {
        if let Some(resources) = detached.routing {
            for (step, e) in self.routing.disable(resources).await {
                self.state
                    .activity
                    .warn(format!("Routing cleanup: {} failed: {}", step, e));
            }
        }
        self.end_session(&detached.handle).await;
    }

    async fn end_session(&self, handle: &SessionHandle) {
        let limit = self.state.config.teardown_timeout;
        match tokio::time::timeout(limit, self.engine.end_session(handle)).await {
            Ok(Ok(())) => tracing::info!(session = %handle, "Session ended"),
            Ok(Err(e)) => self
                .state
                .activity
                .warn(format!("Failed to stop session cleanly: {}", e)),
            Err(_) => self
                .state
                .activity
                .warn(format!("Stopping session timed out after {:?}", limit)),
        }
    }

    fn spawn_end_session(&self, handle: SessionHandle) {
        let engine = Arc::clone(&self.engine);
        self.supervisor.spawn("end late session", async move {
            tracing::warn!(session = %handle, "Ending session that started after the deadline");
            if let Err(e) = engine.end_session(&handle).await {
                tracing::warn!(session = %handle, "Failed to end late session: {}", e);
            }
        });
    }

    /// Switch between direct-proxy and system-wide routing.
    ///
    /// Only allowed while disconnected. Entering system-wide mode needs
    /// elevated privileges; leaving it clears leftover interfaces.
    pub async fn toggle_routing_mode(&self) -> Result<RoutingMode, SrError> {
        let current = {
            let shared = self.state.read();
            if shared.session.status != ConnectionStatus::Disconnected {
                return Err(SrError::InvalidState(
                    "routing mode can only be changed while disconnected".to_string(),
                ));
            }
            shared.session.routing_mode
        };
        let next = current.toggled();
        if next == RoutingMode::SystemWide && !self.routing.has_privilege() {
            return Err(SrError::PermissionDenied(
                "system-wide routing requires root privileges".to_string(),
            ));
        }

        self.state.update(|shared| {
            if shared.session.status != ConnectionStatus::Disconnected
                || shared.session.routing_mode != current
            {
                return Err(SrError::InvalidState(
                    "session changed while switching routing mode".to_string(),
                ));
            }
            shared.session.routing_mode = next;
            Ok(())
        })?;

        if current == RoutingMode::SystemWide {
            self.routing.clear_residual().await;
        }
        self.state
            .activity
            .success(format!("Routing mode: {} ({})", next, next.label()));
        Ok(next)
    }

    /// Release everything before the process exits.
    ///
    /// New connects are refused from here on. A transition already in
    /// flight is allowed to settle first so that a session finishing
    /// mid-shutdown is still ended.
    pub async fn shutdown(&self) {
        self.state.update(|shared| shared.session.closing = true);
        if !self.wait_until_settled().await {
            tracing::warn!("Session still in transition at shutdown");
        }
        if let Err(e) = self.disconnect().await {
            tracing::warn!("Disconnect during shutdown failed: {}", e);
        }
        let mode = self.state.read().session.routing_mode;
        if mode == RoutingMode::SystemWide {
            self.routing.clear_residual().await;
        }
    }

    /// Wait for `Connecting` or `Disconnecting` to resolve. Returns false
    /// if it did not within the connect and teardown timeouts.
    async fn wait_until_settled(&self) -> bool {
        let mut changes = self.state.subscribe_redraw();
        let config = &self.state.config;
        let limit = config.connect_timeout + config.teardown_timeout * 2;
        let settled = async {
            loop {
                let busy = self.state.read().session.status.in_transition();
                if !busy {
                    return;
                }
                if changes.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::time::timeout(limit, settled).await.is_ok()
    }
}
