//! Command surface
//!
//! The front end never touches the orchestrator, prober or resolver
//! directly. It hands a [`Command`] to [`Controller::dispatch`], which
//! validates it synchronously and runs the rest as a supervised task.
//! Every rejected or failed command leaves exactly one error line in the
//! activity log.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sr_core::config::ClientConfig;
use sr_core::error::ConfigError;
use sr_core::traits::PrivilegeProbe;
use sr_core::{ConnectionStatus, ProxyEngine, RoutingMode, SrError};

use crate::geoip::GeoIpResolver;
use crate::orchestrator::ConnectionOrchestrator;
use crate::probe::{LatencyProbe, ProbeSummary};
use crate::state::ClientState;
use crate::supervisor::TaskSupervisor;
use crate::telemetry::TelemetryPoller;

/// Requests the front end can make
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(usize),
    /// Connect to the selected entry, switching servers if needed
    ConnectSelected,
    Disconnect,
    ToggleRoutingMode,
    RefreshCatalog,
    SetSubscription(String),
    RunLatencyProbe,
    SelectIndex(usize),
    MoveSelection(isize),
    RequestRedraw,
    Quit,
}

impl Command {
    /// Task name used by the supervisor
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect(_) => "connect",
            Command::ConnectSelected => "connect selected",
            Command::Disconnect => "disconnect",
            Command::ToggleRoutingMode => "toggle routing mode",
            Command::RefreshCatalog => "refresh catalog",
            Command::SetSubscription(_) => "set subscription",
            Command::RunLatencyProbe => "latency probe",
            Command::SelectIndex(_) => "select",
            Command::MoveSelection(_) => "move selection",
            Command::RequestRedraw => "redraw",
            Command::Quit => "quit",
        }
    }

    /// Prefix of the activity line reporting a failure
    fn label(&self) -> &'static str {
        match self {
            Command::Connect(_) | Command::ConnectSelected => "Connect",
            Command::Disconnect => "Disconnect",
            Command::ToggleRoutingMode => "Routing mode switch",
            Command::RefreshCatalog | Command::SetSubscription(_) => "Server list refresh",
            Command::RunLatencyProbe => "Latency test",
            Command::SelectIndex(_) | Command::MoveSelection(_) => "Selection",
            Command::RequestRedraw => "Redraw",
            Command::Quit => "Shutdown",
        }
    }
}

/// Clears the refresh flag however the refresh ends
struct RefreshFlag<'a>(&'a ClientState);

impl Drop for RefreshFlag<'_> {
    fn drop(&mut self) {
        self.0.update(|shared| shared.refresh_running = false);
    }
}

/// Owns the client components and routes commands to them
pub struct Controller {
    state: Arc<ClientState>,
    engine: Arc<dyn ProxyEngine>,
    supervisor: Arc<TaskSupervisor>,
    orchestrator: ConnectionOrchestrator,
    probe: LatencyProbe,
    geoip: Arc<GeoIpResolver>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        config: ClientConfig,
        engine: Arc<dyn ProxyEngine>,
        privileges: Arc<dyn PrivilegeProbe>,
    ) -> Arc<Self> {
        let geoip = Arc::new(GeoIpResolver::new(config.geoip.clone()));
        let state = Arc::new(ClientState::new(config));

        let reporter_state = Arc::clone(&state);
        let supervisor = Arc::new(TaskSupervisor::with_reporter(move |record| {
            reporter_state
                .activity
                .error(format!("Task '{}' failed: {}", record.task, record.message));
        }));

        let orchestrator = ConnectionOrchestrator::new(
            Arc::clone(&state),
            Arc::clone(&engine),
            privileges,
            Arc::clone(&supervisor),
        );
        let probe = LatencyProbe::new(Arc::clone(&state), Arc::clone(&engine));

        Arc::new(Self {
            state,
            engine,
            supervisor,
            orchestrator,
            probe,
            geoip,
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> &Arc<ClientState> {
        &self.state
    }

    pub fn supervisor(&self) -> &Arc<TaskSupervisor> {
        &self.supervisor
    }

    /// Cancelled once `Quit` has finished shutting down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the telemetry poller
    pub fn start_background(&self) -> JoinHandle<Option<()>> {
        let poller = TelemetryPoller::new(
            Arc::clone(&self.state),
            Arc::clone(&self.engine),
            Arc::clone(&self.supervisor),
        );
        self.supervisor
            .spawn("telemetry poller", poller.run(self.cancel.child_token()))
    }

    /// Ask the engine for its version and log it to the activity pane
    pub fn report_engine_version(&self) -> JoinHandle<Option<()>> {
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);
        self.supervisor.spawn("engine version", async move {
            match engine.version().await {
                Ok(version) => state
                    .activity
                    .info(format!("Engine version: {}", version)),
                Err(e) => {
                    tracing::warn!("Engine version query failed: {}", e);
                    state
                        .activity
                        .warn(format!("Could not read engine version: {}", e));
                }
            }
        })
    }

    /// Fire-and-forget entry point for the front end.
    ///
    /// Validation happens before anything is spawned, so a rejected command
    /// never starts a task. Selection changes apply immediately.
    pub fn dispatch(self: &Arc<Self>, command: Command) {
        if let Err(e) = self.precheck(&command) {
            self.report(&command, &e);
            return;
        }

        match command {
            Command::RequestRedraw => self.state.request_redraw(),
            Command::SelectIndex(_) | Command::MoveSelection(_) => {
                if let Err(e) = self.apply_selection(&command) {
                    self.report(&command, &e);
                }
            }
            command => {
                let this = Arc::clone(self);
                let name = command.name();
                self.supervisor.spawn(name, async move {
                    if let Err(e) = this.execute(command.clone()).await {
                        this.report(&command, &e);
                    }
                });
            }
        }
    }

    /// Synchronous validation against the current state
    pub fn precheck(&self, command: &Command) -> Result<(), SrError> {
        let shared = self.state.read();
        let session = &shared.session;
        let len = shared.catalog.len();

        match command {
            Command::Connect(index) => {
                if session.status != ConnectionStatus::Disconnected {
                    return Err(session.transition_error());
                }
                if *index >= len {
                    return Err(SrError::InvalidSelection { index: *index, len });
                }
            }
            Command::ConnectSelected => {
                if session.status.in_transition() {
                    return Err(session.transition_error());
                }
                if shared.catalog.selected().is_none() {
                    return Err(SrError::InvalidSelection { index: 0, len });
                }
            }
            Command::Disconnect => {
                if session.status.in_transition() {
                    return Err(session.transition_error());
                }
            }
            Command::ToggleRoutingMode => {
                if session.status != ConnectionStatus::Disconnected {
                    return Err(SrError::InvalidState(
                        "routing mode can only be changed while disconnected".to_string(),
                    ));
                }
                if session.routing_mode.toggled() == RoutingMode::SystemWide
                    && !self.orchestrator.has_privilege()
                {
                    return Err(SrError::PermissionDenied(
                        "system-wide routing requires root privileges".to_string(),
                    ));
                }
            }
            Command::RefreshCatalog => {
                if shared.subscription_url.is_none() {
                    return Err(ConfigError::MissingField("subscription_url".to_string()).into());
                }
                if shared.refresh_running {
                    return Err(SrError::AlreadyInProgress("catalog refresh"));
                }
            }
            Command::SetSubscription(url) => {
                if url.trim().is_empty() {
                    return Err(ConfigError::Invalid("subscription URL is empty".to_string()).into());
                }
                if shared.refresh_running {
                    return Err(SrError::AlreadyInProgress("catalog refresh"));
                }
            }
            Command::RunLatencyProbe => {
                if shared.probe_running {
                    return Err(SrError::AlreadyInProgress("latency test"));
                }
            }
            Command::SelectIndex(index) => {
                if *index >= len {
                    return Err(SrError::InvalidSelection { index: *index, len });
                }
            }
            Command::MoveSelection(_) | Command::RequestRedraw | Command::Quit => {}
        }
        Ok(())
    }

    /// Run `command` to completion and return its outcome.
    ///
    /// Unlike [`dispatch`](Self::dispatch) nothing is written to the
    /// activity log on failure; the caller decides.
    pub async fn execute(self: &Arc<Self>, command: Command) -> Result<(), SrError> {
        match command {
            Command::Connect(index) => self.orchestrator.connect(index).await,
            Command::ConnectSelected => self.connect_selected().await,
            Command::Disconnect => self.orchestrator.disconnect().await,
            Command::ToggleRoutingMode => self.orchestrator.toggle_routing_mode().await.map(drop),
            Command::RefreshCatalog => self.refresh_catalog().await.map(drop),
            Command::SetSubscription(url) => {
                let url = url.trim().to_string();
                self.state
                    .update(|shared| shared.subscription_url = Some(url.clone()));
                self.state.activity.info(format!("Subscription set to {}", url));
                self.refresh_catalog().await.map(drop)
            }
            Command::RunLatencyProbe => self.run_latency_probe().await.map(drop),
            selection @ (Command::SelectIndex(_) | Command::MoveSelection(_)) => {
                self.apply_selection(&selection)
            }
            Command::RequestRedraw => {
                self.state.request_redraw();
                Ok(())
            }
            Command::Quit => {
                self.quit().await;
                Ok(())
            }
        }
    }

    async fn connect_selected(&self) -> Result<(), SrError> {
        let (target, name, status, active) = {
            let shared = self.state.read();
            let len = shared.catalog.len();
            let selected = shared
                .catalog
                .selected()
                .ok_or(SrError::InvalidSelection { index: 0, len })?;
            (
                selected.key(),
                selected.display_name(),
                shared.session.status,
                shared.session.active_server.as_ref().map(|s| s.key()),
            )
        };

        if status == ConnectionStatus::Connected {
            if active.as_ref() == Some(&target) {
                self.state
                    .activity
                    .info(format!("Already connected to {}", name));
                return Ok(());
            }
            self.state.activity.info(format!("Switching to {}...", name));
            self.orchestrator.disconnect().await?;
        }

        // The catalog may have been re-sorted meanwhile
        let index = {
            let shared = self.state.read();
            let len = shared.catalog.len();
            shared
                .catalog
                .position(&target)
                .ok_or(SrError::InvalidSelection { index: 0, len })?
        };
        self.orchestrator.connect(index).await
    }

    /// Fetch the subscription and replace the catalog. Returns the number
    /// of servers loaded.
    pub async fn refresh_catalog(self: &Arc<Self>) -> Result<usize, SrError> {
        let url = {
            let mut shared = self.state.write();
            let Some(url) = shared.subscription_url.clone() else {
                return Err(ConfigError::MissingField("subscription_url".to_string()).into());
            };
            if shared.refresh_running {
                return Err(SrError::AlreadyInProgress("catalog refresh"));
            }
            shared.refresh_running = true;
            url
        };
        let _running = RefreshFlag(&self.state);
        self.state.activity.info("Refreshing server list...");

        let servers = self.engine.fetch_catalog(&url).await?;
        let count = servers.len();
        self.state.update(|shared| shared.catalog.replace(servers));

        if count == 0 {
            self.state.activity.warn("Subscription returned no servers");
        } else {
            self.state
                .activity
                .success(format!("Loaded {} servers", count));
        }
        self.refresh_geo();
        Ok(count)
    }

    pub async fn run_latency_probe(self: &Arc<Self>) -> Result<ProbeSummary, SrError> {
        let summary = self.probe.run().await?;
        self.refresh_geo();
        Ok(summary)
    }

    fn apply_selection(self: &Arc<Self>, command: &Command) -> Result<(), SrError> {
        let changed = self.state.update(|shared| {
            let before = shared.catalog.selected_index();
            match command {
                Command::SelectIndex(index) => shared.catalog.select(*index)?,
                Command::MoveSelection(delta) => {
                    shared.catalog.move_selection(*delta);
                }
                _ => {}
            }
            Ok::<_, SrError>(before != shared.catalog.selected_index())
        })?;
        if changed {
            self.refresh_geo();
        }
        Ok(())
    }

    /// Look up the selected server's location in the background
    fn refresh_geo(&self) {
        if !self.geoip.enabled() {
            return;
        }
        let geoip = Arc::clone(&self.geoip);
        self.supervisor
            .spawn("geoip lookup", geoip.refresh_selected(Arc::clone(&self.state)));
    }

    async fn quit(&self) {
        self.state.activity.info("Shutting down...");
        self.orchestrator.shutdown().await;
        self.cancel.cancel();
    }

    fn report(&self, command: &Command, error: &SrError) {
        self.state
            .activity
            .error(format!("{} failed: {}", command.label(), error));
    }
}
