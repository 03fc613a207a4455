//! System-wide routing
//!
//! Enabling system-wide routing is an ordered sequence of engine calls,
//! each gated on the previous one. What happens when a step fails is
//! decided by a per-step [`FailurePolicy`] rather than by ad hoc error
//! handling:
//!
//! | step               | on failure                          |
//! |--------------------|-------------------------------------|
//! | `AcquirePrivilege` | abort, nothing to roll back         |
//! | `CreateInterface`  | abort and roll back                 |
//! | `AttachInterface`  | abort and roll back                 |
//! | `InstallRoutes`    | degrade: keep forwarding, warn      |
//! | teardown steps     | always continue                     |
//!
//! Teardown runs routes, then attachment, then the interface, and never
//! stops early.

use std::fmt;
use std::sync::Arc;

use sr_core::error::EngineError;
use sr_core::traits::{InterfaceHandle, InterfaceSpec, PrivilegeProbe, SessionHandle};
use sr_core::{ProxyEngine, SrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStep {
    AcquirePrivilege,
    CreateInterface,
    AttachInterface,
    InstallRoutes,
    RemoveRoutes,
    DetachInterface,
    CloseInterface,
}

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Undo completed steps and surface the error
    AbortAndRollback,
    /// Keep what is in place, report a degraded success
    DegradeAndContinue,
    /// Log and move on to the next step
    AlwaysContinue,
}

pub const ENABLE_SEQUENCE: [RoutingStep; 4] = [
    RoutingStep::AcquirePrivilege,
    RoutingStep::CreateInterface,
    RoutingStep::AttachInterface,
    RoutingStep::InstallRoutes,
];

pub const DISABLE_SEQUENCE: [RoutingStep; 3] = [
    RoutingStep::RemoveRoutes,
    RoutingStep::DetachInterface,
    RoutingStep::CloseInterface,
];

impl RoutingStep {
    pub fn policy(&self) -> FailurePolicy {
        match self {
            RoutingStep::AcquirePrivilege
            | RoutingStep::CreateInterface
            | RoutingStep::AttachInterface => FailurePolicy::AbortAndRollback,
            RoutingStep::InstallRoutes => FailurePolicy::DegradeAndContinue,
            RoutingStep::RemoveRoutes
            | RoutingStep::DetachInterface
            | RoutingStep::CloseInterface => FailurePolicy::AlwaysContinue,
        }
    }
}

impl fmt::Display for RoutingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoutingStep::AcquirePrivilege => "acquire privilege",
            RoutingStep::CreateInterface => "create interface",
            RoutingStep::AttachInterface => "attach interface",
            RoutingStep::InstallRoutes => "install routes",
            RoutingStep::RemoveRoutes => "remove routes",
            RoutingStep::DetachInterface => "detach interface",
            RoutingStep::CloseInterface => "close interface",
        };
        f.write_str(name)
    }
}

/// Routing resources owned by a connected session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingResources {
    pub interface: InterfaceHandle,
    pub attached: bool,
    pub routes_installed: bool,
}

/// Result of a completed enable sequence
#[derive(Debug, Clone, PartialEq)]
pub enum EnableOutcome {
    /// Every step succeeded
    Active(RoutingResources),
    /// Forwarding is live but routes were not installed
    Degraded {
        resources: RoutingResources,
        error: EngineError,
    },
}

impl EnableOutcome {
    /// The resources to keep, plus the route error if degraded
    pub fn into_parts(self) -> (RoutingResources, Option<EngineError>) {
        match self {
            EnableOutcome::Active(resources) => (resources, None),
            EnableOutcome::Degraded { resources, error } => (resources, Some(error)),
        }
    }
}

/// Partial progress through a sequence
#[derive(Debug, Default)]
struct Progress {
    interface: Option<InterfaceHandle>,
    attached: bool,
    routes_installed: bool,
}

/// Drives the routing sequences against the engine
pub struct SystemRouting {
    engine: Arc<dyn ProxyEngine>,
    privileges: Arc<dyn PrivilegeProbe>,
    spec: InterfaceSpec,
}

impl SystemRouting {
    pub fn new(
        engine: Arc<dyn ProxyEngine>,
        privileges: Arc<dyn PrivilegeProbe>,
        spec: InterfaceSpec,
    ) -> Self {
        Self {
            engine,
            privileges,
            spec,
        }
    }

    /// Whether the process could enable system-wide routing at all
    pub fn has_privilege(&self) -> bool {
        self.privileges.is_elevated()
    }

    /// Route system traffic through `session`, excluding the proxy server's
    /// own address to avoid a loop.
    pub async fn enable(
        &self,
        session: &SessionHandle,
        exclude_address: &str,
    ) -> Result<EnableOutcome, SrError> {
        let mut progress = Progress::default();
        let mut degraded = None;

        for step in ENABLE_SEQUENCE {
            let Err(err) = self
                .run_enable_step(step, &mut progress, session, exclude_address)
                .await
            else {
                continue;
            };

            match step.policy() {
                FailurePolicy::AbortAndRollback => {
                    tracing::warn!(%step, "Routing step failed, rolling back: {}", err);
                    self.teardown(&mut progress).await;
                    return Err(err);
                }
                FailurePolicy::DegradeAndContinue => {
                    tracing::warn!(%step, "Routing step failed, continuing degraded: {}", err);
                    if let SrError::Engine(e) = err {
                        degraded = Some(e);
                    }
                }
                FailurePolicy::AlwaysContinue => {
                    tracing::warn!(%step, "Routing step failed: {}", err);
                }
            }
        }

        let Some(interface) = progress.interface else {
            return Err(SrError::InvalidState(
                "routing sequence finished without an interface".to_string(),
            ));
        };
        let resources = RoutingResources {
            interface,
            attached: progress.attached,
            routes_installed: progress.routes_installed,
        };

        Ok(match degraded {
            None => EnableOutcome::Active(resources),
            Some(error) => EnableOutcome::Degraded { resources, error },
        })
    }

    async fn run_enable_step(
        &self,
        step: RoutingStep,
        progress: &mut Progress,
        session: &SessionHandle,
        exclude_address: &str,
    ) -> Result<(), SrError> {
        match step {
            RoutingStep::AcquirePrivilege => {
                if !self.privileges.is_elevated() {
                    return Err(SrError::PermissionDenied(
                        "system-wide routing requires root privileges".to_string(),
                    ));
                }
            }
            RoutingStep::CreateInterface => {
                let iface = self.engine.enable_routing_interface(&self.spec).await?;
                tracing::info!(interface = %iface, "Created routing interface {}", self.spec.name);
                progress.interface = Some(iface);
            }
            RoutingStep::AttachInterface => {
                let iface = progress.interface.as_ref().ok_or_else(|| {
                    SrError::InvalidState("attach before interface exists".to_string())
                })?;
                self.engine
                    .attach_interface(iface, session, &self.spec.outbound_tag)
                    .await?;
                progress.attached = true;
            }
            RoutingStep::InstallRoutes => {
                let iface = progress.interface.as_ref().ok_or_else(|| {
                    SrError::InvalidState("routes before interface exists".to_string())
                })?;
                self.engine.install_routes(iface, exclude_address).await?;
                progress.routes_installed = true;
            }
            RoutingStep::RemoveRoutes
            | RoutingStep::DetachInterface
            | RoutingStep::CloseInterface => {
                return Err(SrError::InvalidState(format!(
                    "{} is not an enable step",
                    step
                )));
            }
        }
        Ok(())
    }

    /// Tear down `resources`. Best-effort: every failure is logged and the
    /// remaining steps still run. Returns the steps that failed.
    pub async fn disable(&self, resources: RoutingResources) -> Vec<(RoutingStep, EngineError)> {
        let mut progress = Progress {
            interface: Some(resources.interface),
            attached: resources.attached,
            routes_installed: resources.routes_installed,
        };
        self.teardown(&mut progress).await
    }

    async fn teardown(&self, progress: &mut Progress) -> Vec<(RoutingStep, EngineError)> {
        let mut failures = Vec::new();
        let Some(iface) = progress.interface.take() else {
            return failures;
        };

        for step in DISABLE_SEQUENCE {
            debug_assert_eq!(step.policy(), FailurePolicy::AlwaysContinue);
            let result = match step {
                RoutingStep::RemoveRoutes if progress.routes_installed => {
                    self.engine.remove_routes(&iface).await
                }
                RoutingStep::DetachInterface if progress.attached => {
                    self.engine.detach_interface(&iface).await
                }
                RoutingStep::CloseInterface => match self.engine.close_interface(&iface).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        tracing::warn!(interface = %iface, "Close failed, closing all interfaces: {}", e);
                        self.engine.close_all_interfaces().await
                    }
                },
                _ => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(%step, interface = %iface, "Routing teardown step failed: {}", e);
                failures.push((step, e));
            }
        }

        progress.attached = false;
        progress.routes_installed = false;
        tracing::info!(interface = %iface, "Routing interface torn down");
        failures
    }

    /// Close any interface the engine still knows about. Idempotent.
    pub async fn clear_residual(&self) {
        if let Err(e) = self.engine.close_all_interfaces().await {
            tracing::warn!("Residual interface cleanup failed: {}", e);
        }
    }
}
