//! Core trait definitions

mod engine;
mod privilege;

pub use engine::{
    CounterReport, InterfaceHandle, InterfaceSpec, LatencyResult, ProbeTarget, ProxyEngine,
    SessionHandle, SessionRequest, TagCounters, TagDirection, TrafficCounters,
};
pub use privilege::{PrivilegeProbe, SystemPrivileges};
