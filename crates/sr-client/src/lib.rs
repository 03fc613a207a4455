//! sr-client: Client-side orchestration core for superray-tui
//!
//! Drives the proxy engine on behalf of the terminal front end: the
//! connection lifecycle and system-wide routing, traffic telemetry,
//! latency probing, GeoIP lookups and the server catalog. All shared data
//! lives in one [`ClientState`]; all concurrent work runs under the
//! [`TaskSupervisor`].

pub mod activity;
pub mod catalog;
pub mod controller;
pub mod engine;
pub mod geoip;
pub mod orchestrator;
pub mod probe;
pub mod routing;
pub mod session_config;
pub mod state;
pub mod supervisor;
pub mod telemetry;

pub use activity::{ActivityLevel, ActivityLine, ActivityLog};
pub use catalog::ServerCatalog;
pub use controller::{Command, Controller};
pub use engine::EngineClient;
pub use orchestrator::ConnectionOrchestrator;
pub use state::{ClientState, Snapshot};
pub use supervisor::{install_panic_hook, TaskSupervisor};
