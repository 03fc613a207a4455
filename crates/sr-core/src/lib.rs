//! sr-core: Core abstractions and configuration for superray-tui
//!
//! This crate provides the shared domain types, the proxy engine contract,
//! the engine control protocol and configuration structures used by the
//! client core and the terminal front end.

pub mod config;
pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{ConfigError, EngineError, SrError};
pub use traits::{ProxyEngine, SessionHandle};
pub use types::{ConnectionStatus, Latency, RoutingMode, Server, ServerKey};
