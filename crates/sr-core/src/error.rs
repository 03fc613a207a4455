//! Core error types for superray-tui

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the client core
#[derive(Error, Debug)]
pub enum SrError {
    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Operation requires elevated privileges
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A conflicting operation is in flight
    #[error("{0} already in progress")]
    AlreadyInProgress(&'static str),

    /// Server index out of range
    #[error("Invalid selection: index {index} out of range (catalog has {len} servers)")]
    InvalidSelection { index: usize, len: usize },

    /// A supervised task panicked
    #[error("Task '{task}' failed: {message}")]
    TaskFailure { task: String, message: String },

    /// Operation not allowed in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Server protocol the session builder does not know
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Engine-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine could not be reached
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// Engine processed the request and refused it
    #[error("Engine rejected request: {0}")]
    Rejected(String),

    /// Engine did not answer in time
    #[error("Engine timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Reply could not be decoded
    #[error("Engine protocol error: {0}")]
    Protocol(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Result alias used across the client core
pub type Result<T> = std::result::Result<T, SrError>;
