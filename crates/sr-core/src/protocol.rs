//! Engine control protocol
//!
//! JSON-encoded messages over TCP on localhost, one request per
//! connection. Each message is a single line terminated by `\n`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::EngineError;
use crate::traits::InterfaceSpec;

/// Request from the client to the engine daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineRequest {
    /// Start a session from a configuration document
    BeginSession { config: serde_json::Value },

    /// Stop a session
    EndSession { session_id: String },

    /// Cumulative traffic counters
    QueryCounters { session_id: String },

    /// Single latency probe
    Probe {
        address: String,
        port: u16,
        timeout_ms: u64,
    },

    /// Create the virtual interface
    CreateInterface(InterfaceSpec),

    /// Connect an interface to a session outbound
    AttachInterface {
        interface: String,
        session_id: String,
        outbound_tag: String,
    },

    /// Install system routes into an interface
    InstallRoutes {
        interface: String,
        exclude_address: String,
    },

    /// Remove system routes
    RemoveRoutes { interface: String },

    /// Stop forwarding interface traffic
    DetachInterface { interface: String },

    /// Destroy one interface
    CloseInterface { interface: String },

    /// Destroy all interfaces
    CloseAllInterfaces,

    /// Fetch and parse a subscription
    FetchCatalog { url: String },

    /// Engine version
    Version,
}

/// Payload of a successful `begin_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStarted {
    pub session_id: String,
}

/// Payload of a successful `create_interface`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceCreated {
    pub interface: String,
}

/// Payload of a successful `probe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReply {
    pub latency_ms: u32,
}

/// Reply envelope from the engine daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineReply {
    /// Successful reply carrying `data`
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
        }
    }

    /// Successful reply with no payload
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// Failed reply
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Turn the envelope into a result, ignoring any payload
    pub fn into_unit(self) -> Result<(), EngineError> {
        if self.success {
            Ok(())
        } else {
            Err(EngineError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Turn the envelope into a result, decoding the payload as `T`
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, EngineError> {
        if !self.success {
            return Err(EngineError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        let data = self
            .data
            .ok_or_else(|| EngineError::Protocol("reply has no data".to_string()))?;
        serde_json::from_value(data).map_err(|e| EngineError::Protocol(e.to_string()))
    }
}
