//! Engine adapters

mod client;

pub use client::{EngineClient, DEFAULT_REQUEST_TIMEOUT};
