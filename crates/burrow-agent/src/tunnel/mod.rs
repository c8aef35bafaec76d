//! Outbound tunnel connectivity.
//!
//! Provides the persistent relay connection with automatic reconnection,
//! per-frame request handling, and forwarding to the local HTTP service.

pub mod client;
pub mod config;
pub mod error;
pub mod handler;

pub use client::TunnelAgent;
pub use config::{AgentConfig, ReconnectPolicy};
pub use error::AgentError;
pub use handler::RequestForwarder;
