//! Relay listeners: the public HTTP frontend and the tunnel port.

pub mod http_frontend;
pub mod tunnel;

pub use http_frontend::FrontendConfig;
