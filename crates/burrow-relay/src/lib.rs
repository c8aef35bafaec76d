//! Burrow Relay Server Library
//!
//! The publicly reachable half of the tunnel:
//! - Public HTTP/1.1 frontend that wraps each request in a signed frame
//! - Tunnel listener speaking the framed back-channel protocol
//! - In-memory registry of live tunnel clients with liveness eviction
//! - Request router correlating response frames to waiting connections

pub mod registry;
pub mod router;
pub mod server;
