//! Burrow Core Library
//!
//! Small pieces shared by both halves of the tunnel:
//! - Minimal HTTP/1.1 wire handling (head parsing, response assembly)
//! - Tracing/logging initialisation

pub mod http;
pub mod tracing_init;

pub use tracing_init::init_tracing;
